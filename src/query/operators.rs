use serde_json::Value;

/// Evaluates one `$`-operator condition against a document field.
///
/// Equality operators use structural JSON equality; range operators require
/// both sides to be numeric and unify integers and floats through `f64`.
/// Unknown operators and mixed-type range comparisons evaluate to false.
pub fn evaluate(op: &str, field: &Value, target: &Value) -> bool {
    match op {
        "$eq" => field == target,
        "$ne" => field != target,
        "$gt" => compare_f64(field, target, |a, b| a > b),
        "$lt" => compare_f64(field, target, |a, b| a < b),
        "$gte" => compare_f64(field, target, |a, b| a >= b),
        "$lte" => compare_f64(field, target, |a, b| a <= b),
        _ => false,
    }
}

#[inline]
fn compare_f64<F>(a: &Value, b: &Value, op: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}
