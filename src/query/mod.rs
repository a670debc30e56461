//! Predicate engine: filter, sort, project, update, count, and validate
//! over serialized JSON.
//!
//! Every entry point takes JSON text in and hands JSON text (or a scalar)
//! back, holding no state between calls. The controller passes in a
//! snapshot of a collection and receives the full result, which keeps this
//! module trivially thread-safe and swappable.
//!
//! Queries are objects whose keys are matched with implicit AND. A value
//! that is itself an object is an operator clause (`{"age": {"$gt": 18}}`,
//! see [`operators`]); any other value is a structural equality check.

pub mod operators;

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// True when the document satisfies every clause of the query.
fn matches(doc: &Value, query: &Value) -> bool {
    let Some(clauses) = query.as_object() else {
        return true;
    };
    for (key, expected) in clauses {
        let actual = doc.get(key).unwrap_or(&Value::Null);
        match expected.as_object() {
            Some(ops) => {
                for (op, target) in ops {
                    if !operators::evaluate(op, actual, target) {
                        return false;
                    }
                }
            }
            None => {
                if actual != expected {
                    return false;
                }
            }
        }
    }
    true
}

/// Orders two JSON values for sorting: strings lexicographically, numbers
/// numerically, booleans false-first. Disparate types compare equal so the
/// sort stays stable on mixed data.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    if let (Some(a), Some(b)) = (a.as_str(), b.as_str()) {
        return a.cmp(b);
    }
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    if let (Some(a), Some(b)) = (a.as_bool(), b.as_bool()) {
        return a.cmp(&b);
    }
    Ordering::Equal
}

/// Applies an inclusion projection. `_id` rides along implicitly unless the
/// projection suppresses it with `0`/`false`. An empty projection returns
/// the document unchanged.
fn apply_projection(doc: &Value, projection: &Value) -> Value {
    let (Some(doc_obj), Some(proj_obj)) = (doc.as_object(), projection.as_object()) else {
        return doc.clone();
    };
    if proj_obj.is_empty() {
        return doc.clone();
    }

    let mut projected = Map::new();
    for (key, flag) in proj_obj {
        if flag.as_i64() == Some(1) || flag.as_bool() == Some(true) {
            if let Some(value) = doc_obj.get(key) {
                projected.insert(key.clone(), value.clone());
            }
        }
    }

    if !projected.contains_key("_id") && doc_obj.contains_key("_id") {
        let excluded = proj_obj
            .get("_id")
            .is_some_and(|v| v.as_i64() == Some(0) || v.as_bool() == Some(false));
        if !excluded {
            projected.insert("_id".to_string(), doc_obj["_id"].clone());
        }
    }

    Value::Object(projected)
}

fn parse_array(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or(Value::Array(Vec::new()))
}

fn parse_object(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or(Value::Object(Map::new()))
}

/// Validates a document against a schema with a `required` field list and
/// per-field `{type, min, max, enum}` rules.
///
/// Fails open: unparseable inputs and unknown type names validate as true,
/// since malformed frames are rejected upstream.
pub fn validate(doc_text: &str, schema_text: &str) -> bool {
    let doc = parse_object(doc_text);
    let schema = parse_object(schema_text);
    let (Some(doc_obj), Some(_)) = (doc.as_object(), schema.as_object()) else {
        return true;
    };

    if let Some(required) = schema["required"].as_array() {
        for field in required.iter().filter_map(Value::as_str) {
            if !doc_obj.contains_key(field) {
                return false;
            }
        }
    }

    if let Some(fields) = schema["fields"].as_object() {
        for (field, rules) in fields {
            let Some(value) = doc_obj.get(field) else {
                continue;
            };

            if let Some(expected) = rules["type"].as_str() {
                let type_ok = match expected {
                    "string" => value.is_string(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !type_ok {
                    return false;
                }
            }

            if let (Some(min), Some(v)) = (rules["min"].as_f64(), value.as_f64()) {
                if v < min {
                    return false;
                }
            }
            if let (Some(max), Some(v)) = (rules["max"].as_f64(), value.as_f64()) {
                if v > max {
                    return false;
                }
            }
            if let Some(allowed) = rules["enum"].as_array() {
                if !allowed.contains(value) {
                    return false;
                }
            }
        }
    }

    true
}

/// Counts documents matching the query.
pub fn count(data_text: &str, query_text: &str) -> usize {
    let data = parse_array(data_text);
    let query = parse_object(query_text);

    data.as_array()
        .map(|docs| docs.iter().filter(|doc| matches(doc, &query)).count())
        .unwrap_or(0)
}

/// Filter, sort, paginate, and project a collection snapshot.
///
/// `limit == 0` means unbounded. Sort keys map to `1` (ascending) or `-1`
/// (descending) and apply in declaration order.
pub fn find(
    data_text: &str,
    query_text: &str,
    sort_text: &str,
    projection_text: &str,
    limit: usize,
    skip: usize,
) -> String {
    let data = parse_array(data_text);
    let query = parse_object(query_text);
    let sort = parse_object(sort_text);
    let projection = parse_object(projection_text);

    let mut results: Vec<Value> = data
        .as_array()
        .map(|docs| docs.iter().filter(|doc| matches(doc, &query)).cloned().collect())
        .unwrap_or_default();

    if let Some(sort_obj) = sort.as_object() {
        if !sort_obj.is_empty() {
            results.sort_by(|a, b| {
                for (key, direction) in sort_obj {
                    let cmp = compare_values(
                        a.get(key).unwrap_or(&Value::Null),
                        b.get(key).unwrap_or(&Value::Null),
                    );
                    if cmp != Ordering::Equal {
                        return if direction.as_i64() == Some(-1) {
                            cmp.reverse()
                        } else {
                            cmp
                        };
                    }
                }
                Ordering::Equal
            });
        }
    }

    if skip >= results.len() {
        return "[]".to_string();
    }
    let end = if limit > 0 {
        (skip + limit).min(results.len())
    } else {
        results.len()
    };

    let projected: Vec<Value> = results[skip..end]
        .iter()
        .map(|doc| apply_projection(doc, &projection))
        .collect();

    serde_json::to_string(&projected).unwrap_or_else(|_| "[]".to_string())
}

/// Applies an update to every matching document and returns the entire
/// collection, modified documents included.
///
/// `{"$set": {...}}` merges the wrapped fields; bare keys assign directly.
/// Other `$`-prefixed operators are ignored, and `_id` is immutable either
/// way.
pub fn update(data_text: &str, query_text: &str, update_text: &str) -> String {
    let mut data = parse_array(data_text);
    let query = parse_object(query_text);
    let update = parse_object(update_text);

    if let (Some(docs), Some(update_obj)) = (data.as_array_mut(), update.as_object()) {
        for doc in docs.iter_mut().filter(|doc| matches(doc, &query)) {
            let Some(doc_obj) = doc.as_object_mut() else {
                continue;
            };
            for (key, value) in update_obj {
                if key == "$set" {
                    if let Some(fields) = value.as_object() {
                        for (k, v) in fields.iter().filter(|(k, _)| *k != "_id") {
                            doc_obj.insert(k.clone(), v.clone());
                        }
                    }
                } else if !key.starts_with('$') && key != "_id" {
                    doc_obj.insert(key.clone(), value.clone());
                }
            }
        }
    }

    serde_json::to_string(&data).unwrap_or_else(|_| "[]".to_string())
}

/// Returns the collection with every matching document removed.
pub fn delete(data_text: &str, query_text: &str) -> String {
    let mut data = parse_array(data_text);
    let query = parse_object(query_text);

    if let Some(docs) = data.as_array_mut() {
        docs.retain(|doc| !matches(doc, &query));
    }

    serde_json::to_string(&data).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PEOPLE: &str = r#"[
        {"_id":"1","name":"ada","age":36,"active":true},
        {"_id":"2","name":"bob","age":17,"active":false},
        {"_id":"3","name":"cyd","age":54,"active":true}
    ]"#;

    fn parsed(result: &str) -> Vec<Value> {
        serde_json::from_str(result).unwrap()
    }

    #[test]
    fn test_find_equality() {
        let result = parsed(&find(PEOPLE, r#"{"active":true}"#, "{}", "{}", 0, 0));
        assert_eq!(result.len(), 2);
        assert_eq!(result[0]["name"], "ada");
        assert_eq!(result[1]["name"], "cyd");
    }

    #[test]
    fn test_find_operator_clause() {
        let result = parsed(&find(PEOPLE, r#"{"age":{"$gt":18}}"#, "{}", "{}", 0, 0));
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_find_sort_descending() {
        let result = parsed(&find(PEOPLE, "{}", r#"{"age":-1}"#, "{}", 0, 0));
        let ages: Vec<i64> = result.iter().map(|d| d["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![54, 36, 17]);
    }

    #[test]
    fn test_find_pagination() {
        let result = parsed(&find(PEOPLE, "{}", r#"{"age":1}"#, "{}", 1, 1));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["name"], "ada");

        // Skip past the end yields the empty array, not an error.
        assert_eq!(find(PEOPLE, "{}", "{}", "{}", 0, 10), "[]");
    }

    #[test]
    fn test_find_projection_keeps_id() {
        let result = parsed(&find(PEOPLE, r#"{"_id":"1"}"#, "{}", r#"{"name":1}"#, 0, 0));
        assert_eq!(result[0], json!({"_id": "1", "name": "ada"}));
    }

    #[test]
    fn test_find_projection_can_drop_id() {
        let result = parsed(&find(
            PEOPLE,
            r#"{"_id":"1"}"#,
            "{}",
            r#"{"name":1,"_id":0}"#,
            0,
            0,
        ));
        assert_eq!(result[0], json!({"name": "ada"}));
    }

    #[test]
    fn test_count() {
        assert_eq!(count(PEOPLE, "{}"), 3);
        assert_eq!(count(PEOPLE, r#"{"age":{"$lt":18}}"#), 1);
        assert_eq!(count(PEOPLE, r#"{"name":"zed"}"#), 0);
        assert_eq!(count("not json", "{}"), 0);
    }

    #[test]
    fn test_update_direct_assignment() {
        let result = parsed(&update(PEOPLE, r#"{"name":"bob"}"#, r#"{"age":18}"#));
        assert_eq!(result[1]["age"], 18);
        assert_eq!(result[0]["age"], 36); // untouched
        assert_eq!(result.len(), 3); // full collection comes back
    }

    #[test]
    fn test_update_set_operator() {
        let result = parsed(&update(
            PEOPLE,
            r#"{"active":true}"#,
            r#"{"$set":{"tier":"gold"}}"#,
        ));
        assert_eq!(result[0]["tier"], "gold");
        assert_eq!(result[2]["tier"], "gold");
        assert!(result[1].get("tier").is_none());
    }

    #[test]
    fn test_update_id_immutable() {
        let result = parsed(&update(
            PEOPLE,
            r#"{"name":"ada"}"#,
            r#"{"_id":"hijack","$set":{"_id":"hijack"}}"#,
        ));
        assert_eq!(result[0]["_id"], "1");
    }

    #[test]
    fn test_delete_retains_non_matching() {
        let result = parsed(&delete(PEOPLE, r#"{"active":false}"#));
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|d| d["active"] == true));
    }

    #[test]
    fn test_validate_required() {
        let schema = r#"{"required":["name"]}"#;
        assert!(validate(r#"{"name":"x"}"#, schema));
        assert!(!validate(r#"{"age":1}"#, schema));
    }

    #[test]
    fn test_validate_types_and_ranges() {
        let schema = r#"{"fields":{"age":{"type":"number","min":0,"max":150}}}"#;
        assert!(validate(r#"{"age":30}"#, schema));
        assert!(!validate(r#"{"age":"thirty"}"#, schema));
        assert!(!validate(r#"{"age":-1}"#, schema));
        assert!(!validate(r#"{"age":200}"#, schema));
        // Field absent from the document passes field-level rules.
        assert!(validate(r#"{"name":"x"}"#, schema));
    }

    #[test]
    fn test_validate_enum() {
        let schema = r#"{"fields":{"role":{"enum":["admin","user"]}}}"#;
        assert!(validate(r#"{"role":"user"}"#, schema));
        assert!(!validate(r#"{"role":"root"}"#, schema));
    }

    #[test]
    fn test_validate_fails_open_on_garbage() {
        assert!(validate("not json", "also not json"));
    }
}
