use uuid::Uuid;

/// Generates an RFC 4122 version 4 UUID in canonical hyphenated form.
///
/// Document identifiers are assigned on insert when the caller did not
/// provide an `_id` of their own.
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}
