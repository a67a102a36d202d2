use serde_json::{Map, Value};

/// A record is a JSON object: field name → value. Shapes are enforced by
/// the metadata registry, not by the Rust type system.
pub type Record = Map<String, Value>;

/// Reserved system fields, stamped by the repository on write. They are
/// semantically present on every object even when its definition does
/// not list them.
pub const ID_FIELD: &str = "_id";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";
pub const CREATED_BY_FIELD: &str = "created_by";
pub const UPDATED_BY_FIELD: &str = "updated_by";
pub const SPACE_ID_FIELD: &str = "space_id";

pub const SYSTEM_FIELDS: [&str; 6] = [
    ID_FIELD,
    CREATED_AT_FIELD,
    UPDATED_AT_FIELD,
    CREATED_BY_FIELD,
    UPDATED_BY_FIELD,
    SPACE_ID_FIELD,
];

/// The `_id` of a record, when present and a string.
pub fn record_id(record: &Record) -> Option<&str> {
    record.get(ID_FIELD).and_then(Value::as_str)
}

/// Coerce a JSON value into a [`Record`], rejecting non-objects.
pub fn record_from_value(value: Value) -> Result<Record, crate::Error> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(crate::Error::validation(format!(
            "expected a record object, got {other}"
        ))),
    }
}
