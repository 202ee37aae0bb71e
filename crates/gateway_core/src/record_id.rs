use serde_json::{Map, Value};

use crate::error::GatewayError;

pub const PARTITION_KEY_FIELD: &str = "PK";
pub const SORT_KEY_FIELD: &str = "SK";
/// Store-level identity field. Derived, never taken from the caller.
pub const IDENTITY_FIELD: &str = "id";

/// Derives the stored identity of a record from its `PK` and `SK` fields.
///
/// The key is `lower(PK ~ SK)` with every character outside `[0-9a-z]`
/// replaced by `_`, so equal `(PK, SK)` pairs always land on the same
/// stored document.
pub fn record_identity(record: &Map<String, Value>) -> Result<String, GatewayError> {
    let pk = key_text(record, PARTITION_KEY_FIELD)?;
    let sk = key_text(record, SORT_KEY_FIELD)?;

    Ok(format!("{pk}~{sk}")
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '0'..='9' | 'a'..='z' => c,
            _ => '_',
        })
        .collect())
}

/// Overwrites the record's identity field with the derived identity and
/// returns it.
pub fn stamp_identity(record: &mut Map<String, Value>) -> Result<String, GatewayError> {
    let id = record_identity(record)?;
    record.insert(IDENTITY_FIELD.to_string(), Value::String(id.clone()));
    Ok(id)
}

fn key_text(record: &Map<String, Value>, field: &'static str) -> Result<String, GatewayError> {
    match record.get(field) {
        None | Some(Value::Null) => Err(GatewayError::MissingKey(field)),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(other) => Ok(other.to_string()),
    }
}
