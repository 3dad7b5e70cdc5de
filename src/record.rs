//! The persisted result of one extraction.
//!
//! A record is keyed by a SHA-256 of `bucket/key`, so re-running an
//! extraction against the same object lands on the same id and overwrites the
//! previous record wholesale. Records are built once and never mutated; the
//! narrower field-level update path goes through [`UpdateExpression`] on the
//! record store instead.

use crate::error::ExtractError;
use crate::request::SourceLocation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Attribute holding the record identifier.
pub const ID_FIELD: &str = "uuid";
pub const SOURCE_URI_FIELD: &str = "source_uri";
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const USER_FIELD: &str = "user_id";

/// Deterministic record id: hex SHA-256 of `bucket/key`.
pub fn record_id(source: &SourceLocation) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.path().as_bytes());
    hex::encode(hasher.finalize())
}

/// Metadata plus the fields the model extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub id: String,
    pub source_uri: String,
    /// RFC 3339 extraction time.
    pub timestamp: String,
    pub user_id: String,
    pub fields: Map<String, Value>,
}

impl ExtractionRecord {
    /// Flatten into the stored item: extracted fields, then the metadata
    /// attributes on top of them.
    ///
    /// Metadata wins on collision so a model emitting e.g. `"uuid"` can never
    /// move the record to a different key.
    pub fn to_item(&self) -> Map<String, Value> {
        let mut item = self.fields.clone();
        item.insert(ID_FIELD.into(), Value::String(self.id.clone()));
        item.insert(SOURCE_URI_FIELD.into(), Value::String(self.source_uri.clone()));
        item.insert(TIMESTAMP_FIELD.into(), Value::String(self.timestamp.clone()));
        item.insert(USER_FIELD.into(), Value::String(self.user_id.clone()));
        item
    }
}

/// A SET-style update built from a field-level diff.
///
/// Renders as `SET #a = :a, #b = :b` with separate name and value maps, the
/// shape key-value stores use to avoid reserved-word clashes.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpression {
    pub expression: String,
    pub names: Map<String, Value>,
    pub values: Map<String, Value>,
}

impl UpdateExpression {
    pub fn from_diff(diff: &Map<String, Value>) -> Result<Self, ExtractError> {
        if diff.is_empty() {
            return Err(ExtractError::InvalidRequest(
                "update diff must contain at least one field".into(),
            ));
        }
        if diff.contains_key(ID_FIELD) {
            return Err(ExtractError::InvalidRequest(format!(
                "'{ID_FIELD}' is the record key and cannot be updated"
            )));
        }

        let expression = format!(
            "SET {}",
            diff.keys()
                .map(|k| format!("#{k} = :{k}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let names = diff
            .keys()
            .map(|k| (format!("#{k}"), Value::String(k.clone())))
            .collect();
        let values = diff
            .iter()
            .map(|(k, v)| (format!(":{k}"), v.clone()))
            .collect();

        Ok(Self {
            expression,
            names,
            values,
        })
    }

    /// Apply the SET clauses to `item`, returning only the updated attributes.
    pub fn apply(&self, item: &mut Map<String, Value>) -> Map<String, Value> {
        let mut updated = Map::new();
        for (placeholder, name) in &self.names {
            let Some(name) = name.as_str() else { continue };
            let value_key = format!(":{}", &placeholder[1..]);
            if let Some(value) = self.values.get(&value_key) {
                item.insert(name.to_string(), value.clone());
                updated.insert(name.to_string(), value.clone());
            }
        }
        updated
    }
}
