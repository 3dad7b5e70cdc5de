//! Records as pretty-printed JSON files, one per record id.

use super::{is_contained, RecordStore};
use crate::error::ExtractError;
use crate::record::{ExtractionRecord, UpdateExpression, ID_FIELD};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Stores each record as `{dir}/{id}.json`.
///
/// Writes go to a temp file and are renamed into place, so a reader never
/// sees a half-written record.
#[derive(Debug, Clone)]
pub struct JsonFileRecordStore {
    dir: PathBuf,
}

impl JsonFileRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `{dir}/{id}.json`. The id must be a single plain file name.
    pub fn path_of(&self, id: &str) -> Result<PathBuf, ExtractError> {
        if !is_contained(id) || Path::new(id).components().count() != 1 {
            return Err(ExtractError::InvalidRequest(format!(
                "record id '{id}' is not a plain file name"
            )));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn write_item(&self, id: &str, item: &Map<String, Value>) -> Result<(), ExtractError> {
        let path = self.path_of(id)?;
        let body = serde_json::to_vec_pretty(item).map_err(|e| ExtractError::PersistFailed {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &body).await
    }
}

async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), ExtractError> {
    let write_failed = |source| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, body).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn put(&self, record: &ExtractionRecord) -> Result<(), ExtractError> {
        self.write_item(&record.id, &record.to_item()).await?;
        info!("Stored record {} ({} fields)", record.id, record.fields.len());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Map<String, Value>>, ExtractError> {
        let path = self.path_of(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ExtractError::PersistFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                })
            }
        };
        let item = serde_json::from_slice(&bytes).map_err(|e| ExtractError::PersistFailed {
            id: id.to_string(),
            reason: format!("stored record is not a JSON object: {e}"),
        })?;
        Ok(Some(item))
    }

    /// Upserts: a missing record starts out as just its id.
    async fn update(
        &self,
        id: &str,
        diff: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ExtractError> {
        let expression = UpdateExpression::from_diff(diff)?;
        debug!("Updating {}: {}", id, expression.expression);

        let mut item = match self.get(id).await? {
            Some(item) => item,
            None => {
                let mut item = Map::new();
                item.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
                item
            }
        };
        let updated = expression.apply(&mut item);
        self.write_item(id, &item).await?;
        Ok(updated)
    }
}
