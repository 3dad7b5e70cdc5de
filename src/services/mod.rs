//! External collaborators of the extraction pipeline.
//!
//! The orchestrator never talks to storage, analysis or model backends
//! directly; it holds one `Arc<dyn …>` per trait below. Concrete
//! implementations live in the submodules, and tests substitute in-memory
//! doubles.

pub mod analysis;
pub mod completion;
pub mod notify;
pub mod object_store;
pub mod record_store;

use crate::error::ExtractError;
use crate::pipeline::content::CompletionRequest;
use crate::pipeline::fragments::Fragment;
use crate::record::ExtractionRecord;
use crate::request::SourceLocation;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Component, Path};

pub use analysis::HttpFormsAnalyzer;
pub use completion::LlmCompletion;
pub use notify::{LogNotifier, WebhookNotifier};
pub use object_store::{HttpObjectStore, LocalObjectStore};
pub use record_store::JsonFileRecordStore;

/// Source documents and prompt templates.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Raw bytes of the object.
    async fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>, ExtractError>;

    /// The object decoded as UTF-8.
    async fn fetch_text(&self, location: &SourceLocation) -> Result<String, ExtractError> {
        let bytes = self.fetch(location).await?;
        String::from_utf8(bytes).map_err(|e| ExtractError::FetchFailed {
            location: location.to_string(),
            reason: format!("not valid UTF-8: {e}"),
        })
    }
}

/// Forms and tables analysis of a document.
#[async_trait]
pub trait FormsAnalyzer: Send + Sync {
    async fn analyze(&self, document: &[u8]) -> Result<Vec<Fragment>, ExtractError>;
}

/// Language-model completion.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Completion text for the request's ordered input units.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExtractError>;
}

/// Keyed persistence of extraction records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or wholly replace the record under its id.
    async fn put(&self, record: &ExtractionRecord) -> Result<(), ExtractError>;

    async fn get(&self, id: &str) -> Result<Option<Map<String, Value>>, ExtractError>;

    /// Apply a field-level diff and return the updated attributes.
    async fn update(
        &self,
        id: &str,
        diff: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ExtractError>;
}

/// Best-effort failure reporting.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(
        &self,
        subject: &str,
        message: &str,
        timestamp: &str,
    ) -> Result<(), ExtractError>;
}

/// True when `part` is a non-empty relative path of plain names only, so
/// joining it onto a root directory stays inside that root.
pub(crate) fn is_contained(part: &str) -> bool {
    !part.is_empty()
        && Path::new(part)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
