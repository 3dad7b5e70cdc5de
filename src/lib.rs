//! # edgequake-formextract
//!
//! Extract structured fields from scanned forms, receipts and PDFs with a
//! language model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request (bucket/key, user)
//!  │
//!  ├─ 1. Download  fetch the source from the object store
//!  ├─ 2. Prepare   vision: pages → composites → size-optimised images
//!  │               forms:  analysis blocks → key/values + tables text
//!  ├─ 3. Invoke    images + prompt (or prompt alone) → completion
//!  ├─ 4. Parse     tolerant JSON salvage, then strict object parse
//!  └─ 5. Persist   fields + metadata → record keyed by sha256(bucket/key)
//! ```
//!
//! Any failure publishes one notification and is returned unchanged.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_formextract::services::{JsonFileRecordStore, LlmCompletion, LocalObjectStore, LogNotifier};
//! use edgequake_formextract::{ExtractionConfig, ExtractionRequest, Extractor, SourceLocation};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .prompt_location("prompts", "receipt.txt")
//!         .build()?;
//!     let extractor = Extractor::new(
//!         config.clone(),
//!         Arc::new(LocalObjectStore::new("./store")),
//!         Arc::new(LlmCompletion::from_config(&config)?),
//!         Arc::new(JsonFileRecordStore::new("./records")),
//!         Arc::new(LogNotifier),
//!     );
//!     let request = ExtractionRequest::new(SourceLocation::new("uploads", "receipt.pdf"));
//!     let fields = extractor.extract(&request).await?;
//!     println!("{}", serde_json::to_string_pretty(&fields)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `formextract` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod request;
pub mod services;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, ExtractionMode};
pub use error::ExtractError;
pub use extract::{ExtractionOutput, ExtractionStats, Extractor, Stage, StageTiming};
pub use pipeline::fragments::{resolve, Fragment, ResolvedDocument};
pub use pipeline::json::{extract_json, merge_json_results};
pub use pipeline::optimize::{fit_to_budget, EncodedImage, SizeBudget};
pub use record::{record_id, ExtractionRecord, UpdateExpression};
pub use request::{EventShape, ExtractionRequest, SourceLocation};
