//! Error types for the edgequake-formextract library.
//!
//! Every failure in the pipeline is fatal for the invocation that hit it,
//! with one exception: a failed failure-notification. That one is logged and
//! swallowed so it never masks the error being reported (see
//! `Extractor::notify_failure`, reached from [`crate::extract::Extractor::run`]
//! and [`crate::extract::Extractor::handle_event`]).
//!
//! Nothing here is retried automatically. Retry, if any, is a decision for
//! whoever invoked the extraction.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-formextract library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source object could not be read (missing, access denied, HTTP error).
    #[error("Failed to fetch '{location}': {reason}")]
    FetchFailed { location: String, reason: String },

    /// The source document has an extension the pipeline does not handle.
    #[error("Unsupported file type: '{extension}'\nSupported: .pdf, .jpg, .jpeg, .png")]
    UnsupportedFormat { extension: String },

    /// The invocation event matched neither the direct nor the HTTP-body shape,
    /// or a request argument was unusable.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{location}' is corrupt: {detail}")]
    CorruptPdf { location: String, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Image errors ──────────────────────────────────────────────────────
    /// An image could not be decoded or re-encoded.
    #[error("Image {image}: {detail}")]
    ImageCodec { image: usize, detail: String },

    /// The size optimizer ran out of attempts before fitting the budget.
    #[error(
        "Image {image} exceeds size limit after {attempts} optimization attempts \
({size} > {budget} bytes encoded)"
    )]
    SizeBudgetExhausted {
        image: usize,
        attempts: u32,
        size: usize,
        budget: usize,
    },

    // ── Forms analysis errors ─────────────────────────────────────────────
    /// The analysis service call failed or returned an unreadable body.
    #[error("Forms analysis failed: {0}")]
    AnalysisFailed(String),

    /// A relationship points at a fragment id that is not in the response.
    #[error("Fragment '{from}' references '{id}', which is not present in the analysis response")]
    DanglingReference { from: String, id: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The completion call failed.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The completion text contains no `{ … }` span at all.
    #[error("No JSON found in model output")]
    NoJsonFound,

    /// The (possibly salvaged) completion is not a JSON object.
    #[error("Model output is not a valid JSON object: {detail}\nOutput starts with: {preview:?}")]
    InvalidJson { detail: String, preview: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// The record store rejected or failed the write.
    #[error("Failed to persist record '{id}': {reason}")]
    PersistFailed { id: String, reason: String },

    /// A record store file could not be written.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Notification errors ───────────────────────────────────────────────
    /// The notification sink failed. Never fatal to the pipeline.
    #[error("Failed to publish notification: {0}")]
    NotificationFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// `true` for the one category that is logged and swallowed rather than
    /// propagated.
    pub fn is_notification_failure(&self) -> bool {
        matches!(self, ExtractError::NotificationFailed(_))
    }

    /// Build an [`ExtractError::InvalidJson`] keeping a short preview of the
    /// offending text for the error message.
    pub(crate) fn invalid_json(detail: impl ToString, text: &str) -> Self {
        ExtractError::InvalidJson {
            detail: detail.to_string(),
            preview: text.chars().take(120).collect(),
        }
    }
}
