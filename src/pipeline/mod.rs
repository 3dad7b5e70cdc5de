//! Pure transformation stages of an extraction.
//!
//! None of these modules talk to a collaborator; they turn bytes and
//! fragments into model input, and model output into fields.
//!
//! ## Data Flow
//!
//! ```text
//! vision:  render ──▶ optimize ──▶ content ──▶ (model) ──▶ json
//!          (pdfium)   (≤ budget)   (units)                 (fields)
//!
//! forms:   (analysis) ──▶ fragments ──▶ content ──▶ (model) ──▶ json
//! ```
//!
//! 1. [`render`]    stack PDF pages into composite images; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`optimize`]  shrink each image until its base64 payload fits
//! 3. [`fragments`] resolve a forms-analysis block graph into key/values and tables
//! 4. [`content`]   order images and prompt text into model input units
//! 5. [`json`]      salvage the JSON object from free-form model output

pub mod content;
pub mod fragments;
pub mod json;
pub mod optimize;
pub mod render;
