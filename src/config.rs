//! Configuration types for document field extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`].
//!
//! Collaborators (object store, model provider, record store, …) are *not*
//! configuration; they are handed to [`crate::extract::Extractor::new`].

use crate::error::ExtractError;
use crate::pipeline::optimize::SizeBudget;
use serde::{Deserialize, Serialize};

/// Configuration for one extraction pipeline.
///
/// # Example
/// ```rust
/// use edgequake_formextract::{ExtractionConfig, ExtractionMode};
///
/// let config = ExtractionConfig::builder()
///     .mode(ExtractionMode::Forms)
///     .prompt_location("prompts", "invoice.txt")
///     .max_tokens(3072)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Which content the model sees. Default: [`ExtractionMode::Vision`].
    pub mode: ExtractionMode,

    /// LLM model identifier. If None, the provider default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Nucleus sampling cut-off. Default: 0.2.
    pub top_p: f32,

    /// Maximum tokens the model may generate. Default: 4096.
    pub max_tokens: usize,

    /// Source pages stacked into one composite image. Default: 2.
    pub pages_per_image: usize,

    /// Maximum composite images per document. Default: 20.
    ///
    /// Pages past `max_images * pages_per_image` are not processed.
    pub max_images: usize,

    /// Rendering DPI for PDF pages. Range: 36–400. Default: 72.
    pub dpi: u32,

    /// Cap on either rendered page dimension, in pixels. Default: 4000.
    pub max_rendered_pixels: u32,

    /// Per-image ceiling on the base64 payload, in bytes. Default: 5 MiB.
    pub payload_budget_bytes: usize,

    /// Downscale attempts before an image is declared unfittable. Default: 10.
    pub max_resize_attempts: u32,

    /// Quality used when re-encoding JPEG sources. Default: 95.
    pub jpeg_quality: u8,

    /// Bucket holding prompt templates and worked examples.
    pub prompt_bucket: String,

    /// Key of the vision-path prompt template (a `.txt` object).
    ///
    /// The worked example lives next to it with `.json` instead of `.txt`;
    /// the forms-path template with `_forms.txt`.
    pub prompt_key: String,

    /// Scheme used when rendering a record's source URI. Default: "s3".
    pub uri_scheme: String,

    /// Subject line of failure notifications.
    pub notification_subject: String,

    /// User reference recorded when the request carries none. Default: "anonymous".
    pub default_user: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::default(),
            model: None,
            provider_name: None,
            temperature: 0.1,
            top_p: 0.2,
            max_tokens: 4096,
            pages_per_image: 2,
            max_images: 20,
            dpi: 72,
            max_rendered_pixels: 4000,
            payload_budget_bytes: 5 * 1024 * 1024,
            max_resize_attempts: 10,
            jpeg_quality: 95,
            prompt_bucket: "prompts".to_string(),
            prompt_key: "prompt.txt".to_string(),
            uri_scheme: "s3".to_string(),
            notification_subject: "Error: extraction pipeline".to_string(),
            default_user: "anonymous".to_string(),
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The size-optimizer settings carried by this config.
    pub fn size_budget(&self) -> SizeBudget {
        SizeBudget {
            max_encoded_bytes: self.payload_budget_bytes,
            max_attempts: self.max_resize_attempts,
            jpeg_quality: self.jpeg_quality,
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn mode(mut self, mode: ExtractionMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn pages_per_image(mut self, n: usize) -> Self {
        self.config.pages_per_image = n.max(1);
        self
    }

    pub fn max_images(mut self, n: usize) -> Self {
        self.config.max_images = n.max(1);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(36, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn payload_budget_bytes(mut self, bytes: usize) -> Self {
        self.config.payload_budget_bytes = bytes;
        self
    }

    pub fn max_resize_attempts(mut self, n: u32) -> Self {
        self.config.max_resize_attempts = n;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn prompt_location(mut self, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        self.config.prompt_bucket = bucket.into();
        self.config.prompt_key = key.into();
        self
    }

    pub fn uri_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.uri_scheme = scheme.into();
        self
    }

    pub fn notification_subject(mut self, subject: impl Into<String>) -> Self {
        self.config.notification_subject = subject.into();
        self
    }

    pub fn default_user(mut self, user: impl Into<String>) -> Self {
        self.config.default_user = user.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.payload_budget_bytes < 4 {
            return Err(ExtractError::InvalidConfig(format!(
                "payload budget must be at least 4 bytes, got {}",
                c.payload_budget_bytes
            )));
        }
        if !c.prompt_key.ends_with(".txt") {
            return Err(ExtractError::InvalidConfig(format!(
                "prompt key must name a .txt template, got '{}'",
                c.prompt_key
            )));
        }
        if c.prompt_bucket.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "prompt bucket must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the model is shown.
///
/// | Mode | Content prepared | Model input |
/// |------|------------------|-------------|
/// | Vision | page images, size-optimised | image blocks + prompt text |
/// | Forms | forms-analysis key/values and tables | one text block |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Send page images to a vision model. (default)
    #[default]
    Vision,
    /// Send resolved forms-analysis text to a text model.
    Forms,
}
