//! Completion over an `edgequake-llm` provider.
//!
//! A request with image units becomes a single user message carrying the
//! images and the prompt text; a text-only request becomes a plain user
//! message. There is no system message: the prompt template carries every
//! instruction.
//!
//! The model is bound when the provider is built. `CompletionRequest::model`
//! does not switch models per call; a request naming a different model than
//! the bound one is logged and served by the bound model.

use super::CompletionService;
use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::pipeline::content::{CompletionRequest, ModelInput};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// [`CompletionService`] backed by an `LLMProvider`.
pub struct LlmCompletion {
    provider: Arc<dyn LLMProvider>,
    /// Model the provider was built for, when known.
    model: Option<String>,
}

impl LlmCompletion {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            model: None,
        }
    }

    /// Record which model `provider` serves, for request checks and logs.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Resolve a provider the same way for library and CLI callers:
    ///
    /// 1. `config.provider_name` (+ `config.model`)
    /// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
    /// 3. OpenAI, when `OPENAI_API_KEY` is set
    /// 4. whatever [`ProviderFactory::from_env`] detects
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let (provider, model) = resolve_provider(config)?;
        let completion = Self::new(provider);
        Ok(match model {
            Some(model) => completion.with_model(model),
            None => completion,
        })
    }
}

/// The requested model when it differs from the bound one.
fn mismatched_model<'a>(bound: Option<&str>, requested: Option<&'a str>) -> Option<&'a str> {
    match (bound, requested) {
        (Some(bound), Some(requested)) if bound != requested => Some(requested),
        _ => None,
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

type ResolvedProvider = (Arc<dyn LLMProvider>, Option<String>);

fn resolve_provider(config: &ExtractionConfig) -> Result<ResolvedProvider, ExtractError> {
    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return Ok((create_provider(name, model)?, Some(model.to_string())));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return Ok((create_provider(&prov, &env_model)?, Some(env_model)));
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return Ok((create_provider("openai", model)?, Some(model.to_string())));
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok((llm_provider, None))
}

/// The single user message for a request.
pub fn build_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
    let images: Vec<ImageData> = request
        .inputs
        .iter()
        .filter_map(|input| match input {
            ModelInput::Image { data, media_type } => {
                Some(ImageData::new(data.clone(), media_type.clone()).with_detail("high"))
            }
            ModelInput::Text { .. } => None,
        })
        .collect();

    let text = request.text();
    if images.is_empty() {
        vec![ChatMessage::user(text)]
    } else {
        vec![ChatMessage::user_with_images(text, images)]
    }
}

fn build_options(request: &CompletionRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        top_p: Some(request.top_p),
        max_tokens: Some(request.max_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl CompletionService for LlmCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExtractError> {
        let start = Instant::now();
        let messages = build_messages(request);
        let options = build_options(request);

        if let Some(requested) = mismatched_model(self.model.as_deref(), request.model.as_deref()) {
            warn!(
                "Request asks for model {} but the provider is bound to {}",
                requested,
                self.model.as_deref().unwrap_or_default()
            );
        }

        info!(
            "Invoking model with {} image(s), {} prompt chars",
            request.image_count(),
            request.text().len()
        );

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| {
                error!("Completion failed: {}", e);
                ExtractError::LlmApiError {
                    message: e.to_string(),
                }
            })?;

        debug!(
            "{} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}
