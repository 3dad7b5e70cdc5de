//! Model input assembly.
//!
//! A completion request is an ordered list of [`ModelInput`] units. The
//! vision path sends one image unit per (size-optimised) page image followed
//! by a single text unit carrying the prompt; the forms path sends the prompt
//! alone.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::pipeline::optimize::{fit_to_budget, EncodedImage, SizeBudget};
use serde::{Deserialize, Serialize};

/// One unit of model input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModelInput {
    /// Base64 image payload with its declared media type.
    Image { data: String, media_type: String },
    Text { text: String },
}

impl ModelInput {
    pub fn text(text: impl Into<String>) -> Self {
        ModelInput::Text { text: text.into() }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ModelInput::Image { .. })
    }
}

impl From<EncodedImage> for ModelInput {
    fn from(img: EncodedImage) -> Self {
        ModelInput::Image {
            data: img.data,
            media_type: img.media_type.to_string(),
        }
    }
}

/// Everything the completion service needs for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub inputs: Vec<ModelInput>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
}

impl CompletionRequest {
    pub fn new(config: &ExtractionConfig, inputs: Vec<ModelInput>) -> Self {
        Self {
            model: config.model.clone(),
            inputs,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }

    pub fn image_count(&self) -> usize {
        self.inputs.iter().filter(|i| i.is_image()).count()
    }

    /// All text units, newline-joined.
    pub fn text(&self) -> String {
        self.inputs
            .iter()
            .filter_map(|i| match i {
                ModelInput::Text { text } => Some(text.as_str()),
                ModelInput::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Size of the request's input units serialised as JSON.
    pub fn payload_len(&self) -> usize {
        serde_json::to_vec(&self.inputs).map(|v| v.len()).unwrap_or(0)
    }
}

/// Run every image through the size optimizer, aborting on the first failure.
pub fn optimize_images(
    images: &[Vec<u8>],
    budget: &SizeBudget,
) -> Result<Vec<EncodedImage>, ExtractError> {
    images
        .iter()
        .enumerate()
        .map(|(i, bytes)| fit_to_budget(bytes, i + 1, budget))
        .collect()
}

/// Image units in page order, then the prompt.
pub fn vision_inputs(images: Vec<EncodedImage>, prompt: String) -> Vec<ModelInput> {
    images
        .into_iter()
        .map(ModelInput::from)
        .chain(std::iter::once(ModelInput::text(prompt)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(tag: &str) -> EncodedImage {
        EncodedImage {
            data: tag.to_string(),
            media_type: "image/png",
            attempts: 0,
        }
    }

    #[test]
    fn images_precede_prompt() {
        let inputs = vision_inputs(vec![encoded("a"), encoded("b")], "prompt".into());
        assert_eq!(inputs.len(), 3);
        assert!(inputs[0].is_image() && inputs[1].is_image());
        assert_eq!(inputs[2], ModelInput::text("prompt"));
    }

    #[test]
    fn request_counts_and_text() {
        let config = ExtractionConfig::default();
        let req = CompletionRequest::new(
            &config,
            vision_inputs(vec![encoded("a")], "hello".into()),
        );
        assert_eq!(req.image_count(), 1);
        assert_eq!(req.text(), "hello");
        assert_eq!(req.temperature, 0.1);
        assert_eq!(req.top_p, 0.2);
    }

    #[test]
    fn payload_len_is_serialised_input_size() {
        let req = CompletionRequest::new(&ExtractionConfig::default(), vec![ModelInput::text("hi")]);
        assert_eq!(req.payload_len(), r#"[{"type":"text","text":"hi"}]"#.len());
    }

    #[test]
    fn model_input_serialises_with_type_tag() {
        let json = serde_json::to_value(ModelInput::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn optimize_images_reports_first_failure() {
        let err = optimize_images(&[b"junk".to_vec()], &SizeBudget::default()).unwrap_err();
        assert!(matches!(err, ExtractError::ImageCodec { image: 1, .. }));
    }
}
