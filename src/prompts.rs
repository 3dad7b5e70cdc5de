//! Prompt template conventions.
//!
//! Templates are not compiled in. They live in the object store next to a
//! worked example of the JSON the model should produce, so a new document
//! type needs only two uploaded files:
//!
//! ```text
//! prompts/invoice.txt         vision-path template, contains <example>
//! prompts/invoice.json        worked example substituted for <example>
//! prompts/invoice_forms.txt   forms-path template, contains <analysis_text> and <example>
//! ```
//!
//! Both paths end the prompt with an `Assistant: {` cue so the model starts
//! its answer inside the JSON object.

/// Replaced by the worked example JSON.
pub const EXAMPLE_PLACEHOLDER: &str = "<example>";

/// Replaced by the resolved forms-analysis text (forms path only).
pub const ANALYSIS_PLACEHOLDER: &str = "<analysis_text>";

/// Trailing cue appended to every prompt.
pub const ASSISTANT_CUE: &str = "Assistant: {";

/// Key of the worked example belonging to a `.txt` template key.
pub fn example_key(template_key: &str) -> String {
    template_key.replace(".txt", ".json")
}

/// Key of the forms-path template belonging to a `.txt` template key.
pub fn forms_template_key(template_key: &str) -> String {
    template_key.replace(".txt", "_forms.txt")
}

/// Text block sent after the page images on the vision path.
pub fn vision_prompt(template: &str, example: &str) -> String {
    format!(
        "{} \n {}",
        template.replace(EXAMPLE_PLACEHOLDER, example),
        ASSISTANT_CUE
    )
}

/// Whole prompt on the forms path.
pub fn forms_prompt(template: &str, analysis_text: &str, example: &str) -> String {
    format!(
        "{}\n{}",
        template
            .replace(ANALYSIS_PLACEHOLDER, analysis_text)
            .replace(EXAMPLE_PLACEHOLDER, example),
        ASSISTANT_CUE
    )
}
