//! Invocation input: where the document lives and who asked for it.
//!
//! Invocations arrive in one of two shapes:
//!
//! ```text
//! Direct     {"s3": {"bucket": "b", "key": "k"}, "user_id": "u"}
//! HttpBody   {"body": "{\"s3\": {\"bucket\": \"b\", \"key\": \"k\"}}"}
//! ```
//!
//! [`EventShape::classify`] decides which one an event is by looking at it,
//! then [`ExtractionRequest::from_event`] parses exactly that shape. Anything
//! else is rejected up front with [`ExtractError::InvalidRequest`].

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// A bucket/key pair naming one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub bucket: String,
    pub key: String,
}

impl SourceLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// `bucket/key`, the string the record identifier is derived from.
    pub fn path(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }

    /// `scheme://bucket/key`.
    pub fn uri(&self, scheme: &str) -> String {
        format!("{}://{}/{}", scheme, self.bucket, self.key)
    }

    /// Lower-cased extension of the key including the dot (".pdf"), or ""
    /// when the key has none.
    pub fn extension(&self) -> String {
        Path::new(&self.key)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// One extraction invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    #[serde(rename = "s3")]
    pub source: SourceLocation,
    #[serde(default, alias = "id_usuario", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ExtractionRequest {
    pub fn new(source: SourceLocation) -> Self {
        Self {
            source,
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// The caller's user reference, or `default` when none was given.
    pub fn user_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.user_id.as_deref().unwrap_or(default)
    }

    /// Normalise an invocation event of either shape into a request.
    pub fn from_event(event: &Value) -> Result<Self, ExtractError> {
        let shape = EventShape::classify(event).ok_or_else(|| {
            ExtractError::InvalidRequest(
                "event has neither an 's3' object nor a string 'body'".into(),
            )
        })?;

        let parsed = match shape {
            EventShape::Direct => Self::deserialize(event),
            EventShape::HttpBody => {
                let body = event.get("body").and_then(Value::as_str).unwrap_or_default();
                serde_json::from_str(body)
            }
        };

        parsed.map_err(|e| ExtractError::InvalidRequest(format!("{shape:?} event: {e}")))
    }
}

/// The two accepted event layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventShape {
    /// Request fields at the top level.
    Direct,
    /// Request fields JSON-encoded inside a `body` string.
    HttpBody,
}

impl EventShape {
    pub fn classify(event: &Value) -> Option<Self> {
        if event.get("s3").is_some_and(Value::is_object) {
            Some(EventShape::Direct)
        } else if event.get("body").is_some_and(Value::is_string) {
            Some(EventShape::HttpBody)
        } else {
            None
        }
    }
}
