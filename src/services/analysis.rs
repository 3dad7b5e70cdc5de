//! Forms and tables analysis over HTTP.
//!
//! The analyzer POSTs the raw document to an analysis endpoint and expects
//! the block-graph response shape:
//!
//! ```text
//! {"Blocks": [{"Id": "1", "BlockType": "KEY_VALUE_SET", "EntityTypes": ["KEY"],
//!              "Relationships": [{"Type": "CHILD", "Ids": ["2"]}, …]}, …]}
//! ```

use super::FormsAnalyzer;
use crate::error::ExtractError;
use crate::pipeline::fragments::{AnalysisResponse, Fragment};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info};

/// Feature flags requested from the analysis service.
pub const FEATURE_TYPES: &str = "FORMS,TABLES";

#[derive(Debug, Clone)]
pub struct HttpFormsAnalyzer {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpFormsAnalyzer {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

/// Parse an analysis response body into its fragments.
pub fn parse_response(body: &[u8]) -> Result<Vec<Fragment>, ExtractError> {
    let response: AnalysisResponse = serde_json::from_slice(body)
        .map_err(|e| ExtractError::AnalysisFailed(format!("unreadable response: {e}")))?;
    Ok(response.blocks)
}

#[async_trait]
impl FormsAnalyzer for HttpFormsAnalyzer {
    async fn analyze(&self, document: &[u8]) -> Result<Vec<Fragment>, ExtractError> {
        info!(
            "Requesting forms analysis ({} bytes) from {}",
            document.len(),
            self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("FeatureTypes", FEATURE_TYPES)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(document.to_vec())
            .send()
            .await
            .map_err(|e| {
                error!("Forms analysis request failed: {}", e);
                ExtractError::AnalysisFailed(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            error!("Forms analysis returned HTTP {}", status);
            return Err(ExtractError::AnalysisFailed(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ExtractError::AnalysisFailed(e.to_string()))?;
        let fragments = parse_response(&body)?;
        debug!("Forms analysis returned {} fragments", fragments.len());
        Ok(fragments)
    }
}
