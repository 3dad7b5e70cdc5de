//! The extraction orchestrator.
//!
//! One invocation walks a fixed sequence of stages:
//!
//! ```text
//! Received ─▶ Downloaded ─▶ ContentPrepared ─▶ ModelInvoked ─▶ Parsed ─▶ Persisted
//!     │            │               │                 │            │
//!     └────────────┴───────────────┴─────────────────┴────────────┴──▶ Failed
//! ```
//!
//! Every stage is sequential and every collaborator call is awaited before
//! the next begins. Any error moves the invocation to `Failed`, which
//! publishes exactly one notification and then returns the original error
//! unchanged. A failing notification is logged and dropped.

use crate::config::{ExtractionConfig, ExtractionMode};
use crate::error::ExtractError;
use crate::pipeline::content::{self, CompletionRequest, ModelInput};
use crate::pipeline::fragments;
use crate::pipeline::json::{extract_json, parse_object};
use crate::pipeline::render::{self, CompositeLayout};
use crate::prompts;
use crate::record::{record_id, ExtractionRecord};
use crate::request::{ExtractionRequest, SourceLocation};
use crate::services::notify::notification_timestamp;
use crate::services::{CompletionService, FormsAnalyzer, NotificationSink, ObjectStore, RecordStore};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Where an invocation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    Downloaded,
    ContentPrepared,
    ModelInvoked,
    Parsed,
    Persisted,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "RECEIVED",
            Stage::Downloaded => "DOWNLOADED",
            Stage::ContentPrepared => "CONTENT_PREPARED",
            Stage::ModelInvoked => "MODEL_INVOKED",
            Stage::Parsed => "PARSED",
            Stage::Persisted => "PERSISTED",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Time spent reaching a stage from the one before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub duration_ms: u64,
}

/// Per-invocation statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionStats {
    /// Model input units sent, images and text.
    pub input_units: usize,
    pub images: usize,
    /// Sum of the base64 payload sizes of all image units.
    pub encoded_image_bytes: usize,
    pub stages: Vec<StageTiming>,
    pub total_duration_ms: u64,
}

/// Result of a successful invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutput {
    /// Fields parsed from the model's answer.
    pub fields: Map<String, Value>,
    pub record_id: String,
    pub stats: ExtractionStats,
}

/// Tracks the current stage and how long each transition took.
struct StageClock {
    start: Instant,
    last: Instant,
    current: Stage,
    timings: Vec<StageTiming>,
}

impl StageClock {
    fn start(source: &SourceLocation) -> Self {
        let now = Instant::now();
        info!("[{}] {}", Stage::Received, source);
        Self {
            start: now,
            last: now,
            current: Stage::Received,
            timings: Vec::new(),
        }
    }

    fn advance(&mut self, stage: Stage, detail: impl fmt::Display) {
        let now = Instant::now();
        let duration_ms = now.duration_since(self.last).as_millis() as u64;
        self.timings.push(StageTiming { stage, duration_ms });
        self.last = now;
        self.current = stage;
        info!("[{}] {} ({} ms)", stage, detail, duration_ms);
    }

    fn total_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Drives one extraction per call against a fixed set of collaborators.
///
/// An `Extractor` holds no per-invocation state, so one instance can serve
/// any number of concurrent invocations.
pub struct Extractor {
    config: ExtractionConfig,
    objects: Arc<dyn ObjectStore>,
    analyzer: Option<Arc<dyn FormsAnalyzer>>,
    completion: Arc<dyn CompletionService>,
    records: Arc<dyn RecordStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl Extractor {
    pub fn new(
        config: ExtractionConfig,
        objects: Arc<dyn ObjectStore>,
        completion: Arc<dyn CompletionService>,
        records: Arc<dyn RecordStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            objects,
            analyzer: None,
            completion,
            records,
            notifier,
        }
    }

    /// Forms analyzer used when the config selects [`ExtractionMode::Forms`].
    pub fn with_analyzer(mut self, analyzer: Arc<dyn FormsAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Run one invocation and return just the extracted fields.
    pub async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<Map<String, Value>, ExtractError> {
        self.run(request).await.map(|output| output.fields)
    }

    /// Normalise a raw invocation event and run it.
    ///
    /// An event of unrecognised shape fails like any other stage: one
    /// notification, then the error.
    pub async fn handle_event(&self, event: &Value) -> Result<ExtractionOutput, ExtractError> {
        match ExtractionRequest::from_event(event) {
            Ok(request) => self.run(&request).await,
            Err(err) => {
                error!("[{}] rejected event: {}", Stage::Failed, err);
                self.notify_failure(None, &err).await;
                Err(err)
            }
        }
    }

    /// Run one invocation end to end.
    pub async fn run(&self, request: &ExtractionRequest) -> Result<ExtractionOutput, ExtractError> {
        let mut clock = StageClock::start(&request.source);
        match self.run_stages(request, &mut clock).await {
            Ok(output) => Ok(output),
            Err(err) => {
                error!(
                    "[{}] {} failed after {}: {}",
                    Stage::Failed,
                    request.source,
                    clock.current,
                    err
                );
                self.notify_failure(Some(&request.source), &err).await;
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        request: &ExtractionRequest,
        clock: &mut StageClock,
    ) -> Result<ExtractionOutput, ExtractError> {
        let source = &request.source;
        let id = record_id(source);

        let document = self.objects.fetch(source).await?;
        clock.advance(Stage::Downloaded, format_args!("{} bytes", document.len()));

        let inputs = match self.config.mode {
            ExtractionMode::Vision => self.prepare_vision(source, document).await?,
            ExtractionMode::Forms => self.prepare_forms(&document).await?,
        };
        let mut stats = ExtractionStats {
            input_units: inputs.len(),
            ..Default::default()
        };
        for input in &inputs {
            if let ModelInput::Image { data, .. } = input {
                stats.images += 1;
                stats.encoded_image_bytes += data.len();
            }
        }
        clock.advance(
            Stage::ContentPrepared,
            format_args!("{} input units, {} images", stats.input_units, stats.images),
        );

        let completion_request = CompletionRequest::new(&self.config, inputs);
        info!(
            "Total size of model input: {} bytes",
            completion_request.payload_len()
        );
        let raw = self.completion.complete(&completion_request).await?;
        clock.advance(Stage::ModelInvoked, format_args!("{} chars", raw.len()));

        let fields = parse_object(&extract_json(&raw)?)?;
        clock.advance(Stage::Parsed, format_args!("{} fields", fields.len()));

        let record = ExtractionRecord {
            id: id.clone(),
            source_uri: source.uri(&self.config.uri_scheme),
            timestamp: chrono::Local::now().to_rfc3339(),
            user_id: request.user_or(&self.config.default_user).to_string(),
            fields: fields.clone(),
        };
        self.records.put(&record).await?;
        clock.advance(Stage::Persisted, format_args!("record {}", id));

        stats.stages = std::mem::take(&mut clock.timings);
        stats.total_duration_ms = clock.total_ms();
        Ok(ExtractionOutput {
            fields,
            record_id: id,
            stats,
        })
    }

    /// Page images (size-optimised), then the prompt.
    async fn prepare_vision(
        &self,
        source: &SourceLocation,
        document: Vec<u8>,
    ) -> Result<Vec<ModelInput>, ExtractError> {
        let extension = source.extension();
        let raw_images = match extension.as_str() {
            ".pdf" => {
                let layout = CompositeLayout::from_config(&self.config);
                render::render_composites(document, source.to_string(), layout).await?
            }
            ".jpg" | ".jpeg" | ".png" => vec![document],
            _ => return Err(ExtractError::UnsupportedFormat { extension }),
        };

        let budget = self.config.size_budget();
        let images =
            tokio::task::spawn_blocking(move || content::optimize_images(&raw_images, &budget))
                .await
                .map_err(|e| ExtractError::Internal(format!("Optimizer task panicked: {}", e)))??;

        let template = self.fetch_prompt(&self.config.prompt_key).await?;
        let example = self
            .fetch_prompt(&prompts::example_key(&self.config.prompt_key))
            .await?;

        Ok(content::vision_inputs(
            images,
            prompts::vision_prompt(&template, &example),
        ))
    }

    /// A single text unit built from the resolved forms analysis.
    async fn prepare_forms(&self, document: &[u8]) -> Result<Vec<ModelInput>, ExtractError> {
        let analyzer = self.analyzer.as_ref().ok_or_else(|| {
            ExtractError::InvalidConfig("forms mode requires a forms analyzer".into())
        })?;

        let fragments = analyzer.analyze(document).await?;
        let resolved = fragments::resolve(&fragments)?;
        info!(
            "Resolved {} fields and {} tables from {} fragments",
            resolved.fields.len(),
            resolved.tables.len(),
            fragments.len()
        );

        let template = self
            .fetch_prompt(&prompts::forms_template_key(&self.config.prompt_key))
            .await?;
        let example = self
            .fetch_prompt(&prompts::example_key(&self.config.prompt_key))
            .await?;

        Ok(vec![ModelInput::text(prompts::forms_prompt(
            &template,
            &resolved.to_prompt_text(),
            &example,
        ))])
    }

    async fn fetch_prompt(&self, key: &str) -> Result<String, ExtractError> {
        let location = SourceLocation::new(self.config.prompt_bucket.clone(), key);
        self.objects.fetch_text(&location).await
    }

    async fn notify_failure(&self, source: Option<&SourceLocation>, err: &ExtractError) {
        let message = match source {
            Some(source) => format!("Extraction of {} failed: {}", source, err),
            None => format!("Extraction failed: {}", err),
        };
        let timestamp = notification_timestamp(chrono::Local::now());
        if let Err(notify_err) = self
            .notifier
            .publish(&self.config.notification_subject, &message, &timestamp)
            .await
        {
            warn!("Could not publish failure notification: {}", notify_err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryObjects(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl ObjectStore for MemoryObjects {
        async fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>, ExtractError> {
            self.0
                .get(&location.path())
                .cloned()
                .ok_or_else(|| ExtractError::FetchFailed {
                    location: location.to_string(),
                    reason: "missing".into(),
                })
        }
    }

    struct Canned(String);

    #[async_trait]
    impl CompletionService for Canned {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ExtractError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct Records(Mutex<Vec<ExtractionRecord>>);

    #[async_trait]
    impl RecordStore for Records {
        async fn put(&self, record: &ExtractionRecord) -> Result<(), ExtractError> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn get(&self, _id: &str) -> Result<Option<Map<String, Value>>, ExtractError> {
            Ok(None)
        }

        async fn update(
            &self,
            _id: &str,
            _diff: &Map<String, Value>,
        ) -> Result<Map<String, Value>, ExtractError> {
            Ok(Map::new())
        }
    }

    #[derive(Default)]
    struct Notes(Mutex<Vec<String>>);

    #[async_trait]
    impl NotificationSink for Notes {
        async fn publish(&self, _s: &str, message: &str, _t: &str) -> Result<(), ExtractError> {
            self.0.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn extractor(
        objects: MemoryObjects,
        answer: &str,
    ) -> (Extractor, Arc<Records>, Arc<Notes>) {
        let records = Arc::new(Records::default());
        let notes = Arc::new(Notes::default());
        let extractor = Extractor::new(
            ExtractionConfig::default(),
            Arc::new(objects),
            Arc::new(Canned(answer.to_string())),
            records.clone(),
            notes.clone(),
        );
        (extractor, records, notes)
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::ContentPrepared.to_string(), "CONTENT_PREPARED");
        assert_eq!(
            serde_json::to_value(Stage::ModelInvoked).unwrap(),
            "MODEL_INVOKED"
        );
    }

    #[tokio::test]
    async fn missing_source_notifies_once() {
        let (extractor, records, notes) = extractor(MemoryObjects::default(), "{}");
        let req = ExtractionRequest::new(SourceLocation::new("docs", "gone.png"));

        let err = extractor.run(&req).await.unwrap_err();
        assert!(matches!(err, ExtractError::FetchFailed { .. }));
        assert!(records.0.lock().unwrap().is_empty());
        let notes = notes.0.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("docs/gone.png"));
    }

    #[tokio::test]
    async fn forms_mode_without_analyzer_fails() {
        let mut objects = MemoryObjects::default();
        objects.0.insert("docs/a.pdf".into(), b"%PDF".to_vec());
        let (mut extractor, _records, notes) = extractor(objects, "{}");
        extractor.config.mode = ExtractionMode::Forms;

        let req = ExtractionRequest::new(SourceLocation::new("docs", "a.pdf"));
        let err = extractor.run(&req).await.unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
        assert_eq!(notes.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bad_event_notifies() {
        let (extractor, _records, notes) = extractor(MemoryObjects::default(), "{}");
        let err = extractor
            .handle_event(&serde_json::json!({"nothing": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidRequest(_)));
        assert_eq!(notes.0.lock().unwrap().len(), 1);
    }
}
