//! CLI binary for edgequake-formextract.
//!
//! A thin shim over the library crate that maps CLI flags to an
//! `ExtractionConfig` plus concrete collaborators and prints results as JSON
//! on stdout. Logs go to stderr.

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Args, Parser, Subcommand};
use edgequake_formextract::services::analysis::parse_response;
use edgequake_formextract::services::{
    HttpFormsAnalyzer, HttpObjectStore, JsonFileRecordStore, LlmCompletion, LocalObjectStore,
    LogNotifier, NotificationSink, ObjectStore, RecordStore, WebhookNotifier,
};
use edgequake_formextract::{
    fit_to_budget, resolve, ExtractionConfig, ExtractionMode, ExtractionRequest, Extractor,
    SizeBudget, SourceLocation,
};
use serde_json::{Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium; the system library is used otherwise

STORE LAYOUT:
  --store-root DIR        objects are read from DIR/<bucket>/<key>
  --store-url URL         objects are fetched from URL/<bucket>/<key>

  Prompt templates live in the prompt bucket next to their worked example:
    prompts/receipt.txt        vision template (contains <example>)
    prompts/receipt.json       worked example
    prompts/receipt_forms.txt  forms template (contains <analysis_text>)

EXAMPLES:
  formextract --store-root ./store run --bucket uploads --key r1.pdf
  formextract --mode forms --analysis-url http://localhost:8080/analyze event event.json
  formextract resolve analysis.json
  formextract fit photo.jpg --budget 1048576 -o photo.small.jpg
"#;

/// Extract structured fields from documents using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "formextract",
    version,
    about = "Extract structured fields from scanned forms and PDFs using LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Read objects from this directory (<root>/<bucket>/<key>).
    #[arg(long, global = true, env = "FORMEXTRACT_STORE_ROOT", conflicts_with = "store_url")]
    store_root: Option<PathBuf>,

    /// Fetch objects over HTTP from <url>/<bucket>/<key>.
    #[arg(long, global = true, env = "FORMEXTRACT_STORE_URL")]
    store_url: Option<String>,

    /// Directory records are written to.
    #[arg(long, global = true, env = "FORMEXTRACT_RECORDS_DIR", default_value = "records")]
    records_dir: PathBuf,

    /// POST failure notifications to this URL instead of logging them.
    #[arg(long, global = true, env = "FORMEXTRACT_WEBHOOK")]
    webhook: Option<String>,

    /// Forms-analysis endpoint (required with --mode forms).
    #[arg(long, global = true, env = "FORMEXTRACT_ANALYSIS_URL")]
    analysis_url: Option<String>,

    /// What the model is shown: page images or forms-analysis text.
    #[arg(long, global = true, env = "FORMEXTRACT_MODE", value_enum, default_value = "vision")]
    mode: ModeArg,

    /// LLM model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Bucket holding prompt templates.
    #[arg(long, global = true, env = "FORMEXTRACT_PROMPT_BUCKET", default_value = "prompts")]
    prompt_bucket: String,

    /// Key of the .txt prompt template.
    #[arg(long, global = true, env = "FORMEXTRACT_PROMPT_KEY", default_value = "prompt.txt")]
    prompt_key: String,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "FORMEXTRACT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Nucleus sampling cut-off (0.0–1.0).
    #[arg(long, global = true, env = "FORMEXTRACT_TOP_P", default_value_t = 0.2)]
    top_p: f32,

    /// Max LLM output tokens.
    #[arg(long, global = true, env = "FORMEXTRACT_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// PDF pages stacked into one image.
    #[arg(long, global = true, env = "FORMEXTRACT_PAGES_PER_IMAGE", default_value_t = 2)]
    pages_per_image: usize,

    /// Maximum composite images per document.
    #[arg(long, global = true, env = "FORMEXTRACT_MAX_IMAGES", default_value_t = 20)]
    max_images: usize,

    /// Rendering DPI (36–400).
    #[arg(long, global = true, env = "FORMEXTRACT_DPI", default_value_t = 72,
          value_parser = clap::value_parser!(u32).range(36..=400))]
    dpi: u32,

    /// Per-image base64 payload budget in bytes.
    #[arg(long, global = true, env = "FORMEXTRACT_PAYLOAD_BUDGET", default_value_t = 5 * 1024 * 1024)]
    payload_budget: usize,

    /// Downscale attempts per image.
    #[arg(long, global = true, env = "FORMEXTRACT_MAX_RESIZE_ATTEMPTS", default_value_t = 10)]
    max_resize_attempts: u32,

    /// Longest side, in pixels, of a rendered page.
    #[arg(long, global = true, env = "FORMEXTRACT_MAX_RENDERED_PIXELS", default_value_t = 4000)]
    max_rendered_pixels: u32,

    /// JPEG quality used when re-encoding resized JPEG images (1–100).
    #[arg(long, global = true, env = "FORMEXTRACT_JPEG_QUALITY", default_value_t = 95,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Scheme of the source URI stored on each record.
    #[arg(long, global = true, env = "FORMEXTRACT_URI_SCHEME", default_value = "s3")]
    uri_scheme: String,

    /// Subject of failure notifications.
    #[arg(long, global = true, env = "FORMEXTRACT_NOTIFICATION_SUBJECT",
          default_value = "Error: extraction pipeline")]
    notification_subject: String,

    /// User reference recorded when a request has none.
    #[arg(long, global = true, env = "FORMEXTRACT_DEFAULT_USER", default_value = "anonymous")]
    default_user: String,

    /// HTTP timeout in seconds for store, analysis and webhook calls.
    #[arg(long, global = true, env = "FORMEXTRACT_HTTP_TIMEOUT", default_value_t = 120)]
    http_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FORMEXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, global = true, env = "FORMEXTRACT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract one stored document.
    Run {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Extract the document named by an invocation event file.
    Event { file: PathBuf },
    /// Print key/values and tables resolved from a saved analysis response.
    Resolve {
        file: PathBuf,
        /// Print the resolved document as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Shrink an image until its base64 payload fits the budget.
    Fit {
        image: PathBuf,
        #[arg(long, default_value_t = 5 * 1024 * 1024)]
        budget: usize,
        /// Where to write the fitted image. Default: <image>.fit.<ext>
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Apply a field-level diff to a stored record.
    Update {
        #[arg(long)]
        id: String,
        /// JSON file holding the diff object.
        #[arg(long)]
        diff: PathBuf,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Vision,
    Forms,
}

impl From<ModeArg> for ExtractionMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Vision => ExtractionMode::Vision,
            ModeArg::Forms => ExtractionMode::Forms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.opts.verbose {
        "debug"
    } else if cli.opts.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Run { bucket, key, user } => {
            let mut request = ExtractionRequest::new(SourceLocation::new(bucket, key));
            if let Some(user) = user {
                request = request.with_user(user);
            }
            let extractor = build_extractor(&cli.opts)?;
            let output = extractor.run(&request).await.context("Extraction failed")?;
            print_json(&Value::Object(output.fields))?;
            eprintln!(
                "record {}  {} images  {} ms",
                output.record_id, output.stats.images, output.stats.total_duration_ms
            );
        }
        Command::Event { file } => {
            let event: Value = read_json(file)?;
            let extractor = build_extractor(&cli.opts)?;
            let output = extractor
                .handle_event(&event)
                .await
                .context("Extraction failed")?;
            print_json(&Value::Object(output.fields))?;
        }
        Command::Resolve { file, json } => {
            let body = std::fs::read(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let fragments = parse_response(&body)?;
            let resolved = resolve(&fragments).context("Failed to resolve analysis")?;
            if *json {
                print_json(&serde_json::to_value(&resolved)?)?;
            } else {
                print!("{}", resolved.to_prompt_text());
            }
        }
        Command::Fit {
            image,
            budget,
            output,
        } => {
            let bytes = std::fs::read(image)
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let size_budget = SizeBudget {
                max_encoded_bytes: *budget,
                max_attempts: cli.opts.max_resize_attempts,
                jpeg_quality: cli.opts.jpeg_quality,
            };
            let fitted = fit_to_budget(&bytes, 1, &size_budget)?;
            let raw = base64::engine::general_purpose::STANDARD
                .decode(&fitted.data)
                .context("Optimizer produced invalid base64")?;
            let out_path = output.clone().unwrap_or_else(|| fitted_path(image));
            std::fs::write(&out_path, raw)
                .with_context(|| format!("Failed to write {}", out_path.display()))?;
            eprintln!(
                "{} bytes encoded after {} attempts  →  {}",
                fitted.encoded_len(),
                fitted.attempts,
                out_path.display()
            );
        }
        Command::Update { id, diff } => {
            let diff: Map<String, Value> = read_json(diff)?;
            let store = JsonFileRecordStore::new(&cli.opts.records_dir);
            let updated = store.update(id, &diff).await.context("Update failed")?;
            print_json(&Value::Object(updated))?;
        }
    }

    Ok(())
}

fn build_config(opts: &GlobalOpts) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .mode(opts.mode.into())
        .prompt_location(&opts.prompt_bucket, &opts.prompt_key)
        .temperature(opts.temperature)
        .top_p(opts.top_p)
        .max_tokens(opts.max_tokens)
        .pages_per_image(opts.pages_per_image)
        .max_images(opts.max_images)
        .dpi(opts.dpi)
        .payload_budget_bytes(opts.payload_budget)
        .max_resize_attempts(opts.max_resize_attempts)
        .max_rendered_pixels(opts.max_rendered_pixels)
        .jpeg_quality(opts.jpeg_quality)
        .uri_scheme(&opts.uri_scheme)
        .notification_subject(&opts.notification_subject)
        .default_user(&opts.default_user);

    if let Some(ref model) = opts.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = opts.provider {
        builder = builder.provider_name(provider);
    }

    builder.build().context("Invalid configuration")
}

fn build_extractor(opts: &GlobalOpts) -> Result<Extractor> {
    let config = build_config(opts)?;

    let objects: Arc<dyn ObjectStore> = match (&opts.store_root, &opts.store_url) {
        (Some(root), _) => Arc::new(LocalObjectStore::new(root)),
        (None, Some(url)) => Arc::new(HttpObjectStore::new(url, opts.http_timeout)?),
        (None, None) => bail!("one of --store-root or --store-url is required"),
    };
    let notifier: Arc<dyn NotificationSink> = match opts.webhook {
        Some(ref url) => Arc::new(WebhookNotifier::new(url, opts.http_timeout)?),
        None => Arc::new(LogNotifier),
    };
    let completion = LlmCompletion::from_config(&config).context("No LLM provider available")?;
    let records = JsonFileRecordStore::new(&opts.records_dir);

    let mut extractor = Extractor::new(
        config.clone(),
        objects,
        Arc::new(completion),
        Arc::new(records),
        notifier,
    );

    if config.mode == ExtractionMode::Forms {
        let Some(ref url) = opts.analysis_url else {
            bail!("--analysis-url is required with --mode forms");
        };
        extractor = extractor.with_analyzer(Arc::new(HttpFormsAnalyzer::new(
            url,
            opts.http_timeout,
        )?));
    }

    Ok(extractor)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// `photo.jpg` → `photo.fit.jpg`
fn fitted_path(image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let name = match image.extension() {
        Some(ext) => format!("{stem}.fit.{}", ext.to_string_lossy()),
        None => format!("{stem}.fit"),
    };
    image.with_file_name(name)
}
