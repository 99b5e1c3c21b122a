//! CLI binary for edgequake-docstruct.
//!
//! A thin shim over the library: flags map onto `PipelineConfig`, the
//! subcommands onto `ExtractionService` operations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_docstruct::{
    DocumentStorage, ExportFormat, ExtractionService, FallbackPolicy, LlmClient,
    PipelineConfig, ProgressCallback, ProviderClient, RunProgressCallback, RunReport, RunStatus, SqliteStore,
    Stage, TesseractOcr, UnavailableClient,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────

/// Spinner showing the current stage, with one log line per finished stage.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Run");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl RunProgressCallback for CliProgress {
    fn on_run_start(&self, run_id: Uuid) {
        self.bar.set_message(format!("claimed {run_id}"));
    }

    fn on_stage_start(&self, _run_id: Uuid, stage: Stage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<16} {}",
            green("✓"),
            stage.label(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0))
        ));
    }

    fn on_fallback(&self, _run_id: Uuid, warning: &str) {
        self.bar.println(format!("  {} {}", yellow("⚠"), warning));
    }

    fn on_run_complete(&self, _run_id: Uuid, error: Option<&str>) {
        self.bar.finish_and_clear();
        match error {
            None => eprintln!("{} run completed", green("✔")),
            Some(e) => eprintln!("{} run failed: {}", red("✘"), e),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One shot: upload, process and print the result
  docstruct extract invoice.png

  # Same, as CSV
  docstruct extract receipt.jpg --format csv

  # Two steps
  docstruct upload form.tiff          # prints file_id and run_id
  docstruct run <RUN_ID>              # processes if QUEUED, else reports

  # Browse and edit stored results
  docstruct list
  docstruct show <RUN_ID>
  docstruct export <RUN_ID> --format csv -o out.csv
  docstruct update <RUN_ID> corrected.json
  docstruct delete <RUN_ID>

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  TESSDATA_PATH           Directory holding <lang>.traineddata
  TESSDATA_PREFIX         Fallback for TESSDATA_PATH

When no LLM provider is configured, runs still complete: OCR runs and the
result is empty with the warning "LLM returned null or empty response".
"#;

/// Extract structured fields from scanned documents with OCR + LLM.
#[derive(Parser, Debug)]
#[command(
    name = "docstruct",
    version,
    about = "Extract structured fields and tables from scanned documents with OCR + LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory uploaded documents are copied into.
    #[arg(long, global = true, env = "DOCSTRUCT_STORAGE_DIR", default_value = "data/uploads")]
    storage_dir: PathBuf,

    /// SQLite database holding runs and results.
    #[arg(long, global = true, env = "DOCSTRUCT_DATABASE", default_value = "data/docstruct.db")]
    database: PathBuf,

    /// LLM model ID. Default: gpt-4o-mini.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "DOCSTRUCT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max tokens the model may generate.
    #[arg(long, global = true, env = "DOCSTRUCT_MAX_TOKENS", default_value_t = 3000)]
    max_tokens: usize,

    /// Retries on LLM failure.
    #[arg(long, global = true, env = "DOCSTRUCT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "DOCSTRUCT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Tesseract language data directory.
    #[arg(long, global = true, env = "DOCSTRUCT_TESSDATA_DIR")]
    tessdata_dir: Option<PathBuf>,

    /// Tesseract language(s), e.g. eng or eng+fra.
    #[arg(long, global = true, env = "DOCSTRUCT_LANGUAGE", default_value = "eng")]
    language: String,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, global = true, env = "DOCSTRUCT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Fail the run instead of storing an empty result when the model
    /// answer is missing or unparseable.
    #[arg(long, global = true, env = "DOCSTRUCT_FAIL_ON_FALLBACK")]
    fail_on_fallback: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "DOCSTRUCT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSTRUCT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, env = "DOCSTRUCT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a document, process it, and print the result.
    Extract {
        file: PathBuf,
        /// Output format: json or csv.
        #[arg(long, default_value = "json")]
        format: ExportFormat,
    },
    /// Upload a document and queue a run for it.
    Upload { file: PathBuf },
    /// Process a QUEUED run, or report the stored outcome of any other.
    Run { run_id: Uuid },
    /// Report a run's stored outcome without processing it.
    Status { run_id: Uuid },
    /// List stored extractions, newest first.
    List,
    /// Print a stored extraction result.
    Show { run_id: Uuid },
    /// Export a stored extraction as CSV or JSON.
    Export {
        run_id: Uuid,
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace a stored extraction with the result in a JSON file.
    Update { run_id: Uuid, file: PathBuf },
    /// Delete a stored extraction; its run is marked FAILED.
    Delete { run_id: Uuid },
}

impl Command {
    fn processes(&self) -> bool {
        matches!(self, Command::Extract { .. } | Command::Run { .. })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already reports each stage, so INFO logs would only
    // interleave with it.
    let show_progress = cli.command.processes() && !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let service = build_service(&cli, show_progress).await?;

    match cli.command {
        Command::Extract { ref file, format } => {
            let receipt = service
                .upload(file)
                .await
                .with_context(|| format!("Failed to upload {}", file.display()))?;
            let report = service.process(receipt.run_id).await.context("Processing failed")?;
            match (&report.result, format) {
                (Some(result), ExportFormat::Csv) => print!("{}", edgequake_docstruct::to_csv(result)),
                _ => print_json(&report)?,
            }
            exit_on_failure(&report);
        }
        Command::Upload { ref file } => {
            let receipt = service
                .upload(file)
                .await
                .with_context(|| format!("Failed to upload {}", file.display()))?;
            print_json(&receipt)?;
        }
        Command::Run { run_id } => {
            let report = service.process(run_id).await.context("Processing failed")?;
            print_json(&report)?;
            exit_on_failure(&report);
        }
        Command::Status { run_id } => {
            print_json(&service.outcome(run_id)?)?;
        }
        Command::List => {
            let summaries = service.list_extractions()?;
            if summaries.is_empty() && !cli.quiet {
                eprintln!("{}", dim("no extractions stored"));
            }
            for s in summaries {
                println!(
                    "{}  {:<20}  {:.2}  {}",
                    s.run_id,
                    s.document_type,
                    s.avg_confidence,
                    s.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Show { run_id } => {
            print_json(&service.get_extraction(run_id)?)?;
        }
        Command::Export {
            run_id,
            format,
            ref output,
        } => {
            let rendered = service.export(run_id, format)?;
            match output {
                Some(path) => {
                    tokio::fs::write(path, rendered)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    if !cli.quiet {
                        eprintln!("{} {} → {}", green("✔"), format, path.display());
                    }
                }
                None => {
                    let stdout = io::stdout();
                    let mut handle = stdout.lock();
                    handle
                        .write_all(rendered.as_bytes())
                        .context("Failed to write to stdout")?;
                }
            }
        }
        Command::Update { run_id, ref file } => {
            let text = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let updated = service
                .update_extraction_json(run_id, &text)
                .with_context(|| format!("{} is not a valid result", file.display()))?;
            print_json(&updated)?;
        }
        Command::Delete { run_id } => {
            service.delete_extraction(run_id)?;
            if !cli.quiet {
                eprintln!("{} deleted extraction for {}", green("✔"), run_id);
            }
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig` and wire the service.
async fn build_service(cli: &Cli, show_progress: bool) -> Result<ExtractionService> {
    let config = build_config(cli).await?;

    let llm: Arc<dyn LlmClient> = match ProviderClient::from_config(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            if cli.command.processes() {
                warn!("{e}");
            }
            Arc::new(UnavailableClient::new(e))
        }
    };

    if let Some(parent) = cli.database.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&cli.database)
        .with_context(|| format!("Failed to open database {}", cli.database.display()))?;

    let service = ExtractionService::with_store(
        Arc::new(store),
        Arc::new(TesseractOcr::from_config(&config)),
        llm,
        config,
        DocumentStorage::new(&cli.storage_dir),
    );

    if !show_progress {
        return Ok(service);
    }
    let progress: ProgressCallback = CliProgress::new();
    Ok(service.with_progress(progress))
}

async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .ocr_language(&cli.language);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref dir) = cli.tessdata_dir {
        builder = builder.tessdata_dir(dir);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }
    if cli.fail_on_fallback {
        builder = builder.fallback_policy(FallbackPolicy::FailRun);
    }

    builder.build().context("Invalid configuration")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

/// A FAILED run is the command's failure too.
fn exit_on_failure(report: &RunReport) {
    if report.status == RunStatus::Failed {
        std::process::exit(1);
    }
}

