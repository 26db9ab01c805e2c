//! CLI binary for xray-report.
//!
//! A thin shim over the library crate that maps CLI flags to `ReportConfig`,
//! runs the batch and writes the HTML report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use xray_report::{
    analyze_batch, write_report, BatchOutput, BatchProgressCallback, ProgressCallback,
    ReportConfig,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar plus a log line per image. Images
/// finish out of order, so start times are tracked per index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Analysing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

// Ctrl-C drops the run without any batch event; never leave a ticking bar.
impl Drop for CliProgressCallback {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_images: usize) {
        self.bar.set_length(total_images as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analysing {total_images} images…"))
        ));
    }

    fn on_image_start(&self, index: usize, _total: usize, filename: &str) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(index, Instant::now());
        }
        self.bar.set_message(filename.to_string());
    }

    fn on_image_complete(&self, index: usize, total: usize, analysis_len: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            index,
            total,
            dim(&format!("{analysis_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}  {}",
            red("✗"),
            index,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_aborted(&self, total_images: usize, _error: &str) {
        let done = self.bar.position();
        self.bar.finish_and_clear();
        eprintln!(
            "{} stopped after {done}/{total_images} images",
            red("✗"),
        );
    }

    fn on_batch_complete(&self, total_images: usize, analysed: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} images analysed successfully",
                green("✔"),
                bold(&analysed.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} images analysed  ({} unavailable)",
                cyan("⚠"),
                bold(&analysed.to_string()),
                total_images,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse three knee radiographs for one patient
  xray-report knee1.png knee2.png knee3.png --patient-id P-1042

  # Write the report somewhere specific
  xray-report scans/*.png -o reports/knee.html

  # Fetch an image over HTTPS and use another model
  xray-report https://pacs.example.org/knee.png --model gpt-4.1

  # Custom instructions for another body part
  xray-report hand.png --prompt-file hand_prompt.txt --title "Hand X-Ray Report"

  # Machine-readable summary on stdout
  xray-report *.png --json > summary.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (default provider)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  RUST_LOG                Override the log filter (e.g. xray_report=debug)

The credential is checked before any image is read. A missing key exits
with an error and no API call is made.
"#;

/// Analyse radiographs with a vision LLM and write an HTML report.
#[derive(Parser, Debug)]
#[command(
    name = "xray-report",
    version,
    about = "Analyse radiographs with a vision LLM and write an HTML report",
    long_about = "Send each input image (local file or URL) to a vision-capable language model \
and assemble the answers into one self-contained HTML report with the images embedded. \
Images that cannot be decoded or analysed appear as placeholder cards.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    images: Vec<String>,

    /// Patient or study identifier printed on every card.
    #[arg(short, long, env = "XRAY_REPORT_PATIENT_ID", default_value = "abcd")]
    patient_id: String,

    /// Where to write the HTML report.
    #[arg(
        short,
        long,
        env = "XRAY_REPORT_OUTPUT",
        default_value = "knee_xray_report.html"
    )]
    output: PathBuf,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "XRAY_REPORT_PROVIDER")]
    provider: Option<String>,

    /// Vision model ID (default: o3).
    #[arg(long, env = "XRAY_REPORT_MODEL")]
    model: Option<String>,

    /// Environment variable holding the API key (default: derived from provider).
    #[arg(long, env = "XRAY_REPORT_CREDENTIAL_VAR")]
    credential_var: Option<String>,

    /// Number of images analysed at once.
    #[arg(short, long, env = "XRAY_REPORT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Max output tokens per analysis.
    #[arg(long, env = "XRAY_REPORT_MAX_TOKENS", default_value_t = 2000)]
    max_tokens: usize,

    /// Sampling temperature (0.0–2.0); omitted from the request when unset.
    #[arg(long, env = "XRAY_REPORT_TEMPERATURE")]
    temperature: Option<f32>,

    /// Retries per image on transient API failure.
    #[arg(long, env = "XRAY_REPORT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Initial retry backoff in milliseconds (doubles per attempt).
    #[arg(long, env = "XRAY_REPORT_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Per-call API timeout in seconds.
    #[arg(long, env = "XRAY_REPORT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout for URL inputs in seconds.
    #[arg(long, env = "XRAY_REPORT_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Longest edge in pixels of the image sent to the model.
    #[arg(long, env = "XRAY_REPORT_MAX_DIMENSION", default_value_t = 2048)]
    max_dimension: u32,

    /// JPEG quality (1–100) of the re-encoded image.
    #[arg(long, env = "XRAY_REPORT_JPEG_QUALITY", default_value_t = 95,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Path to a text file with custom analysis instructions.
    #[arg(long, env = "XRAY_REPORT_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Report title.
    #[arg(long, env = "XRAY_REPORT_TITLE")]
    title: Option<String>,

    /// Print a JSON summary (stats + per-image status) to stdout.
    #[arg(long, env = "XRAY_REPORT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "XRAY_REPORT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "XRAY_REPORT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "XRAY_REPORT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run, racing Ctrl-C ───────────────────────────────────────────────
    let output = tokio::select! {
        result = analyze_batch(&cli.images, &config) => result.context("Analysis failed")?,
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("Cancelled; no report was written");
        }
    };

    write_report(&cli.output, &output.html).context("Failed to write report")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json_summary(&cli, &output))
                .context("Failed to serialise summary")?
        );
    }

    if !cli.quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {}/{} images  {}ms  →  {}",
            if stats.failed_images == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.analysed_images,
            stats.total_images,
            stats.total_duration_ms,
            bold(&cli.output.display().to_string()),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&stats.total_input_tokens.to_string()),
            dim(&stats.total_output_tokens.to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `ReportConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ReportConfig> {
    let mut builder = ReportConfig::builder()
        .subject_id(cli.patient_id.clone())
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .max_dimension(cli.max_dimension)
        .jpeg_quality(cli.jpeg_quality);

    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt(prompt.trim().to_string());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref var) = cli.credential_var {
        builder = builder.credential_var(var.clone());
    }
    if let Some(t) = cli.temperature {
        builder = builder.temperature(t);
    }
    if let Some(ref title) = cli.title {
        builder = builder.report_title(title.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// JSON summary printed with `--json`.
fn json_summary(cli: &Cli, output: &BatchOutput) -> serde_json::Value {
    serde_json::json!({
        "report": cli.output.display().to_string(),
        "stats": output.stats,
        "images": output.entries,
    })
}
