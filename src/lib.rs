//! # xray-report
//!
//! Batch-analyse radiographs with a vision language model and assemble the
//! answers into one self-contained HTML report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images (paths / URLs)
//!  │
//!  ├─ 1. Input    read local files or download URLs
//!  ├─ 2. Encode   flatten colour, bound to 2048 px, JPEG q95 → base64
//!  ├─ 3. VLM      concurrent calls to o3 / gpt-4.1 / claude / … with retry
//!  └─ 4. Render   one HTML page: banner, one card per image, disclaimer
//! ```
//!
//! A bad image never sinks the batch: it becomes an "analysis unavailable"
//! card. Only a missing or rejected credential, a batch with nothing
//! decodable, or a failure to render/write the report is fatal.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use xray_report::{generate_report, ReportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads OPENAI_API_KEY from the environment.
//!     let config = ReportConfig::builder().subject_id("patient-042").build()?;
//!     let stats = generate_report(&["knee1.png", "knee2.png"], "report.html", &config).await?;
//!     eprintln!("{}/{} images analysed", stats.analysed_images, stats.total_images);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `xray-report` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{
    analyze_batch, analyze_sources, check_credential, generate_report, generate_report_sync,
    write_report,
};
pub use config::{ReportConfig, ReportConfigBuilder};
pub use error::{ItemError, ReportError};
pub use output::{AnalysisRecord, BatchOutput, BatchStats, ReportEntry, SourceImage};
pub use pipeline::encode::{normalize, NormalizedPayload};
pub use pipeline::llm::{
    analyze, FailureKind, LlmVisionModel, ModelFailure, VisionModel, VisionReply, VisionRequest,
};
pub use pipeline::render::{compose, ReportOptions};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
