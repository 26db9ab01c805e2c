//! Batch driver: fan the images out, wait for all of them, render once.
//!
//! ## Flow
//!
//! 1. Pre-flight: reject an empty batch and check the credential before any
//!    input is read or any request is sent.
//! 2. Per image (bounded by `concurrency`): resolve → normalise → analyse.
//!    Each unit returns its input position and an entry; the driver drops it
//!    into a pre-allocated slot so the report keeps input order.
//! 3. Barrier: once every unit has finished, render the report.
//!
//! A rejected credential stops the batch at once. Dropping the stream
//! abandons the in-flight requests and nothing is reported.

use crate::config::ReportConfig;
use crate::error::{ItemError, ReportError};
use crate::output::{AnalysisRecord, BatchOutput, BatchStats, ReportEntry, SourceImage};
use crate::pipeline::llm::{self, LlmVisionModel, VisionModel};
use crate::pipeline::render::{self, ReportOptions};
use crate::pipeline::{encode, input};
use chrono::Local;
use edgequake_llm::ProviderFactory;
use futures::stream::{self, StreamExt};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One unit of work before it has been loaded.
enum PendingImage {
    Input(String),
    Source(SourceImage),
}

impl PendingImage {
    fn filename(&self) -> String {
        match self {
            PendingImage::Input(s) => input::display_name(s),
            PendingImage::Source(src) => src.filename.clone(),
        }
    }
}

/// Analyse a list of image paths or URLs and render the report in memory.
///
/// # Returns
/// `Ok(BatchOutput)` when at least one image decoded, even if some images
/// failed (their cards carry an "analysis unavailable" placeholder).
///
/// # Errors
/// Returns `Err(ReportError)` only for fatal errors:
/// - empty input list, missing credential, provider not configured
/// - credential rejected by the API
/// - no input could be decoded
/// - the report could not be rendered
pub async fn analyze_batch<S: AsRef<str>>(
    inputs: &[S],
    config: &ReportConfig,
) -> Result<BatchOutput, ReportError> {
    let pending = inputs
        .iter()
        .map(|s| PendingImage::Input(s.as_ref().to_string()))
        .collect();
    run_batch(pending, config).await
}

/// Analyse images already held in memory.
pub async fn analyze_sources(
    sources: Vec<SourceImage>,
    config: &ReportConfig,
) -> Result<BatchOutput, ReportError> {
    let pending = sources.into_iter().map(PendingImage::Source).collect();
    run_batch(pending, config).await
}

/// Analyse the inputs and write the report to `output_path`.
///
/// The file is written to a temporary sibling first and then renamed over
/// the target, so readers never observe a half-written report.
pub async fn generate_report<S: AsRef<str>>(
    inputs: &[S],
    output_path: impl AsRef<Path>,
    config: &ReportConfig,
) -> Result<BatchStats, ReportError> {
    let output = analyze_batch(inputs, config).await?;
    let path = output_path.as_ref().to_path_buf();
    let html = output.html;

    tokio::task::spawn_blocking(move || write_report(&path, &html))
        .await
        .map_err(|e| ReportError::Internal(format!("Write task panicked: {e}")))??;

    Ok(output.stats)
}

/// Synchronous wrapper around [`generate_report`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_report_sync<S: AsRef<str>>(
    inputs: &[S],
    output_path: impl AsRef<Path>,
    config: &ReportConfig,
) -> Result<BatchStats, ReportError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ReportError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(generate_report(inputs, output_path, config))
}

/// Atomically write a rendered report to `path`.
pub fn write_report(path: &Path, html: &str) -> Result<(), ReportError> {
    let write_failed = |source: std::io::Error| ReportError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_failed)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_failed)?;
    tmp.write_all(html.as_bytes()).map_err(write_failed)?;
    tmp.persist(path).map_err(|e| write_failed(e.error))?;

    info!("Report written to {}", path.display());
    Ok(())
}

/// Fail fast when the configured provider needs a credential that is absent.
///
/// Skipped when a vision model was injected; it owns its own authentication.
pub fn check_credential(config: &ReportConfig) -> Result<(), ReportError> {
    if config.vision_model.is_some() {
        return Ok(());
    }
    if let Some(var) = config.required_credential_var() {
        match std::env::var(&var) {
            Ok(value) if !value.trim().is_empty() => {}
            _ => return Err(ReportError::MissingCredential { var }),
        }
    }
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Resolve the vision model, from most-specific to least-specific.
///
/// 1. **Injected model** (`config.vision_model`) — used as-is.
/// 2. **Named provider + model** — built by
///    [`ProviderFactory::create_llm_provider`], which reads the provider's
///    API key from the environment, after [`check_credential`] passed.
fn resolve_model(config: &ReportConfig) -> Result<Arc<dyn VisionModel>, ReportError> {
    if let Some(ref model) = config.vision_model {
        return Ok(Arc::clone(model));
    }

    check_credential(config)?;

    let provider_name = config.provider();
    let model_id = config.model_id();
    let provider = ProviderFactory::create_llm_provider(provider_name, model_id).map_err(|e| {
        ReportError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    info!("Using provider '{}' with model '{}'", provider_name, model_id);

    Ok(Arc::new(LlmVisionModel::new(provider)))
}

async fn run_batch(
    pending: Vec<PendingImage>,
    config: &ReportConfig,
) -> Result<BatchOutput, ReportError> {
    let total_start = Instant::now();

    // ── Step 1: Pre-flight ───────────────────────────────────────────────
    if pending.is_empty() {
        return Err(ReportError::NoInputs);
    }
    let model = resolve_model(config)?;
    let total = pending.len();
    info!(
        "Starting batch: {} images, concurrency {}",
        total, config.concurrency
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let result = run_units(pending, &model, config).await;

    if let Some(ref cb) = config.progress_callback {
        match &result {
            Ok(output) => cb.on_batch_complete(total, output.stats.analysed_images),
            Err(err) => cb.on_batch_aborted(total, &err.to_string()),
        }
    }

    result.map(|mut output| {
        output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Batch complete: {}/{} images analysed, {}ms total",
            output.stats.analysed_images, output.stats.total_images, output.stats.total_duration_ms
        );
        output
    })
}

/// Steps 2 to 4: fan out, barrier, render. Every error returned here
/// happens after `on_batch_start`.
async fn run_units(
    pending: Vec<PendingImage>,
    model: &Arc<dyn VisionModel>,
    config: &ReportConfig,
) -> Result<BatchOutput, ReportError> {
    let total = pending.len();

    // ── Step 2: Per-image units ──────────────────────────────────────────
    let analysis_start = Instant::now();
    let mut units = stream::iter(pending.into_iter().enumerate().map(|(index, item)| async move {
        let entry = process_image(index + 1, total, item, model, config).await;
        (index, entry)
    }))
    .buffer_unordered(config.concurrency.max(1));

    let mut slots: Vec<Option<ReportEntry>> = vec![None; total];
    while let Some((index, entry)) = units.next().await {
        if let Some(err) = entry.error().filter(|e| e.is_fatal()) {
            return Err(ReportError::AuthFailed {
                filename: entry.filename().to_string(),
                detail: err.to_string(),
            });
        }
        slots[index] = Some(entry);
    }
    drop(units);
    let analysis_duration_ms = analysis_start.elapsed().as_millis() as u64;

    // ── Step 3: Barrier ──────────────────────────────────────────────────
    let entries = slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| ReportError::Internal(format!("image {} produced no entry", i + 1)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let undecodable = entries
        .iter()
        .filter(|e| e.error().is_some_and(ItemError::is_decode_stage))
        .count();
    if undecodable == total {
        let first_error = entries
            .iter()
            .find_map(|e| e.error())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(ReportError::NoImagesDecoded { total, first_error });
    }

    // ── Step 4: Render ───────────────────────────────────────────────────
    let options = ReportOptions {
        title: config.report_title.clone(),
        generated_at: Local::now(),
    };
    let html = render::compose(&entries, &options)?;

    let stats = compute_stats(&entries, undecodable, analysis_duration_ms);

    Ok(BatchOutput {
        html,
        entries,
        stats,
    })
}

/// Resolve, normalise and analyse one image. Never fails: every problem
/// becomes an [`ReportEntry::Unavailable`].
async fn process_image(
    index: usize,
    total: usize,
    item: PendingImage,
    model: &Arc<dyn VisionModel>,
    config: &ReportConfig,
) -> ReportEntry {
    let filename = item.filename();
    if let Some(ref cb) = config.progress_callback {
        cb.on_image_start(index, total, &filename);
    }

    let entry = match load_and_analyze(item, &filename, model, config).await {
        Ok(record) => ReportEntry::Analysed(record),
        Err((reason, encoded_image)) => {
            warn!("Image {} ({}): {}", index, filename, reason);
            ReportEntry::Unavailable {
                filename,
                subject_id: config.subject_id.clone(),
                encoded_image,
                reason,
            }
        }
    };

    if let Some(ref cb) = config.progress_callback {
        match &entry {
            ReportEntry::Analysed(record) => {
                cb.on_image_complete(index, total, record.analysis_text.chars().count())
            }
            ReportEntry::Unavailable { reason, .. } => {
                cb.on_image_error(index, total, &reason.to_string())
            }
        }
    }

    entry
}

/// The fallible part of a unit. On analysis failure the already-encoded
/// image is handed back so the placeholder card can still show it.
async fn load_and_analyze(
    item: PendingImage,
    filename: &str,
    model: &Arc<dyn VisionModel>,
    config: &ReportConfig,
) -> Result<AnalysisRecord, (ItemError, Option<String>)> {
    let source = match item {
        PendingImage::Input(s) => input::resolve_input(&s, config.download_timeout_secs)
            .await
            .map_err(|e| (e, None))?,
        PendingImage::Source(src) => src,
    };

    let payload = encode::normalize_blocking(source, config.max_dimension, config.jpeg_quality)
        .await
        .map_err(|e| (e, None))?;
    debug!(
        "{}: normalised to {}x{}",
        filename, payload.width, payload.height
    );

    llm::analyze(model, &payload, filename, &config.subject_id, config)
        .await
        .map_err(|e| (e, Some(payload.base64_data.clone())))
}

fn compute_stats(
    entries: &[ReportEntry],
    undecodable: usize,
    analysis_duration_ms: u64,
) -> BatchStats {
    let records = entries.iter().filter_map(|e| match e {
        ReportEntry::Analysed(r) => Some(r),
        ReportEntry::Unavailable { .. } => None,
    });

    let mut stats = BatchStats {
        total_images: entries.len(),
        undecodable_images: undecodable,
        analysis_duration_ms,
        ..Default::default()
    };
    for record in records {
        stats.analysed_images += 1;
        stats.total_input_tokens += record.input_tokens;
        stats.total_output_tokens += record.output_tokens;
    }
    stats.failed_images = stats.total_images - stats.analysed_images;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tokens: u64) -> ReportEntry {
        ReportEntry::Analysed(AnalysisRecord {
            filename: "a.png".into(),
            subject_id: "abcd".into(),
            analysis_text: "ok".into(),
            encoded_image: String::new(),
            input_tokens: tokens,
            output_tokens: tokens / 2,
            retries: 0,
            duration_ms: 10,
        })
    }

    #[test]
    fn stats_count_outcomes_and_tokens() {
        let entries = vec![
            record(100),
            ReportEntry::Unavailable {
                filename: "b.png".into(),
                subject_id: "abcd".into(),
                encoded_image: None,
                reason: ItemError::Decode { detail: "x".into() },
            },
            record(50),
        ];
        let stats = compute_stats(&entries, 1, 800);
        assert_eq!(stats.total_images, 3);
        assert_eq!(stats.analysed_images, 2);
        assert_eq!(stats.failed_images, 1);
        assert_eq!(stats.undecodable_images, 1);
        assert_eq!(stats.total_input_tokens, 150);
        assert_eq!(stats.total_output_tokens, 75);
    }

    #[test]
    fn missing_credential_is_detected() {
        let config = ReportConfig::builder()
            .credential_var("XRAY_REPORT_UNIT_TEST_UNSET_VAR")
            .build()
            .unwrap();
        let err = check_credential(&config).unwrap_err();
        assert!(
            matches!(err, ReportError::MissingCredential { ref var } if var == "XRAY_REPORT_UNIT_TEST_UNSET_VAR")
        );
    }

    #[test]
    fn local_provider_needs_no_credential() {
        let config = ReportConfig::builder().provider_name("ollama").build().unwrap();
        assert!(check_credential(&config).is_ok());
    }

    #[test]
    fn write_report_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.html");
        write_report(&path, "<html>one</html>").unwrap();
        write_report(&path, "<html>two</html>").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<html>two</html>");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    struct Fixed;

    impl VisionModel for Fixed {
        fn describe<'a>(
            &'a self,
            _request: llm::VisionRequest<'a>,
        ) -> futures::future::BoxFuture<'a, Result<llm::VisionReply, llm::ModelFailure>> {
            Box::pin(async {
                Ok(llm::VisionReply {
                    text: "FINDINGS: none".into(),
                    ..Default::default()
                })
            })
        }
    }

    fn png_source(name: &str) -> SourceImage {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageLuma8(image::GrayImage::new(8, 8))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        SourceImage::new(name, bytes)
    }

    #[tokio::test]
    async fn zero_concurrency_still_runs() {
        let config = ReportConfig {
            concurrency: 0,
            vision_model: Some(Arc::new(Fixed)),
            ..Default::default()
        };
        let sources = vec![png_source("a.png"), png_source("b.png")];

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            analyze_sources(sources, &config),
        )
        .await
        .expect("batch must not stall")
        .unwrap();
        assert_eq!(output.stats.analysed_images, 2);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let inputs: [&str; 0] = [];
        let err = analyze_batch(&inputs, &ReportConfig::default()).await.unwrap_err();
        assert!(matches!(err, ReportError::NoInputs));
    }
}
