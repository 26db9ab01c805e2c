//! Vision-model interaction: build the request, call the model, retry.
//!
//! All prompt text lives in [`crate::prompts`]; this module owns message
//! layout, error classification and the retry loop.
//!
//! ## Retry Strategy
//!
//! Rate limits, 5xx answers, network resets and timeouts are transient and
//! retried with exponential backoff (`retry_backoff_ms * 2^(attempt-1)`).
//! A rejected credential is never retried: it surfaces as
//! [`ItemError::AuthRejected`], which the batch driver escalates to a fatal
//! error. Any other rejection and an empty answer are per-image failures.
//!
//! The model's answer is stored exactly as returned.

use crate::config::ReportConfig;
use crate::error::ItemError;
use crate::output::AnalysisRecord;
use crate::pipeline::encode::NormalizedPayload;
use crate::prompts::DEFAULT_ANALYSIS_PROMPT;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError};
use once_cell::sync::Lazy;
use regex::Regex;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One analysis request as seen by a [`VisionModel`].
#[derive(Debug, Clone, Copy)]
pub struct VisionRequest<'a> {
    pub prompt: &'a str,
    pub image: &'a NormalizedPayload,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
}

/// Raw model answer.
#[derive(Debug, Clone, Default)]
pub struct VisionReply {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// How a failed call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credential missing or rejected.
    Auth,
    /// Worth retrying: rate limit, overload, network or timeout.
    Transient,
    /// Retrying will not help.
    Rejected,
}

/// A failed model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl ModelFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Classify a provider error message.
    pub fn from_message(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            kind: classify_failure(&detail),
            detail,
        }
    }
}

/// A multimodal model able to describe one image.
///
/// The default implementation is [`LlmVisionModel`]; tests and callers with
/// their own transport can supply any other.
pub trait VisionModel: Send + Sync {
    fn describe<'a>(
        &'a self,
        request: VisionRequest<'a>,
    ) -> BoxFuture<'a, Result<VisionReply, ModelFailure>>;
}

/// [`VisionModel`] backed by an `edgequake_llm` provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

impl VisionModel for LlmVisionModel {
    fn describe<'a>(
        &'a self,
        request: VisionRequest<'a>,
    ) -> BoxFuture<'a, Result<VisionReply, ModelFailure>> {
        Box::pin(async move {
            let messages = build_messages(&request);
            let options = build_options(&request);
            let response = self
                .provider
                .chat(&messages, Some(&options))
                .await
                .map_err(failure_from_llm_error)?;

            Ok(VisionReply {
                text: response.content,
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
            })
        })
    }
}

/// A single user-role message: instruction text, then the image.
///
/// No system message is sent; the default model rejects that role.
fn build_messages(request: &VisionRequest<'_>) -> Vec<ChatMessage> {
    vec![ChatMessage::user_with_images(
        request.prompt,
        vec![request.image.to_image_data()],
    )]
}

fn build_options(request: &VisionRequest<'_>) -> CompletionOptions {
    CompletionOptions {
        temperature: request.temperature,
        max_tokens: Some(request.max_tokens),
        ..Default::default()
    }
}

/// Map a provider error onto a [`ModelFailure`].
///
/// Typed variants decide on their own; the catch-all variants carry the
/// provider's message, which is classified by [`classify_failure`].
pub fn failure_from_llm_error(err: LlmError) -> ModelFailure {
    let kind = match &err {
        LlmError::AuthError(_) => FailureKind::Auth,
        LlmError::RateLimited(_) | LlmError::NetworkError(_) | LlmError::Timeout => {
            FailureKind::Transient
        }
        LlmError::ApiError(message)
        | LlmError::ProviderError(message)
        | LlmError::Unknown(message) => classify_failure(message),
        _ => FailureKind::Rejected,
    };
    ModelFailure::new(kind, err.to_string())
}

/// An HTTP status code: either leading the message or right after
/// "status", "HTTP" or "code". Bare numbers elsewhere are not statuses.
static STATUS_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^\s*|\b(?:status(?:\s+code)?|http(?:/[\d.]+)?|code)\s*[:=]?\s*)([1-5]\d{2})\b")
        .unwrap()
});

/// Sort a provider error message into auth, transient or rejected.
pub fn classify_failure(message: &str) -> FailureKind {
    if let Some(code) = status_code(message) {
        return match code {
            401 | 403 => FailureKind::Auth,
            408 | 429 | 500..=599 => FailureKind::Transient,
            _ => FailureKind::Rejected,
        };
    }

    let m = message.to_ascii_lowercase();

    const AUTH: &[&str] = &[
        "unauthorized",
        "unauthorised",
        "forbidden",
        "authentication",
        "invalid api key",
        "invalid_api_key",
        "incorrect api key",
        "api key not",
        "permission denied",
    ];
    const TRANSIENT: &[&str] = &[
        "rate limit",
        "rate_limit",
        "too many requests",
        "overloaded",
        "unavailable",
        "timeout",
        "timed out",
        "connection",
        "network",
        "temporarily",
        "try again",
    ];

    if AUTH.iter().any(|needle| m.contains(needle)) {
        FailureKind::Auth
    } else if TRANSIENT.iter().any(|needle| m.contains(needle)) {
        FailureKind::Transient
    } else {
        FailureKind::Rejected
    }
}

fn status_code(message: &str) -> Option<u16> {
    STATUS_CODE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// True when the answer holds nothing but whitespace or zero-width characters.
fn is_blank(text: &str) -> bool {
    text.chars().all(|c| {
        c.is_whitespace() || matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}')
    })
}

/// Analyse one normalised image, retrying transient failures.
///
/// Returns the record on success. Every failure is an [`ItemError`]; the
/// caller checks [`ItemError::is_fatal`] to decide whether to stop the batch.
pub async fn analyze(
    model: &Arc<dyn VisionModel>,
    payload: &NormalizedPayload,
    filename: &str,
    subject_id: &str,
    config: &ReportConfig,
) -> Result<AnalysisRecord, ItemError> {
    let start = Instant::now();
    let prompt = config.prompt.as_deref().unwrap_or(DEFAULT_ANALYSIS_PROMPT);
    let request = VisionRequest {
        prompt,
        image: payload,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    };
    let call_timeout = Duration::from_secs(config.api_timeout_secs);

    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config
                .retry_backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "{}: retry {}/{} after {}ms",
                filename, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let outcome = match timeout(call_timeout, model.describe(request)).await {
            Ok(result) => result,
            Err(_) => Err(ModelFailure::new(
                FailureKind::Transient,
                format!("timed out after {}s", config.api_timeout_secs),
            )),
        };

        match outcome {
            Ok(reply) => {
                let duration = start.elapsed();
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    filename, reply.input_tokens, reply.output_tokens, duration
                );

                if is_blank(&reply.text) {
                    warn!("{}: model returned no usable text", filename);
                    return Err(ItemError::EmptyAnalysis);
                }

                return Ok(AnalysisRecord {
                    filename: filename.to_string(),
                    subject_id: subject_id.to_string(),
                    analysis_text: reply.text,
                    encoded_image: payload.base64_data.clone(),
                    input_tokens: reply.input_tokens,
                    output_tokens: reply.output_tokens,
                    retries: attempt,
                    duration_ms: duration.as_millis() as u64,
                });
            }
            Err(failure) => match failure.kind {
                FailureKind::Auth => {
                    return Err(ItemError::AuthRejected {
                        detail: failure.detail,
                    });
                }
                FailureKind::Rejected => {
                    warn!("{}: request rejected: {}", filename, failure.detail);
                    return Err(ItemError::ApiRejected {
                        detail: failure.detail,
                    });
                }
                FailureKind::Transient => {
                    warn!(
                        "{}: attempt {} failed: {}",
                        filename,
                        attempt + 1,
                        failure.detail
                    );
                    last_err = Some(failure.detail);
                }
            },
        }
    }

    Err(ItemError::TransientApi {
        retries: config.max_retries,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}
