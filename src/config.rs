//! Configuration types for a batch analysis run.
//!
//! All run behaviour is controlled through [`ReportConfig`], built via its
//! [`ReportConfigBuilder`]. Every knob lives in one struct so a config can be
//! cloned into each concurrent worker and logged as a whole.

use crate::error::ReportError;
use crate::pipeline::llm::VisionModel;
use crate::progress::ProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Longest edge, in pixels, an image may have when sent to the model.
pub const DEFAULT_MAX_DIMENSION: u32 = 2048;

/// JPEG quality used when re-encoding normalised images.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Output-token budget for one analysis.
pub const DEFAULT_MAX_TOKENS: usize = 2000;

/// Provider used when none is named.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Model used when none is named. It only accepts user-role input.
pub const DEFAULT_MODEL: &str = "o3";

/// Subject identifier used when the caller does not supply one.
pub const DEFAULT_SUBJECT_ID: &str = "abcd";

/// Title printed in the report banner.
pub const DEFAULT_REPORT_TITLE: &str = "Knee X-Ray Analysis Report";

/// Configuration for a batch analysis run.
///
/// Built via [`ReportConfig::builder()`] or using [`ReportConfig::default()`].
///
/// # Example
/// ```rust
/// use xray_report::ReportConfig;
///
/// let config = ReportConfig::builder()
///     .subject_id("patient-042")
///     .concurrency(2)
///     .model("gpt-4.1")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Clone)]
pub struct ReportConfig {
    /// Identifier printed on every card (patient or study id). Default: `abcd`.
    pub subject_id: String,

    /// Maximum width or height of the image sent to the model. Default: 2048.
    ///
    /// Larger images are downsampled with Lanczos3, preserving aspect ratio.
    pub max_dimension: u32,

    /// JPEG quality (1–100) for the re-encoded image. Default: 95.
    pub jpeg_quality: u8,

    /// Number of images analysed at once. Default: 4.
    ///
    /// Each in-flight image holds one open API request. Lower this when the
    /// provider starts answering with `429`.
    pub concurrency: usize,

    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, uses [`DEFAULT_PROVIDER`].
    pub provider_name: Option<String>,

    /// Pre-constructed vision model. Takes precedence over `provider_name`
    /// and skips the credential pre-flight.
    pub vision_model: Option<Arc<dyn VisionModel>>,

    /// Environment variable that must hold the API credential.
    ///
    /// If None, derived from the provider name (see
    /// [`credential_var_for`]). Local providers need no credential.
    pub credential_var: Option<String>,

    /// Maximum tokens the model may generate per image. Default: 2000.
    pub max_tokens: usize,

    /// Sampling temperature. Default: None (provider default).
    ///
    /// Reasoning models reject an explicit temperature, so it is only sent
    /// when set.
    pub temperature: Option<f32>,

    /// Maximum retry attempts on a transient API failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Custom instruction prompt. If None, uses the built-in radiologist prompt.
    pub prompt: Option<String>,

    /// Title printed in the report banner.
    pub report_title: String,

    /// Optional per-image progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            subject_id: DEFAULT_SUBJECT_ID.to_string(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            concurrency: 4,
            model: None,
            provider_name: None,
            vision_model: None,
            credential_var: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            max_retries: 3,
            retry_backoff_ms: 1000,
            api_timeout_secs: 120,
            download_timeout_secs: 60,
            prompt: None,
            report_title: DEFAULT_REPORT_TITLE.to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ReportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportConfig")
            .field("subject_id", &self.subject_id)
            .field("max_dimension", &self.max_dimension)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field(
                "vision_model",
                &self.vision_model.as_ref().map(|_| "<dyn VisionModel>"),
            )
            .field("credential_var", &self.credential_var)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("report_title", &self.report_title)
            .finish()
    }
}

impl ReportConfig {
    /// Create a new builder for `ReportConfig`.
    pub fn builder() -> ReportConfigBuilder {
        ReportConfigBuilder {
            config: Self::default(),
        }
    }

    /// Provider name with the default applied.
    pub fn provider(&self) -> &str {
        self.provider_name.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    /// Model identifier with the default applied.
    pub fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// The environment variable holding the credential, if one is required.
    pub fn required_credential_var(&self) -> Option<String> {
        match self.credential_var {
            Some(ref var) => Some(var.clone()),
            None => credential_var_for(self.provider()).map(str::to_string),
        }
    }
}

/// Standard credential variable for a provider, or None for local providers.
pub fn credential_var_for(provider: &str) -> Option<&'static str> {
    match provider.to_ascii_lowercase().as_str() {
        "ollama" | "lmstudio" | "lm-studio" | "mock" => None,
        "anthropic" | "claude" => Some("ANTHROPIC_API_KEY"),
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "azure" | "azure-openai" => Some("AZURE_OPENAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        _ => Some("OPENAI_API_KEY"),
    }
}

/// Builder for [`ReportConfig`].
#[derive(Debug)]
pub struct ReportConfigBuilder {
    config: ReportConfig,
}

impl ReportConfigBuilder {
    pub fn subject_id(mut self, id: impl Into<String>) -> Self {
        self.config.subject_id = id.into();
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px.max(16);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn vision_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.config.vision_model = Some(model);
        self
    }

    pub fn credential_var(mut self, var: impl Into<String>) -> Self {
        self.config.credential_var = Some(var.into());
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = Some(t.clamp(0.0, 2.0));
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn report_title(mut self, title: impl Into<String>) -> Self {
        self.config.report_title = title.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ReportConfig, ReportError> {
        let c = &self.config;
        if c.subject_id.trim().is_empty() {
            return Err(ReportError::InvalidConfig(
                "Subject id must not be empty".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ReportError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ReportError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if matches!(c.prompt.as_deref(), Some(p) if p.trim().is_empty()) {
            return Err(ReportError::InvalidConfig("Prompt must not be empty".into()));
        }
        Ok(self.config)
    }
}
