//! Error types for the xray-report library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ReportError`] — **Fatal**: the run cannot produce a report at all
//!   (missing credential, rejected API key, nothing decodable, report could
//!   not be rendered or written). Returned as `Err(ReportError)` from the
//!   top-level batch functions.
//!
//! * [`ItemError`] — **Non-fatal**: a single image failed (unreadable file,
//!   undecodable bytes, transient API error, empty answer) but every other
//!   image is fine. Stored inside [`crate::output::ReportEntry::Unavailable`]
//!   and rendered as a placeholder card in the report.
//!
//! [`ItemError::AuthRejected`] is the one per-item error that escalates: a
//! rejected credential will be rejected for every sibling too, so the batch
//! driver turns it into [`ReportError::AuthFailed`] and stops.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the xray-report library.
#[derive(Debug, Error)]
pub enum ReportError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// The API credential is absent; raised before any network call.
    #[error("Missing API credential: environment variable {var} is not set.\nExport it, e.g. export {var}=...")]
    MissingCredential { var: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The named provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── API errors ────────────────────────────────────────────────────────
    /// The provider rejected the credential (401/403).
    #[error("Authentication failed while analysing '{filename}': {detail}")]
    AuthFailed { filename: String, detail: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The batch was started with an empty input list.
    #[error("No input images were given")]
    NoInputs,

    /// Every input failed to load or decode; a report would be empty.
    #[error("None of the {total} input images could be decoded.\nFirst error: {first_error}")]
    NoImagesDecoded { total: usize, first_error: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Assembling the HTML document failed.
    #[error("Failed to render report: {0}")]
    Render(String),

    /// Could not create or write the output HTML file.
    #[error("Failed to write report '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single input image.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// The local file could not be read.
    #[error("cannot read '{path}': {detail}")]
    Unreadable { path: String, detail: String },

    /// The URL could not be fetched.
    #[error("download of '{url}' failed: {detail}")]
    DownloadFailed { url: String, detail: String },

    /// The bytes are not a decodable raster image.
    #[error("not a decodable image: {detail}")]
    Decode { detail: String },

    /// The decoded image could not be re-encoded as JPEG.
    #[error("JPEG encoding failed: {detail}")]
    Encode { detail: String },

    /// Network, timeout or rate-limit failures persisted through every retry.
    #[error("API call failed after {retries} retries: {detail}")]
    TransientApi { retries: u32, detail: String },

    /// The provider refused the request for a reason retrying won't fix.
    #[error("API rejected the request: {detail}")]
    ApiRejected { detail: String },

    /// The provider rejected the credential.
    #[error("API rejected the credential: {detail}")]
    AuthRejected { detail: String },

    /// The model answered without any usable text.
    #[error("model returned an empty analysis")]
    EmptyAnalysis,
}

impl ItemError {
    /// Whether this failure must abort the whole batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ItemError::AuthRejected { .. })
    }

    /// Whether the image never made it past loading and decoding.
    pub fn is_decode_stage(&self) -> bool {
        matches!(
            self,
            ItemError::Unreadable { .. }
                | ItemError::DownloadFailed { .. }
                | ItemError::Decode { .. }
                | ItemError::Encode { .. }
        )
    }
}
