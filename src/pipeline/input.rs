//! Input resolution: turn a user-supplied path or URL into a [`SourceImage`].
//!
//! Failures here are per-image: an unreadable file or a failed download
//! becomes a placeholder card, never a fatal error.

use crate::error::ItemError;
use crate::output::SourceImage;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Display name for an input: the final path or URL segment.
pub fn display_name(input: &str) -> String {
    if is_url(input) {
        if let Ok(parsed) = reqwest::Url::parse(input) {
            if let Some(mut segments) = parsed.path_segments() {
                if let Some(last) = segments.next_back() {
                    if !last.is_empty() {
                        return last.to_string();
                    }
                }
            }
        }
        return input.to_string();
    }

    Path::new(input)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.to_string())
}

/// Load the bytes behind `input`, downloading it if it is a URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<SourceImage, ItemError> {
    let filename = display_name(input);
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    Ok(SourceImage { filename, bytes })
}

async fn read_local(path: &str) -> Result<Vec<u8>, ItemError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ItemError::Unreadable {
            path: path.to_string(),
            detail: e.to_string(),
        })?;
    debug!("Read {} ({} bytes)", path, bytes.len());
    Ok(bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ItemError> {
    info!("Downloading image from: {}", url);

    let failed = |detail: String| ItemError::DownloadFailed {
        url: url.to_string(),
        detail,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    debug!("Downloaded {} ({} bytes)", url, bytes.len());
    Ok(bytes.to_vec())
}
