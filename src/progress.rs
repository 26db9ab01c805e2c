//! Progress-callback trait for per-image batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ReportConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through each image.
//!
//! # Example
//!
//! ```rust
//! use xray_report::{BatchProgressCallback, ReportConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, index: usize, total: usize, analysis_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Image {}/{} done ({} chars)", index, total, analysis_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ReportConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch driver as it processes each image.
///
/// Images are processed concurrently, so `on_image_start`,
/// `on_image_complete` and `on_image_error` may be called from different
/// threads at once. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any image is read.
    fn on_batch_start(&self, total_images: usize) {
        let _ = total_images;
    }

    /// Called when work on an image begins.
    ///
    /// # Arguments
    /// * `index`    — 1-indexed position in the input list
    /// * `total`    — number of images in the batch
    /// * `filename` — display name of the image
    fn on_image_start(&self, index: usize, total: usize, filename: &str) {
        let _ = (index, total, filename);
    }

    /// Called when an image was analysed successfully.
    ///
    /// `analysis_len` is the character count of the analysis text.
    fn on_image_complete(&self, index: usize, total: usize, analysis_len: usize) {
        let _ = (index, total, analysis_len);
    }

    /// Called when an image ends up as a placeholder entry.
    fn on_image_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every image has been attempted.
    fn on_batch_complete(&self, total_images: usize, analysed: usize) {
        let _ = (total_images, analysed);
    }

    /// Called instead of `on_batch_complete` when the batch stops with a
    /// fatal error after `on_batch_start`.
    fn on_batch_aborted(&self, total_images: usize, error: &str) {
        let _ = (total_images, error);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ReportConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        analysed: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_image_start(&self, _index: usize, _total: usize, _filename: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_image_complete(&self, _index: usize, _total: usize, _analysis_len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_image_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total_images: usize, analysed: usize) {
            self.analysed.store(analysed, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_image_start(1, 2, "knee1.png");
        cb.on_image_complete(1, 2, 420);
        cb.on_image_error(2, 2, "not a decodable image");
        cb.on_batch_complete(2, 1);
        cb.on_batch_aborted(2, "Authentication failed");
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_image_start(1, 2, "a.png");
        tracker.on_image_complete(1, 2, 100);
        tracker.on_image_start(2, 2, "b.png");
        tracker.on_image_error(2, 2, "timeout");
        tracker.on_batch_complete(2, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.analysed.load(Ordering::SeqCst), 1);
    }
}
