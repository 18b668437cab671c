//! Progress-callback trait for packet generation events.
//!
//! Inject an [`Arc<dyn GenerationProgressCallback>`] via
//! [`crate::config::PacketConfigBuilder::progress_callback`] to observe a
//! generation run as it fetches evidence, composes pages and stores the
//! result.
//!
//! # Example
//!
//! ```rust
//! use claimpack::{GenerationProgressCallback, PacketConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     fetched: AtomicUsize,
//! }
//!
//! impl GenerationProgressCallback for CountingCallback {
//!     fn on_evidence_fetched(&self, _index: usize, _total: usize, _name: &str) {
//!         self.fetched.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PacketConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { fetched: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as a generation run progresses.
///
/// Evidence fetches run concurrently, so `on_evidence_fetched` and
/// `on_evidence_dropped` may be called from different tasks and in any
/// order. All methods default to no-ops.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called once the claim is authorized and its manifest loaded.
    ///
    /// # Arguments
    /// * `claim_id`    : claim being generated
    /// * `image_count` : evidence images that will be fetched
    fn on_generation_start(&self, claim_id: &str, image_count: usize) {
        let _ = (claim_id, image_count);
    }

    /// Called when one evidence image was fetched.
    ///
    /// # Arguments
    /// * `index`: 1-based position among the images
    /// * `total`: number of images
    /// * `name` : original file name, or the storage path
    fn on_evidence_fetched(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when one evidence image could not be fetched and was dropped.
    fn on_evidence_dropped(&self, index: usize, total: usize, reason: &str) {
        let _ = (index, total, reason);
    }

    /// Called once the page sequence is laid out.
    fn on_composed(&self, page_count: usize) {
        let _ = page_count;
    }

    /// Called after the packet bytes and record are persisted.
    fn on_stored(&self, storage_path: &str, byte_len: usize) {
        let _ = (storage_path, byte_len);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PacketConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        fetched: AtomicUsize,
        dropped: AtomicUsize,
        pages: AtomicUsize,
    }

    impl GenerationProgressCallback for TrackingCallback {
        fn on_evidence_fetched(&self, _index: usize, _total: usize, _name: &str) {
            self.fetched.fetch_add(1, Ordering::SeqCst);
        }

        fn on_evidence_dropped(&self, _index: usize, _total: usize, _reason: &str) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_composed(&self, page_count: usize) {
            self.pages.store(page_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_generation_start("c", 2);
        cb.on_evidence_fetched(1, 2, "a.jpg");
        cb.on_evidence_dropped(2, 2, "timeout");
        cb.on_composed(3);
        cb.on_stored("u/c/packet.pdf", 1024);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let cb = TrackingCallback::default();
        cb.on_evidence_fetched(1, 3, "a.jpg");
        cb.on_evidence_fetched(2, 3, "b.png");
        cb.on_evidence_dropped(3, 3, "gone");
        cb.on_composed(4);
        assert_eq!(cb.fetched.load(Ordering::SeqCst), 2);
        assert_eq!(cb.dropped.load(Ordering::SeqCst), 1);
        assert_eq!(cb.pages.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_generation_start("c", 0);
        cb.on_composed(2);
    }
}
