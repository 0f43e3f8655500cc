//! Observer trait for dispatch and strategy-chain events.
//!
//! Inject an [`Arc<dyn ConversionObserver>`] via
//! [`crate::config::ConverterConfigBuilder::observer`] to receive events as
//! the Dispatcher walks a strategy chain. Callers can forward events to a
//! channel, a database record, or a terminal spinner without the library
//! knowing anything about the host application.
//!
//! # Example
//!
//! ```rust
//! use edgequake_convert::{ConversionObserver, ConverterConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     failures: AtomicUsize,
//! }
//!
//! impl ConversionObserver for CountingObserver {
//!     fn on_strategy_failed(&self, _request_id: &str, strategy: &str, error: &str) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{strategy} failed: {error}");
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { failures: AtomicUsize::new(0) });
//!
//! let config = ConverterConfig::builder()
//!     .observer(observer as Arc<dyn ConversionObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::kind::ConversionKind;
use std::sync::Arc;

/// Called by the Dispatcher as it runs a request.
///
/// Requests are dispatched concurrently, so implementations must be
/// `Send + Sync` and protect shared mutable state themselves. Every method
/// has a no-op default.
pub trait ConversionObserver: Send + Sync {
    /// Called once the request passed validation, before any strategy runs.
    ///
    /// # Arguments
    /// * `request_id`: the 12-hex request identifier
    /// * `kind`: requested conversion kind
    /// * `chain_len`: number of candidate strategies
    fn on_dispatch_start(&self, request_id: &str, kind: ConversionKind, chain_len: usize) {
        let _ = (request_id, kind, chain_len);
    }

    /// A candidate was not attempted because its host precondition is unmet.
    fn on_strategy_skipped(&self, request_id: &str, strategy: &str, reason: &str) {
        let _ = (request_id, strategy, reason);
    }

    /// A candidate is about to run.
    ///
    /// # Arguments
    /// * `position`: 1-indexed position in the chain
    fn on_strategy_start(&self, request_id: &str, strategy: &str, position: usize) {
        let _ = (request_id, strategy, position);
    }

    /// An attempted candidate failed or timed out; the chain moves on.
    fn on_strategy_failed(&self, request_id: &str, strategy: &str, error: &str) {
        let _ = (request_id, strategy, error);
    }

    /// An attempted candidate produced the output.
    fn on_strategy_succeeded(&self, request_id: &str, strategy: &str, duration_ms: u64) {
        let _ = (request_id, strategy, duration_ms);
    }

    /// Called exactly once per dispatched request.
    ///
    /// # Arguments
    /// * `output`: final file name on success, `None` on failure
    fn on_dispatch_complete(&self, request_id: &str, success: bool, output: Option<&str>) {
        let _ = (request_id, success, output);
    }
}

/// The default when no observer is configured.
pub struct NoopObserver;

impl ConversionObserver for NoopObserver {}

/// Alias matching the type stored in [`crate::config::ConverterConfig`].
pub type ObserverRef = Arc<dyn ConversionObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingObserver {
        starts: AtomicUsize,
        skips: AtomicUsize,
        failures: AtomicUsize,
        successes: AtomicUsize,
        completes: AtomicUsize,
    }

    impl ConversionObserver for TrackingObserver {
        fn on_dispatch_start(&self, _id: &str, _kind: ConversionKind, _len: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_strategy_skipped(&self, _id: &str, _strategy: &str, _reason: &str) {
            self.skips.fetch_add(1, Ordering::SeqCst);
        }

        fn on_strategy_failed(&self, _id: &str, _strategy: &str, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn on_strategy_succeeded(&self, _id: &str, _strategy: &str, _ms: u64) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_dispatch_complete(&self, _id: &str, _success: bool, _output: Option<&str>) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let obs = NoopObserver;
        obs.on_dispatch_start("abc", ConversionKind::MergePdf, 1);
        obs.on_strategy_skipped("abc", "libreoffice", "not installed");
        obs.on_strategy_start("abc", "lopdf-merge", 1);
        obs.on_strategy_failed("abc", "lopdf-merge", "bad xref");
        obs.on_strategy_succeeded("abc", "lopdf-merge", 12);
        obs.on_dispatch_complete("abc", true, Some("abc_merged.pdf"));
    }

    #[test]
    fn tracking_observer_receives_events() {
        let t = TrackingObserver::default();
        t.on_dispatch_start("id", ConversionKind::WordToPdf, 3);
        t.on_strategy_skipped("id", "libreoffice", "soffice not found");
        t.on_strategy_failed("id", "unoconv", "exit status 1");
        t.on_strategy_succeeded("id", "html-render", 40);
        t.on_dispatch_complete("id", true, Some("id_report.pdf"));

        assert_eq!(t.starts.load(Ordering::SeqCst), 1);
        assert_eq!(t.skips.load(Ordering::SeqCst), 1);
        assert_eq!(t.failures.load(Ordering::SeqCst), 1);
        assert_eq!(t.successes.load(Ordering::SeqCst), 1);
        assert_eq!(t.completes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let obs: ObserverRef = Arc::new(NoopObserver);
        obs.on_dispatch_start("x", ConversionKind::CropImage, 1);
        obs.on_dispatch_complete("x", false, None);
    }
}
