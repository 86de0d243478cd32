//! Observer trait for conversion and request events.
//!
//! Inject an [`Arc<dyn ConversionObserver>`] via
//! [`crate::config::ConversionConfigBuilder::observer`] to receive the events
//! a metrics or audit collaborator needs: errors by kind, in-flight request
//! count, request durations and output sizes.
//!
//! # Why an injected observer instead of global counters?
//!
//! The library never decides how numbers leave the process. A Prometheus
//! exporter, a StatsD client, a test that counts calls, or nothing at all can
//! sit behind the same four methods. Nothing in the pipeline touches shared
//! mutable state of its own; the trait is `Send + Sync` so implementations
//! can be shared across every concurrent request.
//!
//! # Example
//!
//! ```rust
//! use edgequake_html2pdf::{ConversionConfig, ConversionObserver, ErrorKind};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct ErrorCounter {
//!     errors: AtomicUsize,
//! }
//!
//! impl ConversionObserver for ErrorCounter {
//!     fn on_error(&self, kind: ErrorKind, message: &str) {
//!         self.errors.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{kind}: {message}");
//!     }
//! }
//!
//! let counter = Arc::new(ErrorCounter { errors: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .observer(counter as Arc<dyn ConversionObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

/// Receives conversion and request events.
///
/// All methods have default no-op implementations so implementors only
/// override what they care about. Methods may be called concurrently from
/// different requests.
pub trait ConversionObserver: Send + Sync {
    /// A request entered the service (active-request gauge +1).
    fn on_request_start(&self) {}

    /// A request left the service (active-request gauge -1).
    ///
    /// # Arguments
    /// * `path`    — request path, e.g. `/pdf`
    /// * `status`  — HTTP status code sent to the client
    /// * `elapsed` — wall-clock time spent on the request
    fn on_request_end(&self, path: &str, status: u16, elapsed: Duration) {
        let _ = (path, status, elapsed);
    }

    /// A conversion (or the delivery of its result) failed.
    fn on_error(&self, kind: ErrorKind, message: &str) {
        let _ = (kind, message);
    }

    /// A PDF of `bytes` bytes was produced.
    fn on_output_size(&self, bytes: usize) {
        let _ = bytes;
    }
}

/// A no-op implementation for callers that don't need events.
///
/// This is the default when no observer is configured.
pub struct NoopObserver;

impl ConversionObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type SharedObserver = Arc<dyn ConversionObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingObserver {
        active: AtomicUsize,
        errors: Mutex<Vec<(ErrorKind, String)>>,
        bytes: AtomicUsize,
    }

    impl ConversionObserver for TrackingObserver {
        fn on_request_start(&self) {
            self.active.fetch_add(1, Ordering::SeqCst);
        }

        fn on_request_end(&self, _path: &str, _status: u16, _elapsed: Duration) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }

        fn on_error(&self, kind: ErrorKind, message: &str) {
            self.errors.lock().unwrap().push((kind, message.to_string()));
        }

        fn on_output_size(&self, bytes: usize) {
            self.bytes.fetch_add(bytes, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let obs = NoopObserver;
        obs.on_request_start();
        obs.on_error(ErrorKind::Render, "boom");
        obs.on_output_size(1024);
        obs.on_request_end("/pdf", 200, Duration::from_millis(5));
    }

    #[test]
    fn tracking_observer_receives_events() {
        let obs = TrackingObserver::default();

        obs.on_request_start();
        obs.on_request_start();
        assert_eq!(obs.active.load(Ordering::SeqCst), 2);

        obs.on_error(ErrorKind::Validation, "index.html file is required");
        obs.on_output_size(2048);
        obs.on_request_end("/pdf", 400, Duration::from_millis(3));

        assert_eq!(obs.active.load(Ordering::SeqCst), 1);
        assert_eq!(obs.bytes.load(Ordering::SeqCst), 2048);
        let errors = obs.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, ErrorKind::Validation);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let obs: SharedObserver = Arc::new(NoopObserver);
        obs.on_request_start();
        obs.on_output_size(1);
    }
}
