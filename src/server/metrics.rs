//! Prometheus metrics exposed on `GET /metrics`.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `pdf_requests_total` | counter | `path`, `status` |
//! | `pdf_request_duration_seconds` | histogram | `path` |
//! | `pdf_active_requests` | gauge | |
//! | `pdf_errors_total` | counter | `type` |
//! | `pdf_size_bytes` | histogram | |
//!
//! The registry is a [`ConversionObserver`]: the server installs it in the
//! conversion config and the pipeline feeds it like any other observer. It
//! owns a private recorder instead of installing the process-global one, so
//! two routers in one process never share counts.
//!
//! `path` is the matched route (`/pdf`, `/v1/pdf`, ...), or `unmatched`.

use crate::error::ErrorKind;
use crate::observer::{ConversionObserver, SharedObserver};
use axum::extract::{MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::AppState;

// ── Metric names ─────────────────────────────────────────────────────────────

pub const REQUESTS_TOTAL: &str = "pdf_requests_total";
pub const REQUEST_DURATION: &str = "pdf_request_duration_seconds";
pub const ACTIVE_REQUESTS: &str = "pdf_active_requests";
pub const ERRORS_TOTAL: &str = "pdf_errors_total";
pub const PDF_SIZE: &str = "pdf_size_bytes";

const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Status recorded for a request whose handler was dropped before it
/// produced a response (the client went away mid-conversion).
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

const DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0];

/// 1 KiB, doubling ten times.
fn size_buckets() -> Vec<f64> {
    (0..10).map(|i| 1024.0 * f64::from(1u32 << i)).collect()
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Prometheus recorder fed by conversion and request events.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    next: Option<SharedObserver>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), DURATION_BUCKETS)
            .and_then(|b| b.set_buckets_for_metric(Matcher::Full(PDF_SIZE.to_string()), &size_buckets()))
            .map(PrometheusBuilder::build_recorder)
            .unwrap_or_else(|e| {
                warn!("Histogram buckets rejected, exporting summaries instead: {}", e);
                PrometheusBuilder::new().build_recorder()
            });
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_counter!(REQUESTS_TOTAL, "Total number of PDF generation requests");
            describe_histogram!(
                REQUEST_DURATION,
                "Time taken to process PDF generation requests"
            );
            describe_gauge!(
                ACTIVE_REQUESTS,
                "Number of currently active PDF generation requests"
            );
            describe_counter!(ERRORS_TOTAL, "Total number of PDF generation errors");
            describe_histogram!(PDF_SIZE, "Size of generated PDFs in bytes");
        });

        Self {
            recorder,
            handle,
            next: None,
        }
    }

    /// Forward every event to `next` as well.
    pub fn chain(mut self, next: Option<SharedObserver>) -> Self {
        self.next = next;
        self
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Handle for periodic upkeep (histogram draining) by the server.
    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    fn record<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(&self.recorder, f)
    }
}

impl ConversionObserver for MetricsRegistry {
    fn on_request_start(&self) {
        self.record(|| gauge!(ACTIVE_REQUESTS).increment(1.0));
        if let Some(next) = &self.next {
            next.on_request_start();
        }
    }

    fn on_request_end(&self, path: &str, status: u16, elapsed: Duration) {
        self.record(|| {
            gauge!(ACTIVE_REQUESTS).decrement(1.0);
            counter!(REQUESTS_TOTAL, "path" => path.to_string(), "status" => status.to_string())
                .increment(1);
            histogram!(REQUEST_DURATION, "path" => path.to_string()).record(elapsed.as_secs_f64());
        });
        if let Some(next) = &self.next {
            next.on_request_end(path, status, elapsed);
        }
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.record(|| counter!(ERRORS_TOTAL, "type" => kind.as_str()).increment(1));
        if let Some(next) = &self.next {
            next.on_error(kind, message);
        }
    }

    fn on_output_size(&self, bytes: usize) {
        self.record(|| histogram!(PDF_SIZE).record(bytes as f64));
        if let Some(next) = &self.next {
            next.on_output_size(bytes);
        }
    }
}

// ── Request tracking ─────────────────────────────────────────────────────────

/// One request counted as active until it is finished or dropped.
///
/// Dropping an unfinished guard records [`CLIENT_CLOSED_REQUEST`], so the
/// active gauge stays balanced when hyper drops a handler mid-conversion.
pub struct InFlight {
    metrics: Arc<MetricsRegistry>,
    path: String,
    started: Instant,
    finished: bool,
}

impl InFlight {
    pub fn start(metrics: Arc<MetricsRegistry>, path: String) -> Self {
        metrics.on_request_start();
        Self {
            metrics,
            path,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn finish(mut self, status: StatusCode) {
        self.end(status.as_u16());
    }

    fn end(&mut self, status: u16) {
        if !self.finished {
            self.finished = true;
            self.metrics
                .on_request_end(&self.path, status, self.started.elapsed());
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            debug!(path = %self.path, "Request dropped before a response was produced");
            self.end(CLIENT_CLOSED_REQUEST);
        }
    }
}

/// Response extension for bodies that finish the request themselves.
///
/// The tracking middleware parks its [`InFlight`] here instead of finishing
/// it; the body takes it back once it has been delivered or abandoned.
#[derive(Clone, Default)]
pub struct PendingCompletion(Arc<Mutex<Option<InFlight>>>);

impl PendingCompletion {
    fn put(&self, in_flight: InFlight) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(in_flight);
    }

    /// Finish the parked request, if any, with `status`.
    pub fn complete(&self, status: StatusCode) {
        let parked = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(in_flight) = parked {
            in_flight.finish(status);
        }
    }
}

/// Route label: the matched route pattern, never the raw URI.
fn endpoint_label(request: &Request) -> String {
    request.extensions().get::<MatchedPath>().map_or_else(
        || UNMATCHED_ENDPOINT.to_string(),
        |path| path.as_str().to_string(),
    )
}

/// Middleware feeding the active-request gauge and per-route counters.
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let in_flight = InFlight::start(state.metrics.clone(), endpoint_label(&request));

    let response = next.run(request).await;

    match response.extensions().get::<PendingCompletion>() {
        Some(pending) => pending.put(in_flight),
        None => in_flight.finish(response.status()),
    }
    response
}

/// Value of the first sample of `name` carrying all `labels`.
#[cfg(test)]
pub(crate) fn sample(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (series, value) = line.rsplit_once(' ')?;
            let (metric, label_set) = series.split_once('{').unwrap_or((series, ""));
            if metric != name {
                return None;
            }
            labels
                .iter()
                .all(|(k, v)| label_set.contains(&format!("{k}=\"{v}\"")))
                .then(|| value.parse().ok())
                .flatten()
        })
}
