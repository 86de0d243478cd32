//! Request-scoped context: trace id, logging span, deadline, cancellation.
//!
//! ## Why an explicit context?
//!
//! A conversion can be abandoned for reasons the pipeline cannot see: the
//! HTTP client hung up, a caller-imposed deadline passed, the service is
//! shutting down. [`RequestContext`] carries those signals end-to-end so the
//! process supervisor can kill the renderer the moment the result stops
//! mattering.
//!
//! The context also carries the request's [`tracing::Span`]. Every stage runs
//! instrumented with it, so log lines from the decoder and the supervisor are
//! tagged with the trace id without any ambient logger lookup.
//!
//! Dropping the conversion future is also a form of cancellation (axum does
//! this when the client disconnects). The supervisor covers that path with a
//! drop guard; the context only covers the cases where the caller wants a
//! classified [`crate::Html2PdfError::Cancelled`] back.

use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Span;

/// Why a conversion was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    /// The context deadline passed.
    DeadlineExceeded,
    /// The client disconnected.
    ClientGone,
    /// The service is shutting down.
    Shutdown,
    /// Cancelled by the caller for another reason.
    Requested(String),
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::DeadlineExceeded => f.write_str("context deadline exceeded"),
            CancelCause::ClientGone => f.write_str("client disconnected"),
            CancelCause::Shutdown => f.write_str("server shutting down"),
            CancelCause::Requested(reason) => write!(f, "context canceled: {reason}"),
        }
    }
}

/// Create a connected cancel handle / signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(None);
    (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

/// Triggers cancellation of every [`CancelSignal`] cloned from its pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<Option<CancelCause>>,
}

impl CancelHandle {
    /// Cancel with the given cause. Only the first cause sticks.
    pub fn cancel(&self, cause: CancelCause) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(cause);
                true
            } else {
                false
            }
        });
    }

    /// `true` once [`CancelHandle::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// Observes cancellation triggered through a [`CancelHandle`].
///
/// A default signal is never cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<Option<CancelCause>>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// The cause, if already cancelled.
    pub fn cause(&self) -> Option<CancelCause> {
        self.rx.as_ref().and_then(|rx| rx.borrow().clone())
    }

    /// Resolve once cancelled. Pends forever if the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&self) -> CancelCause {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            let cause = match rx.wait_for(Option::is_some).await {
                Ok(current) => current.clone(),
                Err(_) => None,
            };
            if let Some(cause) = cause {
                return cause;
            }
        }
        std::future::pending().await
    }
}

/// Everything a single conversion needs to know about its caller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    trace_id: String,
    span: Span,
    deadline: Option<Instant>,
    cancel: CancelSignal,
}

impl RequestContext {
    /// New context tagged with `trace_id`, no deadline, never cancelled.
    pub fn new(trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        let span = tracing::info_span!("conversion", trace_id = %trace_id);
        Self {
            trace_id,
            span,
            deadline: None,
            cancel: CancelSignal::never(),
        }
    }

    /// Replace the logging span (e.g. with the HTTP layer's request span).
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Attach a cancellation signal.
    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    /// Set an absolute deadline, keeping the earlier one if already set.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Set a deadline `timeout` from now, keeping an earlier one if set.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check: the cause if the context is already done.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        if let Some(cause) = self.cancel.cause() {
            return Some(cause);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve when the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) -> CancelCause {
        let deadline = async {
            match self.deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    CancelCause::DeadlineExceeded
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            cause = self.cancel.cancelled() => cause,
            cause = deadline => cause,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn signal_wakes_on_cancel() {
        let (handle, signal) = cancel_pair();
        let mut fut = task::spawn(signal.cancelled());
        assert_pending!(fut.poll());

        handle.cancel(CancelCause::ClientGone);
        assert!(fut.is_woken());
        assert_ready_eq!(fut.poll(), CancelCause::ClientGone);
    }

    #[test]
    fn first_cause_wins() {
        let (handle, signal) = cancel_pair();
        handle.cancel(CancelCause::Shutdown);
        handle.cancel(CancelCause::ClientGone);
        assert!(handle.is_cancelled());
        assert_eq!(signal.cause(), Some(CancelCause::Shutdown));
    }

    #[test]
    fn never_signal_stays_pending() {
        let signal = CancelSignal::never();
        let mut fut = task::spawn(signal.cancelled());
        assert_pending!(fut.poll());
        assert_eq!(signal.cause(), None);
    }

    #[test]
    fn dropped_handle_does_not_cancel() {
        let (handle, signal) = cancel_pair();
        drop(handle);
        let mut fut = task::spawn(signal.cancelled());
        assert_pending!(fut.poll());
    }

    #[test]
    fn earlier_deadline_is_kept() {
        let now = Instant::now();
        let ctx = RequestContext::new("t")
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_as_deadline_exceeded() {
        let ctx = RequestContext::new("t").with_timeout(Duration::from_secs(2));
        assert_eq!(ctx.cancel_cause(), None);
        let cause = ctx.cancelled().await;
        assert_eq!(cause, CancelCause::DeadlineExceeded);
        assert_eq!(ctx.cancel_cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn explicit_cancel_reported_by_context() {
        let (handle, signal) = cancel_pair();
        let ctx = RequestContext::new("t").with_cancel(signal);
        handle.cancel(CancelCause::Requested("test".into()));
        assert_eq!(
            ctx.cancelled().await,
            CancelCause::Requested("test".into())
        );
        assert_eq!(ctx.trace_id(), "t");
    }
}
