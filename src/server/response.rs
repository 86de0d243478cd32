//! HTTP responses: error bodies and the streamed PDF.

use super::metrics::PendingCompletion;
use crate::error::{ErrorKind, Html2PdfError};
use crate::observer::SharedObserver;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::Serialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{error, warn};

/// Size of each chunk of a streamed PDF body.
pub const PDF_CHUNK_BYTES: usize = 64 * 1024;

/// HTTP status for an error category.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// JSON error body: `{"error": "<kind>", "message": "<text>"}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
}

/// A conversion failure on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub Html2PdfError);

impl From<Html2PdfError> for ApiError {
    fn from(e: Html2PdfError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!("Conversion failed: {}", self.0);
        } else {
            warn!("Conversion rejected: {}", self.0);
        }

        let body = Json(ErrorResponse {
            error: kind,
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

/// `200 OK` with the PDF as a chunked `application/pdf` body.
///
/// The request is finished by the body, not by the handler: once the last
/// chunk has been taken it is recorded as `200`. If the connection goes away
/// earlier, the abort is reported to `observer` as [`ErrorKind::Delivery`]
/// and the request is recorded as `500`.
pub fn pdf_response(pdf: Vec<u8>, observer: SharedObserver, trace_id: String) -> Response {
    let pending = PendingCompletion::default();
    let stream = DeliveryStream::new(Bytes::from(pdf), observer, trace_id, pending.clone());
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=output.pdf"),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response();
    response.extensions_mut().insert(pending);
    response
}

/// Streams pre-split chunks and notices being dropped early.
struct DeliveryStream {
    chunks: VecDeque<Bytes>,
    total: usize,
    observer: SharedObserver,
    trace_id: String,
    pending: PendingCompletion,
}

impl DeliveryStream {
    fn new(pdf: Bytes, observer: SharedObserver, trace_id: String, pending: PendingCompletion) -> Self {
        let total = pdf.len();
        let mut chunks = VecDeque::with_capacity(total / PDF_CHUNK_BYTES + 1);
        let mut rest = pdf;
        while !rest.is_empty() {
            let take = rest.len().min(PDF_CHUNK_BYTES);
            chunks.push_back(rest.split_to(take));
        }
        Self {
            chunks,
            total,
            observer,
            trace_id,
            pending,
        }
    }
}

impl Stream for DeliveryStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().chunks.pop_front().map(Ok))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.chunks.len(), Some(self.chunks.len()))
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        if self.chunks.is_empty() {
            self.pending.complete(StatusCode::OK);
            return;
        }
        let unsent: usize = self.chunks.iter().map(Bytes::len).sum();
        let message = format!(
            "client went away after {} of {} PDF bytes",
            self.total - unsent,
            self.total
        );
        warn!(trace_id = %self.trace_id, "Response aborted: {}", message);
        self.observer.on_error(ErrorKind::Delivery, &message);
        self.pending.complete(StatusCode::INTERNAL_SERVER_ERROR);
    }
}
