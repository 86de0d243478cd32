//! Route handlers.

use super::multipart::{rejected, MultipartSource};
use super::response::{pdf_response, ApiError};
use super::AppState;
use crate::context::RequestContext;
use crate::observer::ConversionObserver;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Request header carrying the caller's trace id; echoed on the response.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

const MAX_TRACE_ID_LEN: usize = 128;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// `POST /pdf`, `POST /v1/pdf`
pub async fn convert_pdf(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let trace_id = trace_id_from(&headers);
    let ctx = RequestContext::new(trace_id.clone()).with_cancel(state.shutdown.clone());

    let result = match multipart {
        Ok(multipart) => {
            let mut source = MultipartSource::new(multipart);
            state.pipeline.convert(&ctx, &mut source).await
        }
        Err(rejection) => {
            let err = rejected(rejection);
            state.metrics.on_error(err.kind(), &err.to_string());
            Err(err)
        }
    };

    let mut response = match result {
        Ok(output) => pdf_response(output.pdf, state.metrics.clone(), trace_id.clone()),
        Err(e) => ApiError(e).into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// `GET /status`: liveness probe, empty body.
pub async fn status() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render(),
    )
}

/// The caller's `X-Trace-ID`, or a fresh v4 UUID.
fn trace_id_from(headers: &HeaderMap) -> String {
    headers
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_TRACE_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
