//! HTTP service around [`ConversionPipeline`] (feature `server`).
//!
//! | Method | Path       | Response |
//! |--------|------------|----------|
//! | POST   | `/pdf`     | `application/pdf`, or a JSON error |
//! | POST   | `/v1/pdf`  | same as `/pdf` |
//! | GET    | `/status`  | 200, empty body |
//! | GET    | `/health`  | `{"status":"ok","version":…}` |
//! | GET    | `/metrics` | Prometheus text, see [`metrics`] |
//!
//! Errors map to `400` (validation), `408` (cancelled / timed out) and `500`
//! (everything else), with body `{"error": "<kind>", "message": "<text>"}`.
//!
//! A client that disconnects mid-conversion drops the handler future; the
//! renderer's process group is killed and the workspace removed as part of
//! that drop, and the request is counted with status 499.

pub mod metrics;
pub mod multipart;
pub mod response;
pub mod routes;

use crate::config::ConversionConfig;
use crate::context::CancelSignal;
use crate::convert::ConversionPipeline;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use self::metrics::{track_requests, MetricsRegistry};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Default request body limit: 30 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 30 * 1024 * 1024;

/// HTTP-level settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub(crate) pipeline: ConversionPipeline,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) shutdown: CancelSignal,
    max_body_bytes: usize,
}

impl AppState {
    /// Build the state, installing the metrics registry as the conversion
    /// observer. An observer already present in `config` keeps receiving
    /// every event.
    pub fn new(mut config: ConversionConfig, server: ServerConfig) -> Self {
        let metrics = Arc::new(MetricsRegistry::new().chain(config.observer.take()));
        config.observer = Some(metrics.clone());
        Self {
            pipeline: ConversionPipeline::new(config),
            metrics,
            shutdown: CancelSignal::never(),
            max_body_bytes: server.max_body_bytes,
        }
    }

    /// In-flight conversions are cancelled when `signal` fires.
    pub fn with_shutdown(mut self, signal: CancelSignal) -> Self {
        self.shutdown = signal;
        self
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }
}

/// The service's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/pdf", post(routes::convert_pdf))
        .route("/v1/pdf", post(routes::convert_pdf))
        .route("/status", get(routes::status))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ConversionObserver;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use super::metrics::{sample, ACTIVE_REQUESTS, CLIENT_CLOSED_REQUEST, ERRORS_TOTAL, REQUESTS_TOTAL};
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-HTML2PDF-BOUNDARY";

    fn multipart_body(files: &[(&str, &str)], fields: &[(&str, &str)]) -> String {
        let mut body = String::new();
        for (name, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: text/html\r\n\r\n{content}\r\n"
            ));
        }
        for (name, value) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn pdf_request(path: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(routes::TRACE_ID_HEADER, "trace-42")
            .body(Body::from(body))
            .unwrap()
    }

    fn app_with(renderer: &str) -> (Router, AppState) {
        let config = ConversionConfig::builder()
            .renderer_bin(renderer)
            .build()
            .unwrap();
        let state = AppState::new(config, ServerConfig::default());
        (router(state.clone()), state)
    }

    /// Executable shell script standing in for the renderer.
    #[cfg(unix)]
    fn fake_renderer(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-renderer");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_str().unwrap().to_string()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn requests(state: &AppState, path: &str, status: &str) -> Option<f64> {
        sample(
            &state.metrics().render(),
            REQUESTS_TOTAL,
            &[("path", path), ("status", status)],
        )
    }

    fn active(state: &AppState) -> Option<f64> {
        sample(&state.metrics().render(), ACTIVE_REQUESTS, &[])
    }

    #[tokio::test]
    async fn status_is_ok_and_empty() {
        let (app, _) = app_with("wkhtmltopdf");
        let response = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn health_reports_version() {
        let (app, _) = app_with("wkhtmltopdf");
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn get_on_pdf_is_method_not_allowed() {
        let (app, _) = app_with("wkhtmltopdf");
        let response = app
            .oneshot(Request::get("/pdf").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn missing_index_is_bad_request_with_trace_id() {
        let (app, state) = app_with("wkhtmltopdf");
        let body = multipart_body(&[("header.html", "<p>h</p>")], &[("dpi", "300")]);
        let response = app.oneshot(pdf_request("/pdf", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(routes::TRACE_ID_HEADER).unwrap(),
            "trace-42"
        );
        let body = json(response).await;
        assert_eq!(body["error"], "validation");
        assert_eq!(body["message"], "index.html file is required");

        let text = state.metrics().render();
        assert_eq!(sample(&text, ERRORS_TOTAL, &[("type", "validation")]), Some(1.0));
        assert_eq!(requests(&state, "/pdf", "400"), Some(1.0));
        assert_eq!(active(&state), Some(0.0));
    }

    #[tokio::test]
    async fn non_multipart_body_is_bad_request() {
        let (app, _) = app_with("wkhtmltopdf");
        let request = Request::post("/v1/pdf")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "validation");
    }

    #[tokio::test]
    async fn missing_renderer_is_server_error() {
        let (app, _) = app_with("/definitely/not/a/renderer");
        let body = multipart_body(&[("index.html", "<p>x</p>")], &[]);
        let response = app.oneshot(pdf_request("/v1/pdf", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json(response).await["error"], "launch");
    }

    #[tokio::test]
    async fn unknown_paths_share_one_series() {
        let (app, state) = app_with("wkhtmltopdf");
        for i in 0..50 {
            let response = app
                .clone()
                .oneshot(Request::get(format!("/junk/{i}")).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        let text = state.metrics().render();
        assert!(!text.contains("/junk/"), "raw paths leaked into labels");
        assert_eq!(requests(&state, "unmatched", "404"), Some(50.0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn converts_with_fake_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = fake_renderer(dir.path(), "printf '%%PDF-1.4 fake'");

        let (app, state) = app_with(&renderer);
        let body = multipart_body(&[("index.html", "<p>x</p>")], &[("grayscale", "")]);
        let response = app.oneshot(pdf_request("/pdf", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/pdf"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=output.pdf"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"%PDF-1.4 fake");

        let text = state.metrics().render();
        assert_eq!(sample(&text, "pdf_size_bytes_count", &[]), Some(1.0));
        assert_eq!(sample(&text, ERRORS_TOTAL, &[]), None);
        assert_eq!(requests(&state, "/pdf", "200"), Some(1.0));
        assert_eq!(active(&state), Some(0.0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abandoned_pdf_body_is_counted_as_failed_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = fake_renderer(dir.path(), "printf '%%PDF-1.4 fake'");

        let (app, state) = app_with(&renderer);
        let body = multipart_body(&[("index.html", "<p>x</p>")], &[]);
        let response = app.oneshot(pdf_request("/pdf", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // body parked: request still active until delivery settles
        assert_eq!(active(&state), Some(1.0));
        drop(response);

        let text = state.metrics().render();
        assert_eq!(sample(&text, ERRORS_TOTAL, &[("type", "delivery")]), Some(1.0));
        assert_eq!(requests(&state, "/pdf", "500"), Some(1.0));
        assert_eq!(requests(&state, "/pdf", "200"), None);
        assert_eq!(active(&state), Some(0.0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropped_request_leaves_no_active_count() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = fake_renderer(dir.path(), "exec sleep 30");

        let (app, state) = app_with(&renderer);
        let body = multipart_body(&[("index.html", "<p>x</p>")], &[]);
        let outcome =
            tokio::time::timeout(Duration::from_millis(500), app.oneshot(pdf_request("/pdf", body)))
                .await;
        assert!(outcome.is_err(), "conversion should still be running");

        assert_eq!(active(&state), Some(0.0));
        assert_eq!(
            requests(&state, "/pdf", &CLIENT_CLOSED_REQUEST.to_string()),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let (app, state) = app_with("wkhtmltopdf");
        state.metrics().on_output_size(10);
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(sample(&text, "pdf_size_bytes_sum", &[]), Some(10.0));
        // the /metrics request itself is still in flight
        assert_eq!(sample(&text, ACTIVE_REQUESTS, &[]), Some(1.0));
        assert!(text.contains("# HELP pdf_active_requests"));
    }
}
