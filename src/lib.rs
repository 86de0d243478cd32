//! # edgequake-html2pdf
//!
//! Convert uploaded HTML documents to PDF with an external renderer process
//! (`wkhtmltopdf` by default).
//!
//! ## Why this crate?
//!
//! Shelling out to an HTML renderer looks like one line of code. Doing it for
//! untrusted uploads, concurrently, without ever leaking a temp directory or
//! a zombie renderer is not. This crate owns that orchestration: a private
//! workspace per request, a deterministic argument vector, one supervised
//! process per request whose output pipes are drained concurrently, and
//! cancellation that kills the renderer's whole process group.
//!
//! ## Pipeline Overview
//!
//! ```text
//! multipart payload
//!  │
//!  ├─ 1. Workspace  private temp dir, removed on every exit path
//!  ├─ 2. Decode     files → workspace, simple fields → renderer options
//!  ├─ 3. Args       --opts… [--header-html] [--footer-html]
//!  │                --enable-local-file-access index.html -
//!  ├─ 4. Render     spawn, drain stdout/stderr, select against cancellation
//!  └─ 5. Output     PDF bytes + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_html2pdf::{convert, ConversionConfig, FormParts};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Renderer from HTML2PDF_RENDERER_BIN, else `wkhtmltopdf` on PATH
//!     let config = ConversionConfig::default();
//!     let parts = FormParts::new()
//!         .file("index.html", "<h1>Quarterly report</h1>")
//!         .field("page-size", "A4")
//!         .field("grayscale", "");
//!     let output = convert(parts, &config).await?;
//!     std::fs::write("report.pdf", &output.pdf)?;
//!     eprintln!("{} bytes in {}ms", output.stats.size_bytes, output.stats.total_duration_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | HTTP service (`server` module) with Prometheus metrics, and the `html2pdf-server` binary (axum + clap + tracing-subscriber) |
//!
//! Disable `server` when using only the library:
//! ```toml
//! edgequake-html2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod observer;
pub mod output;
pub mod pipeline;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, OptionPolicy};
pub use context::{cancel_pair, CancelCause, CancelHandle, CancelSignal, RequestContext};
pub use convert::{convert, convert_sync, convert_to_file, ConversionPipeline};
pub use error::{ErrorKind, Html2PdfError};
pub use observer::{ConversionObserver, NoopObserver, SharedObserver};
pub use output::{ConversionOutput, ConversionStats};
pub use pipeline::args::{ArgumentBuilder, ArgumentVector};
pub use pipeline::decode::{
    ConversionRequest, DecodedRequest, DocumentPaths, FormPart, FormParts, PartSource,
    RequestDecoder,
};
pub use pipeline::supervise::{ProcessSupervisor, RenderedPdf};
pub use pipeline::workspace::Workspace;
