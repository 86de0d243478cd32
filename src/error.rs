//! Error types for the edgequake-html2pdf library.
//!
//! Every failure of a conversion is a single [`Html2PdfError`]. A conversion
//! is all-or-nothing: there is no partial PDF to salvage, so unlike a
//! page-oriented converter there is no separate non-fatal error type.
//!
//! Variants are grouped into the categories of [`ErrorKind`]. Callers route on
//! the kind, not on the variant:
//!
//! * [`ErrorKind::Validation`] — the client sent something unusable. Never
//!   retried; surfaced with the underlying message.
//! * [`ErrorKind::Cancelled`] — the client went away or a deadline passed.
//!   Distinct from server faults so "client gave up" is never confused with
//!   "renderer is broken".
//! * everything else — a server fault (disk, deployment, renderer).

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::context::CancelCause;

/// All errors returned by the edgequake-html2pdf library.
#[derive(Debug, Error)]
pub enum Html2PdfError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The multipart stream could not be parsed.
    #[error("Failed to parse multipart form: {detail}")]
    MalformedMultipart { detail: String },

    /// No `index.html` file part was present in the payload.
    #[error("index.html file is required")]
    MissingPrimaryDocument,

    /// `index.html` was present but zero bytes long.
    #[error("index.html file is empty")]
    EmptyPrimaryDocument,

    /// An uploaded file name does not name a file (e.g. `..` or `/`).
    #[error("Invalid file name '{name}' in multipart upload")]
    InvalidPartName { name: String },

    /// A form field cannot be turned into a renderer option.
    #[error("Invalid option '{name}': {reason}")]
    InvalidOption { name: String, reason: String },

    /// The configured option policy rejects this renderer option.
    #[error("Renderer option '--{name}' is not allowed")]
    OptionNotAllowed { name: String },

    // ── Resource errors ───────────────────────────────────────────────────
    /// The per-request workspace directory could not be created.
    #[error("Failed to create temp directory: {source}")]
    WorkspaceCreate {
        #[source]
        source: std::io::Error,
    },

    /// A file could not be written into the workspace.
    #[error("Failed to write '{path}': {source}")]
    WorkspaceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The workspace directory could not be removed.
    #[error("Failed to remove temp directory '{path}': {source}")]
    WorkspaceRelease {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The finished PDF could not be written to its destination file.
    #[error("Failed to write output to '{path}': {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Renderer errors ───────────────────────────────────────────────────
    /// The renderer executable could not be started.
    #[error("Failed to start renderer '{program}': {source}\nCheck that it is installed or set HTML2PDF_RENDERER_BIN.")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the renderer's standard output failed.
    #[error("Failed to read renderer output: {source}")]
    StreamFailed {
        #[source]
        source: std::io::Error,
    },

    /// The renderer exited unsuccessfully (or waiting on it failed).
    #[error("{}", render_failed_message(.status, .stderr))]
    RenderFailed {
        status: String,
        stderr: Option<String>,
    },

    /// The renderer exited successfully but wrote nothing.
    #[error("Renderer produced no output")]
    EmptyOutput,

    // ── Cancellation ──────────────────────────────────────────────────────
    /// The request was cancelled before the renderer finished.
    #[error("Conversion cancelled: {cause}")]
    Cancelled { cause: CancelCause },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn render_failed_message(status: &str, stderr: &Option<String>) -> String {
    match stderr {
        Some(text) => format!("Renderer failed: {status}, stderr: {text}"),
        None => format!("Renderer failed: {status}"),
    }
}

/// Category of an [`Html2PdfError`], used for status mapping and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or incomplete input. Client fault.
    Validation,
    /// Workspace or file I/O failure.
    Resource,
    /// Renderer executable missing or unstartable.
    Launch,
    /// Reading the renderer's output pipe failed.
    Stream,
    /// Renderer exited non-zero.
    Render,
    /// Renderer exited zero without output.
    EmptyOutput,
    /// Context cancelled or deadline exceeded.
    Cancelled,
    /// A finished PDF could not be delivered to the client.
    Delivery,
    /// Configuration or internal bug.
    Internal,
}

impl ErrorKind {
    /// Stable label used for metrics and error bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Resource => "resource",
            ErrorKind::Launch => "launch",
            ErrorKind::Stream => "stream",
            ErrorKind::Render => "render",
            ErrorKind::EmptyOutput => "empty_output",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Delivery => "delivery",
            ErrorKind::Internal => "internal",
        }
    }

    /// `true` when the client is to blame and resubmitting unchanged is pointless.
    pub fn is_client_fault(self) -> bool {
        matches!(self, ErrorKind::Validation)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Html2PdfError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Html2PdfError::MalformedMultipart { .. }
            | Html2PdfError::MissingPrimaryDocument
            | Html2PdfError::EmptyPrimaryDocument
            | Html2PdfError::InvalidPartName { .. }
            | Html2PdfError::InvalidOption { .. }
            | Html2PdfError::OptionNotAllowed { .. } => ErrorKind::Validation,
            Html2PdfError::WorkspaceCreate { .. }
            | Html2PdfError::WorkspaceWrite { .. }
            | Html2PdfError::WorkspaceRelease { .. }
            | Html2PdfError::OutputWrite { .. } => ErrorKind::Resource,
            Html2PdfError::LaunchFailed { .. } => ErrorKind::Launch,
            Html2PdfError::StreamFailed { .. } => ErrorKind::Stream,
            Html2PdfError::RenderFailed { .. } => ErrorKind::Render,
            Html2PdfError::EmptyOutput => ErrorKind::EmptyOutput,
            Html2PdfError::Cancelled { .. } => ErrorKind::Cancelled,
            Html2PdfError::InvalidConfig(_) | Html2PdfError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// `true` for the cancelled/timed-out category.
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}
