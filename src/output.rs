//! Output types returned by a successful conversion.

use serde::{Deserialize, Serialize};

/// A rendered PDF plus statistics about how it was produced.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// Raw PDF bytes. Never empty.
    pub pdf: Vec<u8>,
    /// Timings and request shape.
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Size of the PDF in bytes.
    pub fn size(&self) -> usize {
        self.pdf.len()
    }

    /// Take the PDF bytes, dropping the stats.
    pub fn into_pdf(self) -> Vec<u8> {
        self.pdf
    }
}

/// Per-conversion statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Size of the produced PDF in bytes.
    pub size_bytes: usize,
    /// Whether a header fragment was passed to the renderer.
    pub has_header: bool,
    /// Whether a footer fragment was passed to the renderer.
    pub has_footer: bool,
    /// Number of renderer options forwarded from the form.
    pub option_count: usize,
    /// Renderer process id, when the platform reports one.
    pub renderer_pid: Option<u32>,
    /// Time spent decoding the multipart payload into the workspace.
    pub decode_duration_ms: u64,
    /// Time the renderer process ran.
    pub render_duration_ms: u64,
    /// Total wall-clock time of the conversion.
    pub total_duration_ms: u64,
}
