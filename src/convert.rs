//! Conversion entry points.
//!
//! [`ConversionPipeline`] is the long-lived object a server holds: built once
//! from a [`ConversionConfig`], shared by every request. The free functions
//! [`convert`], [`convert_sync`] and [`convert_to_file`] are one-shot
//! wrappers for library callers that have a single document to render.

use crate::config::ConversionConfig;
use crate::context::RequestContext;
use crate::error::Html2PdfError;
use crate::observer::SharedObserver;
use crate::output::{ConversionOutput, ConversionStats};
use crate::pipeline::args::ArgumentBuilder;
use crate::pipeline::decode::{PartSource, RequestDecoder};
use crate::pipeline::supervise::ProcessSupervisor;
use crate::pipeline::workspace::Workspace;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Request-scoped orchestration: workspace → decode → argv → renderer.
///
/// Holds no per-request state; one instance serves any number of concurrent
/// conversions.
///
/// # Example
/// ```rust,no_run
/// use edgequake_html2pdf::{ConversionConfig, ConversionPipeline, FormParts, RequestContext};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = ConversionPipeline::new(ConversionConfig::default());
/// let mut parts = FormParts::new()
///     .file("index.html", "<h1>Hello</h1>")
///     .field("page-size", "A4");
///
/// let output = pipeline.convert(&RequestContext::new("req-1"), &mut parts).await?;
/// std::fs::write("hello.pdf", &output.pdf)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConversionPipeline {
    config: Arc<ConversionConfig>,
    decoder: RequestDecoder,
    supervisor: ProcessSupervisor,
    observer: SharedObserver,
}

impl ConversionPipeline {
    pub fn new(config: ConversionConfig) -> Self {
        Self::from_shared(Arc::new(config))
    }

    pub fn from_shared(config: Arc<ConversionConfig>) -> Self {
        Self {
            decoder: RequestDecoder::new(config.option_policy.clone()),
            supervisor: ProcessSupervisor::from_config(&config),
            observer: config.observer(),
            config,
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert one multipart payload to PDF.
    ///
    /// The workspace is removed and the renderer reaped before this returns,
    /// whatever the outcome. Failures are reported to the configured
    /// observer under their [`crate::ErrorKind`] before being returned.
    pub async fn convert<S: PartSource>(
        &self,
        ctx: &RequestContext,
        source: &mut S,
    ) -> Result<ConversionOutput, Html2PdfError> {
        let ctx = match self.config.render_timeout {
            Some(timeout) => ctx.clone().with_timeout(timeout),
            None => ctx.clone(),
        };
        let span = ctx.span().clone();

        let result = self.run(&ctx, source).instrument(span).await;
        if let Err(e) = &result {
            self.observer.on_error(e.kind(), &e.to_string());
        }
        result
    }

    async fn run<S: PartSource>(
        &self,
        ctx: &RequestContext,
        source: &mut S,
    ) -> Result<ConversionOutput, Html2PdfError> {
        let total_start = Instant::now();

        let mut workspace = Workspace::acquire(
            self.config.workspace_root.as_deref(),
            &self.config.workspace_prefix,
        )?;

        let outcome = self.render_in(ctx, source, &workspace).await;

        match (outcome, workspace.release()) {
            (Ok(mut output), Ok(())) => {
                output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
                info!(
                    bytes = output.stats.size_bytes,
                    total_ms = output.stats.total_duration_ms,
                    "PDF generated"
                );
                Ok(output)
            }
            (Ok(mut output), Err(release_err)) => {
                // The PDF is complete; a leftover directory is the operator's
                // problem, not the client's.
                warn!("{}", release_err);
                self.observer
                    .on_error(release_err.kind(), &release_err.to_string());
                output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
                Ok(output)
            }
            (Err(e), released) => {
                if let Err(release_err) = released {
                    warn!("{}", release_err);
                }
                Err(e)
            }
        }
    }

    async fn render_in<S: PartSource>(
        &self,
        ctx: &RequestContext,
        source: &mut S,
        workspace: &Workspace,
    ) -> Result<ConversionOutput, Html2PdfError> {
        // ── Step 1: Decode the payload into the workspace ────────────────────
        let decode_start = Instant::now();
        let decoded = tokio::select! {
            biased;
            cause = ctx.cancelled() => {
                debug!("Cancelled while reading the request: {}", cause);
                return Err(Html2PdfError::Cancelled { cause });
            }
            decoded = self.decoder.decode(source, workspace) => decoded?,
        };
        let decode_duration_ms = decode_start.elapsed().as_millis() as u64;

        // ── Step 2: Build the renderer arguments ─────────────────────────────
        let argv = ArgumentBuilder::build(&decoded.request, &decoded.paths);
        debug!("Renderer arguments: {}", argv);

        // ── Step 3: Render ───────────────────────────────────────────────────
        let rendered = self.supervisor.execute(ctx, &argv).await?;
        self.observer.on_output_size(rendered.bytes.len());

        let stats = ConversionStats {
            size_bytes: rendered.bytes.len(),
            has_header: decoded.paths.header.is_some(),
            has_footer: decoded.paths.footer.is_some(),
            option_count: decoded.request.options.len(),
            renderer_pid: rendered.pid,
            decode_duration_ms,
            render_duration_ms: rendered.elapsed.as_millis() as u64,
            total_duration_ms: 0,
        };

        Ok(ConversionOutput {
            pdf: rendered.bytes,
            stats,
        })
    }
}

/// Convert a multipart payload to PDF with a fresh context.
///
/// # Arguments
/// * `parts`  — any [`PartSource`], typically a [`crate::FormParts`]
/// * `config` — conversion configuration
///
/// # Errors
/// See [`crate::Html2PdfError`]; validation failures never start the renderer.
pub async fn convert<S: PartSource>(
    mut parts: S,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Html2PdfError> {
    let pipeline = ConversionPipeline::new(config.clone());
    pipeline
        .convert(&RequestContext::new("local"), &mut parts)
        .await
}

/// Convert and write the PDF directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file<S: PartSource>(
    parts: S,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, Html2PdfError> {
    let output = convert(parts, config).await?;
    let path = output_path.as_ref();
    let write_err = |source| Html2PdfError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &output.pdf)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(output.stats)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync<S: PartSource>(
    parts: S,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Html2PdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Html2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(parts, config))
}
