//! HTTP server binary for edgequake-html2pdf.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig` / `ServerConfig` and serves the router until SIGINT or
//! SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_html2pdf::server::{router, AppState, ServerConfig, DEFAULT_MAX_BODY_BYTES};
use edgequake_html2pdf::{cancel_pair, CancelCause, ConversionConfig, OptionPolicy};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const METRICS_UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default port with wkhtmltopdf from PATH
  html2pdf-server

  # Custom renderer and a 60 s cap per conversion
  html2pdf-server --renderer-bin /opt/wkhtmltox/bin/wkhtmltopdf --timeout-secs 60

  # Untrusted clients: only forward a few page-layout options
  html2pdf-server --allow-option page-size,orientation,dpi,grayscale,margin-top,margin-bottom

  # Convert a document
  curl -F file=@index.html -F file=@footer.html -F page-size=A4 \
       http://localhost:8080/pdf -o out.pdf

ENVIRONMENT VARIABLES:
  HTML2PDF_RENDERER_BIN   Renderer executable (fallback: KWKHTMLTOPDF_BIN, then wkhtmltopdf)
  RUST_LOG                Log filter; overrides --verbose / --quiet

METRICS:
  GET /metrics serves Prometheus text: pdf_requests_total, pdf_request_duration_seconds,
  pdf_active_requests, pdf_errors_total, pdf_size_bytes
"#;

/// Serve HTML-to-PDF conversion over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "html2pdf-server",
    version,
    about = "Serve HTML-to-PDF conversion over HTTP",
    long_about = "Accepts multipart uploads (index.html plus optional header.html, footer.html, \
assets and renderer options), renders them with one wkhtmltopdf process per request and \
returns the PDF.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "HTML2PDF_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Renderer executable.
    #[arg(long, env = "HTML2PDF_RENDERER_BIN")]
    renderer_bin: Option<PathBuf>,

    /// Upper bound on one conversion, in seconds.
    #[arg(long, env = "HTML2PDF_TIMEOUT_SECS",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: Option<u64>,

    /// Largest accepted request body, in bytes.
    #[arg(long, env = "HTML2PDF_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,

    /// Directory for per-request workspaces (default: system temp dir).
    #[arg(long, env = "HTML2PDF_WORKSPACE_DIR")]
    workspace_dir: Option<PathBuf>,

    /// Forward only these renderer options (comma separated, without `--`).
    #[arg(long, env = "HTML2PDF_ALLOW_OPTION", value_delimiter = ',',
          conflicts_with_all = ["deny_option", "deny_info_options"])]
    allow_option: Vec<String>,

    /// Reject these renderer options (comma separated, without `--`).
    #[arg(long, env = "HTML2PDF_DENY_OPTION", value_delimiter = ',')]
    deny_option: Vec<String>,

    /// Reject renderer options that print documentation (help, version, …).
    #[arg(long, env = "HTML2PDF_DENY_INFO_OPTIONS")]
    deny_info_options: bool,

    /// Seconds in-flight conversions may keep running after a shutdown signal.
    #[arg(long, env = "HTML2PDF_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    shutdown_grace_secs: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "HTML2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "HTML2PDF_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn option_policy(&self) -> OptionPolicy {
        if !self.allow_option.is_empty() {
            return OptionPolicy::allow(self.allow_option.iter().cloned());
        }
        let mut denied: Vec<String> = self.deny_option.clone();
        if self.deny_info_options {
            if let OptionPolicy::DenyList(info) = OptionPolicy::deny_informational() {
                denied.extend(info);
            }
        }
        if denied.is_empty() {
            OptionPolicy::PassThrough
        } else {
            OptionPolicy::deny(denied)
        }
    }

    fn conversion_config(&self) -> Result<ConversionConfig> {
        let mut builder = ConversionConfig::builder().option_policy(self.option_policy());
        if let Some(bin) = &self.renderer_bin {
            builder = builder.renderer_bin(bin);
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.render_timeout(Duration::from_secs(secs));
        }
        if let Some(dir) = &self.workspace_dir {
            builder = builder.workspace_root(dir);
        }
        builder.build().context("Invalid conversion settings")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Service setup ────────────────────────────────────────────────────
    let config = cli.conversion_config()?;
    info!(
        "Renderer: {} (timeout: {})",
        config.renderer_bin.display(),
        config
            .render_timeout
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_else(|| "none".into())
    );
    if config.option_policy == OptionPolicy::PassThrough {
        warn!("Every form field is forwarded to the renderer as an option; consider --allow-option");
    }

    let (shutdown, shutdown_signal_rx) = cancel_pair();
    let state = AppState::new(
        config,
        ServerConfig {
            max_body_bytes: cli.max_body_bytes,
        },
    )
    .with_shutdown(shutdown_signal_rx);

    // Histogram samples are buffered until drained; do it between scrapes too.
    let metrics = state.metrics().handle().clone();
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(METRICS_UPKEEP_INTERVAL);
        loop {
            ticks.tick().await;
            metrics.run_upkeep();
        }
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!(
        "edgequake-html2pdf v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        cli.bind
    );

    let grace = Duration::from_secs(cli.shutdown_grace_secs);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                warn!("Grace period over, cancelling in-flight conversions");
                shutdown.cancel(CancelCause::Shutdown);
            });
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
