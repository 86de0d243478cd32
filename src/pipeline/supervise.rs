//! Renderer process supervision.
//!
//! One renderer process per conversion, from spawn to reap:
//!
//! ```text
//! spawn ──► drain task (stdout → buffer, stderr → capped buffer)
//!   │
//!   └─ select ─┬─ context cancelled ──► killpg(SIGKILL) ─► reap ─► Cancelled
//!              └─ drain joined ───────► wait ─► classify exit status
//! ```
//!
//! Both pipes are read by the same drain task, concurrently, from the moment
//! the child starts. A renderer that fills its stderr pipe before closing
//! stdout can therefore never deadlock the conversion.
//!
//! The renderer runs in its own process group (Unix). Cancellation signals
//! the whole group so helper processes the renderer forks die with it. If the
//! `execute` future is dropped instead of cancelled (an HTTP client
//! disconnecting drops the handler future), a drop guard does the same.

use crate::config::ConversionConfig;
use crate::context::RequestContext;
use crate::error::Html2PdfError;
use crate::pipeline::args::ArgumentVector;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Bytes produced by a successful renderer run.
#[derive(Debug, Clone)]
pub struct RenderedPdf {
    /// PDF bytes. Never empty.
    pub bytes: Vec<u8>,
    /// Renderer process id.
    pub pid: Option<u32>,
    /// Spawn-to-reap time.
    pub elapsed: Duration,
}

/// Spawns and supervises the renderer.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    program: PathBuf,
    max_stderr_bytes: usize,
}

impl ProcessSupervisor {
    pub fn new(program: impl Into<PathBuf>, max_stderr_bytes: usize) -> Self {
        Self {
            program: program.into(),
            max_stderr_bytes,
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(config.renderer_bin.clone(), config.max_stderr_bytes)
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Run the renderer with `argv` and collect its standard output.
    ///
    /// The child never outlives this call: on every return path it has been
    /// reaped, and on cancellation its process group has been killed.
    ///
    /// # Errors
    /// * [`Html2PdfError::Cancelled`] — context cancelled before or during the run
    /// * [`Html2PdfError::LaunchFailed`] — the program could not be started
    /// * [`Html2PdfError::StreamFailed`] — reading stdout failed
    /// * [`Html2PdfError::RenderFailed`] — non-zero exit, or waiting failed
    /// * [`Html2PdfError::EmptyOutput`] — exit 0 without output
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        argv: &ArgumentVector,
    ) -> Result<RenderedPdf, Html2PdfError> {
        if let Some(cause) = ctx.cancel_cause() {
            debug!("Context done before launch ({}), not spawning renderer", cause);
            return Err(Html2PdfError::Cancelled { cause });
        }

        let mut command = Command::new(&self.program);
        command
            .args(argv.as_slice())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| {
            warn!("Failed to start renderer {}: {}", self.program.display(), source);
            Html2PdfError::LaunchFailed {
                program: self.program.display().to_string(),
                source,
            }
        })?;

        let pid = child.id();
        let mut guard = ProcessGroupGuard { pgid: pid };
        info!(
            pid = pid.unwrap_or_default(),
            "Renderer started: {} {}",
            self.program.display(),
            argv
        );

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                // Unreachable with piped stdio; still never leave the child behind.
                let _ = child.start_kill();
                let _ = child.wait().await;
                guard.disarm();
                return Err(Html2PdfError::Internal(
                    "renderer pipes were not captured".into(),
                ));
            }
        };
        let mut drain = tokio::spawn(drain_output(stdout, stderr, self.max_stderr_bytes));

        tokio::select! {
            biased;

            cause = ctx.cancelled() => {
                warn!(pid = pid.unwrap_or_default(), "Killing renderer: {}", cause);
                if let Some(pgid) = pid {
                    kill_process_group(pgid);
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                guard.disarm();
                drain.abort();
                Err(Html2PdfError::Cancelled { cause })
            }

            (drained, status) = async {
                let drained = (&mut drain).await;
                if !matches!(drained, Ok((Ok(_), _))) {
                    // Nobody reads stdout any more; a still-running renderer
                    // would block on a full pipe.
                    if let Some(pgid) = pid {
                        kill_process_group(pgid);
                    }
                    let _ = child.start_kill();
                }
                let status = child.wait().await;
                (drained, status)
            } => {
                guard.disarm();
                let (stdout, stderr) = drained
                    .map_err(|e| Html2PdfError::Internal(format!("renderer drain task failed: {e}")))?;
                classify(stdout, &stderr, status, pid, started.elapsed())
            }
        }
    }
}

/// Turn a reaped renderer's output and exit status into the call's result.
fn classify(
    stdout: io::Result<Vec<u8>>,
    stderr: &[u8],
    status: io::Result<ExitStatus>,
    pid: Option<u32>,
    elapsed: Duration,
) -> Result<RenderedPdf, Html2PdfError> {
    let bytes = stdout.map_err(|source| {
        warn!("Failed to read renderer output: {}", source);
        Html2PdfError::StreamFailed { source }
    })?;
    let stderr = stderr_text(stderr);

    match status {
        Ok(status) if status.success() => {
            if bytes.is_empty() {
                warn!("Renderer exited successfully but produced no output");
                return Err(Html2PdfError::EmptyOutput);
            }
            debug!(
                bytes = bytes.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Renderer finished"
            );
            Ok(RenderedPdf { bytes, pid, elapsed })
        }
        Ok(status) => {
            warn!("Renderer failed: {}, stderr: {}", status, stderr.as_deref().unwrap_or(""));
            Err(Html2PdfError::RenderFailed {
                status: status.to_string(),
                stderr,
            })
        }
        Err(e) => Err(Html2PdfError::RenderFailed {
            status: format!("wait failed: {e}"),
            stderr,
        }),
    }
}

/// Read stdout to the end and stderr up to `max_stderr` bytes, concurrently.
///
/// Stderr beyond the cap is read and discarded so the child never blocks on
/// a full pipe.
async fn drain_output<O, E>(mut stdout: O, mut stderr: E, max_stderr: usize) -> (io::Result<Vec<u8>>, Vec<u8>)
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let read_stdout = async {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.map(|_| buf)
    };
    let read_stderr = async {
        let mut kept = Vec::new();
        let _ = (&mut stderr).take(max_stderr as u64).read_to_end(&mut kept).await;
        let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
        kept
    };
    tokio::join!(read_stdout, read_stderr)
}

fn stderr_text(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Kills the renderer's process group if dropped while armed.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    /// Call once the child is reaped; its pid may be reused after that.
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!(pgid, "Conversion dropped mid-render, killing renderer process group");
            kill_process_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal. The group leader is our unreaped
    // child, so the id cannot have been recycled.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, "killpg: {}", io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::context::{cancel_pair, CancelCause};
    use std::os::unix::process::ExitStatusExt;

    fn sh(script: &str) -> (ProcessSupervisor, ArgumentVector) {
        (
            ProcessSupervisor::new("/bin/sh", 1024),
            ArgumentVector::from(vec!["-c".to_string(), script.to_string()]),
        )
    }

    #[tokio::test]
    async fn collects_stdout() {
        let (sup, argv) = sh("printf '%%PDF-1.4 fake'");
        let out = sup.execute(&RequestContext::default(), &argv).await.unwrap();
        assert_eq!(out.bytes, b"%PDF-1.4 fake");
        assert!(out.pid.is_some());
    }

    #[tokio::test]
    async fn zero_exit_without_output_is_empty_output() {
        let (sup, argv) = sh("exit 0");
        let err = sup.execute(&RequestContext::default(), &argv).await.unwrap_err();
        assert!(matches!(err, Html2PdfError::EmptyOutput));
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let (sup, argv) = sh("echo 'Exit with code 1 due to network error' >&2; exit 1");
        let err = sup.execute(&RequestContext::default(), &argv).await.unwrap_err();
        match err {
            Html2PdfError::RenderFailed { status, stderr } => {
                assert!(status.contains('1'), "status: {status}");
                assert_eq!(stderr.as_deref(), Some("Exit with code 1 due to network error"));
            }
            other => panic!("expected RenderFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_launch_failure() {
        let sup = ProcessSupervisor::new("/definitely/not/a/renderer", 1024);
        let argv = ArgumentVector::from(vec!["-".to_string()]);
        let err = sup.execute(&RequestContext::default(), &argv).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Launch);
    }

    #[tokio::test]
    async fn large_stderr_does_not_deadlock() {
        // 256 KiB of stderr before any stdout: far beyond a pipe buffer.
        let (sup, argv) = sh("head -c 262144 /dev/zero | tr '\\0' 'e' >&2; printf pdf");
        let out = tokio::time::timeout(
            Duration::from_secs(10),
            sup.execute(&RequestContext::default(), &argv),
        )
        .await
        .expect("renderer deadlocked")
        .unwrap();
        assert_eq!(out.bytes, b"pdf");
    }

    #[tokio::test]
    async fn stderr_capture_is_capped() {
        let (sup, argv) = sh("head -c 5000 /dev/zero | tr '\\0' 'e' >&2; exit 3");
        let err = sup.execute(&RequestContext::default(), &argv).await.unwrap_err();
        match err {
            Html2PdfError::RenderFailed { stderr: Some(text), .. } => assert_eq!(text.len(), 1024),
            other => panic!("expected RenderFailed with stderr, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_kills_renderer() {
        let (sup, argv) = sh("sleep 30");
        let (handle, signal) = cancel_pair();
        let ctx = RequestContext::new("cancel").with_cancel(signal);

        let started = Instant::now();
        let task = tokio::spawn(async move { sup.execute(&ctx, &argv).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel(CancelCause::ClientGone);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Html2PdfError::Cancelled { cause: CancelCause::ClientGone }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancelled_before_launch_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let (sup, argv) = sh(&format!("touch {}; printf pdf", marker.display()));
        let (handle, signal) = cancel_pair();
        handle.cancel(CancelCause::Shutdown);

        let ctx = RequestContext::new("early").with_cancel(signal);
        let err = sup.execute(&ctx, &argv).await.unwrap_err();
        assert!(err.is_cancellation());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn deadline_is_cancellation() {
        let (sup, argv) = sh("sleep 30");
        let ctx = RequestContext::new("deadline").with_timeout(Duration::from_millis(200));
        let err = sup.execute(&ctx, &argv).await.unwrap_err();
        assert!(matches!(
            err,
            Html2PdfError::Cancelled { cause: CancelCause::DeadlineExceeded }
        ));
    }

    #[tokio::test]
    async fn stdout_read_error_is_stream_failure() {
        let stdout = tokio_test::io::Builder::new()
            .read(b"%PDF-1.4 partial")
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
            .build();
        let (out, err) = drain_output(stdout, &b""[..], 16).await;
        assert!(out.is_err());

        let result = classify(out, &err, Ok(ExitStatus::from_raw(0)), Some(1), Duration::ZERO);
        match result {
            Err(Html2PdfError::StreamFailed { source }) => {
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe)
            }
            other => panic!("expected StreamFailed, got {other:?}"),
        }
    }

    #[test]
    fn stream_failure_wins_over_exit_status() {
        let stdout = Err(io::Error::new(io::ErrorKind::Other, "read failed"));
        let err = classify(stdout, b"boom", Ok(ExitStatus::from_raw(1 << 8)), None, Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Stream);
    }

    #[test]
    fn wait_failure_is_render_failure() {
        let wait = Err(io::Error::new(io::ErrorKind::Other, "no child"));
        let err = classify(Ok(b"pdf".to_vec()), b"", wait, None, Duration::ZERO).unwrap_err();
        match err {
            Html2PdfError::RenderFailed { status, stderr } => {
                assert!(status.starts_with("wait failed"), "status: {status}");
                assert!(stderr.is_none());
            }
            other => panic!("expected RenderFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drain_keeps_stderr_prefix() {
        let stdout: &[u8] = b"out";
        let stderr: &[u8] = b"0123456789";
        let (out, err) = drain_output(stdout, stderr, 4).await;
        assert_eq!(out.unwrap(), b"out");
        assert_eq!(err, b"0123");
    }
}
