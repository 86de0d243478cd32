//! Configuration types for HTML-to-PDF conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. One struct is shared (behind an `Arc`)
//! by every concurrent request; it is never mutated after `build()`.
//!
//! # Renderer options policy
//!
//! Every non-file form field becomes a `--name value` renderer flag. That is
//! the whole point of the service (callers pick page size, margins, DPI…)
//! but it also lets a caller set *any* flag, including ones that touch the
//! network or the filesystem. [`OptionPolicy::PassThrough`] keeps that
//! behaviour; deployments that face untrusted clients should configure an
//! [`OptionPolicy::AllowList`].

use crate::error::Html2PdfError;
use crate::observer::{ConversionObserver, NoopObserver, SharedObserver};
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming the renderer executable.
pub const RENDERER_BIN_ENV: &str = "HTML2PDF_RENDERER_BIN";

/// Legacy variable honoured when [`RENDERER_BIN_ENV`] is unset.
pub const LEGACY_RENDERER_BIN_ENV: &str = "KWKHTMLTOPDF_BIN";

/// Renderer used when nothing is configured.
pub const DEFAULT_RENDERER_BIN: &str = "wkhtmltopdf";

/// Renderer flags that print documentation instead of producing a PDF.
pub static INFORMATIONAL_OPTIONS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "help",
        "extended-help",
        "version",
        "readme",
        "license",
        "htmldoc",
        "manpage",
        "dump-default-toc-xsl",
        "read-args-from-stdin",
    ]
    .into_iter()
    .collect()
});

/// Resolve the renderer binary from the environment, falling back to
/// [`DEFAULT_RENDERER_BIN`].
pub fn renderer_bin_from_env() -> PathBuf {
    [RENDERER_BIN_ENV, LEGACY_RENDERER_BIN_ENV]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RENDERER_BIN))
}

/// Which form fields may become renderer flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OptionPolicy {
    /// Forward every option verbatim. (default)
    #[default]
    PassThrough,
    /// Forward only the named options (names without the leading `--`).
    AllowList(BTreeSet<String>),
    /// Forward everything except the named options.
    DenyList(BTreeSet<String>),
}

impl OptionPolicy {
    /// Build an allow-list policy.
    pub fn allow<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OptionPolicy::AllowList(names.into_iter().map(Into::into).collect())
    }

    /// Build a deny-list policy.
    pub fn deny<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OptionPolicy::DenyList(names.into_iter().map(Into::into).collect())
    }

    /// Deny the renderer's informational flags ([`INFORMATIONAL_OPTIONS`]).
    pub fn deny_informational() -> Self {
        Self::deny(INFORMATIONAL_OPTIONS.iter().copied())
    }

    /// `true` if the option `name` may be forwarded.
    pub fn permits(&self, name: &str) -> bool {
        match self {
            OptionPolicy::PassThrough => true,
            OptionPolicy::AllowList(allowed) => allowed.contains(name),
            OptionPolicy::DenyList(denied) => !denied.contains(name),
        }
    }
}

/// Configuration for an HTML-to-PDF conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_html2pdf::{ConversionConfig, OptionPolicy};
/// use std::time::Duration;
///
/// let config = ConversionConfig::builder()
///     .renderer_bin("/usr/local/bin/wkhtmltopdf")
///     .render_timeout(Duration::from_secs(30))
///     .option_policy(OptionPolicy::allow(["page-size", "dpi", "grayscale"]))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Renderer executable. Default: `$HTML2PDF_RENDERER_BIN`, then
    /// `$KWKHTMLTOPDF_BIN`, then `wkhtmltopdf` on `PATH`.
    pub renderer_bin: PathBuf,

    /// Directory under which per-request workspaces are created.
    /// If None, uses the system temp directory.
    pub workspace_root: Option<PathBuf>,

    /// Name prefix of each workspace directory. Default: `"html2pdf-"`.
    pub workspace_prefix: String,

    /// Upper bound on one conversion, from workspace acquisition to renderer
    /// exit. Combined with the request context's own deadline (the earlier
    /// wins). Default: None.
    pub render_timeout: Option<Duration>,

    /// Bytes of renderer stderr kept for error messages. Default: 16 KiB.
    ///
    /// Everything beyond the cap is still read (the pipe must never fill up)
    /// but discarded.
    pub max_stderr_bytes: usize,

    /// Which form fields may become renderer flags. Default: pass-through.
    pub option_policy: OptionPolicy,

    /// Observer for errors and output sizes.
    /// If None, events are dropped.
    pub observer: Option<SharedObserver>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            renderer_bin: renderer_bin_from_env(),
            workspace_root: None,
            workspace_prefix: "html2pdf-".to_string(),
            render_timeout: None,
            max_stderr_bytes: 16 * 1024,
            option_policy: OptionPolicy::default(),
            observer: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("renderer_bin", &self.renderer_bin)
            .field("workspace_root", &self.workspace_root)
            .field("workspace_prefix", &self.workspace_prefix)
            .field("render_timeout", &self.render_timeout)
            .field("max_stderr_bytes", &self.max_stderr_bytes)
            .field("option_policy", &self.option_policy)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn ConversionObserver>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The configured observer, or a no-op one.
    pub fn observer(&self) -> SharedObserver {
        match &self.observer {
            Some(observer) => Arc::clone(observer),
            None => Arc::new(NoopObserver),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn renderer_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.config.renderer_bin = bin.into();
        self
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = Some(root.into());
        self
    }

    pub fn workspace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.workspace_prefix = prefix.into();
        self
    }

    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.config.render_timeout = Some(timeout);
        self
    }

    pub fn max_stderr_bytes(mut self, n: usize) -> Self {
        self.config.max_stderr_bytes = n;
        self
    }

    pub fn option_policy(mut self, policy: OptionPolicy) -> Self {
        self.config.option_policy = policy;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ConversionObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Html2PdfError> {
        let c = &self.config;
        if c.renderer_bin.as_os_str().is_empty() {
            return Err(Html2PdfError::InvalidConfig(
                "Renderer binary must not be empty".into(),
            ));
        }
        if c.render_timeout == Some(Duration::ZERO) {
            return Err(Html2PdfError::InvalidConfig(
                "Render timeout must be > 0".into(),
            ));
        }
        if c.workspace_prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(Html2PdfError::InvalidConfig(format!(
                "Workspace prefix must not contain '{}', got {:?}",
                std::path::MAIN_SEPARATOR,
                c.workspace_prefix
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = ConversionConfig::default();
        assert_eq!(c.workspace_prefix, "html2pdf-");
        assert_eq!(c.max_stderr_bytes, 16 * 1024);
        assert_eq!(c.option_policy, OptionPolicy::PassThrough);
        assert!(c.render_timeout.is_none());
        assert!(!c.renderer_bin.as_os_str().is_empty());
    }

    #[test]
    fn builder_rejects_empty_renderer() {
        let err = ConversionConfig::builder().renderer_bin("").build().unwrap_err();
        assert!(matches!(err, Html2PdfError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = ConversionConfig::builder()
            .render_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn builder_rejects_prefix_with_separator() {
        let prefix = format!("a{}b", std::path::MAIN_SEPARATOR);
        assert!(ConversionConfig::builder()
            .workspace_prefix(prefix)
            .build()
            .is_err());
    }

    #[test]
    fn pass_through_permits_everything() {
        let p = OptionPolicy::PassThrough;
        assert!(p.permits("dpi"));
        assert!(p.permits("enable-local-file-access"));
    }

    #[test]
    fn allow_list_only_permits_listed() {
        let p = OptionPolicy::allow(["dpi", "grayscale"]);
        assert!(p.permits("dpi"));
        assert!(p.permits("grayscale"));
        assert!(!p.permits("cookie-jar"));
    }

    #[test]
    fn deny_informational_blocks_help_and_version() {
        let p = OptionPolicy::deny_informational();
        assert!(!p.permits("help"));
        assert!(!p.permits("version"));
        assert!(!p.permits("read-args-from-stdin"));
        assert!(p.permits("page-size"));
    }

    #[test]
    fn debug_hides_observer() {
        let c = ConversionConfig::builder()
            .observer(Arc::new(NoopObserver))
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("<dyn ConversionObserver>"));
    }
}
