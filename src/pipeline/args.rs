//! Renderer argument vector construction.
//!
//! The order is fixed and is what the renderer's command-line grammar
//! expects: global/page options first, then the header and footer
//! fragments, then the local-file-access switch, then the single input and
//! `-` as the output (stdout).
//!
//! ```text
//! wkhtmltopdf [--opt [value]]... [--header-html H] [--footer-html F]
//!             --enable-local-file-access <workspace>/index.html -
//! ```
//!
//! `--enable-local-file-access` is always present: the primary document
//! references its header, footer and assets through workspace-local paths.

use crate::pipeline::decode::{ConversionRequest, DocumentPaths};
use std::fmt;

/// Options whose value must never reach the logs.
const SENSITIVE_OPTIONS: &[&str] = &["cookie", "password", "ssl-key-password", "custom-header"];

/// Ordered renderer arguments, not including the program itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentVector(Vec<String>);

impl ArgumentVector {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Log-safe rendering: the value following a sensitive option
    /// becomes `***`.
    ///
    /// Only the single token after the option is masked. [`ArgumentBuilder`]
    /// emits one value token per form field, so a two-argument option such
    /// as `--cookie <name> <value>` arrives as one `"<name> <value>"` token
    /// and is masked whole. A vector holding the two halves as separate
    /// tokens would leak the second one.
    pub fn redacted(&self) -> String {
        let mut out: Vec<&str> = Vec::with_capacity(self.0.len());
        let mut iter = self.0.iter().peekable();

        while let Some(arg) = iter.next() {
            out.push(arg);
            let sensitive = arg
                .strip_prefix("--")
                .is_some_and(|name| SENSITIVE_OPTIONS.contains(&name));
            if sensitive && iter.next_if(|next| !next.starts_with("--")).is_some() {
                out.push("***");
            }
        }

        out.join(" ")
    }
}

impl fmt::Display for ArgumentVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

#[cfg(test)]
impl From<Vec<String>> for ArgumentVector {
    fn from(args: Vec<String>) -> Self {
        ArgumentVector(args)
    }
}

impl IntoIterator for ArgumentVector {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Builds the [`ArgumentVector`] for one conversion.
pub struct ArgumentBuilder;

impl ArgumentBuilder {
    /// Translate a decoded request into renderer arguments.
    ///
    /// Options are emitted in name order, so the same request always yields
    /// the same vector. An empty value is a boolean flag and emits the name
    /// alone.
    pub fn build(request: &ConversionRequest, paths: &DocumentPaths) -> ArgumentVector {
        let mut args = Vec::with_capacity(request.options.len() * 2 + 7);

        for (name, value) in &request.options {
            args.push(format!("--{name}"));
            if !value.is_empty() {
                args.push(value.clone());
            }
        }

        if let Some(header) = &paths.header {
            args.push("--header-html".to_string());
            args.push(header.to_string_lossy().into_owned());
        }
        if let Some(footer) = &paths.footer {
            args.push("--footer-html".to_string());
            args.push(footer.to_string_lossy().into_owned());
        }

        args.push("--enable-local-file-access".to_string());
        args.push(paths.index.to_string_lossy().into_owned());
        args.push("-".to_string());

        ArgumentVector(args)
    }
}
