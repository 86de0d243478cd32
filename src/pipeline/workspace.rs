//! Per-request workspace: a private temp directory for the uploaded files.
//!
//! The renderer reads its input from paths, and the primary document may
//! reference its header, footer and assets by relative path, so every file
//! of one request lands in the same directory.
//!
//! The directory is a [`tempfile::TempDir`] (mode 0700, random suffix) and is
//! removed when the `Workspace` is dropped. [`Workspace::release`] removes it
//! explicitly and reports removal errors.

use crate::error::Html2PdfError;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// A request-scoped temporary directory.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh, uniquely named private directory.
    ///
    /// The directory is created under `root`, or the system temp directory
    /// when `root` is `None`.
    pub fn acquire(root: Option<&Path>, prefix: &str) -> Result<Self, Html2PdfError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);

        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|source| Html2PdfError::WorkspaceCreate { source })?;

        let path = dir.path().to_path_buf();
        debug!("Temporary directory created: {}", path.display());

        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    /// Path of the workspace directory.
    ///
    /// Still returns the old path after [`Workspace::release`].
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` until [`Workspace::release`] has run.
    pub fn is_live(&self) -> bool {
        self.dir.is_some()
    }

    /// Write `content` as file `name` inside the workspace and return its path.
    ///
    /// Only the final component of `name` is used, so `../../etc/passwd`
    /// lands as `passwd` inside the workspace. Names with no usable final
    /// component are rejected.
    pub async fn write_part(&self, name: &str, content: &[u8]) -> Result<PathBuf, Html2PdfError> {
        let file_name = sanitize_file_name(name).ok_or_else(|| Html2PdfError::InvalidPartName {
            name: name.to_string(),
        })?;

        if self.dir.is_none() {
            return Err(Html2PdfError::Internal(format!(
                "write to released workspace {}",
                self.path.display()
            )));
        }

        let path = self.path.join(file_name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| Html2PdfError::WorkspaceWrite {
                path: path.clone(),
                source,
            })?;

        debug!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(path)
    }

    /// Remove the directory and everything in it.
    ///
    /// Idempotent: the second and later calls do nothing.
    pub fn release(&mut self) -> Result<(), Html2PdfError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        dir.close().map_err(|source| {
            warn!("Failed to remove temp directory {}: {}", self.path.display(), source);
            Html2PdfError::WorkspaceRelease {
                path: self.path.clone(),
                source,
            }
        })?;

        debug!("Temporary directory removed: {}", self.path.display());
        Ok(())
    }
}

/// Reduce an uploaded file name to a single safe path component.
fn sanitize_file_name(name: &str) -> Option<&str> {
    // Browsers on Windows may send the full client-side path.
    let last = name.rsplit(['/', '\\']).next()?;
    match Path::new(last).components().next() {
        Some(Component::Normal(_)) if !last.is_empty() => Some(last),
        _ => None,
    }
}
