//! Request decoding: multipart parts → workspace files + renderer options.
//!
//! ## Why a `PartSource` trait?
//!
//! The decoder must not care which HTTP framework parsed the multipart
//! envelope. [`PartSource`] is the narrow seam between the two: the server
//! implements it for `axum::extract::Multipart`, and [`FormParts`] is an
//! in-memory implementation for library callers and tests.
//!
//! ## Routing rules
//!
//! * A part **with** a filename is a file. It is written into the workspace
//!   under that filename. `index.html`, `header.html` and `footer.html` are
//!   the reserved names the argument builder understands; any other file is
//!   written (so the primary document can reference it) but not otherwise
//!   used.
//! * A part **without** a filename is a renderer option: the field name is
//!   the flag, its text the value. An empty value means a boolean flag.
//!
//! Validation runs after the whole stream is consumed, so every uploaded
//! file is on disk even when the request is rejected.

use crate::config::OptionPolicy;
use crate::error::{ErrorKind, Html2PdfError};
use crate::pipeline::workspace::Workspace;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Reserved file name of the primary document.
pub const PRIMARY_DOCUMENT: &str = "index.html";
/// Reserved file name of the header fragment.
pub const HEADER_DOCUMENT: &str = "header.html";
/// Reserved file name of the footer fragment.
pub const FOOTER_DOCUMENT: &str = "footer.html";

/// One fully-read multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    /// Form field name (`name=` in Content-Disposition).
    pub name: String,
    /// Declared file name, present for file uploads only.
    pub file_name: Option<String>,
    /// Part body.
    pub data: Vec<u8>,
}

/// A source of multipart parts, read one at a time.
pub trait PartSource: Send {
    /// The next part, or `None` at the end of the stream.
    ///
    /// Parse failures must be reported as
    /// [`Html2PdfError::MalformedMultipart`].
    fn next_part(&mut self) -> impl Future<Output = Result<Option<FormPart>, Html2PdfError>> + Send;
}

/// In-memory [`PartSource`].
///
/// # Example
/// ```rust
/// use edgequake_html2pdf::FormParts;
///
/// let parts = FormParts::new()
///     .file("index.html", "<h1>Invoice</h1>")
///     .file("footer.html", "<p>page footer</p>")
///     .field("page-size", "A4")
///     .field("grayscale", "");
/// assert_eq!(parts.len(), 4);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FormParts {
    parts: VecDeque<FormPart>,
}

impl FormParts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file part. The field name is `file`, as browsers and `curl -F`
    /// send it.
    pub fn file(mut self, file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.parts.push_back(FormPart {
            name: "file".to_string(),
            file_name: Some(file_name.into()),
            data: data.into(),
        });
        self
    }

    /// Add a simple (non-file) field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push_back(FormPart {
            name: name.into(),
            file_name: None,
            data: value.into().into_bytes(),
        });
        self
    }

    /// Add an arbitrary part.
    pub fn part(mut self, part: FormPart) -> Self {
        self.parts.push_back(part);
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl PartSource for FormParts {
    async fn next_part(&mut self) -> Result<Option<FormPart>, Html2PdfError> {
        Ok(self.parts.pop_front())
    }
}

/// The decoded, validated input to a single conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Primary document content. Never empty.
    pub index_html: Vec<u8>,
    /// Header fragment content, when supplied and non-empty.
    pub header_html: Option<Vec<u8>>,
    /// Footer fragment content, when supplied and non-empty.
    pub footer_html: Option<Vec<u8>>,
    /// Renderer options, name → value (empty value ⇒ boolean flag).
    pub options: BTreeMap<String, String>,
}

/// Where the decoder put each file inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPaths {
    pub index: PathBuf,
    pub header: Option<PathBuf>,
    pub footer: Option<PathBuf>,
    /// Every other uploaded file, keyed by its declared filename.
    pub extra: BTreeMap<String, PathBuf>,
}

/// Output of [`RequestDecoder::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    pub request: ConversionRequest,
    pub paths: DocumentPaths,
}

/// Decodes a multipart stream into a [`DecodedRequest`].
#[derive(Debug, Clone, Default)]
pub struct RequestDecoder {
    policy: OptionPolicy,
}

/// Incremental state while consuming the stream.
#[derive(Default)]
struct Collected {
    index: Option<(Vec<u8>, PathBuf)>,
    header: Option<(Vec<u8>, PathBuf)>,
    footer: Option<(Vec<u8>, PathBuf)>,
    extra: BTreeMap<String, PathBuf>,
    options: BTreeMap<String, String>,
}

impl RequestDecoder {
    pub fn new(policy: OptionPolicy) -> Self {
        Self { policy }
    }

    /// Consume `source`, persisting every file part into `workspace`.
    ///
    /// # Errors
    /// * [`Html2PdfError::MalformedMultipart`] — the stream cannot be parsed
    /// * [`Html2PdfError::MissingPrimaryDocument`] / [`Html2PdfError::EmptyPrimaryDocument`]
    /// * [`Html2PdfError::InvalidOption`] / [`Html2PdfError::OptionNotAllowed`]
    /// * [`Html2PdfError::WorkspaceWrite`] — a file could not be written
    pub async fn decode<S: PartSource + ?Sized>(
        &self,
        source: &mut S,
        workspace: &Workspace,
    ) -> Result<DecodedRequest, Html2PdfError> {
        let mut collected = Collected::default();
        let mut rejected: Option<Html2PdfError> = None;

        // A rejected part does not stop the stream: later file parts are
        // still persisted and the first rejection is reported at the end.
        while let Some(part) = source.next_part().await? {
            let accepted = match part.file_name {
                Some(file_name) => {
                    self.accept_file(workspace, &mut collected, file_name, part.data)
                        .await
                }
                None => self.accept_option(&mut collected, part.name, part.data),
            };
            match accepted {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Validation => {
                    rejected.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(e) = rejected {
            return Err(e);
        }

        let (index_html, index) = collected.index.ok_or_else(|| {
            warn!("index.html file is required but not found");
            Html2PdfError::MissingPrimaryDocument
        })?;
        if index_html.is_empty() {
            warn!("index.html file is empty");
            return Err(Html2PdfError::EmptyPrimaryDocument);
        }

        // Empty fragments stay on disk but are not handed to the renderer.
        let (header_html, header) = split_non_empty(collected.header);
        let (footer_html, footer) = split_non_empty(collected.footer);

        debug!(
            options = collected.options.len(),
            extra_files = collected.extra.len(),
            has_header = header.is_some(),
            has_footer = footer.is_some(),
            "Decoded conversion request"
        );

        Ok(DecodedRequest {
            request: ConversionRequest {
                index_html,
                header_html,
                footer_html,
                options: collected.options,
            },
            paths: DocumentPaths {
                index,
                header,
                footer,
                extra: collected.extra,
            },
        })
    }

    async fn accept_file(
        &self,
        workspace: &Workspace,
        collected: &mut Collected,
        file_name: String,
        data: Vec<u8>,
    ) -> Result<(), Html2PdfError> {
        let path = workspace.write_part(&file_name, &data).await?;
        let stored_as = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());

        match stored_as.as_str() {
            PRIMARY_DOCUMENT => collected.index = Some((data, path)),
            HEADER_DOCUMENT => collected.header = Some((data, path)),
            FOOTER_DOCUMENT => collected.footer = Some((data, path)),
            _ => {
                debug!("Accepted extra file '{}' (not passed to renderer)", stored_as);
                collected.extra.insert(stored_as, path);
            }
        }
        Ok(())
    }

    fn accept_option(
        &self,
        collected: &mut Collected,
        name: String,
        data: Vec<u8>,
    ) -> Result<(), Html2PdfError> {
        if name.is_empty() || name.starts_with('-') {
            return Err(Html2PdfError::InvalidOption {
                name,
                reason: "option names must be non-empty and must not start with '-'".into(),
            });
        }
        if !self.policy.permits(&name) {
            warn!("Rejected renderer option --{}", name);
            return Err(Html2PdfError::OptionNotAllowed { name });
        }

        let value = String::from_utf8(data).map_err(|_| Html2PdfError::InvalidOption {
            name: name.clone(),
            reason: "value is not valid UTF-8".into(),
        })?;

        // First value wins for repeated fields.
        collected.options.entry(name).or_insert(value);
        Ok(())
    }
}

fn split_non_empty(slot: Option<(Vec<u8>, PathBuf)>) -> (Option<Vec<u8>>, Option<PathBuf>) {
    match slot {
        Some((content, path)) if !content.is_empty() => (Some(content), Some(path)),
        _ => (None, None),
    }
}
