//! [`PartSource`] over axum's multipart extractor.

use crate::error::Html2PdfError;
use crate::pipeline::decode::{FormPart, PartSource};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::Multipart;

/// Reads parts straight off the request body, one at a time.
pub struct MultipartSource {
    inner: Multipart,
}

impl MultipartSource {
    pub fn new(inner: Multipart) -> Self {
        Self { inner }
    }
}

impl PartSource for MultipartSource {
    async fn next_part(&mut self) -> Result<Option<FormPart>, Html2PdfError> {
        let Some(field) = self.inner.next_field().await.map_err(malformed)? else {
            return Ok(None);
        };

        let name = field.name().unwrap_or_default().to_string();
        // An empty file input arrives as `filename=""`; treat it as a plain field.
        let file_name = field
            .file_name()
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let data = field.bytes().await.map_err(malformed)?;

        tracing::debug!(
            "Received field: name='{}', filename={:?}, {} bytes",
            name,
            file_name,
            data.len()
        );

        Ok(Some(FormPart {
            name,
            file_name,
            data: data.to_vec(),
        }))
    }
}

fn malformed(e: MultipartError) -> Html2PdfError {
    Html2PdfError::MalformedMultipart {
        detail: e.body_text(),
    }
}

/// The request was not `multipart/form-data` at all.
pub fn rejected(rejection: MultipartRejection) -> Html2PdfError {
    Html2PdfError::MalformedMultipart {
        detail: rejection.body_text(),
    }
}
