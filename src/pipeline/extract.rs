//! Text extraction: read the text layer and basic metadata of a PDF.
//!
//! pdfium is a blocking C library, so all work against it happens inside
//! `tokio::task::spawn_blocking`. Before pdfium sees a file we check that it
//! exists and starts with the `%PDF` signature, so an obviously wrong upload
//! produces a readable error instead of a pdfium error code.
//!
//! Scanned PDFs without a text layer extract to an empty string. That is not
//! an error here; the orchestrator rejects it later as "no speakable text".

use crate::error::ExtractionError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What the pipeline needs from a PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfInfo {
    /// Raw text of all pages, one page per line group, separated by `\n`.
    pub text: String,
    pub num_pages: usize,
    /// Document Title metadata, if present and non-empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Source of document text. Swappable so tests can run without pdfium.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<PdfInfo, ExtractionError>;
}

/// [`TextExtractor`] backed by the pdfium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    library_path: Option<PathBuf>,
}

impl PdfiumExtractor {
    /// Bind to pdfium from the system library path, then the working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the pdfium library at `path` (a file or the directory holding it).
    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }
}

#[async_trait]
impl TextExtractor for PdfiumExtractor {
    async fn extract(&self, path: &Path) -> Result<PdfInfo, ExtractionError> {
        let path = path.to_path_buf();
        let library = self.library_path.clone();

        tokio::task::spawn_blocking(move || {
            check_pdf_header(&path)?;
            let pdfium = bind_pdfium(library.as_deref())?;
            extract_blocking(&pdfium, &path)
        })
        .await
        .map_err(|e| ExtractionError::Internal(format!("Extraction task panicked: {}", e)))?
    }
}

/// Verify the file exists and carries the `%PDF` magic bytes.
pub fn check_pdf_header(path: &Path) -> Result<(), ExtractionError> {
    if !path.exists() {
        return Err(ExtractionError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut file = std::fs::File::open(path).map_err(|source| ExtractionError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == b"%PDF" => Ok(()),
        // Shorter than four bytes: report whatever was there.
        Ok(()) | Err(_) => Err(ExtractionError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        }),
    }
}

/// Load the pdfium library.
///
/// With an explicit `library_path` only that location is tried. Otherwise the
/// system library search path is tried first, then the current directory.
pub fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, ExtractionError> {
    let bindings = match library_path {
        Some(p) if p.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
        }
        Some(p) => Pdfium::bind_to_library(p),
        None => Pdfium::bind_to_system_library().or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        }),
    }
    .map_err(|e| ExtractionError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn extract_blocking(pdfium: &Pdfium, path: &Path) -> Result<PdfInfo, ExtractionError> {
    let document = pdfium.load_pdf_from_file(path, None).map_err(|e| {
        let detail = format!("{:?}", e);
        if detail.contains("Password") || detail.contains("password") {
            ExtractionError::PasswordRequired {
                path: path.to_path_buf(),
            }
        } else {
            ExtractionError::CorruptPdf {
                path: path.to_path_buf(),
                detail,
            }
        }
    })?;

    let pages = document.pages();
    let num_pages = pages.len() as usize;

    let mut page_texts = Vec::with_capacity(num_pages);
    for (idx, page) in pages.iter().enumerate() {
        let text = page.text().map_err(|e| ExtractionError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("page {}: {:?}", idx + 1, e),
        })?;
        let text = text.all();
        debug!("Page {} → {} chars", idx + 1, text.chars().count());
        page_texts.push(text);
    }

    let title = document
        .metadata()
        .get(PdfDocumentMetadataTagType::Title)
        .map(|tag| tag.value().trim().to_string())
        .filter(|t| !t.is_empty());

    let text = page_texts.join("\n");
    info!(
        "Extracted {} chars from {} pages of {}",
        text.chars().count(),
        num_pages,
        path.display()
    );

    Ok(PdfInfo {
        text,
        num_pages,
        title,
    })
}

/// `true` when the extractor can read the file.
pub async fn validate_pdf(extractor: &dyn TextExtractor, path: &Path) -> bool {
    match extractor.extract(path).await {
        Ok(_) => true,
        Err(e) => {
            debug!("PDF validation failed for {}: {}", path.display(), e);
            false
        }
    }
}

/// Extract from an in-memory PDF by staging it in a temp file.
///
/// pdfium needs a file-system path; the temp file is removed on return.
pub async fn extract_from_bytes(
    extractor: &dyn TextExtractor,
    bytes: &[u8],
) -> Result<PdfInfo, ExtractionError> {
    let staged = tempfile::Builder::new()
        .prefix("pdf2audiobook-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ExtractionError::Internal(format!("Failed to create temp file: {}", e)))?;

    tokio::fs::write(staged.path(), bytes)
        .await
        .map_err(|source| ExtractionError::Unreadable {
            path: staged.path().to_path_buf(),
            source,
        })?;

    extractor.extract(staged.path()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_file_not_found() {
        let err = check_pdf_header(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, ExtractionError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic_is_not_a_pdf() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04zipdata").unwrap();
        match check_pdf_header(f.path()).unwrap_err() {
            ExtractionError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn truncated_file_is_not_a_pdf() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%P").unwrap();
        assert!(matches!(
            check_pdf_header(f.path()),
            Err(ExtractionError::NotAPdf { .. })
        ));
    }

    #[test]
    fn pdf_magic_passes_header_check() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n").unwrap();
        assert!(check_pdf_header(f.path()).is_ok());
    }

    struct Echo;

    #[async_trait]
    impl TextExtractor for Echo {
        async fn extract(&self, path: &Path) -> Result<PdfInfo, ExtractionError> {
            check_pdf_header(path)?;
            let text = tokio::fs::read_to_string(path).await.unwrap_or_default();
            Ok(PdfInfo {
                text,
                num_pages: 1,
                title: None,
            })
        }
    }

    #[tokio::test]
    async fn validate_reflects_extraction_result() {
        let mut good = tempfile::NamedTempFile::new().unwrap();
        good.write_all(b"%PDF-1.4 hello").unwrap();
        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(b"<html>").unwrap();

        assert!(validate_pdf(&Echo, good.path()).await);
        assert!(!validate_pdf(&Echo, bad.path()).await);
    }

    #[tokio::test]
    async fn extract_from_bytes_stages_a_file() {
        let info = extract_from_bytes(&Echo, b"%PDF-1.4 staged").await.unwrap();
        assert_eq!(info.text, "%PDF-1.4 staged");
    }
}
