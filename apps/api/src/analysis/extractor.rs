//! Extractor: turns uploaded document bytes into gradeable content.
//!
//! Text is tried first (PDF text layer, DOCX runs, or plain UTF-8). When that
//! fails or yields too little text, PDFs are rasterized page by page and the
//! images are graded instead. Both steps are CPU/process bound and run inside
//! `tokio::task::spawn_blocking`.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analysis::identity::normalize_text;
use crate::errors::AppError;
use crate::models::cache::FileMetadata;

/// Maximum decompressed size of `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 20 * 1024 * 1024;
const PNG_MEDIA_TYPE: &str = "image/png";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF text extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX text extraction failed: {0}")]
    Docx(String),

    #[error("document is not valid UTF-8 text: {0}")]
    Encoding(String),

    #[error("extracted text too short ({chars} chars, minimum {min})")]
    TooShort { chars: usize, min: usize },

    #[error("page rendering failed: {0}")]
    Render(String),
}

/// An uploaded document. Lives only for the duration of one request.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Bytes,
    pub filename: String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
}

impl Document {
    pub fn new(bytes: impl Into<Bytes>, filename: impl Into<String>, last_modified: i64) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            last_modified,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn kind(&self) -> DocumentKind {
        DocumentKind::detect(&self.filename, &self.bytes)
    }

    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            file_name: self.filename.clone(),
            file_size: self.size(),
            last_modified: self.last_modified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
}

impl DocumentKind {
    /// Resolves the kind from the file extension, then from magic bytes.
    pub fn detect(filename: &str, bytes: &[u8]) -> Self {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("pdf") => DocumentKind::Pdf,
            Some("docx") => DocumentKind::Docx,
            Some("txt") | Some("md") => DocumentKind::Text,
            _ if bytes.starts_with(b"%PDF") => DocumentKind::Pdf,
            _ if bytes.starts_with(b"PK") => DocumentKind::Docx,
            _ => DocumentKind::Text,
        }
    }

    /// Label stored in `analysis_history.file_type`.
    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
            DocumentKind::Text => "txt",
        }
    }
}

/// A single rasterized page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number.
    pub page: u32,
    pub media_type: String,
    pub data: Bytes,
}

/// Content handed to identity derivation and grading. Never both text and pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedContent {
    /// Whitespace-normalized text.
    Text(String),
    /// Ordered page images, first page first.
    Pages(Vec<PageImage>),
}

/// Rasterizes a document into ordered page images. Implementations are
/// blocking and are always called from the blocking thread pool.
pub trait PageRenderer: Send + Sync {
    fn render_pages(&self, bytes: &[u8]) -> Result<Vec<PageImage>, ExtractError>;
}

/// Renders PDF pages to PNG by shelling out to poppler's `pdftoppm`.
pub struct PdftoppmRenderer {
    pub bin: String,
    pub dpi: u32,
    pub max_pages: u32,
}

impl PageRenderer for PdftoppmRenderer {
    fn render_pages(&self, bytes: &[u8]) -> Result<Vec<PageImage>, ExtractError> {
        let dir = tempfile::tempdir()
            .map_err(|e| ExtractError::Render(format!("failed creating temp dir: {e}")))?;
        let input_path = dir.path().join("input.pdf");
        fs::write(&input_path, bytes)
            .map_err(|e| ExtractError::Render(format!("failed writing temp pdf: {e}")))?;

        let output = Command::new(&self.bin)
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-l")
            .arg(self.max_pages.to_string())
            .arg(&input_path)
            .arg(dir.path().join("page"))
            .output()
            .map_err(|e| ExtractError::Render(format!("{} is unavailable: {e}", self.bin)))?;

        if !output.status.success() {
            return Err(ExtractError::Render(format!(
                "{} exited with {:?}: {}",
                self.bin,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut pages = Vec::new();
        let entries = fs::read_dir(dir.path())
            .map_err(|e| ExtractError::Render(format!("failed listing rendered pages: {e}")))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(page) = page_number(&name) else {
                continue;
            };
            let data = fs::read(entry.path())
                .map_err(|e| ExtractError::Render(format!("failed reading {name}: {e}")))?;
            pages.push(PageImage {
                page,
                media_type: PNG_MEDIA_TYPE.to_string(),
                data: Bytes::from(data),
            });
        }
        pages.sort_by_key(|p| p.page);

        if pages.is_empty() {
            return Err(ExtractError::Render("renderer produced no pages".to_string()));
        }
        Ok(pages)
    }
}

/// Parses the page number out of a `pdftoppm` output name such as
/// `page-1.png` or `page-07.png`.
fn page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("page-")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

#[derive(Clone)]
pub struct Extractor {
    min_text_chars: usize,
    renderer: Arc<dyn PageRenderer>,
}

impl Extractor {
    pub fn new(min_text_chars: usize, renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            min_text_chars,
            renderer,
        }
    }

    /// Extracts text, falling back to page images. Fails with
    /// `AppError::UnreadableDocument` when both strategies fail.
    pub async fn extract(&self, document: &Document) -> Result<ExtractedContent, AppError> {
        if document.bytes.is_empty() {
            return Err(AppError::UnreadableDocument(format!(
                "'{}' is empty",
                document.filename
            )));
        }

        let kind = document.kind();
        let bytes = document.bytes.clone();
        let min_chars = self.min_text_chars;
        let text = tokio::task::spawn_blocking(move || {
            extract_text(&bytes, kind).and_then(|raw| require_min_length(&raw, min_chars))
        })
        .await
        .unwrap_or_else(|e| Err(ExtractError::Pdf(format!("extractor panicked: {e}"))));

        let text_error = match text {
            Ok(text) => {
                debug!(
                    "Extracted {} chars of text from '{}'",
                    text.len(),
                    document.filename
                );
                return Ok(ExtractedContent::Text(text));
            }
            Err(e) => e,
        };

        warn!(
            "Text extraction failed for '{}' ({text_error}), falling back to page images",
            document.filename
        );

        let pages = if kind == DocumentKind::Pdf {
            let renderer = Arc::clone(&self.renderer);
            let bytes = document.bytes.clone();
            tokio::task::spawn_blocking(move || renderer.render_pages(&bytes))
                .await
                .unwrap_or_else(|e| Err(ExtractError::Render(format!("renderer panicked: {e}"))))
        } else {
            Err(ExtractError::Render(format!(
                "page rendering is not supported for {} documents",
                kind.label()
            )))
        };

        match pages {
            Ok(pages) => {
                info!(
                    "Rendered {} page image(s) for '{}'",
                    pages.len(),
                    document.filename
                );
                Ok(ExtractedContent::Pages(pages))
            }
            Err(render_error) => Err(AppError::UnreadableDocument(format!(
                "{text_error}; {render_error}"
            ))),
        }
    }
}

/// Extracts raw text for the given document kind.
pub fn extract_text(bytes: &[u8], kind: DocumentKind) -> Result<String, ExtractError> {
    match kind {
        DocumentKind::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        DocumentKind::Docx => extract_docx(bytes),
        DocumentKind::Text => {
            String::from_utf8(bytes.to_vec()).map_err(|e| ExtractError::Encoding(e.to_string()))
        }
    }
}

fn require_min_length(raw: &str, min_chars: usize) -> Result<String, ExtractError> {
    let text = normalize_text(raw);
    let chars = text.chars().count();
    if chars < min_chars {
        return Err(ExtractError::TooShort {
            chars,
            min: min_chars,
        });
    }
    Ok(text)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(format!("word/document.xml: {e}")))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    let mut out = String::new();
    // Run text is kept verbatim; words split across runs carry their spaces.
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf) {
                    out.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(quick_xml::events::Event::Empty(e))
                if matches!(e.local_name().as_ref(), b"tab" | b"br") =>
            {
                out.push(' ');
            }
            // paragraph boundary
            Ok(quick_xml::events::Event::End(e)) if e.local_name().as_ref() == b"p" => {
                out.push('\n');
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
