//! Text extraction for imported documents.
//!
//! Supported formats: plain text, Markdown, PDF, and DOCX. The format is
//! detected from the filename extension; binary formats are parsed with
//! `pdf-extract` and `zip` + `quick-xml`. Unsupported formats, empty files,
//! oversized files, and files with no extractable text are validation
//! errors and are never retried.

use std::io::Read;

use crate::error::{PipelineError, Result};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extracts plain UTF-8 text from raw document bytes.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String>;
}

/// Default multi-format extractor with a configurable file-size cap.
pub struct DefaultExtractor {
    max_file_bytes: i64,
}

impl DefaultExtractor {
    pub fn new(max_file_bytes: i64) -> Self {
        Self { max_file_bytes }
    }
}

impl TextExtractor for DefaultExtractor {
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String> {
        if bytes.is_empty() {
            return Err(PipelineError::Validation("file is empty".into()));
        }
        if bytes.len() as i64 > self.max_file_bytes {
            return Err(PipelineError::Validation(format!(
                "file size {} exceeds {} byte limit",
                bytes.len(),
                self.max_file_bytes
            )));
        }

        let content_type = detect_content_type(filename).ok_or_else(|| {
            PipelineError::Validation(format!("unsupported file type: {}", filename))
        })?;

        let text = match content_type {
            MIME_TEXT | MIME_MARKDOWN => String::from_utf8_lossy(bytes).into_owned(),
            MIME_PDF => extract_pdf(bytes)?,
            MIME_DOCX => extract_docx(bytes)?,
            _ => unreachable!(),
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Validation(
                "no text content found in file".into(),
            ));
        }
        Ok(text.to_string())
    }
}

/// Map a filename extension to a supported MIME type.
pub fn detect_content_type(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        _ => None,
    }
}

/// Whether an import for this filename would pass format validation.
pub fn is_supported(filename: &str) -> bool {
    detect_content_type(filename).is_some()
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| PipelineError::Validation(format!("PDF extraction failed: {}", e)))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| PipelineError::Validation(format!("DOCX extraction failed: {}", e)))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| PipelineError::Validation("word/document.xml not found".into()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| PipelineError::Validation(format!("DOCX extraction failed: {}", e)))?;
    }
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(PipelineError::Validation(
            "word/document.xml exceeds size limit".into(),
        ));
    }

    extract_w_t_elements(&doc_xml)
}

/// Collect the text of every `w:t` run in the document XML.
fn extract_w_t_elements(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(PipelineError::Validation(format!(
                    "DOCX extraction failed: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
