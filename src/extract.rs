//! Multi-format text extraction for uploaded documents.
//!
//! Dispatches on the file extension: plain text is read directly, Word
//! documents are unzipped and their paragraph runs concatenated, images go
//! through OCR, and PDFs use native text extraction with a per-page OCR
//! fallback for scanned pages. Anything else is an unsupported format and
//! fails the ingestion run for that file.

use std::io::Read;
use std::path::Path;

use crate::config::OcrConfig;
use crate::ocr;

/// Image extensions routed straight to OCR.
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tiff"];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    Io(String),
    Pdf(String),
    Docx(String),
    Ocr(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(ext) => {
                write!(f, "unsupported file format: .{}", ext)
            }
            ExtractError::Io(e) => write!(f, "failed to read file: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "Word extraction failed: {}", e),
            ExtractError::Ocr(e) => write!(f, "OCR failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract a single normalized text string from a source file.
///
/// The result may be empty (e.g. a blank page scan that OCR can't read);
/// emptiness is not an error at this layer.
pub fn extract_text(path: &Path, ocr_config: &OcrConfig) -> Result<String, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return ocr::recognize_image(ocr_config, path).map_err(|e| ExtractError::Ocr(e.to_string()));
    }

    match ext.as_str() {
        "txt" => {
            let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        "docx" => {
            let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
            extract_docx(&bytes)
        }
        "pdf" => extract_pdf(path, ocr_config),
        other => Err(ExtractError::UnsupportedFormat(other.to_string())),
    }
}

/// Per-page PDF extraction. Pages whose native text layer is empty are
/// rasterized and OCR'd; page texts are newline-joined and the whole
/// result trimmed.
fn extract_pdf(path: &Path, ocr_config: &OcrConfig) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut out = Vec::with_capacity(pages.len());
    for (i, page_text) in pages.into_iter().enumerate() {
        if page_text.trim().is_empty() {
            let recognized = ocr::recognize_pdf_page(ocr_config, path, i + 1)
                .map_err(|e| ExtractError::Ocr(e.to_string()))?;
            out.push(recognized);
        } else {
            out.push(page_text);
        }
    }
    Ok(out.join("\n").trim().to_string())
}

/// Extract `.docx` text: paragraph (`w:p`) texts in order, newline-joined.
fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ExtractError::Docx(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }

    extract_paragraphs(&doc_xml)
}

/// Collect `w:t` runs grouped by their enclosing `w:p` paragraph.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_text => {
                if let Ok(text) = te.unescape() {
                    current.push_str(text.as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}
