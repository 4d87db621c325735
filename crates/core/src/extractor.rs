use crate::chunking::normalize_whitespace;
use crate::error::ExtractionError;
use crate::models::DocumentType;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

const DOCX_BODY: &str = "word/document.xml";
const DOCX_PARAGRAPHS_PER_PAGE: u32 = 20;

/// Plain text pulled out of one document, plus its page count (or a
/// pseudo-page estimate for formats without pagination).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub unit_count: u32,
}

pub trait DocumentExtractor: Send + Sync {
    fn extract(
        &self,
        bytes: &[u8],
        declared: DocumentType,
    ) -> Result<ExtractedText, ExtractionError>;

    fn detect_type(&self, path: &Path) -> DocumentType {
        DocumentType::from_path(path)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextExtractor;

impl DocumentExtractor for TextExtractor {
    fn extract(
        &self,
        bytes: &[u8],
        declared: DocumentType,
    ) -> Result<ExtractedText, ExtractionError> {
        let extracted = match declared {
            DocumentType::Pdf => extract_pdf(bytes)?,
            DocumentType::Docx | DocumentType::Doc => extract_docx(bytes, declared)?,
            DocumentType::Txt => ExtractedText {
                text: decode_text(bytes),
                unit_count: 1,
            },
            DocumentType::Rtf => ExtractedText {
                text: strip_rtf(&decode_text(bytes))?,
                unit_count: 1,
            },
            DocumentType::Unknown => return Err(ExtractionError::Unsupported(declared)),
        };

        debug!(
            format = %declared,
            chars = extracted.text.chars().count(),
            units = extracted.unit_count,
            "extracted document text"
        );
        Ok(extracted)
    }
}

/// UTF-8 when valid, otherwise one char per byte (Latin-1). Never fails.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&byte| char::from(byte)).collect(),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
    let document = Document::load_mem(bytes)
        .map_err(|_| ExtractionError::malformed(DocumentType::Pdf, "unreadable pdf structure"))?;

    let pages = document.get_pages();
    let mut parts = Vec::new();
    for page_no in pages.keys() {
        let text = document
            .extract_text(&[*page_no])
            .map_err(|_| ExtractionError::malformed(DocumentType::Pdf, "unreadable page content"))?;
        if !text.trim().is_empty() {
            parts.push(text);
        }
    }

    if parts.is_empty() {
        return Err(ExtractionError::NoText {
            format: DocumentType::Pdf,
        });
    }

    Ok(ExtractedText {
        text: parts.join("\n\n"),
        unit_count: u32::try_from(pages.len()).unwrap_or(u32::MAX),
    })
}

fn extract_docx(bytes: &[u8], format: DocumentType) -> Result<ExtractedText, ExtractionError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|_| ExtractionError::malformed(format, "not a word archive"))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(|_| ExtractionError::malformed(format, "missing document body"))?
        .read_to_string(&mut xml)
        .map_err(|_| ExtractionError::malformed(format, "unreadable document body"))?;

    let parts = docx_text_parts(&xml)
        .ok_or_else(|| ExtractionError::malformed(format, "invalid document xml"))?;
    let paragraphs = u32::try_from(parts.len()).unwrap_or(u32::MAX);

    Ok(ExtractedText {
        text: parts.join("\n\n"),
        unit_count: (paragraphs / DOCX_PARAGRAPHS_PER_PAGE).max(1),
    })
}

/// Body paragraphs in order, followed by one ` | `-joined line per table row.
fn docx_text_parts(xml: &str) -> Option<Vec<String>> {
    let mut reader = Reader::from_str(xml);

    let mut paragraphs = Vec::new();
    let mut table_rows = Vec::new();
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut table_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"p" => paragraph.clear(),
                b"t" => in_text = true,
                b"tbl" => table_depth += 1,
                b"tr" => row.clear(),
                b"tc" => cell.clear(),
                _ => {}
            },
            Ok(Event::Empty(element)) => match element.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(text)) if in_text => {
                paragraph.push_str(&text.unescape().ok()?);
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if table_depth > 0 => {
                    if !cell.is_empty() {
                        cell.push('\n');
                    }
                    cell.push_str(&paragraph);
                }
                b"p" => {
                    if !paragraph.trim().is_empty() {
                        paragraphs.push(paragraph.clone());
                    }
                }
                b"tc" => {
                    let value = cell.trim();
                    if !value.is_empty() {
                        row.push(value.to_string());
                    }
                }
                b"tr" => {
                    if !row.is_empty() {
                        table_rows.push(row.join(" | "));
                    }
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    paragraphs.extend(table_rows);
    Some(paragraphs)
}

/// Lossy: drops the header, control words and group braces, then collapses
/// whitespace. Escaped characters and embedded objects are not interpreted.
fn strip_rtf(text: &str) -> Result<String, ExtractionError> {
    let header = Regex::new(r"\\rtf\d+.*?\\viewkind\d+")?;
    let control_word = Regex::new(r"\\[a-z]+\d*\s?")?;
    let braces = Regex::new(r"[{}]")?;

    let stripped = header.replace_all(text, "");
    let stripped = control_word.replace_all(&stripped, "");
    let stripped = braces.replace_all(&stripped, "");
    Ok(normalize_whitespace(&stripped))
}
