//! Text extraction for the file types found in document libraries.
//!
//! [`DocumentExtractor`] dispatches on the file extension:
//!
//! | Extension | Method |
//! |-----------|--------|
//! | `.pdf` | `pdf-extract` |
//! | `.docx` | `word/document.xml` `<w:t>` runs, one line per paragraph |
//! | `.pptx` | `<a:t>` runs of every slide, in slide order |
//! | `.xlsx` | shared and inline string cells, then numeric cells |
//! | `.txt` `.md` `.csv` | UTF-8, lossy |
//!
//! Extraction never fails from the caller's point of view: unsupported
//! or corrupt input is logged and yields an empty string, which the sync
//! then skips as "too little text".

use std::io::Read;

use docsync_core::extract::{extension, PlainTextExtractor, TextExtractor};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::{debug, warn};

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Upper bound on decompressed bytes read from one ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Extension-dispatching extractor used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentExtractor;

impl TextExtractor for DocumentExtractor {
    fn extract(&self, bytes: &[u8], filename: &str) -> String {
        match extract_text(bytes, filename) {
            Ok(text) => {
                debug!(file = filename, chars = text.len(), "extracted text");
                text
            }
            Err(e) => {
                warn!(file = filename, error = %e, "text extraction failed");
                String::new()
            }
        }
    }
}

/// Extract plain text from `bytes`, choosing the format by `filename`.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
    let ext = extension(filename).unwrap_or_default();
    match ext.as_str() {
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        "pptx" => extract_pptx(bytes),
        "xlsx" => extract_xlsx(bytes),
        "txt" | "md" | "csv" => Ok(PlainTextExtractor.extract(bytes, filename)),
        _ => Err(ExtractError::Unsupported(filename.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed input.
    let owned = bytes.to_vec();
    match std::panic::catch_unwind(move || pdf_extract::extract_text_from_mem(&owned)) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entries named `{prefix}{n}.xml`, ordered by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Concatenate the text of every `<text_tag>` element, ending a line at
/// each closing `<para_tag>`.
fn collect_runs(xml: &[u8], text_tag: &[u8], para_tag: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == text_tag => in_text = true,
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == text_tag {
                    in_text = false;
                } else if name.as_ref() == para_tag && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")?;
    collect_runs(&xml, b"t", b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    let mut out = String::new();
    for name in slides {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let text = collect_runs(&xml, b"t", b"p")?;
        if text.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&text);
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        let xml = read_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut out = String::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let rows = read_sheet_rows(&xml, &shared)?;
        if rows.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&rows);
    }
    Ok(out)
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_t => {
                if let Some(s) = current.as_mut() {
                    let text = t.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                    s.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(PartialEq)]
enum CellKind {
    Shared,
    Inline,
    Value,
}

/// One line per row, cells separated by a single space.
fn read_sheet_rows(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut kind = CellKind::Value;
    let mut in_value = false;
    let mut cells = 0usize;
    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    kind = CellKind::Value;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Value,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_value = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                let raw = t.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                let value = raw.trim();
                let cell = match kind {
                    CellKind::Shared => value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i))
                        .cloned(),
                    CellKind::Inline | CellKind::Value => Some(value.to_string()),
                };
                if let Some(cell) = cell.filter(|c| !c.is_empty()) {
                    row.push(cell);
                    cells += 1;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join(" "));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join(" "));
    }
    Ok(rows.join("\n"))
}
