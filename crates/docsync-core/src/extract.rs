//! Text extraction seam.
//!
//! The orchestrator hands raw file bytes plus the filename to a
//! [`TextExtractor`] and gets plain text back. Extraction never fails:
//! unsupported or unparseable content yields an empty string, which the
//! orchestrator then treats as "too little text" and skips.
//!
//! The format-aware extractor (PDF, Office, CSV) lives in the app crate;
//! this module only provides the plain-text fallback.

/// Turns raw file content into plain text.
pub trait TextExtractor: Send + Sync {
    /// Extract text from `bytes`. `filename` drives format selection.
    fn extract(&self, bytes: &[u8], filename: &str) -> String;
}

/// Decodes bytes as UTF-8, replacing invalid sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], _filename: &str) -> String {
        let text = String::from_utf8_lossy(bytes);
        text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
    }
}

/// Lowercased extension of `filename`, without the dot.
pub fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
