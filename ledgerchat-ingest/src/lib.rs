//! Document Extractor — uploaded bytes to plain text
//!
//! Pure functions over the upload payload: no I/O, no persistence. The
//! caller declares the format (from file name / content type); per-format
//! strategies do the rest. PDF extraction runs an ordered fallback chain,
//! see [`pdf`].

pub mod pdf;

use thiserror::Error;

/// Declared upload format. Derived by the upload boundary from the file
/// name or content type — the extractor never sniffs arbitrary bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Image,
    PlainText,
    Unsupported,
}

impl DocumentFormat {
    pub fn from_filename(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => DocumentFormat::Pdf,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tiff" => DocumentFormat::Image,
            "txt" | "csv" | "md" => DocumentFormat::PlainText,
            _ => DocumentFormat::Unsupported,
        }
    }

    /// Content-type based classification; None when the type says nothing
    /// useful and the file name should decide instead.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence {
            "application/pdf" => Some(DocumentFormat::Pdf),
            t if t.starts_with("image/") => Some(DocumentFormat::Image),
            t if t.starts_with("text/") => Some(DocumentFormat::PlainText),
            "application/octet-stream" | "" => None,
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Image => "image",
            DocumentFormat::PlainText => "plain-text",
            DocumentFormat::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("document could not be read: {0}")]
    CorruptInput(String),

    #[error("document contains no extractable text")]
    EmptyResult,

    #[error("text extraction is not implemented for {0} documents")]
    NotImplemented(&'static str),
}

/// Extract plain text from an uploaded payload.
///
/// "No text found" and "could not be read" stay distinct so callers can
/// tell the user something actionable; an unimplemented format is an
/// explicit failure, never an empty success.
pub fn extract(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::CorruptInput("empty payload".to_string()));
    }

    match format {
        DocumentFormat::PlainText => extract_plain_text(bytes),
        DocumentFormat::Pdf => pdf::extract_pdf(bytes),
        DocumentFormat::Image => Err(ExtractError::NotImplemented("image")),
        DocumentFormat::Unsupported => Err(ExtractError::UnsupportedFormat(
            "unrecognized file type".to_string(),
        )),
    }
}

fn extract_plain_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ExtractError::CorruptInput(format!("not valid UTF-8: {e}")))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::EmptyResult);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_filename_extension() {
        assert_eq!(DocumentFormat::from_filename("report.pdf"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_filename("RECEIPT.PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_filename("scan.jpeg"), DocumentFormat::Image);
        assert_eq!(DocumentFormat::from_filename("expenses.csv"), DocumentFormat::PlainText);
        assert_eq!(DocumentFormat::from_filename("notes.md"), DocumentFormat::PlainText);
        assert_eq!(DocumentFormat::from_filename("archive.zip"), DocumentFormat::Unsupported);
        assert_eq!(DocumentFormat::from_filename("no_extension"), DocumentFormat::Unsupported);
    }

    #[test]
    fn classifies_by_content_type_when_specific() {
        assert_eq!(
            DocumentFormat::from_content_type("application/pdf"),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::from_content_type("text/plain; charset=utf-8"),
            Some(DocumentFormat::PlainText)
        );
        assert_eq!(
            DocumentFormat::from_content_type("image/png"),
            Some(DocumentFormat::Image)
        );
        assert_eq!(DocumentFormat::from_content_type("application/octet-stream"), None);
        assert_eq!(DocumentFormat::from_content_type(""), None);
    }

    #[test]
    fn plain_text_decodes_utf8() {
        let text = extract("Lunch  $14.50\nTaxi  $22.00".as_bytes(), DocumentFormat::PlainText)
            .unwrap();
        assert!(text.contains("Taxi"));
    }

    #[test]
    fn plain_text_rejects_undecodable_bytes() {
        let result = extract(&[0xff, 0xfe, 0x00, 0x41], DocumentFormat::PlainText);
        assert!(matches!(result, Err(ExtractError::CorruptInput(_))));
    }

    #[test]
    fn whitespace_only_text_is_empty_result() {
        let result = extract(b"  \n\t  ", DocumentFormat::PlainText);
        assert!(matches!(result, Err(ExtractError::EmptyResult)));
    }

    #[test]
    fn empty_payload_is_corrupt() {
        let result = extract(b"", DocumentFormat::PlainText);
        assert!(matches!(result, Err(ExtractError::CorruptInput(_))));
    }

    #[test]
    fn image_is_explicitly_not_implemented() {
        let result = extract(b"\x89PNG\r\n\x1a\n", DocumentFormat::Image);
        assert!(matches!(result, Err(ExtractError::NotImplemented("image"))));
    }

    #[test]
    fn unsupported_format_fails_without_attempting() {
        let result = extract(b"PK\x03\x04", DocumentFormat::Unsupported);
        assert!(matches!(result, Err(ExtractError::UnsupportedFormat(_))));
    }
}
