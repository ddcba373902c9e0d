//! Document upload ingestion
//!
//! Validates the upload, extracts text via the document extractor, and
//! persists the result as a user message carrying the original bytes.

use axum::http::StatusCode;
use ledgerchat_core::models::Role;
use ledgerchat_ingest::DocumentFormat;
use serde_json::json;

use crate::http::{extract_error_message, store_error_message, ErrorResponse, HttpState};

/// File extensions rejected outright, whatever their declared content type.
const REJECTED_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "com", "scr", "vbs", "js"];

const MAX_FILENAME_LEN: usize = 255;

/// Upload sanity checks that need no database. Returns the rejection
/// message, if any.
pub fn validate_upload(filename: &str, size: usize, max_bytes: usize) -> Result<(), String> {
    if filename.is_empty() || filename.len() > MAX_FILENAME_LEN {
        return Err("invalid file name".to_string());
    }
    if size == 0 {
        return Err("uploaded file is empty".to_string());
    }
    if size > max_bytes {
        return Err(format!(
            "file exceeds the {} MB upload limit",
            max_bytes / (1024 * 1024)
        ));
    }
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if REJECTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(format!("files of type .{ext} are not accepted"));
    }
    Ok(())
}

/// Declared format: a specific content type wins, the file name decides
/// otherwise.
pub fn declared_format(filename: &str, content_type: Option<&str>) -> DocumentFormat {
    content_type
        .and_then(DocumentFormat::from_content_type)
        .unwrap_or_else(|| DocumentFormat::from_filename(filename))
}

/// Inner upload — validate, extract, persist. Returns (status, json body).
pub async fn upload_inner(
    state: &HttpState,
    session_id: &str,
    filename: &str,
    content_type: Option<&str>,
    bytes: &[u8],
) -> (StatusCode, serde_json::Value) {
    if let Err(reason) = validate_upload(filename, bytes.len(), state.config.upload.max_bytes) {
        let status = if reason.contains("upload limit") {
            StatusCode::PAYLOAD_TOO_LARGE
        } else {
            StatusCode::BAD_REQUEST
        };
        return (
            status,
            serde_json::to_value(ErrorResponse::new(reason)).unwrap_or_default(),
        );
    }

    let format = declared_format(filename, content_type);
    let text = match ledgerchat_ingest::extract(bytes, format) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                filename,
                format = format.as_str(),
                error = %e,
                "document extraction failed"
            );
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::to_value(ErrorResponse::new(extract_error_message(&e, filename)))
                    .unwrap_or_default(),
            );
        }
    };

    let persisted = async {
        let conversation = state
            .store
            .ensure_conversation(session_id, json!({}))
            .await?;
        let content = format!("Uploaded document \"{filename}\":\n\n{text}");
        let message = state
            .store
            .append_message(conversation.id, Role::User, &content, Some(bytes))
            .await?;
        Ok::<_, ledgerchat_core::store::StoreError>((conversation, message))
    }
    .await;

    match persisted {
        Ok((conversation, message)) => {
            tracing::info!(
                filename,
                format = format.as_str(),
                chars = text.len(),
                conversation_id = %conversation.id,
                message_id = message.id,
                "document ingested"
            );
            (
                StatusCode::OK,
                serde_json::json!({
                    "conversation_id": conversation.id,
                    "message_id": message.id,
                    "filename": filename,
                    "format": format.as_str(),
                    "characters": text.len(),
                }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, filename, "failed to persist uploaded document");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::to_value(ErrorResponse::new(store_error_message(&e)))
                    .unwrap_or_default(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_files() {
        assert!(validate_upload("receipt.pdf", 10_000, 1_000_000).is_ok());
        assert!(validate_upload("expenses.csv", 1, 1_000_000).is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized_files() {
        assert!(validate_upload("receipt.pdf", 0, 1_000_000).is_err());
        assert!(validate_upload("receipt.pdf", 2_000_000, 1_000_000).is_err());
    }

    #[test]
    fn rejects_bad_filenames() {
        assert!(validate_upload("", 100, 1_000_000).is_err());
        let long_name = format!("{}.pdf", "a".repeat(300));
        assert!(validate_upload(&long_name, 100, 1_000_000).is_err());
    }

    #[test]
    fn rejects_executable_extensions() {
        assert!(validate_upload("totally-a-receipt.exe", 100, 1_000_000).is_err());
        assert!(validate_upload("macro.VBS", 100, 1_000_000).is_err());
    }

    #[test]
    fn content_type_wins_over_filename_when_specific() {
        assert_eq!(
            declared_format("receipt.bin", Some("application/pdf")),
            DocumentFormat::Pdf
        );
        // generic content type defers to the file name
        assert_eq!(
            declared_format("receipt.pdf", Some("application/octet-stream")),
            DocumentFormat::Pdf
        );
        assert_eq!(declared_format("notes.txt", None), DocumentFormat::PlainText);
        assert_eq!(declared_format("archive.tar", None), DocumentFormat::Unsupported);
    }
}
