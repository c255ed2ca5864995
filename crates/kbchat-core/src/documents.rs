//! Knowledge base documents: listing records, upload checks, and the chat
//! notes that report upload results.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ChatError, Result};
use crate::state::{FileAttachment, UploadStatus};

pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "txt", "docx", "md", "csv"];
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// One entry of `GET /api/documents`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub upload_date: Option<String>,
}

/// Response of `POST /api/upload`
#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub message: String,
    pub filename: String,
    #[serde(default)]
    pub size_kb: u64,
    #[serde(default)]
    pub status: String,
}

/// Check extension and size before anything is sent. Returns the file name.
pub fn validate_upload(path: &Path, size: u64) -> Result<String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ChatError::InvalidUpload(format!("Not a file: {}", path.display())))?
        .to_string();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ChatError::InvalidUpload(format!(
            "Invalid file type: .{}. Allowed: PDF, TXT, DOCX, MD, CSV",
            extension
        )));
    }

    if size > MAX_UPLOAD_BYTES {
        return Err(ChatError::InvalidUpload("File too large. Max 50MB".to_string()));
    }

    Ok(file_name)
}

/// Chat note posted after a successful upload.
pub fn upload_success_note(file_name: &str) -> (String, FileAttachment) {
    (
        format!("Uploaded \"{}\" — added to your knowledge base", file_name),
        FileAttachment {
            name: file_name.to_string(),
            status: UploadStatus::Success,
        },
    )
}

/// Chat note posted after a failed upload.
pub fn upload_failure_note(file_name: &str, detail: &str) -> (String, FileAttachment) {
    (
        format!("Upload failed: {}", detail),
        FileAttachment {
            name: file_name.to_string(),
            status: UploadStatus::Error,
        },
    )
}

/// Prompt sent when a document is picked from the sidebar.
pub fn document_prompt(filename: &str) -> String {
    format!("Tell me about {}", filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_known_types() {
        assert_eq!(validate_upload(Path::new("/tmp/Report.PDF"), 10).unwrap(), "Report.PDF");
        assert_eq!(validate_upload(Path::new("data.csv"), 0).unwrap(), "data.csv");
    }

    #[test]
    fn test_validate_rejects_unknown_type() {
        let err = validate_upload(Path::new("photo.png"), 10).unwrap_err();
        assert_eq!(err.to_string(), "Invalid file type: .png. Allowed: PDF, TXT, DOCX, MD, CSV");

        assert!(validate_upload(Path::new("Makefile"), 10).is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_file() {
        assert!(validate_upload(Path::new("big.pdf"), MAX_UPLOAD_BYTES).is_ok());
        let err = validate_upload(Path::new("big.pdf"), MAX_UPLOAD_BYTES + 1).unwrap_err();
        assert_eq!(err.user_message("Upload failed"), "File too large. Max 50MB");
    }

    #[test]
    fn test_notes() {
        let (text, attachment) = upload_success_note("notes.md");
        assert_eq!(text, "Uploaded \"notes.md\" — added to your knowledge base");
        assert_eq!(attachment.status, UploadStatus::Success);

        let (text, attachment) = upload_failure_note("notes.md", "Upload failed");
        assert_eq!(text, "Upload failed: Upload failed");
        assert_eq!(attachment.status, UploadStatus::Error);

        assert_eq!(document_prompt("handbook.pdf"), "Tell me about handbook.pdf");
    }
}
