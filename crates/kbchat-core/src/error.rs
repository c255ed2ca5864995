use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised by the backend client and configuration layer.
///
/// The streaming consumer never hands these to its caller; it logs them and
/// reports a failed stream instead.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {detail}")]
    Status { status: StatusCode, detail: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidUpload(String),

    #[error("config error: {0}")]
    Config(String),
}

impl ChatError {
    /// Text suitable for a status line or chat note.
    ///
    /// Backend `detail` messages are passed through verbatim, everything else
    /// collapses to the supplied fallback.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ChatError::Status { detail, .. } if !detail.is_empty() => detail.clone(),
            ChatError::InvalidUpload(msg) => msg.clone(),
            _ => fallback.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
