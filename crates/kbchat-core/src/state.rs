//! UI-agnostic chat state
//!
//! The message list lives here so that any front end can feed stream updates
//! into it without knowing how they were produced.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::consumer::StreamUpdate;

/// Shown in place of an assistant reply when the stream fails.
pub const STREAM_FAILED_MESSAGE: &str = "Sorry, I couldn't respond right now.";

/// A source reference attached to an assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    /// `None` when the backend could not determine a page (it sends `"?"`).
    #[serde(default, deserialize_with = "lenient_page")]
    pub page: Option<u32>,
}

impl Citation {
    pub fn new(source: impl Into<String>, page: u32) -> Self {
        Self {
            source: source.into(),
            page: Some(page),
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "{} • Page {}", self.source, page),
            None => write!(f, "{} • Page ?", self.source),
        }
    }
}

fn lenient_page<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Page {
        Number(u32),
        Text(String),
        // Negative, fractional or out-of-range numbers, and anything else
        Other(serde_json::Value),
    }

    Ok(match Option::<Page>::deserialize(deserializer)? {
        Some(Page::Number(n)) => Some(n),
        Some(Page::Text(s)) => s.trim().parse().ok(),
        Some(Page::Other(_)) | None => None,
    })
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Success,
    Error,
}

/// Upload outcome shown under a user-side upload note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub name: String,
    pub status: UploadStatus,
}

/// A chat message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub citations: Vec<Citation>,
    /// Whether a citations batch was applied, even an empty one.
    #[serde(default)]
    pub citations_set: bool,
    pub is_streaming: bool,
    pub attachment: Option<FileAttachment>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: ChatRole::User,
            content: content.into(),
            citations: Vec::new(),
            citations_set: false,
            is_streaming: false,
            attachment: None,
        }
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: ChatRole::Assistant,
            content: String::new(),
            citations: Vec::new(),
            citations_set: false,
            is_streaming: true,
            attachment: None,
        }
    }
}

/// Ordered message list. Messages are only mutated in place by id.
#[derive(Debug, Default, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn push_user(&mut self, text: impl Into<String>, attachment: Option<FileAttachment>) -> Uuid {
        let mut message = ChatMessage::user(text);
        message.attachment = attachment;
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Append an empty assistant message that will be filled by a stream.
    pub fn start_assistant(&mut self) -> Uuid {
        let message = ChatMessage::assistant_placeholder();
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Whether any assistant reply is still being streamed.
    pub fn is_streaming(&self) -> bool {
        self.messages.iter().any(|m| m.is_streaming)
    }

    /// Apply a stream update to the message with the given id.
    ///
    /// Returns `false` when the update was dropped, either because the id is
    /// unknown or the message already left the streaming state.
    pub fn apply(&mut self, id: Uuid, update: StreamUpdate) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        if !message.is_streaming {
            return false;
        }

        match update {
            StreamUpdate::ContentAppended(text) => message.content.push_str(&text),
            StreamUpdate::CitationsReady(citations) => {
                // Set at most once; a repeated batch is ignored here.
                if message.citations_set {
                    return false;
                }
                message.citations = citations;
                message.citations_set = true;
            }
            StreamUpdate::Ended | StreamUpdate::Cancelled => message.is_streaming = false,
            StreamUpdate::Failed => {
                message.content = STREAM_FAILED_MESSAGE.to_string();
                message.is_streaming = false;
            }
        }
        true
    }
}
