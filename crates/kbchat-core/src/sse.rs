//! Frame accumulator and parser for the chat event stream.
//!
//! The backend writes `data: <payload>\n\n` frames onto a chunked response
//! body. Chunk boundaries are arbitrary, so bytes are buffered until a blank
//! line closes a frame. Frames are decoded only once complete, which also keeps
//! multi-byte characters intact when a chunk splits them.

use serde::Deserialize;

use crate::state::Citation;

pub const FRAME_DELIMITER: &[u8] = b"\n\n";
pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One parsed unit of the chat stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    ContentDelta(String),
    CitationsFinal(Vec<Citation>),
    Done,
    /// A `data:` frame whose payload was not a usable JSON object.
    Malformed(String),
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    citations: Option<Vec<Citation>>,
}

/// Parse a single complete frame (without its trailing delimiter).
///
/// Frames without the `data: ` prefix are protocol noise and yield nothing.
/// A payload carrying both `content` and `citations` yields both, content first.
pub fn parse_frame(frame: &str) -> Vec<StreamEvent> {
    let Some(payload) = frame.strip_prefix(DATA_PREFIX) else {
        return Vec::new();
    };

    if payload.trim() == DONE_SENTINEL {
        return vec![StreamEvent::Done];
    }

    let parsed: Payload = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(_) => return vec![StreamEvent::Malformed(payload.to_string())],
    };

    let mut events = Vec::with_capacity(2);
    if let Some(content) = parsed.content.filter(|c| !c.is_empty()) {
        events.push(StreamEvent::ContentDelta(content));
    }
    if let Some(citations) = parsed.citations {
        events.push(StreamEvent::CitationsFinal(citations));
    }
    events
}

/// Stateful tokenizer over the raw body bytes.
///
/// `buffer` only ever holds the trailing partial frame between calls.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = find_delimiter(&self.buffer[start..]) {
            let end = start + pos;
            frames.push(String::from_utf8_lossy(&self.buffer[start..end]).into_owned());
            start = end + FRAME_DELIMITER.len();
        }
        self.buffer.drain(..start);
        frames
    }

    /// Take whatever partial frame is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}
