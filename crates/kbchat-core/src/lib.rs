pub mod client;
pub mod config;
pub mod consumer;
pub mod documents;
pub mod error;
pub mod sse;
pub mod state;

// Re-export main types for convenience
pub use client::{ChatClient, ChatRequest};
pub use config::{Config, Theme};
pub use consumer::{
    Cancellable, ChannelSink, EventSink, StreamControl, StreamHandle, StreamState, StreamUpdate,
    StreamingResponseConsumer,
};
pub use documents::{Document, UploadReceipt};
pub use error::ChatError;
pub use sse::{FrameDecoder, StreamEvent};
pub use state::{
    ChatMessage, ChatRole, Citation, Conversation, FileAttachment, UploadStatus,
    STREAM_FAILED_MESSAGE,
};
