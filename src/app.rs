use kbchat_core::documents::{document_prompt, upload_failure_note, upload_success_note};
use kbchat_core::{
    Cancellable, ChannelSink, ChatClient, ChatRequest, ChatRole, Config, Conversation, Document,
    StreamHandle, StreamUpdate, StreamingResponseConsumer, Theme, UploadReceipt,
};
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
    UploadPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Sidebar,
    Transcript,
    Composer,
}

/// One row of the sidebar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebarEntry {
    Chat,
    Documents,
    Document(usize),
    Theme,
}

/// Upload indicator shown next to the composer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadIndicator {
    Uploading,
    Success,
    Error,
}

pub struct ActiveStream {
    pub message_id: Uuid,
    pub handle: StreamHandle,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,
    pub theme: Theme,
    pub status: Option<String>,

    // Sidebar
    pub sidebar_state: ListState,
    pub show_documents: bool,
    pub documents: Vec<Document>,
    pub documents_loading: bool,
    pub selected_docs: BTreeSet<String>,
    pub pending_delete: Option<i64>,

    // Conversation
    pub conversation: Conversation,
    pub active_stream: Option<ActiveStream>,
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Composer
    pub composer_input: String,
    pub composer_cursor: usize, // cursor position in composer_input (chars)
    pub upload_input: String,
    pub upload_indicator: Option<(UploadIndicator, Instant)>,

    // Panel areas for mouse hit-testing (updated during render)
    pub sidebar_area: Option<Rect>,
    pub transcript_area: Option<Rect>,
    pub composer_area: Option<Rect>,

    // Backend
    pub config: Config,
    pub client: ChatClient,
    pub consumer: StreamingResponseConsumer,
    events: mpsc::UnboundedSender<AppEvent>,
    stream_events: mpsc::UnboundedSender<(Uuid, StreamUpdate)>,
}

impl App {
    pub fn new(
        config: Config,
        events: mpsc::UnboundedSender<AppEvent>,
        stream_events: mpsc::UnboundedSender<(Uuid, StreamUpdate)>,
    ) -> anyhow::Result<Self> {
        let client = ChatClient::new(&config.api_url)?;
        let consumer = StreamingResponseConsumer::new(client.clone());

        let mut sidebar_state = ListState::default();
        sidebar_state.select(Some(0));

        Ok(Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            focus: FocusPane::Composer,
            theme: config.theme,
            status: None,

            sidebar_state,
            show_documents: false,
            documents: Vec::new(),
            documents_loading: false,
            selected_docs: BTreeSet::new(),
            pending_delete: None,

            conversation: Conversation::new(),
            active_stream: None,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,

            composer_input: String::new(),
            composer_cursor: 0,
            upload_input: String::new(),
            upload_indicator: None,

            sidebar_area: None,
            transcript_area: None,
            composer_area: None,

            config,
            client,
            consumer,
            events,
            stream_events,
        })
    }

    pub fn is_streaming(&self) -> bool {
        self.active_stream.is_some()
    }

    // Composer

    /// Send the composer text. Blank input is ignored.
    pub fn submit_composer(&mut self) {
        let text = self.composer_input.trim().to_string();
        if text.is_empty() {
            return;
        }
        if self.is_streaming() {
            self.status = Some("Wait for the current reply or press Esc to stop it".to_string());
            return;
        }

        self.composer_input.clear();
        self.composer_cursor = 0;
        self.send_prompt(text);
    }

    /// Post a user message and stream the assistant reply into a new message.
    pub fn send_prompt(&mut self, text: String) {
        if self.is_streaming() {
            return;
        }

        self.conversation.push_user(text.clone(), None);
        let message_id = self.conversation.start_assistant();

        let request = ChatRequest::new(&text)
            .with_documents(self.selected_docs.iter().cloned().collect());
        let sink = ChannelSink::new(message_id, self.stream_events.clone());
        let handle = self.consumer.consume_request(request, sink);

        info!(%message_id, "prompt sent");
        self.active_stream = Some(ActiveStream { message_id, handle });
        self.status = None;
        self.scroll_chat_to_bottom();
    }

    /// Apply a stream update coming back from a sink.
    pub fn apply_stream_update(&mut self, message_id: Uuid, update: StreamUpdate) {
        let terminal = matches!(update, StreamUpdate::Ended | StreamUpdate::Failed);
        self.conversation.apply(message_id, update);

        if terminal
            && self
                .active_stream
                .as_ref()
                .is_some_and(|active| active.message_id == message_id)
        {
            self.active_stream = None;
        }
        self.scroll_chat_to_bottom();
    }

    /// Stop the in-flight reply, keeping whatever text already arrived.
    pub fn cancel_stream(&mut self) {
        if let Some(active) = self.active_stream.take() {
            active.handle.cancel();
            self.conversation.apply(active.message_id, StreamUpdate::Cancelled);
            info!(message_id = %active.message_id, "stream cancelled by user");
            self.status = Some("Response stopped".to_string());
        }
    }

    // Sidebar

    pub fn sidebar_entries(&self) -> Vec<SidebarEntry> {
        let mut entries = vec![SidebarEntry::Chat, SidebarEntry::Documents];
        if self.show_documents {
            entries.extend((0..self.documents.len()).map(SidebarEntry::Document));
        }
        entries.push(SidebarEntry::Theme);
        entries
    }

    pub fn selected_entry(&self) -> Option<SidebarEntry> {
        let entries = self.sidebar_entries();
        self.sidebar_state.selected().and_then(|i| entries.get(i).copied())
    }

    pub fn selected_document(&self) -> Option<&Document> {
        match self.selected_entry() {
            Some(SidebarEntry::Document(i)) => self.documents.get(i),
            _ => None,
        }
    }

    pub fn sidebar_down(&mut self) {
        let len = self.sidebar_entries().len();
        if len > 0 {
            let i = self.sidebar_state.selected().unwrap_or(0);
            self.sidebar_state.select(Some((i + 1).min(len - 1)));
        }
        self.pending_delete = None;
    }

    pub fn sidebar_up(&mut self) {
        let i = self.sidebar_state.selected().unwrap_or(0);
        self.sidebar_state.select(Some(i.saturating_sub(1)));
        self.pending_delete = None;
    }

    pub fn sidebar_activate(&mut self) {
        match self.selected_entry() {
            Some(SidebarEntry::Chat) => {
                self.focus = FocusPane::Composer;
                self.input_mode = InputMode::Editing;
            }
            Some(SidebarEntry::Documents) => self.toggle_documents(),
            Some(SidebarEntry::Document(i)) => {
                if let Some(doc) = self.documents.get(i) {
                    let prompt = document_prompt(&doc.filename);
                    self.send_prompt(prompt);
                }
            }
            Some(SidebarEntry::Theme) => self.toggle_theme(),
            None => {}
        }
    }

    pub fn toggle_documents(&mut self) {
        self.show_documents = !self.show_documents;
        if self.show_documents && self.documents.is_empty() {
            self.refresh_documents();
        }
        self.clamp_sidebar_selection();
    }

    /// Add or remove the highlighted document from the retrieval filter.
    pub fn toggle_document_selection(&mut self) {
        if let Some(name) = self.selected_document().map(|d| d.filename.clone()) {
            if !self.selected_docs.remove(&name) {
                self.selected_docs.insert(name);
            }
        }
    }

    pub fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
        self.config.theme = self.theme;
        if let Err(e) = self.config.save() {
            warn!(error = %e, "failed to save theme");
        }
    }

    fn clamp_sidebar_selection(&mut self) {
        let len = self.sidebar_entries().len();
        if let Some(i) = self.sidebar_state.selected() {
            if i >= len {
                self.sidebar_state.select(Some(len.saturating_sub(1)));
            }
        }
    }

    // Documents

    pub fn refresh_documents(&mut self) {
        self.documents_loading = true;
        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = client.list_documents().await.map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::DocumentsLoaded(result));
        });
    }

    pub fn documents_loaded(&mut self, result: Result<Vec<Document>, String>) {
        self.documents_loading = false;
        match result {
            Ok(documents) => {
                // Drop selections for documents that no longer exist
                self.selected_docs
                    .retain(|name| documents.iter().any(|d| &d.filename == name));
                self.documents = documents;
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch documents");
                self.status = Some("Failed to fetch documents".to_string());
            }
        }
        self.clamp_sidebar_selection();
    }

    /// First press arms the delete, a second press on the same document sends it.
    pub fn request_delete_selected(&mut self) {
        let Some(doc) = self.selected_document().cloned() else {
            return;
        };

        if self.pending_delete == Some(doc.id) {
            self.pending_delete = None;
            let client = self.client.clone();
            let tx = self.events.clone();
            tokio::spawn(async move {
                let result = client.delete_document(doc.id).await.map_err(|e| e.to_string());
                let _ = tx.send(AppEvent::DocumentDeleted { id: doc.id, result });
            });
        } else {
            self.pending_delete = Some(doc.id);
            self.status = Some(format!(
                "Delete {}? This cannot be undone. Press d again to confirm",
                doc.filename
            ));
        }
    }

    pub fn document_deleted(&mut self, id: i64, result: Result<(), String>) {
        match result {
            Ok(()) => {
                if let Some(pos) = self.documents.iter().position(|d| d.id == id) {
                    let removed = self.documents.remove(pos);
                    self.selected_docs.remove(&removed.filename);
                    self.status = Some(format!("Deleted {}", removed.filename));
                }
                self.clamp_sidebar_selection();
            }
            Err(e) => {
                warn!(document_id = id, error = %e, "failed to delete document");
                self.status = Some("Failed to delete document".to_string());
            }
        }
    }

    // Upload

    pub fn open_upload_prompt(&mut self) {
        self.upload_input.clear();
        self.input_mode = InputMode::UploadPath;
    }

    pub fn submit_upload(&mut self) {
        let raw = self.upload_input.trim().to_string();
        self.input_mode = InputMode::Normal;
        if raw.is_empty() {
            return;
        }

        let path = expand_home(&raw);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| raw.clone());

        self.upload_indicator = Some((UploadIndicator::Uploading, Instant::now()));
        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = client
                .upload_document(&path)
                .await
                .map_err(|e| e.user_message("Upload failed"));
            let _ = tx.send(AppEvent::UploadFinished { file_name, result });
        });
    }

    /// Report the upload in the transcript. Upload notes never get a reply.
    pub fn upload_finished(&mut self, file_name: String, result: Result<UploadReceipt, String>) {
        let (text, attachment, indicator) = match result {
            Ok(receipt) => {
                info!(file = %file_name, stored_as = %receipt.filename, "upload accepted");
                let (text, attachment) = upload_success_note(&file_name);
                self.refresh_documents();
                (text, attachment, UploadIndicator::Success)
            }
            Err(detail) => {
                warn!(file = %file_name, error = %detail, "upload failed");
                let (text, attachment) = upload_failure_note(&file_name, &detail);
                (text, attachment, UploadIndicator::Error)
            }
        };

        self.conversation.push_user(text, Some(attachment));
        self.upload_indicator = Some((indicator, Instant::now()));
        self.scroll_chat_to_bottom();
    }

    /// Tick animation frame and expire the upload indicator
    pub fn tick(&mut self) {
        if self.conversation.is_streaming() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }

        if let Some((indicator, since)) = self.upload_indicator {
            let keep_for = match indicator {
                UploadIndicator::Uploading => None,
                UploadIndicator::Success => Some(Duration::from_secs(3)),
                UploadIndicator::Error => Some(Duration::from_secs(5)),
            };
            if keep_for.is_some_and(|d| since.elapsed() >= d) {
                self.upload_indicator = None;
            }
        }
    }

    // Scrolling

    pub fn scroll_chat_down(&mut self, lines: u16) {
        let max_scroll = self.total_chat_lines().saturating_sub(self.visible_chat_height());
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max_scroll);
    }

    pub fn scroll_chat_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    /// Scroll chat to bottom so the newest text is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        let total_lines = self.total_chat_lines();
        let visible_height = self.visible_chat_height();
        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }

    fn visible_chat_height(&self) -> u16 {
        if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        }
    }

    /// Rendered line count of the transcript, mirroring `ui::message_lines`.
    fn total_chat_lines(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: usize = 0;
        for msg in self.conversation.messages() {
            total_lines += 1; // Role line ("You" or "Assistant")
            let content = if msg.content.is_empty() { "..." } else { msg.content.as_str() };
            for line in content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                total_lines += char_count / wrap_width + 1;
            }
            if msg.role == ChatRole::Assistant && msg.is_streaming {
                total_lines += 1;
            }
            if msg.attachment.is_some() {
                total_lines += 1;
            }
            if !msg.citations.is_empty() {
                total_lines += 1 + msg.citations.len(); // "Sources:" + one per citation
            }
            total_lines += 1; // Blank line after message
        }

        total_lines.min(u16::MAX as usize) as u16
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbchat_core::{Citation, UploadStatus, STREAM_FAILED_MESSAGE};

    fn test_app() -> (App, mpsc::UnboundedReceiver<AppEvent>, mpsc::UnboundedReceiver<(Uuid, StreamUpdate)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let config = Config {
            api_url: "http://127.0.0.1:9".to_string(),
            ..Config::default()
        };
        let app = App::new(config, tx, stream_tx).unwrap();
        (app, rx, stream_rx)
    }

    fn doc(id: i64, filename: &str) -> Document {
        Document {
            id,
            filename: filename.to_string(),
            page_count: Some(1),
            upload_date: None,
        }
    }

    #[tokio::test]
    async fn test_blank_composer_is_not_sent() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.composer_input = "   \n ".to_string();
        app.submit_composer();
        assert!(app.conversation.is_empty());
        assert!(!app.is_streaming());
    }

    #[tokio::test]
    async fn test_submit_trims_and_starts_stream() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.composer_input = "  what is in the handbook?  ".to_string();
        app.composer_cursor = 5;
        app.submit_composer();

        let messages = app.conversation.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "what is in the handbook?");
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert!(messages[1].is_streaming);
        assert!(app.is_streaming());
        assert!(app.composer_input.is_empty());
        assert_eq!(app.composer_cursor, 0);
        app.cancel_stream();
    }

    #[tokio::test]
    async fn test_stream_updates_fill_active_message() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.send_prompt("hello".to_string());
        let id = app.active_stream.as_ref().unwrap().message_id;
        // Stop the real request; updates below stand in for the sink.
        app.active_stream.as_ref().unwrap().handle.cancel();

        app.apply_stream_update(id, StreamUpdate::ContentAppended("Hel".into()));
        app.apply_stream_update(id, StreamUpdate::ContentAppended("lo".into()));
        app.apply_stream_update(id, StreamUpdate::CitationsReady(vec![Citation::new("doc.pdf", 3)]));
        assert!(app.is_streaming());
        app.apply_stream_update(id, StreamUpdate::Ended);

        let message = app.conversation.get(id).unwrap();
        assert_eq!(message.content, "Hello");
        assert_eq!(message.citations, vec![Citation::new("doc.pdf", 3)]);
        assert!(!message.is_streaming);
        assert!(!app.is_streaming());
    }

    #[tokio::test]
    async fn test_failed_stream_shows_apology() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.send_prompt("hello".to_string());
        let id = app.active_stream.as_ref().unwrap().message_id;
        app.active_stream.as_ref().unwrap().handle.cancel();

        app.apply_stream_update(id, StreamUpdate::ContentAppended("partial".into()));
        app.apply_stream_update(id, StreamUpdate::Failed);

        assert_eq!(app.conversation.get(id).unwrap().content, STREAM_FAILED_MESSAGE);
        assert!(!app.is_streaming());
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_reply() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.send_prompt("hello".to_string());
        let id = app.active_stream.as_ref().unwrap().message_id;
        app.apply_stream_update(id, StreamUpdate::ContentAppended("par".into()));

        app.cancel_stream();
        app.apply_stream_update(id, StreamUpdate::ContentAppended("tial".into()));

        let message = app.conversation.get(id).unwrap();
        assert_eq!(message.content, "par");
        assert!(!message.is_streaming);
        assert!(!app.is_streaming());
    }

    #[tokio::test]
    async fn test_second_prompt_rejected_while_streaming() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.send_prompt("first".to_string());
        app.composer_input = "second".to_string();
        app.submit_composer();

        assert_eq!(app.conversation.messages().len(), 2);
        assert_eq!(app.composer_input, "second");
        assert!(app.status.is_some());
        app.cancel_stream();
    }

    #[tokio::test]
    async fn test_upload_notes_do_not_start_stream() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.upload_finished(
            "notes.md".to_string(),
            Err("File too large. Max 50MB".to_string()),
        );

        let messages = app.conversation.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "Upload failed: File too large. Max 50MB");
        assert_eq!(messages[0].attachment.as_ref().unwrap().status, UploadStatus::Error);
        assert!(!app.is_streaming());
        assert!(matches!(app.upload_indicator, Some((UploadIndicator::Error, _))));
    }

    #[tokio::test]
    async fn test_sidebar_entries_follow_document_toggle() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.documents = vec![doc(1, "a.pdf"), doc(2, "b.txt")];
        assert_eq!(
            app.sidebar_entries(),
            vec![SidebarEntry::Chat, SidebarEntry::Documents, SidebarEntry::Theme]
        );

        app.show_documents = true;
        assert_eq!(
            app.sidebar_entries(),
            vec![
                SidebarEntry::Chat,
                SidebarEntry::Documents,
                SidebarEntry::Document(0),
                SidebarEntry::Document(1),
                SidebarEntry::Theme,
            ]
        );

        app.sidebar_state.select(Some(4));
        app.show_documents = false;
        app.clamp_sidebar_selection();
        assert_eq!(app.sidebar_state.selected(), Some(2));
    }

    #[tokio::test]
    async fn test_selecting_document_sends_prompt() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.documents = vec![doc(1, "handbook.pdf")];
        app.show_documents = true;
        app.sidebar_state.select(Some(2));

        app.sidebar_activate();
        assert_eq!(app.conversation.messages()[0].content, "Tell me about handbook.pdf");
        assert!(app.is_streaming());
        app.cancel_stream();
    }

    #[tokio::test]
    async fn test_delete_needs_confirmation_and_updates_list() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.documents = vec![doc(1, "a.pdf"), doc(2, "b.txt")];
        app.selected_docs.insert("a.pdf".to_string());
        app.show_documents = true;
        app.sidebar_state.select(Some(2));

        app.request_delete_selected();
        assert_eq!(app.pending_delete, Some(1));

        app.document_deleted(1, Ok(()));
        assert_eq!(app.documents, vec![doc(2, "b.txt")]);
        assert!(app.selected_docs.is_empty());

        app.document_deleted(2, Err("500".to_string()));
        assert_eq!(app.documents.len(), 1);
        assert_eq!(app.status.as_deref(), Some("Failed to delete document"));
    }

    #[tokio::test]
    async fn test_toggle_document_selection() {
        let (mut app, _rx, _stream_rx) = test_app();
        app.documents = vec![doc(1, "a.pdf")];
        app.show_documents = true;
        app.sidebar_state.select(Some(2));

        app.toggle_document_selection();
        assert!(app.selected_docs.contains("a.pdf"));
        app.toggle_document_selection();
        assert!(app.selected_docs.is_empty());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/tmp/a.pdf"), PathBuf::from("/tmp/a.pdf"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/a.pdf"), home.join("a.pdf"));
        }
    }
}
