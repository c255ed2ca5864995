//! Streaming response consumer
//!
//! Opens a chat request, decodes the event stream incrementally and forwards
//! ordered updates to an [`EventSink`]. Each call to
//! [`StreamingResponseConsumer::consume`] owns its own decoder and control
//! block; nothing is shared between concurrent streams.

use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ChatClient, ChatRequest};
use crate::sse::{parse_frame, FrameDecoder, StreamEvent};
use crate::state::Citation;

/// Receives stream events in arrival order.
///
/// Implementations must not call back into the [`StreamHandle`] that feeds
/// them; emissions run under the stream's control lock.
pub trait EventSink: Send + 'static {
    fn on_content_appended(&mut self, text: String);
    fn on_citations_ready(&mut self, citations: Vec<Citation>);
    fn on_stream_ended(&mut self);
    fn on_stream_failed(&mut self);
}

/// Something that can stop an in-flight stream.
pub trait Cancellable {
    fn cancel(&self);
}

/// Lifecycle of one stream. The three terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Completed | StreamState::Failed | StreamState::Cancelled
        )
    }
}

/// Sink events as plain data, for sinks that forward across a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    ContentAppended(String),
    CitationsReady(Vec<Citation>),
    Ended,
    Failed,
    /// Produced by the UI when it cancels a stream, never by the consumer.
    Cancelled,
}

/// Forwards every event, tagged with the target message id, over a channel.
pub struct ChannelSink {
    message_id: Uuid,
    tx: mpsc::UnboundedSender<(Uuid, StreamUpdate)>,
}

impl ChannelSink {
    pub fn new(message_id: Uuid, tx: mpsc::UnboundedSender<(Uuid, StreamUpdate)>) -> Self {
        Self { message_id, tx }
    }

    fn send(&self, update: StreamUpdate) {
        // Receiver gone means the UI shut down; nothing left to render into.
        let _ = self.tx.send((self.message_id, update));
    }
}

impl EventSink for ChannelSink {
    fn on_content_appended(&mut self, text: String) {
        self.send(StreamUpdate::ContentAppended(text));
    }

    fn on_citations_ready(&mut self, citations: Vec<Citation>) {
        self.send(StreamUpdate::CitationsReady(citations));
    }

    fn on_stream_ended(&mut self) {
        self.send(StreamUpdate::Ended);
    }

    fn on_stream_failed(&mut self) {
        self.send(StreamUpdate::Failed);
    }
}

/// Shared state of one stream: its lifecycle state plus a wake-up token.
///
/// Sink emissions happen while holding the state lock and only in
/// `Streaming`, so once [`StreamControl::cancel`] returns no further event can
/// reach the sink.
#[derive(Debug, Clone)]
pub struct StreamControl {
    state: Arc<Mutex<StreamState>>,
    token: CancellationToken,
}

impl Default for StreamControl {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamControl {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamState::Idle)),
            token: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> StreamState {
        *self.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        let mut state = self.lock();
        if !state.is_terminal() {
            *state = StreamState::Cancelled;
        }
        self.token.cancel();
    }

    /// `Idle -> Streaming`. Returns `false` if the stream was already cancelled.
    fn begin(&self) -> bool {
        let mut state = self.lock();
        if *state == StreamState::Idle {
            *state = StreamState::Streaming;
            true
        } else {
            false
        }
    }

    /// Run `emit` only while streaming. Returns whether it ran.
    fn emit(&self, emit: impl FnOnce()) -> bool {
        let state = self.lock();
        if *state != StreamState::Streaming {
            return false;
        }
        emit();
        true
    }

    /// Run `emit` and move to `terminal` in one step, if still streaming.
    fn finish(&self, terminal: StreamState, emit: impl FnOnce()) -> StreamState {
        let mut state = self.lock();
        if *state == StreamState::Streaming {
            emit();
            *state = terminal;
        }
        *state
    }
}

/// Handle to a running stream, returned by [`StreamingResponseConsumer::consume`].
#[derive(Debug)]
pub struct StreamHandle {
    control: StreamControl,
    task: JoinHandle<StreamState>,
}

impl StreamHandle {
    pub fn state(&self) -> StreamState {
        self.control.state()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the read loop to exit and return the final state.
    pub async fn join(self) -> StreamState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "stream task aborted");
                self.control.state()
            }
        }
    }
}

impl Cancellable for StreamHandle {
    fn cancel(&self) {
        self.control.cancel();
    }
}

#[derive(Clone)]
pub struct StreamingResponseConsumer {
    client: ChatClient,
}

impl StreamingResponseConsumer {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    /// Send `prompt` to the chat endpoint and stream the reply into `sink`.
    ///
    /// The prompt is expected to be non-empty; the composer filters blanks.
    pub fn consume<S: EventSink>(&self, prompt: &str, sink: S) -> StreamHandle {
        self.consume_request(ChatRequest::new(prompt), sink)
    }

    pub fn consume_request<S: EventSink>(&self, request: ChatRequest, sink: S) -> StreamHandle {
        let control = StreamControl::new();
        let client = self.client.clone();
        let task_control = control.clone();

        let task = tokio::spawn(async move {
            let mut sink = sink;
            run(client, request, &mut sink, task_control).await
        });

        StreamHandle { control, task }
    }
}

async fn run<S: EventSink>(
    client: ChatClient,
    request: ChatRequest,
    sink: &mut S,
    control: StreamControl,
) -> StreamState {
    if !control.begin() {
        return control.state();
    }
    info!(base_url = %client.base_url(), prompt_len = request.message.len(), "opening chat stream");

    let response = tokio::select! {
        biased;
        _ = control.token.cancelled() => {
            info!("chat stream cancelled before response");
            return control.state();
        }
        response = client.open_chat_stream(&request) => response,
    };

    match response {
        Ok(response) => drive(response.bytes_stream(), sink, &control).await,
        Err(e) => {
            warn!(error = %e, "chat request failed");
            control.finish(StreamState::Failed, || sink.on_stream_failed())
        }
    }
}

/// Read `stream` to its end, dispatching events to `sink`.
///
/// Exposed so the read loop can be driven from any byte stream, not only an
/// HTTP body. The stream is dropped, and with it the connection, as soon as
/// the loop exits.
pub async fn drive<St, B, E, S>(stream: St, sink: &mut S, control: &StreamControl) -> StreamState
where
    St: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    S: EventSink,
{
    match control.state() {
        StreamState::Idle => {
            if !control.begin() {
                return control.state();
            }
        }
        StreamState::Streaming => {}
        terminal => return terminal,
    }

    let mut stream = pin!(stream);
    let mut decoder = FrameDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = control.token.cancelled() => {
                info!("chat stream cancelled");
                return control.state();
            }
            next = stream.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                warn!(error = %e, "chat stream read failed");
                return control.finish(StreamState::Failed, || sink.on_stream_failed());
            }
            None => break,
        };

        if control.is_cancelled() {
            return control.state();
        }

        for frame in decoder.push(chunk.as_ref()) {
            if let Some(state) = dispatch(&frame, sink, control) {
                return state;
            }
        }
    }

    // Transport closed without the sentinel. Whatever is left in the buffer
    // is treated as a final frame.
    debug!(pending = decoder.pending(), "chat stream closed by transport");
    if let Some(frame) = decoder.finish() {
        if let Some(state) = dispatch(&frame, sink, control) {
            return state;
        }
    }

    control.finish(StreamState::Completed, || sink.on_stream_ended())
}

/// Returns `Some` once the stream reached a terminal state.
fn dispatch<S: EventSink>(frame: &str, sink: &mut S, control: &StreamControl) -> Option<StreamState> {
    for event in parse_frame(frame) {
        let delivered = match event {
            StreamEvent::ContentDelta(text) => control.emit(|| sink.on_content_appended(text)),
            StreamEvent::CitationsFinal(citations) => {
                debug!(count = citations.len(), "citations received");
                control.emit(|| sink.on_citations_ready(citations))
            }
            StreamEvent::Done => {
                info!("chat stream completed");
                return Some(control.finish(StreamState::Completed, || sink.on_stream_ended()));
            }
            StreamEvent::Malformed(raw) => {
                debug!(payload = %raw, "dropping malformed frame");
                true
            }
        };
        if !delivered {
            return Some(control.state());
        }
    }
    None
}
