//! Streaming session: drives a transport byte stream through framing,
//! record decoding, accumulation, and typed event emission.

pub mod events;
pub mod tee;

use crate::accumulator::accumulate;
use crate::error::{StreamError, TransportError};
use crate::finalize::finalize_completion;
use crate::framer::{LineDecoder, Lines};
use crate::options::RequestOptions;
use crate::snapshot::{ChoiceSnapshot, CompletionSnapshot, ToolCallSnapshot};
use crate::sse::{is_done_data, EventRecord, SseRecordDecoder};
use crate::types::{ChatCompletion, ChatCompletionChunk, ChatMessage, Usage};
use bytes::Bytes;
use events::StreamEvent;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tee::StreamCursor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// How the transport bytes are framed into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportMode {
    /// `data:` records separated by blank lines, terminated by `[DONE]`.
    Sse,
    /// One chunk JSON document per line (replay format).
    NdJson,
}

/// Handle for unregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type ListenerFn = Arc<Mutex<dyn FnMut(&StreamEvent) + Send>>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(u64, ListenerFn)>,
}

/// Per-choice bookkeeping for at-most-once `*Done` events.
#[derive(Debug, Default)]
struct ChoiceEventState {
    content_done: bool,
    refusal_done: bool,
    logprobs_content_done: bool,
    logprobs_refusal_done: bool,
    /// Tool-call slot currently receiving argument fragments; a delta for a
    /// different slot flushes this one's done event first.
    current_tool: Option<usize>,
    tools_done: Vec<bool>,
}

impl ChoiceEventState {
    fn tool_done(&self, index: usize) -> bool {
        self.tools_done.get(index).copied().unwrap_or(false)
    }

    fn mark_tool_done(&mut self, index: usize) {
        if self.tools_done.len() <= index {
            self.tools_done.resize(index + 1, false);
        }
        self.tools_done[index] = true;
    }
}

/// A streaming chat completion in flight.
///
/// Pull events with [`events`](Self::events) or [`next_event`](Self::next_event),
/// subscribe callbacks with [`on`](Self::on), or skip straight to the
/// outcome with [`final_chat_completion`](Self::final_chat_completion) and
/// friends. Nothing is read from the transport until one of those runs.
pub struct ChatCompletionStream {
    transport: BoxStream<'static, Result<Bytes, TransportError>>,
    mode: TransportMode,
    framer: LineDecoder,
    sse: SseRecordDecoder,
    options: RequestOptions,
    cancel: CancellationToken,
    snapshot: Option<CompletionSnapshot>,
    choice_states: Vec<ChoiceEventState>,
    completions: Vec<ChatCompletion>,
    total_usage: Usage,
    pending: VecDeque<StreamEvent>,
    listeners: Arc<Mutex<ListenerTable>>,
    connected: bool,
    ended: bool,
    consumed: bool,
    final_error: Option<StreamError>,
}

impl ChatCompletionStream {
    /// Attach to a live SSE byte stream.
    pub fn new<S>(transport: S, options: RequestOptions) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self::build(transport, options, TransportMode::Sse, CancellationToken::new())
    }

    /// Attach to a live SSE byte stream, observing an externally owned
    /// cancellation token. Cancelling the token aborts the session.
    pub fn with_cancellation<S>(
        transport: S,
        options: RequestOptions,
        cancel: CancellationToken,
    ) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self::build(transport, options, TransportMode::Sse, cancel)
    }

    /// Replay a stream previously captured with
    /// [`into_byte_stream`](Self::into_byte_stream): one chunk JSON per
    /// line. A change of completion id finalizes the previous completion,
    /// so a capture holding several sequential completions replays whole.
    pub fn from_byte_stream<S>(transport: S, options: RequestOptions) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self::build(transport, options, TransportMode::NdJson, CancellationToken::new())
    }

    fn build<S>(
        transport: S,
        options: RequestOptions,
        mode: TransportMode,
        cancel: CancellationToken,
    ) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self {
            transport: transport.boxed(),
            mode,
            framer: LineDecoder::new(),
            sse: SseRecordDecoder::new(),
            options,
            cancel,
            snapshot: None,
            choice_states: Vec::new(),
            completions: Vec::new(),
            total_usage: Usage::default(),
            pending: VecDeque::new(),
            listeners: Arc::new(Mutex::new(ListenerTable::default())),
            connected: false,
            ended: false,
            consumed: false,
            final_error: None,
        }
    }

    /// Cancel the session. The next poll emits `Abort` then `End`; queued
    /// but undelivered events are discarded.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Token observed by this session; hand a clone to the transport layer
    /// so it can stop the underlying request on abort.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    // --- listeners ------------------------------------------------------

    /// Register a callback invoked for every event, in subscription order.
    pub fn on(&self, listener: impl FnMut(&StreamEvent) + Send + 'static) -> ListenerId {
        let mut table = self.listeners.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, Arc::new(Mutex::new(listener))));
        ListenerId(id)
    }

    /// Unregister a callback. Returns whether it was still registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut table = self.listeners.lock();
        let before = table.entries.len();
        table.entries.retain(|(entry_id, _)| *entry_id != id.0);
        table.entries.len() != before
    }

    // --- pull interface -------------------------------------------------

    /// The event sequence as an async stream. Callable once; a second call
    /// fails so two consumers cannot silently steal events from each other.
    pub fn events(&mut self) -> Result<impl Stream<Item = StreamEvent> + '_, StreamError> {
        if self.consumed {
            return Err(StreamError::AlreadyConsumed);
        }
        self.consumed = true;
        Ok(futures_util::stream::unfold(self, |session| async move {
            session.next_event().await.map(|event| (event, session))
        }))
    }

    /// Next event, or `None` once `End` has been delivered.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.ended {
                return None;
            }
            self.step().await;
        }
    }

    // --- promise-style helpers ------------------------------------------

    /// Run the session to completion, leaving events queued for any
    /// listener or later consumer.
    pub async fn done(&mut self) -> Result<(), StreamError> {
        self.drive_to_end().await
    }

    /// The finalized completion (the last one, when a replay held several).
    pub async fn final_chat_completion(&mut self) -> Result<ChatCompletion, StreamError> {
        self.drive_to_end().await?;
        self.completions
            .last()
            .cloned()
            .ok_or(StreamError::EmptyStream)
    }

    /// Content of the first choice, empty when the model sent none.
    pub async fn final_content(&mut self) -> Result<String, StreamError> {
        let completion = self.final_chat_completion().await?;
        Ok(completion
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default())
    }

    /// Message of the first choice.
    pub async fn final_message(&mut self) -> Result<ChatMessage, StreamError> {
        let completion = self.final_chat_completion().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(StreamError::EmptyStream)
    }

    /// Usage summed over every completion the session produced.
    pub async fn total_usage(&mut self) -> Result<Usage, StreamError> {
        self.drive_to_end().await?;
        Ok(self.total_usage.clone())
    }

    async fn drive_to_end(&mut self) -> Result<(), StreamError> {
        while !self.ended {
            self.step().await;
        }
        match &self.final_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    // --- fan-out --------------------------------------------------------

    /// Split the session into two cursors that each observe the full event
    /// sequence, without re-issuing the upstream request.
    #[must_use]
    pub fn tee(self) -> (StreamCursor, StreamCursor) {
        tee::split(self)
    }

    // --- core pump ------------------------------------------------------

    async fn step(&mut self) {
        if self.ended {
            return;
        }
        if !self.connected {
            self.connected = true;
            self.emit(StreamEvent::Connect);
            return;
        }
        let item = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.handle_abort();
                return;
            }
            item = self.transport.next() => item,
        };
        match item {
            Some(Ok(bytes)) => {
                let lines = self.framer.decode(&bytes);
                self.feed_lines(lines);
            }
            Some(Err(TransportError::Cancelled)) => self.handle_abort(),
            Some(Err(err)) => self.fail(err.into()),
            None => {
                let lines = self.framer.flush();
                self.feed_lines(lines);
                self.end_request();
            }
        }
    }

    fn feed_lines(&mut self, lines: Lines) {
        for line in lines {
            if self.ended {
                return;
            }
            match self.mode {
                TransportMode::Sse => {
                    if let Some(record) = self.sse.decode(&line) {
                        self.handle_record(record);
                    }
                }
                TransportMode::NdJson => {
                    let line = line.trim();
                    if !line.is_empty() {
                        self.handle_json_line(line.to_string());
                    }
                }
            }
        }
    }

    fn handle_record(&mut self, record: EventRecord) {
        if is_done_data(&record.data) {
            debug!("received stream terminator");
            self.end_request();
            return;
        }
        if record.data.is_empty() {
            // Event-only record, no payload to decode.
            return;
        }
        match serde_json::from_str::<ChatCompletionChunk>(&record.data) {
            Ok(chunk) => self.add_chunk(chunk),
            Err(err) => self.fail(StreamError::Payload(format!(
                "could not decode stream chunk: {err}"
            ))),
        }
    }

    fn handle_json_line(&mut self, line: String) {
        let chunk = match serde_json::from_str::<ChatCompletionChunk>(&line) {
            Ok(chunk) => chunk,
            Err(err) => {
                self.fail(StreamError::Payload(format!(
                    "could not decode replay line: {err}"
                )));
                return;
            }
        };
        let id_changed = self
            .snapshot
            .as_ref()
            .is_some_and(|snapshot| !chunk.id.is_empty() && snapshot.id != chunk.id);
        if id_changed {
            if let Some(snapshot) = self.snapshot.take() {
                if !self.finalize_snapshot(snapshot) {
                    return;
                }
            }
        }
        self.add_chunk(chunk);
    }

    fn add_chunk(&mut self, chunk: ChatCompletionChunk) {
        trace!(id = %chunk.id, choices = chunk.choices.len(), "chunk");
        if let Err(err) = accumulate(&mut self.snapshot, &chunk, &self.options) {
            self.fail(err);
            return;
        }
        let Some(snapshot) = self.snapshot.as_ref() else {
            return;
        };

        let mut derived = Vec::new();
        derived.push(StreamEvent::Chunk {
            chunk: chunk.clone(),
            snapshot: snapshot.clone(),
        });
        for chunk_choice in &chunk.choices {
            let index = chunk_choice.index;
            let Some(choice) = snapshot.choices.get(index) else {
                continue;
            };
            let state = state_for(&mut self.choice_states, index);
            let delta = &chunk_choice.delta;

            if let Some(fragment) = &delta.content {
                let text = choice.message.content.clone().unwrap_or_default();
                // No content events until the accumulated content is
                // non-empty; a leading empty fragment is role-only
                // bookkeeping.
                if !text.is_empty() {
                    derived.push(StreamEvent::Content {
                        delta: fragment.clone(),
                        snapshot: text.clone(),
                    });
                    derived.push(StreamEvent::ContentDelta {
                        index,
                        delta: fragment.clone(),
                        snapshot: text,
                        parsed: choice.message.parsed.clone(),
                    });
                }
            }
            if let Some(fragment) = &delta.refusal {
                derived.push(StreamEvent::RefusalDelta {
                    index,
                    delta: fragment.clone(),
                    snapshot: choice.message.refusal.clone().unwrap_or_default(),
                });
            }
            for tool_delta in &delta.tool_calls {
                if state.current_tool != Some(tool_delta.index) {
                    // A tool boundary closes any open text streaming, then
                    // the previous slot whose arguments are now complete.
                    push_text_done_events(&mut derived, state, choice);
                    if let Some(prev) = state.current_tool {
                        if !state.tool_done(prev) {
                            if let Some(prev_tool) = choice.message.tool_calls.get(prev) {
                                state.mark_tool_done(prev);
                                derived.push(tool_done_event(index, prev, prev_tool));
                            }
                        }
                    }
                    state.current_tool = Some(tool_delta.index);
                }
                let fragment = tool_delta
                    .function
                    .as_ref()
                    .and_then(|function| function.arguments.as_ref());
                if let (Some(fragment), Some(tool)) =
                    (fragment, choice.message.tool_calls.get(tool_delta.index))
                {
                    derived.push(StreamEvent::ToolCallArgumentsDelta {
                        index,
                        tool_index: tool_delta.index,
                        name: tool.name.clone().unwrap_or_default(),
                        delta: fragment.clone(),
                        arguments: tool.arguments.clone(),
                        parsed_arguments: tool.parsed_arguments.clone(),
                    });
                }
            }
            if let Some(logprobs) = &chunk_choice.logprobs {
                if let Some(tokens) = &logprobs.content {
                    if !tokens.is_empty() {
                        derived.push(StreamEvent::LogprobsContentDelta {
                            index,
                            delta: tokens.clone(),
                            snapshot: logprob_content(choice),
                        });
                    }
                }
                if let Some(tokens) = &logprobs.refusal {
                    if !tokens.is_empty() {
                        derived.push(StreamEvent::LogprobsRefusalDelta {
                            index,
                            delta: tokens.clone(),
                            snapshot: logprob_refusal(choice),
                        });
                    }
                }
            }
            if chunk_choice.finish_reason.is_some() {
                push_done_events(&mut derived, state, choice);
            }
        }
        for event in derived {
            self.emit(event);
        }
    }

    /// Flush outstanding done events, validate, and record the completion.
    /// Returns false when finalization failed (the session is then ended).
    fn finalize_snapshot(&mut self, snapshot: CompletionSnapshot) -> bool {
        let mut derived = Vec::new();
        for choice in &snapshot.choices {
            let state = state_for(&mut self.choice_states, choice.index);
            push_done_events(&mut derived, state, choice);
        }
        for event in derived {
            self.emit(event);
        }
        match finalize_completion(&snapshot, &self.options) {
            Ok(completion) => {
                if let Some(usage) = &completion.usage {
                    self.total_usage.add(usage);
                }
                self.emit(StreamEvent::FinalChatCompletion(completion.clone()));
                self.completions.push(completion);
                self.choice_states.clear();
                true
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    fn end_request(&mut self) {
        if self.ended {
            return;
        }
        if let Some(snapshot) = self.snapshot.take() {
            if !self.finalize_snapshot(snapshot) {
                return;
            }
        }
        let Some(last) = self.completions.last().cloned() else {
            self.fail(StreamError::EmptyStream);
            return;
        };
        let content = last
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        self.emit(StreamEvent::FinalContent(content));
        if let Some(choice) = last.choices.first() {
            self.emit(StreamEvent::FinalMessage(choice.message.clone()));
        }
        self.emit(StreamEvent::TotalUsage(self.total_usage.clone()));
        self.end(None);
    }

    fn fail(&mut self, err: StreamError) {
        if self.ended {
            return;
        }
        self.emit(StreamEvent::Error(err.clone()));
        self.end(Some(err));
    }

    fn handle_abort(&mut self) {
        if self.ended {
            return;
        }
        self.pending.clear();
        self.emit(StreamEvent::Abort);
        self.end(Some(StreamError::Aborted));
    }

    fn end(&mut self, err: Option<StreamError>) {
        debug!(error = ?err, "stream ended");
        self.final_error = err;
        self.emit(StreamEvent::End);
        self.ended = true;
    }

    fn emit(&mut self, event: StreamEvent) {
        let callbacks: Vec<ListenerFn> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        if callbacks.is_empty() {
            // Nobody is subscribed; make sure failures and aborts are
            // visible somewhere.
            match &event {
                StreamEvent::Error(err) => error!(error = %err, "unobserved stream failure"),
                StreamEvent::Abort => error!("unobserved stream abort"),
                _ => {}
            }
        }
        for callback in callbacks {
            (callback.lock())(&event);
        }
        self.pending.push_back(event);
    }
}

fn state_for(states: &mut Vec<ChoiceEventState>, index: usize) -> &mut ChoiceEventState {
    while states.len() <= index {
        states.push(ChoiceEventState::default());
    }
    &mut states[index]
}

fn logprob_content(choice: &ChoiceSnapshot) -> Vec<crate::types::TokenLogprob> {
    choice
        .logprobs
        .as_ref()
        .and_then(|logprobs| logprobs.content.clone())
        .unwrap_or_default()
}

fn logprob_refusal(choice: &ChoiceSnapshot) -> Vec<crate::types::TokenLogprob> {
    choice
        .logprobs
        .as_ref()
        .and_then(|logprobs| logprobs.refusal.clone())
        .unwrap_or_default()
}

fn tool_done_event(index: usize, tool_index: usize, tool: &ToolCallSnapshot) -> StreamEvent {
    StreamEvent::ToolCallArgumentsDone {
        index,
        tool_index,
        id: tool.id.clone(),
        name: tool.name.clone().unwrap_or_default(),
        arguments: tool.arguments.clone(),
        parsed_arguments: tool.parsed_arguments.clone(),
    }
}

/// Emit whichever done events this choice still owes, each at most once.
fn push_done_events(
    events: &mut Vec<StreamEvent>,
    state: &mut ChoiceEventState,
    choice: &ChoiceSnapshot,
) {
    push_text_done_events(events, state, choice);
    for (tool_index, tool) in choice.message.tool_calls.iter().enumerate() {
        if !state.tool_done(tool_index) {
            state.mark_tool_done(tool_index);
            events.push(tool_done_event(choice.index, tool_index, tool));
        }
    }
}

/// Done events for the streamed text surfaces: content, refusal, logprobs.
fn push_text_done_events(
    events: &mut Vec<StreamEvent>,
    state: &mut ChoiceEventState,
    choice: &ChoiceSnapshot,
) {
    let index = choice.index;
    if !state.content_done {
        if let Some(content) = &choice.message.content {
            state.content_done = true;
            events.push(StreamEvent::ContentDone {
                index,
                content: content.clone(),
                parsed: choice.message.parsed.clone(),
            });
        }
    }
    if !state.refusal_done {
        if let Some(refusal) = &choice.message.refusal {
            state.refusal_done = true;
            events.push(StreamEvent::RefusalDone {
                index,
                refusal: refusal.clone(),
            });
        }
    }
    if !state.logprobs_content_done {
        let tokens = logprob_content(choice);
        if !tokens.is_empty() {
            state.logprobs_content_done = true;
            events.push(StreamEvent::LogprobsContentDone {
                index,
                content: tokens,
            });
        }
    }
    if !state.logprobs_refusal_done {
        let tokens = logprob_refusal(choice);
        if !tokens.is_empty() {
            state.logprobs_refusal_done = true;
            events.push(StreamEvent::LogprobsRefusalDone {
                index,
                refusal: tokens,
            });
        }
    }
}
