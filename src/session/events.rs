//! Typed events emitted while a streaming session runs.

use crate::error::StreamError;
use crate::snapshot::CompletionSnapshot;
use crate::types::{ChatCompletion, ChatCompletionChunk, ChatMessage, TokenLogprob, Usage};
use serde_json::Value;

/// Everything a session can tell its consumers, in emission order:
/// `Connect` first, granular deltas and at-most-once `*Done` events while
/// chunks arrive, the `Final*` family after successful finalization, and
/// exactly one `End` last.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The transport is attached and the session is about to consume it.
    Connect,
    /// A raw decoded chunk together with the snapshot after folding it in.
    Chunk {
        chunk: ChatCompletionChunk,
        snapshot: CompletionSnapshot,
    },
    /// Legacy coarse content event: the fragment and the full text so far.
    Content { delta: String, snapshot: String },
    ContentDelta {
        index: usize,
        delta: String,
        snapshot: String,
        parsed: Option<Value>,
    },
    ContentDone {
        index: usize,
        content: String,
        parsed: Option<Value>,
    },
    RefusalDelta {
        index: usize,
        delta: String,
        snapshot: String,
    },
    RefusalDone { index: usize, refusal: String },
    LogprobsContentDelta {
        index: usize,
        delta: Vec<TokenLogprob>,
        snapshot: Vec<TokenLogprob>,
    },
    LogprobsContentDone {
        index: usize,
        content: Vec<TokenLogprob>,
    },
    LogprobsRefusalDelta {
        index: usize,
        delta: Vec<TokenLogprob>,
        snapshot: Vec<TokenLogprob>,
    },
    LogprobsRefusalDone {
        index: usize,
        refusal: Vec<TokenLogprob>,
    },
    ToolCallArgumentsDelta {
        index: usize,
        tool_index: usize,
        name: String,
        delta: String,
        arguments: String,
        parsed_arguments: Option<Value>,
    },
    ToolCallArgumentsDone {
        index: usize,
        tool_index: usize,
        id: Option<String>,
        name: String,
        arguments: String,
        parsed_arguments: Option<Value>,
    },
    FinalChatCompletion(ChatCompletion),
    FinalContent(String),
    FinalMessage(ChatMessage),
    TotalUsage(Usage),
    /// A terminal failure. Followed by `End`; never emitted for aborts.
    Error(StreamError),
    /// The session was cancelled. Followed by `End`.
    Abort,
    /// Always the last event of a session.
    End,
}

impl StreamEvent {
    /// Stable name of the event kind, for filtering and logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Connect => "connect",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Content { .. } => "content",
            StreamEvent::ContentDelta { .. } => "content.delta",
            StreamEvent::ContentDone { .. } => "content.done",
            StreamEvent::RefusalDelta { .. } => "refusal.delta",
            StreamEvent::RefusalDone { .. } => "refusal.done",
            StreamEvent::LogprobsContentDelta { .. } => "logprobs.content.delta",
            StreamEvent::LogprobsContentDone { .. } => "logprobs.content.done",
            StreamEvent::LogprobsRefusalDelta { .. } => "logprobs.refusal.delta",
            StreamEvent::LogprobsRefusalDone { .. } => "logprobs.refusal.done",
            StreamEvent::ToolCallArgumentsDelta { .. } => "tool_calls.arguments.delta",
            StreamEvent::ToolCallArgumentsDone { .. } => "tool_calls.arguments.done",
            StreamEvent::FinalChatCompletion(_) => "final_chat_completion",
            StreamEvent::FinalContent(_) => "final_content",
            StreamEvent::FinalMessage(_) => "final_message",
            StreamEvent::TotalUsage(_) => "total_usage",
            StreamEvent::Error(_) => "error",
            StreamEvent::Abort => "abort",
            StreamEvent::End => "end",
        }
    }
}
