//! In-progress accumulation state for one streamed completion.
//!
//! A snapshot is the merge of every chunk seen so far. Fields start unknown
//! and fill in as deltas arrive; indexes address choices and tool calls, and
//! gaps are padded with defaults so out-of-order indexes still land.

use crate::types::{ChoiceLogprobs, ExtraFields, FinishReason, Usage};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompletionSnapshot {
    pub id: String,
    pub created: i64,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub choices: Vec<ChoiceSnapshot>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChoiceSnapshot {
    pub index: usize,
    pub message: MessageSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<ChoiceLogprobs>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    /// Best-effort tolerant parse of `content`, refreshed as it grows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallSnapshot>,
    /// Legacy single-function-call field, for providers still emitting it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallSnapshot>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FunctionCallSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCallSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: String,
    /// Best-effort tolerant parse of `arguments` for auto-parseable tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_arguments: Option<Value>,
}

impl CompletionSnapshot {
    /// Choice slot at `index`, padding any gap with defaults.
    pub fn choice_mut(&mut self, index: usize) -> &mut ChoiceSnapshot {
        while self.choices.len() <= index {
            let i = self.choices.len();
            self.choices.push(ChoiceSnapshot {
                index: i,
                ..Default::default()
            });
        }
        &mut self.choices[index]
    }
}

impl MessageSnapshot {
    /// Tool-call slot at `index`, padding any gap with defaults.
    pub fn tool_call_mut(&mut self, index: usize) -> &mut ToolCallSnapshot {
        while self.tool_calls.len() <= index {
            self.tool_calls.push(ToolCallSnapshot::default());
        }
        &mut self.tool_calls[index]
    }
}
