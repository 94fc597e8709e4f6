//! Converts a finished snapshot into the non-streaming response shape.

use crate::error::StreamError;
use crate::options::RequestOptions;
use crate::snapshot::{ChoiceSnapshot, CompletionSnapshot};
use crate::types::{
    ChatCompletion, ChatCompletionChoice, ChatMessage, FinishReason, FunctionCall, ToolCall,
};

/// Validate a complete snapshot and produce a [`ChatCompletion`]
/// indistinguishable from a non-streaming response body.
///
/// Fails when a required field never arrived (naming the choice and field),
/// when a structured-output request was truncated, or when content that must
/// parse strictly does not.
pub fn finalize_completion(
    snapshot: &CompletionSnapshot,
    options: &RequestOptions,
) -> Result<ChatCompletion, StreamError> {
    let mut choices = Vec::with_capacity(snapshot.choices.len());
    for choice in &snapshot.choices {
        choices.push(finalize_choice(choice, options)?);
    }
    Ok(ChatCompletion {
        id: snapshot.id.clone(),
        choices,
        created: snapshot.created,
        model: snapshot.model.clone(),
        object: "chat.completion".to_string(),
        system_fingerprint: snapshot.system_fingerprint.clone(),
        service_tier: snapshot.service_tier.clone(),
        usage: snapshot.usage.clone(),
        extra: snapshot.extra.clone(),
    })
}

fn missing(index: usize, field: &str) -> StreamError {
    StreamError::MissingField {
        index,
        field: field.to_string(),
    }
}

fn finalize_choice(
    choice: &ChoiceSnapshot,
    options: &RequestOptions,
) -> Result<ChatCompletionChoice, StreamError> {
    let index = choice.index;
    let Some(finish_reason) = choice.finish_reason else {
        return Err(missing(index, "finish_reason"));
    };
    if options.guards_truncation() {
        match finish_reason {
            FinishReason::Length => return Err(StreamError::LengthFinishReason),
            FinishReason::ContentFilter => return Err(StreamError::ContentFilterFinishReason),
            _ => {}
        }
    }
    let message = &choice.message;
    let Some(role) = message.role.clone() else {
        return Err(missing(index, "role"));
    };

    let mut tool_calls = Vec::with_capacity(message.tool_calls.len());
    for (i, tool_call) in message.tool_calls.iter().enumerate() {
        let Some(id) = tool_call.id.clone() else {
            return Err(missing(index, &format!("tool_calls[{i}].id")));
        };
        let Some(kind) = tool_call.kind.clone() else {
            return Err(missing(index, &format!("tool_calls[{i}].type")));
        };
        let Some(name) = tool_call.name.clone() else {
            return Err(missing(index, &format!("tool_calls[{i}].function.name")));
        };
        let parsed_arguments = if options.auto_parse_tool(&name) {
            Some(parse_strict(&tool_call.arguments).map_err(|e| {
                StreamError::Payload(format!(
                    "tool `{name}` arguments failed to parse: {e}"
                ))
            })?)
        } else {
            None
        };
        tool_calls.push(ToolCall {
            id,
            kind,
            function: FunctionCall {
                name,
                arguments: tool_call.arguments.clone(),
                parsed_arguments,
            },
        });
    }

    let function_call = match &message.function_call {
        Some(fc) => {
            let Some(name) = fc.name.clone() else {
                return Err(missing(index, "function_call.name"));
            };
            Some(FunctionCall {
                name,
                arguments: fc.arguments.clone(),
                parsed_arguments: None,
            })
        }
        None => None,
    };

    let parsed = match &message.content {
        Some(content)
            if options.auto_parse_content() && message.refusal.is_none() =>
        {
            Some(parse_strict(content).map_err(|e| {
                StreamError::Payload(format!("structured content failed to parse: {e}"))
            })?)
        }
        _ => None,
    };

    Ok(ChatCompletionChoice {
        index,
        message: ChatMessage {
            role,
            content: message.content.clone(),
            refusal: message.refusal.clone(),
            parsed,
            tool_calls,
            function_call,
            extra: message.extra.clone(),
        },
        finish_reason,
        logprobs: choice.logprobs.clone(),
        extra: choice.extra.clone(),
    })
}

fn parse_strict(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_str(text)
}
