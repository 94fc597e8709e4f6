//! Delta accumulation: folds stream chunks into a completion snapshot.

use crate::error::StreamError;
use crate::options::RequestOptions;
use crate::partial_json::partial_parse;
use crate::snapshot::{CompletionSnapshot, FunctionCallSnapshot};
use crate::types::{ChatCompletionChunk, FinishReason};
use tracing::trace;

/// Fold one chunk into the snapshot, seeding it from the first chunk.
///
/// Metadata fields are last-write-wins; message fragments append; tool calls
/// and logprobs extend by index. Fails only on the structured-output
/// truncation guard (`length` / `content_filter` finish reasons when the
/// request expects parseable output).
pub fn accumulate(
    snapshot: &mut Option<CompletionSnapshot>,
    chunk: &ChatCompletionChunk,
    options: &RequestOptions,
) -> Result<(), StreamError> {
    let snapshot = snapshot.get_or_insert_with(CompletionSnapshot::default);

    // Pass-through metadata, overwritten on every chunk that carries it.
    snapshot.id = chunk.id.clone();
    snapshot.created = chunk.created;
    snapshot.model = chunk.model.clone();
    if let Some(fp) = &chunk.system_fingerprint {
        snapshot.system_fingerprint = Some(fp.clone());
    }
    if let Some(tier) = &chunk.service_tier {
        snapshot.service_tier = Some(tier.clone());
    }
    if let Some(usage) = &chunk.usage {
        snapshot.usage = Some(usage.clone());
    }
    for (k, v) in &chunk.extra {
        snapshot.extra.insert(k.clone(), v.clone());
    }

    for chunk_choice in &chunk.choices {
        let choice = snapshot.choice_mut(chunk_choice.index);

        if let Some(logprobs) = &chunk_choice.logprobs {
            let merged = choice.logprobs.get_or_insert_with(Default::default);
            if let Some(content) = &logprobs.content {
                merged
                    .content
                    .get_or_insert_with(Vec::new)
                    .extend(content.iter().cloned());
            }
            if let Some(refusal) = &logprobs.refusal {
                merged
                    .refusal
                    .get_or_insert_with(Vec::new)
                    .extend(refusal.iter().cloned());
            }
        }

        if let Some(reason) = chunk_choice.finish_reason {
            choice.finish_reason = Some(reason);
            if options.guards_truncation() {
                match reason {
                    FinishReason::Length => return Err(StreamError::LengthFinishReason),
                    FinishReason::ContentFilter => {
                        return Err(StreamError::ContentFilterFinishReason)
                    }
                    _ => {}
                }
            }
        }
        for (k, v) in &chunk_choice.extra {
            choice.extra.insert(k.clone(), v.clone());
        }

        let delta = &chunk_choice.delta;
        for (k, v) in &delta.extra {
            choice.message.extra.insert(k.clone(), v.clone());
        }
        if let Some(role) = &delta.role {
            choice.message.role = Some(role.clone());
        }
        if let Some(refusal) = &delta.refusal {
            choice
                .message
                .refusal
                .get_or_insert_with(String::new)
                .push_str(refusal);
        }
        if let Some(content) = &delta.content {
            let text = choice.message.content.get_or_insert_with(String::new);
            text.push_str(content);
            if choice.message.refusal.is_none() && options.auto_parse_content() {
                // Best effort: an unparseable intermediate state keeps the
                // previous parse.
                match partial_parse(text) {
                    Ok(value) => choice.message.parsed = Some(value),
                    Err(e) => trace!(error = %e, "content not yet parseable"),
                }
            }
        }
        if let Some(function_call) = &delta.function_call {
            let target = choice
                .message
                .function_call
                .get_or_insert_with(FunctionCallSnapshot::default);
            if let Some(name) = &function_call.name {
                target.name = Some(name.clone());
            }
            if let Some(arguments) = &function_call.arguments {
                target.arguments.push_str(arguments);
            }
        }
        for tool_delta in &delta.tool_calls {
            let tool_call = choice.message.tool_call_mut(tool_delta.index);
            if let Some(id) = &tool_delta.id {
                tool_call.id = Some(id.clone());
            }
            if let Some(kind) = &tool_delta.kind {
                tool_call.kind = Some(kind.clone());
            }
            if let Some(function) = &tool_delta.function {
                if let Some(name) = &function.name {
                    tool_call.name = Some(name.clone());
                }
                if let Some(arguments) = &function.arguments {
                    tool_call.arguments.push_str(arguments);
                    let parseable = tool_call
                        .name
                        .as_deref()
                        .is_some_and(|name| options.auto_parse_tool(name));
                    if parseable {
                        match partial_parse(&tool_call.arguments) {
                            Ok(value) => tool_call.parsed_arguments = Some(value),
                            Err(e) => trace!(error = %e, "arguments not yet parseable"),
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ResponseFormat, ToolSpec};
    use crate::types::{ChunkChoice, ChunkDelta, FunctionCallDelta, ToolCallDelta, Usage};
    use serde_json::json;

    fn content_chunk(id: &str, index: usize, content: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: id.to_string(),
            created: 1,
            model: "m".to_string(),
            choices: vec![ChunkChoice {
                index,
                delta: ChunkDelta {
                    content: Some(content.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_content_appends_across_chunks() {
        let mut snapshot = None;
        let options = RequestOptions::default();
        accumulate(&mut snapshot, &content_chunk("c", 0, "Hel"), &options).unwrap();
        accumulate(&mut snapshot, &content_chunk("c", 0, "lo"), &options).unwrap();
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.id, "c");
        assert_eq!(snapshot.choices[0].message.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_concatenated_deltas_equal_split_deltas() {
        let options = RequestOptions::default();
        let mut split = None;
        accumulate(&mut split, &content_chunk("c", 0, "ab"), &options).unwrap();
        accumulate(&mut split, &content_chunk("c", 0, "cd"), &options).unwrap();
        let mut joined = None;
        accumulate(&mut joined, &content_chunk("c", 0, "abcd"), &options).unwrap();
        assert_eq!(
            split.unwrap().choices[0].message.content,
            joined.unwrap().choices[0].message.content
        );
    }

    #[test]
    fn test_usage_and_metadata_last_write_wins() {
        let options = RequestOptions::default();
        let mut snapshot = None;
        let mut first = content_chunk("c", 0, "x");
        first.system_fingerprint = Some("fp1".to_string());
        accumulate(&mut snapshot, &first, &options).unwrap();
        let mut second = content_chunk("c", 0, "y");
        second.system_fingerprint = Some("fp2".to_string());
        second.usage = Some(Usage {
            prompt_tokens: 3,
            completion_tokens: 2,
            total_tokens: 5,
            ..Default::default()
        });
        accumulate(&mut snapshot, &second, &options).unwrap();
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.system_fingerprint.as_deref(), Some("fp2"));
        assert_eq!(snapshot.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn test_tool_call_accumulates_by_index() {
        let options = RequestOptions {
            tools: vec![ToolSpec::parseable("lookup")],
            ..Default::default()
        };
        let mut snapshot = None;
        let chunk = |tool: ToolCallDelta| ChatCompletionChunk {
            id: "c".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    tool_calls: vec![tool],
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };
        accumulate(
            &mut snapshot,
            &chunk(ToolCallDelta {
                index: 0,
                id: Some("call_1".to_string()),
                kind: Some("function".to_string()),
                function: Some(FunctionCallDelta {
                    name: Some("lookup".to_string()),
                    arguments: Some("{\"q\":".to_string()),
                }),
            }),
            &options,
        )
        .unwrap();
        accumulate(
            &mut snapshot,
            &chunk(ToolCallDelta {
                index: 0,
                id: None,
                kind: None,
                function: Some(FunctionCallDelta {
                    name: None,
                    arguments: Some("\"rust\"}".to_string()),
                }),
            }),
            &options,
        )
        .unwrap();
        let snapshot = snapshot.unwrap();
        let tool_call = &snapshot.choices[0].message.tool_calls[0];
        assert_eq!(tool_call.id.as_deref(), Some("call_1"));
        assert_eq!(tool_call.arguments, "{\"q\":\"rust\"}");
        assert_eq!(tool_call.parsed_arguments, Some(json!({"q": "rust"})));
    }

    #[test]
    fn test_structured_output_parses_content_incrementally() {
        let options = RequestOptions {
            response_format: ResponseFormat::JsonSchema,
            ..Default::default()
        };
        let mut snapshot = None;
        accumulate(&mut snapshot, &content_chunk("c", 0, "{\"a\": \"h"), &options).unwrap();
        assert_eq!(
            snapshot.as_ref().unwrap().choices[0].message.parsed,
            Some(json!({"a": "h"}))
        );
        accumulate(&mut snapshot, &content_chunk("c", 0, "i\"}"), &options).unwrap();
        assert_eq!(
            snapshot.unwrap().choices[0].message.parsed,
            Some(json!({"a": "hi"}))
        );
    }

    #[test]
    fn test_unparseable_intermediate_keeps_previous_parse() {
        let options = RequestOptions {
            response_format: ResponseFormat::JsonSchema,
            ..Default::default()
        };
        // The whole content is a bare number, unparseable mid-stream under
        // the default allow set.
        let mut snapshot = None;
        accumulate(&mut snapshot, &content_chunk("c", 0, "12"), &options).unwrap();
        assert_eq!(snapshot.as_ref().unwrap().choices[0].message.parsed, None);
    }

    #[test]
    fn test_length_guard_fires_only_for_parseable_requests() {
        let finish = |options: &RequestOptions| {
            let mut snapshot = None;
            let mut chunk = content_chunk("c", 0, "x");
            chunk.choices[0].finish_reason = Some(FinishReason::Length);
            accumulate(&mut snapshot, &chunk, options)
        };
        assert!(finish(&RequestOptions::default()).is_ok());
        let guarded = RequestOptions {
            response_format: ResponseFormat::JsonSchema,
            ..Default::default()
        };
        assert!(matches!(
            finish(&guarded),
            Err(StreamError::LengthFinishReason)
        ));
    }

    #[test]
    fn test_refusal_appends_and_suppresses_content_parse() {
        let options = RequestOptions {
            response_format: ResponseFormat::JsonSchema,
            ..Default::default()
        };
        let mut snapshot = None;
        let mut chunk = content_chunk("c", 0, "{}");
        chunk.choices[0].delta.refusal = Some("no".to_string());
        accumulate(&mut snapshot, &chunk, &options).unwrap();
        let message = &snapshot.unwrap().choices[0].message;
        assert_eq!(message.refusal.as_deref(), Some("no"));
        assert_eq!(message.parsed, None);
    }

    #[test]
    fn test_empty_delta_chunk_is_metadata_only() {
        let options = RequestOptions::default();
        let mut snapshot = None;
        let chunk = ChatCompletionChunk {
            id: "c".to_string(),
            model: "m2".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                ..Default::default()
            }],
            ..Default::default()
        };
        accumulate(&mut snapshot, &chunk, &options).unwrap();
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.model, "m2");
        assert!(snapshot.choices[0].message.content.is_none());
    }

    #[test]
    fn test_legacy_function_call_accumulates() {
        let options = RequestOptions::default();
        let mut snapshot = None;
        let mut chunk = content_chunk("c", 0, "");
        chunk.choices[0].delta.content = None;
        chunk.choices[0].delta.function_call = Some(FunctionCallDelta {
            name: Some("f".to_string()),
            arguments: Some("{\"a\"".to_string()),
        });
        accumulate(&mut snapshot, &chunk, &options).unwrap();
        let mut chunk2 = content_chunk("c", 0, "");
        chunk2.choices[0].delta.content = None;
        chunk2.choices[0].delta.function_call = Some(FunctionCallDelta {
            name: None,
            arguments: Some(":1}".to_string()),
        });
        accumulate(&mut snapshot, &chunk2, &options).unwrap();
        let snapshot = snapshot.unwrap();
        let fc = snapshot.choices[0].message.function_call.clone().unwrap();
        assert_eq!(fc.name.as_deref(), Some("f"));
        assert_eq!(fc.arguments, "{\"a\":1}");
    }
}
