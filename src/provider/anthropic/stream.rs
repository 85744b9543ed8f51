use std::collections::HashMap;

use crate::error::LLMError;
use crate::provider::ResponseContext;
use crate::stream::{ChunkMapper, ChunkStep};
use crate::types::{
    CHAT_COMPLETION_CHUNK_OBJECT, ChatCompletionChunkChoice, ChoiceDelta,
    ChoiceDeltaFunctionCall, ChoiceDeltaToolCall, CompletionResponseChunk, CompletionUsage,
    FinishReason,
};

use super::error::stream_error;
use super::response::{convert_finish_reason, convert_usage};
use super::types::{AnthropicBlockDelta, AnthropicStreamEvent};

/// Anthropic 流式事件状态机
///
/// Remembers the message id, model and prompt token count from `message_start`, and maps
/// Anthropic content block indices onto contiguous tool call indices. A block stops
/// accepting `input_json_delta` once its `content_block_stop` arrives.
pub(crate) struct AnthropicChunkMapper {
    ctx: ResponseContext,
    id: Option<String>,
    model: Option<String>,
    input_tokens: Option<u64>,
    /// 未关闭的 tool_use 块
    tool_indices: HashMap<u32, u32>,
    next_tool_index: u32,
}

impl AnthropicChunkMapper {
    pub(crate) fn new(ctx: ResponseContext) -> Self {
        Self {
            ctx,
            id: None,
            model: None,
            input_tokens: None,
            tool_indices: HashMap::new(),
            next_tool_index: 0,
        }
    }

    fn chunk(
        &self,
        delta: ChoiceDelta,
        finish_reason: FinishReason,
        usage: Option<CompletionUsage>,
    ) -> ChunkStep {
        ChunkStep::Emit(CompletionResponseChunk {
            id: self.id.clone(),
            created: self.ctx.created,
            model: self.model.clone().unwrap_or_else(|| self.ctx.model.clone()),
            usage,
            object: CHAT_COMPLETION_CHUNK_OBJECT.to_string(),
            choices: vec![ChatCompletionChunkChoice::new(0, delta, finish_reason)],
        })
    }
}

impl ChunkMapper for AnthropicChunkMapper {
    fn map_event(&mut self, data: &str) -> Result<ChunkStep, LLMError> {
        let event: AnthropicStreamEvent = serde_json::from_str(data).map_err(|err| {
            LLMError::normalization(self.ctx.provider, format!("failed to parse stream event: {err}"))
        })?;

        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model.filter(|model| !model.is_empty());
                self.input_tokens = message.usage.and_then(|usage| usage.input_tokens);
                Ok(self.chunk(
                    ChoiceDelta {
                        role: Some("assistant".to_string()),
                        ..ChoiceDelta::default()
                    },
                    FinishReason::Unknown,
                    None,
                ))
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block.kind.as_str() {
                "tool_use" => {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_indices.insert(index, tool_index);
                    Ok(self.chunk(
                        ChoiceDelta {
                            tool_calls: Some(vec![ChoiceDeltaToolCall {
                                index: tool_index,
                                id: content_block.id,
                                kind: Some("function".to_string()),
                                function: Some(ChoiceDeltaFunctionCall {
                                    name: content_block.name,
                                    arguments: Some(String::new()),
                                }),
                            }]),
                            ..ChoiceDelta::default()
                        },
                        FinishReason::Unknown,
                        None,
                    ))
                }
                "text" => match content_block.text.filter(|text| !text.is_empty()) {
                    Some(text) => Ok(self.chunk(
                        ChoiceDelta {
                            content: Some(text),
                            ..ChoiceDelta::default()
                        },
                        FinishReason::Unknown,
                        None,
                    )),
                    None => Ok(ChunkStep::Skip),
                },
                _ => Ok(ChunkStep::Skip),
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicBlockDelta::TextDelta { text } => Ok(self.chunk(
                    ChoiceDelta {
                        content: Some(text),
                        ..ChoiceDelta::default()
                    },
                    FinishReason::Unknown,
                    None,
                )),
                AnthropicBlockDelta::InputJsonDelta { partial_json } => {
                    let Some(tool_index) = self.tool_indices.get(&index).copied() else {
                        return Err(LLMError::normalization(
                            self.ctx.provider,
                            format!("input_json_delta for unknown or closed content block {index}"),
                        ));
                    };
                    Ok(self.chunk(
                        ChoiceDelta {
                            tool_calls: Some(vec![ChoiceDeltaToolCall {
                                index: tool_index,
                                id: None,
                                kind: None,
                                function: Some(ChoiceDeltaFunctionCall {
                                    name: None,
                                    arguments: Some(partial_json),
                                }),
                            }]),
                            ..ChoiceDelta::default()
                        },
                        FinishReason::Unknown,
                        None,
                    ))
                }
                AnthropicBlockDelta::Other => Ok(ChunkStep::Skip),
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let usage = usage.map(|usage| convert_usage(&usage, self.input_tokens));
                Ok(self.chunk(
                    ChoiceDelta::default(),
                    convert_finish_reason(delta.stop_reason.as_deref()),
                    usage,
                ))
            }
            AnthropicStreamEvent::MessageStop => Ok(ChunkStep::Finish),
            AnthropicStreamEvent::ContentBlockStop { index } => {
                self.tool_indices.remove(&index);
                Ok(ChunkStep::Skip)
            }
            AnthropicStreamEvent::Ping
            | AnthropicStreamEvent::Unknown => Ok(ChunkStep::Skip),
            AnthropicStreamEvent::Error { error } => Err(stream_error(self.ctx.provider, error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;

    fn mapper() -> AnthropicChunkMapper {
        AnthropicChunkMapper::new(ResponseContext {
            provider: "anthropic",
            model: "claude-3-5-haiku-latest".to_string(),
            created: 99,
        })
    }

    fn emit(mapper: &mut AnthropicChunkMapper, data: &str) -> CompletionResponseChunk {
        match mapper.map_event(data).expect("mapped") {
            ChunkStep::Emit(chunk) => chunk,
            other => panic!("expected a chunk, got {other:?}"),
        }
    }

    #[test]
    fn text_stream_sequence() {
        let mut mapper = mapper();
        let start = emit(
            &mut mapper,
            r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","model":"claude-3-5-haiku-20241022","content":[],"stop_reason":null,"usage":{"input_tokens":25,"output_tokens":1}}}"#,
        );
        assert_eq!(start.id.as_deref(), Some("msg_1"));
        assert_eq!(start.model, "claude-3-5-haiku-20241022");
        assert_eq!(start.created, 99);
        assert_eq!(start.choices[0].delta.role.as_deref(), Some("assistant"));

        assert!(matches!(
            mapper.map_event(r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
            Ok(ChunkStep::Skip)
        ));
        assert!(matches!(mapper.map_event(r#"{"type":"ping"}"#), Ok(ChunkStep::Skip)));

        let delta = emit(
            &mut mapper,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        );
        assert_eq!(delta.id.as_deref(), Some("msg_1"));
        assert_eq!(delta.choices[0].delta.content.as_deref(), Some("Hi"));

        assert!(matches!(
            mapper.map_event(r#"{"type":"content_block_stop","index":0}"#),
            Ok(ChunkStep::Skip)
        ));

        let done = emit(
            &mut mapper,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":15}}"#,
        );
        assert_eq!(done.choices[0].finish_reason, FinishReason::Stop);
        let usage = done.usage.expect("usage");
        assert_eq!(usage.prompt_tokens, 25);
        assert_eq!(usage.completion_tokens, 15);
        assert_eq!(usage.total_tokens, 40);

        assert!(matches!(
            mapper.map_event(r#"{"type":"message_stop"}"#),
            Ok(ChunkStep::Finish)
        ));
    }

    #[test]
    fn tool_use_blocks_get_contiguous_indices() {
        let mut mapper = mapper();
        let start = emit(
            &mut mapper,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"get_weather","input":{}}}"#,
        );
        let call = &start.choices[0].delta.tool_calls.as_ref().expect("calls")[0];
        assert_eq!(call.index, 0);
        assert_eq!(call.id.as_deref(), Some("toolu_1"));
        assert_eq!(
            call.function.as_ref().and_then(|f| f.name.as_deref()),
            Some("get_weather")
        );

        let fragment = emit(
            &mut mapper,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"city\":"}}"#,
        );
        let call = &fragment.choices[0].delta.tool_calls.as_ref().expect("calls")[0];
        assert_eq!(call.index, 0);
        assert!(call.id.is_none());
        assert_eq!(
            call.function.as_ref().and_then(|f| f.arguments.as_deref()),
            Some("{\"city\":")
        );

        let finish = emit(
            &mut mapper,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":3}}"#,
        );
        assert_eq!(finish.choices[0].finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn input_json_after_block_stop_is_rejected() {
        let mut mapper = mapper();
        emit(
            &mut mapper,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_a","name":"lookup","input":{}}}"#,
        );
        assert!(matches!(
            mapper.map_event(r#"{"type":"content_block_stop","index":0}"#),
            Ok(ChunkStep::Skip)
        ));
        assert!(matches!(
            mapper.map_event(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{}"}}"#
            ),
            Err(LLMError::Normalization { provider: "anthropic", .. })
        ));

        let next = emit(
            &mut mapper,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_b","name":"lookup","input":{}}}"#,
        );
        let call = &next.choices[0].delta.tool_calls.as_ref().expect("calls")[0];
        assert_eq!(call.index, 1);
    }

    #[test]
    fn error_event_becomes_provider_error() {
        let mut mapper = mapper();
        let err = mapper
            .map_event(r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#)
            .expect_err("error event");
        assert!(matches!(
            err,
            LLMError::Provider {
                provider: "anthropic",
                kind: ProviderErrorKind::RateLimit { .. }
            }
        ));
    }

    #[test]
    fn unknown_event_types_are_skipped() {
        let mut mapper = mapper();
        assert!(matches!(
            mapper.map_event(r#"{"type":"brand_new_event","payload":1}"#),
            Ok(ChunkStep::Skip)
        ));
        assert!(matches!(
            mapper.map_event(r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#),
            Ok(ChunkStep::Skip)
        ));
    }
}
