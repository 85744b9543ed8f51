use std::collections::HashMap;

use aws_sdk_bedrockruntime::types as sdk;
use aws_sdk_bedrockruntime::types::ConverseStreamOutput;

use crate::error::LLMError;
use crate::provider::ResponseContext;
use crate::stream::ChunkStep;
use crate::types::{
    CHAT_COMPLETION_CHUNK_OBJECT, ChatCompletionChunkChoice, ChoiceDelta,
    ChoiceDeltaFunctionCall, ChoiceDeltaToolCall, CompletionResponseChunk, CompletionUsage,
    FinishReason,
};

use super::response::{convert_stop_reason, convert_usage, from_sdk_usage};
use super::types::{
    BlockDelta, BlockStart, ContentBlockDelta, ContentBlockStart, ContentBlockStop,
    ConverseStreamEvent, MessageStart, MessageStop, StreamMetadata, ToolUseDelta, ToolUseStart,
};

/// Copies one SDK stream event into plain data; `None` for event kinds the crate ignores.
pub(crate) fn event_from_sdk(output: &ConverseStreamOutput) -> Option<ConverseStreamEvent> {
    let event = match output {
        ConverseStreamOutput::MessageStart(start) => ConverseStreamEvent::MessageStart(MessageStart {
            role: start.role().as_str().to_string(),
        }),
        ConverseStreamOutput::ContentBlockStart(start) => {
            ConverseStreamEvent::ContentBlockStart(ContentBlockStart {
                content_block_index: block_index(start.content_block_index()),
                start: start.start().map(|start| BlockStart {
                    tool_use: match start {
                        sdk::ContentBlockStart::ToolUse(tool_use) => Some(ToolUseStart {
                            tool_use_id: tool_use.tool_use_id().to_string(),
                            name: tool_use.name().to_string(),
                        }),
                        _ => None,
                    },
                }),
            })
        }
        ConverseStreamOutput::ContentBlockDelta(delta) => {
            ConverseStreamEvent::ContentBlockDelta(ContentBlockDelta {
                content_block_index: block_index(delta.content_block_index()),
                delta: delta.delta().map(|delta| match delta {
                    sdk::ContentBlockDelta::Text(text) => BlockDelta {
                        text: Some(text.clone()),
                        tool_use: None,
                    },
                    sdk::ContentBlockDelta::ToolUse(tool_use) => BlockDelta {
                        text: None,
                        tool_use: Some(ToolUseDelta {
                            input: tool_use.input().to_string(),
                        }),
                    },
                    // reasoningContent 等增量不进入统一消息
                    _ => BlockDelta {
                        text: None,
                        tool_use: None,
                    },
                }),
            })
        }
        ConverseStreamOutput::ContentBlockStop(stop) => {
            ConverseStreamEvent::ContentBlockStop(ContentBlockStop {
                content_block_index: block_index(stop.content_block_index()),
            })
        }
        ConverseStreamOutput::MessageStop(stop) => ConverseStreamEvent::MessageStop(MessageStop {
            stop_reason: Some(stop.stop_reason().as_str().to_string()),
        }),
        ConverseStreamOutput::Metadata(metadata) => ConverseStreamEvent::Metadata(StreamMetadata {
            usage: metadata.usage().map(from_sdk_usage),
        }),
        _ => return None,
    };
    Some(event)
}

fn block_index(index: i32) -> u32 {
    u32::try_from(index).unwrap_or(0)
}

/// ConverseStream 事件状态机
///
/// Unlike the SSE providers, the usage arrives in a trailing `metadata` event after
/// `messageStop`, so the stream ends when the SDK receiver is exhausted.
pub(crate) struct BedrockChunkMapper {
    ctx: ResponseContext,
    /// 未关闭的 content block index -> 工具调用序号
    tool_indices: HashMap<u32, u32>,
    next_tool_index: u32,
}

impl BedrockChunkMapper {
    pub(crate) fn new(ctx: ResponseContext) -> Self {
        Self {
            ctx,
            tool_indices: HashMap::new(),
            next_tool_index: 0,
        }
    }

    fn chunk(
        &self,
        delta: Option<ChoiceDelta>,
        finish_reason: FinishReason,
        usage: Option<CompletionUsage>,
    ) -> ChunkStep {
        ChunkStep::Emit(CompletionResponseChunk {
            id: None,
            created: self.ctx.created,
            model: self.ctx.model.clone(),
            usage,
            object: CHAT_COMPLETION_CHUNK_OBJECT.to_string(),
            choices: delta
                .map(|delta| vec![ChatCompletionChunkChoice::new(0, delta, finish_reason)])
                .unwrap_or_default(),
        })
    }

    pub(crate) fn map_event(&mut self, event: ConverseStreamEvent) -> Result<ChunkStep, LLMError> {
        match event {
            ConverseStreamEvent::MessageStart(start) => Ok(self.chunk(
                Some(ChoiceDelta {
                    role: Some(start.role),
                    ..ChoiceDelta::default()
                }),
                FinishReason::Unknown,
                None,
            )),
            ConverseStreamEvent::ContentBlockStart(start) => {
                let Some(tool_use) = start.start.and_then(|start| start.tool_use) else {
                    return Ok(ChunkStep::Skip);
                };
                let tool_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_indices.insert(start.content_block_index, tool_index);
                Ok(self.chunk(
                    Some(ChoiceDelta {
                        tool_calls: Some(vec![ChoiceDeltaToolCall {
                            index: tool_index,
                            id: Some(tool_use.tool_use_id),
                            kind: Some("function".to_string()),
                            function: Some(ChoiceDeltaFunctionCall {
                                name: Some(tool_use.name),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        ..ChoiceDelta::default()
                    }),
                    FinishReason::Unknown,
                    None,
                ))
            }
            ConverseStreamEvent::ContentBlockDelta(delta) => {
                let Some(body) = delta.delta else {
                    return Ok(ChunkStep::Skip);
                };
                if let Some(text) = body.text {
                    return Ok(self.chunk(
                        Some(ChoiceDelta {
                            content: Some(text),
                            ..ChoiceDelta::default()
                        }),
                        FinishReason::Unknown,
                        None,
                    ));
                }
                let Some(tool_use) = body.tool_use else {
                    return Ok(ChunkStep::Skip);
                };
                let Some(tool_index) = self.tool_indices.get(&delta.content_block_index).copied()
                else {
                    return Err(LLMError::normalization(
                        self.ctx.provider,
                        format!(
                            "toolUse delta for unknown or closed content block {}",
                            delta.content_block_index
                        ),
                    ));
                };
                Ok(self.chunk(
                    Some(ChoiceDelta {
                        tool_calls: Some(vec![ChoiceDeltaToolCall {
                            index: tool_index,
                            id: None,
                            kind: None,
                            function: Some(ChoiceDeltaFunctionCall {
                                name: None,
                                arguments: Some(tool_use.input),
                            }),
                        }]),
                        ..ChoiceDelta::default()
                    }),
                    FinishReason::Unknown,
                    None,
                ))
            }
            ConverseStreamEvent::ContentBlockStop(stop) => {
                self.tool_indices.remove(&stop.content_block_index);
                Ok(ChunkStep::Skip)
            }
            ConverseStreamEvent::MessageStop(stop) => Ok(self.chunk(
                Some(ChoiceDelta::default()),
                convert_stop_reason(stop.stop_reason.as_deref()),
                None,
            )),
            ConverseStreamEvent::Metadata(metadata) => match metadata.usage {
                Some(usage) => Ok(self.chunk(None, FinishReason::Unknown, Some(convert_usage(usage)))),
                None => Ok(ChunkStep::Skip),
            },
        }
    }
}
