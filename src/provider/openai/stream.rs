use crate::error::LLMError;
use crate::provider::ResponseContext;
use crate::stream::{ChunkMapper, ChunkStep};
use crate::types::{
    CHAT_COMPLETION_CHUNK_OBJECT, ChatCompletionChunkChoice, ChoiceDelta,
    ChoiceDeltaFunctionCall, ChoiceDeltaToolCall, CompletionResponseChunk, FinishReason,
};

use super::response::convert_usage;
use super::types::{OpenAiStreamChoice, OpenAiStreamChunk, OpenAiToolCallDelta};

/// Maps every `data:` payload to exactly one canonical chunk; `[DONE]` ends the stream.
pub(crate) struct OpenAiChunkMapper {
    ctx: ResponseContext,
}

impl OpenAiChunkMapper {
    pub(crate) fn new(ctx: ResponseContext) -> Self {
        Self { ctx }
    }
}

impl ChunkMapper for OpenAiChunkMapper {
    fn map_event(&mut self, data: &str) -> Result<ChunkStep, LLMError> {
        let chunk: OpenAiStreamChunk = serde_json::from_str(data).map_err(|err| {
            LLMError::normalization(self.ctx.provider, format!("failed to parse stream chunk: {err}"))
        })?;
        Ok(ChunkStep::Emit(convert_stream_chunk(chunk, &self.ctx)))
    }
}

pub(crate) fn convert_stream_chunk(
    chunk: OpenAiStreamChunk,
    ctx: &ResponseContext,
) -> CompletionResponseChunk {
    CompletionResponseChunk {
        id: chunk.id,
        created: chunk.created.unwrap_or(ctx.created),
        model: chunk
            .model
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| ctx.model.clone()),
        usage: chunk.usage.map(convert_usage),
        object: chunk
            .object
            .filter(|object| !object.is_empty())
            .unwrap_or_else(|| CHAT_COMPLETION_CHUNK_OBJECT.to_string()),
        choices: chunk
            .choices
            .into_iter()
            .enumerate()
            .map(|(position, choice)| convert_stream_choice(position as u32, choice))
            .collect(),
    }
}

fn convert_stream_choice(position: u32, choice: OpenAiStreamChoice) -> ChatCompletionChunkChoice {
    let delta = choice
        .delta
        .map(|delta| ChoiceDelta {
            role: delta.role,
            content: delta.content.map(|content| content.into_text()),
            refusal: delta.refusal,
            tool_calls: delta.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .enumerate()
                    .map(|(slot, call)| convert_tool_call_delta(slot as u32, call))
                    .collect()
            }),
        })
        .unwrap_or_default();

    ChatCompletionChunkChoice {
        index: choice.index.unwrap_or(position),
        delta,
        finish_reason: FinishReason::from_openai(choice.finish_reason.as_deref()),
        logprobs: choice.logprobs,
    }
}

fn convert_tool_call_delta(slot: u32, call: OpenAiToolCallDelta) -> ChoiceDeltaToolCall {
    ChoiceDeltaToolCall {
        index: call.index.unwrap_or(slot),
        id: call.id,
        kind: call.kind,
        function: call.function.map(|function| ChoiceDeltaFunctionCall {
            name: function.name,
            arguments: function.arguments,
        }),
    }
}
