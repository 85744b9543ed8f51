use std::collections::{HashMap, HashSet};

use crate::error::LLMError;
use crate::provider::ResponseContext;
use crate::stream::{ChunkMapper, ChunkStep};
use crate::types::{
    CHAT_COMPLETION_CHUNK_OBJECT, ChatCompletionChunkChoice, ChoiceDelta,
    ChoiceDeltaFunctionCall, ChoiceDeltaToolCall, CompletionResponseChunk,
};

use super::response::{convert_finish_reason, convert_function_call, convert_usage, split_parts};
use super::types::GeminiGenerateContentResponse;

/// Each SSE `data:` payload is a full GenerateContentResponse; the stream ends when the
/// connection closes.
pub(crate) struct GeminiChunkMapper {
    ctx: ResponseContext,
    call_counter: usize,
    /// candidate index -> 已发出的工具调用数
    tool_counts: HashMap<u32, u32>,
    started: HashSet<u32>,
}

impl GeminiChunkMapper {
    pub(crate) fn new(ctx: ResponseContext) -> Self {
        Self {
            ctx,
            call_counter: 0,
            tool_counts: HashMap::new(),
            started: HashSet::new(),
        }
    }
}

impl ChunkMapper for GeminiChunkMapper {
    fn map_event(&mut self, data: &str) -> Result<ChunkStep, LLMError> {
        let resp: GeminiGenerateContentResponse = serde_json::from_str(data).map_err(|err| {
            LLMError::normalization(self.ctx.provider, format!("failed to parse stream chunk: {err}"))
        })?;

        let mut choices = Vec::new();
        for (position, candidate) in resp.candidates.unwrap_or_default().into_iter().enumerate() {
            let index = candidate.index.unwrap_or(position as u32);
            let (text, calls) = split_parts(candidate.content.unwrap_or_default());

            let mut tool_calls = Vec::new();
            for call in calls {
                let slot = self.tool_counts.entry(index).or_insert(0);
                let converted = convert_function_call(call, &mut self.call_counter);
                tool_calls.push(ChoiceDeltaToolCall {
                    index: *slot,
                    id: Some(converted.id),
                    kind: Some(converted.kind),
                    function: Some(ChoiceDeltaFunctionCall {
                        name: Some(converted.function.name),
                        arguments: Some(converted.function.arguments),
                    }),
                });
                *slot += 1;
            }

            let saw_call = self.tool_counts.get(&index).is_some_and(|count| *count > 0);
            let role = self
                .started
                .insert(index)
                .then(|| "assistant".to_string());
            let delta = ChoiceDelta {
                role,
                content: text,
                refusal: None,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            };
            choices.push(ChatCompletionChunkChoice::new(
                index,
                delta,
                convert_finish_reason(candidate.finish_reason.as_deref(), saw_call),
            ));
        }

        Ok(ChunkStep::Emit(CompletionResponseChunk {
            id: resp.response_id,
            created: self.ctx.created,
            model: resp
                .model_version
                .filter(|model| !model.is_empty())
                .unwrap_or_else(|| self.ctx.model.clone()),
            usage: resp.usage_metadata.as_ref().map(convert_usage),
            object: CHAT_COMPLETION_CHUNK_OBJECT.to_string(),
            choices,
        }))
    }
}
