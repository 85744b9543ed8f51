use crate::error::LLMError;
use crate::provider::ResponseContext;
use crate::types::{
    CHAT_COMPLETION_OBJECT, ChatCompletionChoice, ChatCompletionMessage,
    ChatCompletionMessageToolCall, CompletionResponse, CompletionUsage, FinishReason,
};

use super::types::{
    GeminiContent, GeminiFunctionCall, GeminiGenerateContentResponse, GeminiUsageMetadata,
};

/// 将 Gemini 响应映射为统一的 [`CompletionResponse`]
pub(crate) fn map_response(
    resp: GeminiGenerateContentResponse,
    ctx: &ResponseContext,
) -> Result<CompletionResponse, LLMError> {
    let candidates = resp.candidates.unwrap_or_default();
    let blocked = resp
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
        .is_some();

    let choices = if candidates.is_empty() {
        // 提示词被拦截时没有候选，视为一次内容过滤
        if !blocked {
            return Err(LLMError::normalization(
                ctx.provider,
                "response has no candidates",
            ));
        }
        vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionMessage::assistant(None, Vec::new()),
            finish_reason: FinishReason::ContentFilter,
            logprobs: None,
        }]
    } else {
        let mut call_counter = 0usize;
        candidates
            .into_iter()
            .enumerate()
            .map(|(position, candidate)| {
                let (text, calls) = split_parts(candidate.content.unwrap_or_default());
                let tool_calls: Vec<ChatCompletionMessageToolCall> = calls
                    .into_iter()
                    .map(|call| convert_function_call(call, &mut call_counter))
                    .collect();
                let finish_reason =
                    convert_finish_reason(candidate.finish_reason.as_deref(), !tool_calls.is_empty());
                ChatCompletionChoice {
                    index: candidate.index.unwrap_or(position as u32),
                    message: ChatCompletionMessage::assistant(text, tool_calls),
                    finish_reason,
                    logprobs: None,
                }
            })
            .collect()
    };

    Ok(CompletionResponse {
        id: resp.response_id,
        created: ctx.created,
        model: resp
            .model_version
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| ctx.model.clone()),
        usage: resp.usage_metadata.as_ref().map(convert_usage),
        object: CHAT_COMPLETION_OBJECT.to_string(),
        choices,
    })
}

/// Concatenated visible text plus function calls, in part order.
pub(crate) fn split_parts(content: GeminiContent) -> (Option<String>, Vec<GeminiFunctionCall>) {
    let mut text: Option<String> = None;
    let mut calls = Vec::new();
    for part in content.parts {
        if let Some(call) = part.function_call {
            calls.push(call);
            continue;
        }
        if part.thought == Some(true) {
            continue;
        }
        if let Some(chunk) = part.text {
            text.get_or_insert_with(String::new).push_str(&chunk);
        }
    }
    (text, calls)
}

/// Gemini 不一定返回调用 id，缺失时按出现顺序生成 `call_{n}`
pub(crate) fn convert_function_call(
    call: GeminiFunctionCall,
    counter: &mut usize,
) -> ChatCompletionMessageToolCall {
    let id = call
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("call_{counter}"));
    *counter += 1;
    let arguments = call
        .args
        .map(|args| args.to_string())
        .unwrap_or_else(|| "{}".to_string());
    ChatCompletionMessageToolCall::function(id, call.name, arguments)
}

/// FinishReason 文本 -> 统一 FinishReason
pub(crate) fn convert_finish_reason(reason: Option<&str>, has_function_call: bool) -> FinishReason {
    match reason {
        Some("STOP") if has_function_call => FinishReason::ToolCalls,
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        // SAFETY / BLOCKLIST / PROHIBITED_CONTENT / SPII / IMAGE_SAFETY 等都视为内容过滤
        Some(
            "SAFETY" | "RECITATION" | "LANGUAGE" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
            | "IMAGE_SAFETY",
        ) => FinishReason::ContentFilter,
        Some("MALFORMED_FUNCTION_CALL") => FinishReason::FunctionCall,
        _ => FinishReason::Unknown,
    }
}

pub(crate) fn convert_usage(usage: &GeminiUsageMetadata) -> CompletionUsage {
    CompletionUsage::from_counts(
        usage.prompt_token_count,
        usage.candidates_token_count,
        usage.total_token_count,
    )
}
