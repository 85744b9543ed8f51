use crate::error::LLMError;
use crate::provider::ResponseContext;
use crate::types::{
    CHAT_COMPLETION_OBJECT, ChatCompletionChoice, ChatCompletionMessage,
    ChatCompletionMessageToolCall, CompletionResponse, CompletionUsage, FinishReason,
};

use super::types::{AnthropicContentBlock, AnthropicMessageResponse, AnthropicUsage};

/// 将 Anthropic 响应映射为统一的 [`CompletionResponse`]
pub(crate) fn map_response(
    resp: AnthropicMessageResponse,
    ctx: &ResponseContext,
) -> Result<CompletionResponse, LLMError> {
    let blocks = resp
        .content
        .ok_or_else(|| LLMError::normalization(ctx.provider, "response has no `content` field"))?;

    let (text, tool_calls) = collect_blocks(blocks);
    let message = ChatCompletionMessage::assistant(text, tool_calls);

    Ok(CompletionResponse {
        id: resp.id,
        created: ctx.created,
        model: resp
            .model
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| ctx.model.clone()),
        usage: resp.usage.map(|usage| convert_usage(&usage, None)),
        object: CHAT_COMPLETION_OBJECT.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message,
            finish_reason: convert_finish_reason(resp.stop_reason.as_deref()),
            logprobs: None,
        }],
    })
}

/// Concatenates text blocks and lifts `tool_use` blocks into tool calls.
fn collect_blocks(
    blocks: Vec<AnthropicContentBlock>,
) -> (Option<String>, Vec<ChatCompletionMessageToolCall>) {
    let mut text: Option<String> = None;
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.kind.as_str() {
            "text" => {
                if let Some(chunk) = block.text {
                    text.get_or_insert_with(String::new).push_str(&chunk);
                }
            }
            "tool_use" => {
                let arguments = block
                    .input
                    .map(|input| input.to_string())
                    .unwrap_or_else(|| "{}".to_string());
                tool_calls.push(ChatCompletionMessageToolCall::function(
                    block.id.unwrap_or_default(),
                    block.name.unwrap_or_default(),
                    arguments,
                ));
            }
            // thinking / redacted_thinking 等块不进入统一消息
            _ => {}
        }
    }
    (text, tool_calls)
}

/// `prompt_override` carries the input count remembered from `message_start` while streaming.
pub(crate) fn convert_usage(usage: &AnthropicUsage, prompt_override: Option<u64>) -> CompletionUsage {
    CompletionUsage::from_counts(
        usage.input_tokens.or(prompt_override),
        usage.output_tokens,
        None,
    )
}

pub(crate) fn convert_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ResponseContext {
        ResponseContext {
            provider: "anthropic",
            model: "claude-3-5-sonnet-latest".to_string(),
            created: 1_700_000_000,
        }
    }

    fn parse(body: &str) -> AnthropicMessageResponse {
        serde_json::from_str(body).expect("valid fixture")
    }

    #[test]
    fn maps_text_response_and_usage() {
        let resp = parse(
            r#"{
  "id": "msg_01",
  "type": "message",
  "role": "assistant",
  "model": "claude-3-5-sonnet-20241022",
  "content": [
    {"type": "text", "text": "Hello"},
    {"type": "text", "text": ", world"}
  ],
  "stop_reason": "end_turn",
  "usage": {"input_tokens": 12, "output_tokens": 4}
}"#,
        );
        let response = map_response(resp, &ctx()).expect("mapped");

        assert_eq!(response.id.as_deref(), Some("msg_01"));
        assert_eq!(response.created, 1_700_000_000);
        assert_eq!(response.model, "claude-3-5-sonnet-20241022");
        assert_eq!(response.object, "chat.completion");
        assert_eq!(response.first_text(), Some("Hello, world"));
        assert_eq!(response.choices[0].finish_reason, FinishReason::Stop);
        let usage = response.usage.expect("usage");
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(usage.total_tokens, 16);
    }

    #[test]
    fn maps_tool_use_blocks() {
        let resp = parse(
            r#"{
  "id": "msg_02",
  "content": [
    {"type": "text", "text": "Let me check."},
    {"type": "tool_use", "id": "toolu_9", "name": "get_weather", "input": {"city": "Paris"}}
  ],
  "stop_reason": "tool_use"
}"#,
        );
        let response = map_response(resp, &ctx()).expect("mapped");
        let choice = &response.choices[0];

        assert_eq!(response.model, "claude-3-5-sonnet-latest");
        assert_eq!(choice.finish_reason, FinishReason::ToolCalls);
        let calls = choice.message.tool_calls.as_ref().expect("tool calls");
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].function.name, "get_weather");
        let args: serde_json::Value =
            serde_json::from_str(&calls[0].function.arguments).expect("json args");
        assert_eq!(args["city"], "Paris");
        assert!(response.usage.is_none());
    }

    #[test]
    fn unrecognized_stop_reason_is_unknown() {
        assert_eq!(convert_finish_reason(Some("max_tokens")), FinishReason::Length);
        assert_eq!(convert_finish_reason(Some("refusal")), FinishReason::ContentFilter);
        assert_eq!(convert_finish_reason(Some("brand_new")), FinishReason::Unknown);
        assert_eq!(convert_finish_reason(None), FinishReason::Unknown);
    }

    #[test]
    fn paused_turn_is_not_reported_as_stop() {
        let resp = parse(
            r#"{
  "id": "msg_04",
  "content": [{"type": "text", "text": "Searching"}],
  "stop_reason": "pause_turn"
}"#,
        );
        let response = map_response(resp, &ctx()).expect("mapped");
        assert_eq!(response.choices[0].finish_reason, FinishReason::Unknown);
    }

    #[test]
    fn missing_content_is_a_normalization_error() {
        let resp = parse(r#"{"id": "msg_03", "type": "message"}"#);
        assert!(matches!(
            map_response(resp, &ctx()),
            Err(LLMError::Normalization { provider: "anthropic", .. })
        ));
    }
}
