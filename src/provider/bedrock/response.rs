use aws_sdk_bedrockruntime::operation::converse::ConverseOutput as ConverseOperationOutput;
use aws_sdk_bedrockruntime::types as sdk;

use crate::error::LLMError;
use crate::provider::ResponseContext;
use crate::types::{
    CHAT_COMPLETION_OBJECT, ChatCompletionChoice, ChatCompletionMessage,
    ChatCompletionMessageToolCall, CompletionResponse, CompletionUsage, FinishReason,
};

use super::document::document_to_value;
use super::types::{
    ConverseContentBlock, ConverseMessage, ConverseOutputBody, ConverseResponse, ConverseToolUse,
    ConverseUsage,
};

/// Copies the SDK output into plain data.
pub(crate) fn from_sdk_output(output: &ConverseOperationOutput) -> ConverseResponse {
    let message = match output.output() {
        Some(sdk::ConverseOutput::Message(message)) => Some(ConverseMessage {
            content: message.content().iter().filter_map(from_sdk_block).collect(),
        }),
        _ => None,
    };
    ConverseResponse {
        output: Some(ConverseOutputBody { message }),
        stop_reason: Some(output.stop_reason().as_str().to_string()),
        usage: output.usage().map(from_sdk_usage),
    }
}

fn from_sdk_block(block: &sdk::ContentBlock) -> Option<ConverseContentBlock> {
    match block {
        sdk::ContentBlock::Text(text) => Some(ConverseContentBlock {
            text: Some(text.clone()),
            tool_use: None,
        }),
        sdk::ContentBlock::ToolUse(tool_use) => Some(ConverseContentBlock {
            text: None,
            tool_use: Some(ConverseToolUse {
                tool_use_id: tool_use.tool_use_id().to_string(),
                name: tool_use.name().to_string(),
                input: document_to_value(tool_use.input()),
            }),
        }),
        // reasoningContent / image / document 等块不进入统一消息
        _ => None,
    }
}

pub(crate) fn from_sdk_usage(usage: &sdk::TokenUsage) -> ConverseUsage {
    ConverseUsage {
        input_tokens: u64::try_from(usage.input_tokens()).unwrap_or(0),
        output_tokens: u64::try_from(usage.output_tokens()).unwrap_or(0),
        total_tokens: u64::try_from(usage.total_tokens()).ok(),
    }
}

/// 将 Converse 响应映射为统一的 [`CompletionResponse`]
///
/// Converse does not return a response id, so `id` is always `None`.
pub(crate) fn map_response(
    resp: ConverseResponse,
    ctx: &ResponseContext,
) -> Result<CompletionResponse, LLMError> {
    let message = resp
        .output
        .and_then(|output| output.message)
        .ok_or_else(|| LLMError::normalization(ctx.provider, "response has no output message"))?;

    let mut text: Option<String> = None;
    let mut tool_calls = Vec::new();
    for block in message.content {
        if let Some(chunk) = block.text {
            text.get_or_insert_with(String::new).push_str(&chunk);
        }
        if let Some(tool_use) = block.tool_use {
            tool_calls.push(ChatCompletionMessageToolCall::function(
                tool_use.tool_use_id,
                tool_use.name,
                tool_use.input.to_string(),
            ));
        }
    }

    Ok(CompletionResponse {
        id: None,
        created: ctx.created,
        model: ctx.model.clone(),
        usage: resp.usage.map(convert_usage),
        object: CHAT_COMPLETION_OBJECT.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionMessage::assistant(text, tool_calls),
            finish_reason: convert_stop_reason(resp.stop_reason.as_deref()),
            logprobs: None,
        }],
    })
}

pub(crate) fn convert_usage(usage: ConverseUsage) -> CompletionUsage {
    CompletionUsage::from_counts(
        Some(usage.input_tokens),
        Some(usage.output_tokens),
        usage.total_tokens,
    )
}

pub(crate) fn convert_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn" | "stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("content_filtered" | "guardrail_intervened") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use aws_smithy_types::Document;

    use super::*;

    fn ctx() -> ResponseContext {
        ResponseContext {
            provider: "bedrock",
            model: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            created: 1_700_000_500,
        }
    }

    fn parse(body: &str) -> ConverseResponse {
        serde_json::from_str(body).expect("valid fixture")
    }

    #[test]
    fn maps_text_output_usage_and_null_id() {
        let resp = parse(
            r#"{
  "output": {"message": {"role": "assistant", "content": [{"text": "Bonjour"}]}},
  "stopReason": "end_turn",
  "usage": {"inputTokens": 9, "outputTokens": 3, "totalTokens": 12},
  "metrics": {"latencyMs": 321}
}"#,
        );
        let mapped = map_response(resp, &ctx()).expect("mapped");

        assert!(mapped.id.is_none());
        assert_eq!(mapped.model, "anthropic.claude-3-haiku-20240307-v1:0");
        assert_eq!(mapped.created, 1_700_000_500);
        assert_eq!(mapped.first_text(), Some("Bonjour"));
        assert_eq!(mapped.choices[0].finish_reason, FinishReason::Stop);
        let usage = mapped.usage.expect("usage");
        assert_eq!((usage.prompt_tokens, usage.completion_tokens, usage.total_tokens), (9, 3, 12));
    }

    #[test]
    fn maps_tool_use_blocks() {
        let resp = parse(
            r#"{
  "output": {"message": {"role": "assistant", "content": [
    {"toolUse": {"toolUseId": "tooluse_abc", "name": "get_weather", "input": {"city": "Lima"}}}
  ]}},
  "stopReason": "tool_use"
}"#,
        );
        let mapped = map_response(resp, &ctx()).expect("mapped");
        let choice = &mapped.choices[0];

        assert_eq!(choice.finish_reason, FinishReason::ToolCalls);
        assert!(choice.message.content.is_none());
        let calls = choice.message.tool_calls.as_ref().expect("calls");
        assert_eq!(calls[0].id, "tooluse_abc");
        assert_eq!(calls[0].function.arguments, r#"{"city":"Lima"}"#);
    }

    #[test]
    fn stop_reason_table() {
        assert_eq!(convert_stop_reason(Some("stop_sequence")), FinishReason::Stop);
        assert_eq!(convert_stop_reason(Some("max_tokens")), FinishReason::Length);
        assert_eq!(
            convert_stop_reason(Some("guardrail_intervened")),
            FinishReason::ContentFilter
        );
        assert_eq!(convert_stop_reason(Some("model_context_window_exceeded")), FinishReason::Unknown);
        assert_eq!(convert_stop_reason(None), FinishReason::Unknown);
    }

    #[test]
    fn missing_output_message_is_a_normalization_error() {
        let resp = parse(r#"{"stopReason": "end_turn"}"#);
        assert!(matches!(
            map_response(resp, &ctx()),
            Err(LLMError::Normalization { provider: "bedrock", .. })
        ));
    }

    #[test]
    fn sdk_blocks_are_copied_into_plain_data() {
        let text = from_sdk_block(&sdk::ContentBlock::Text("hi".to_string())).expect("text");
        assert_eq!(text.text.as_deref(), Some("hi"));

        let tool_use = sdk::ToolUseBlock::builder()
            .tool_use_id("t1")
            .name("lookup")
            .input(Document::Object(
                [("q".to_string(), Document::String("rust".to_string()))]
                    .into_iter()
                    .collect(),
            ))
            .build()
            .expect("tool use");
        let block = from_sdk_block(&sdk::ContentBlock::ToolUse(tool_use)).expect("tool block");
        let tool_use = block.tool_use.expect("tool_use");
        assert_eq!(tool_use.tool_use_id, "t1");
        assert_eq!(tool_use.input["q"], "rust");
    }
}
