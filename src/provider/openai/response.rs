use crate::error::LLMError;
use crate::provider::ResponseContext;
use crate::types::{
    CHAT_COMPLETION_OBJECT, ChatCompletionChoice, ChatCompletionMessage,
    ChatCompletionMessageToolCall, CompletionResponse, CompletionUsage, FinishReason,
};

use super::types::{OpenAiChatResponse, OpenAiResponseChoice, OpenAiToolCallResponse, OpenAiUsage};

pub(crate) fn map_response(
    resp: OpenAiChatResponse,
    ctx: &ResponseContext,
) -> Result<CompletionResponse, LLMError> {
    let choices = resp
        .choices
        .ok_or_else(|| LLMError::normalization(ctx.provider, "response has no `choices`"))?;

    Ok(CompletionResponse {
        id: resp.id,
        created: resp.created.unwrap_or(ctx.created),
        model: resp
            .model
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| ctx.model.clone()),
        usage: resp.usage.map(convert_usage),
        object: resp
            .object
            .filter(|object| !object.is_empty())
            .unwrap_or_else(|| CHAT_COMPLETION_OBJECT.to_string()),
        choices: choices
            .into_iter()
            .enumerate()
            .map(|(position, choice)| convert_choice(position as u32, choice))
            .collect(),
    })
}

fn convert_choice(position: u32, choice: OpenAiResponseChoice) -> ChatCompletionChoice {
    let message = choice.message.map_or_else(
        || ChatCompletionMessage::assistant(None, Vec::new()),
        |message| ChatCompletionMessage {
            role: message.role.unwrap_or_else(|| "assistant".to_string()),
            content: message.content.map(|content| content.into_text()),
            refusal: message.refusal,
            tool_calls: message
                .tool_calls
                .map(|calls| calls.into_iter().map(convert_tool_call).collect()),
        },
    );

    ChatCompletionChoice {
        index: choice.index.unwrap_or(position),
        message,
        finish_reason: FinishReason::from_openai(choice.finish_reason.as_deref()),
        logprobs: choice.logprobs,
    }
}

fn convert_tool_call(call: OpenAiToolCallResponse) -> ChatCompletionMessageToolCall {
    let (name, arguments) = call
        .function
        .map(|function| {
            (
                function.name.unwrap_or_default(),
                function.arguments.unwrap_or_default(),
            )
        })
        .unwrap_or_default();
    ChatCompletionMessageToolCall {
        id: call.id.unwrap_or_default(),
        kind: call.kind.unwrap_or_else(|| "function".to_string()),
        function: crate::types::FunctionCall { name, arguments },
    }
}

pub(crate) fn convert_usage(usage: OpenAiUsage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens_details: usage.prompt_tokens_details,
        completion_tokens_details: usage.completion_tokens_details,
        ..CompletionUsage::from_counts(
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total_tokens,
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx() -> ResponseContext {
        ResponseContext {
            provider: "openai",
            model: "gpt-4o-mini".to_string(),
            created: 1_700_000_000,
        }
    }

    fn parse(value: serde_json::Value) -> OpenAiChatResponse {
        serde_json::from_value(value).expect("fixture should parse")
    }

    #[test]
    fn maps_text_completion() {
        let resp = parse(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_123u64,
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "hello world" },
                "finish_reason": "stop",
                "logprobs": null
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        }));

        let response = map_response(resp, &ctx()).expect("mapped");
        assert_eq!(response.id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(response.created, 1_700_000_123);
        assert_eq!(response.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(response.object, "chat.completion");
        assert_eq!(response.first_text(), Some("hello world"));
        assert_eq!(response.choices[0].finish_reason, FinishReason::Stop);
        assert_eq!(
            response.usage,
            Some(CompletionUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                ..CompletionUsage::default()
            })
        );
    }

    #[test]
    fn copies_object_and_usage_details_verbatim() {
        let resp = parse(json!({
            "object": "chat.completion.custom",
            "choices": [{ "index": 0, "message": { "content": "x" }, "finish_reason": "stop" }],
            "usage": {
                "prompt_tokens": 20,
                "completion_tokens": 8,
                "total_tokens": 28,
                "prompt_tokens_details": { "cached_tokens": 16 },
                "completion_tokens_details": { "reasoning_tokens": 5 }
            }
        }));

        let response = map_response(resp, &ctx()).expect("mapped");
        assert_eq!(response.object, "chat.completion.custom");
        let usage = response.usage.expect("usage");
        assert_eq!(usage.total_tokens, 28);
        assert_eq!(usage.prompt_tokens_details, Some(json!({ "cached_tokens": 16 })));
        assert_eq!(usage.completion_tokens_details, Some(json!({ "reasoning_tokens": 5 })));
    }

    #[test]
    fn recognized_finish_reasons_pass_through() {
        for reason in ["stop", "length", "tool_calls", "content_filter", "function_call"] {
            let resp = parse(json!({
                "choices": [{ "index": 0, "message": { "content": "x" }, "finish_reason": reason }]
            }));
            let response = map_response(resp, &ctx()).expect("mapped");
            assert_eq!(response.choices[0].finish_reason.as_str(), reason);
        }
    }

    #[test]
    fn absent_fields_fall_back_to_sentinels() {
        let resp = parse(json!({
            "choices": [
                { "message": { "content": "a" }, "finish_reason": null },
                { "message": { "content": "b" }, "finish_reason": "eos" }
            ]
        }));

        let response = map_response(resp, &ctx()).expect("mapped");
        assert_eq!(response.id, None);
        assert_eq!(response.created, 1_700_000_000);
        assert_eq!(response.model, "gpt-4o-mini");
        assert_eq!(response.usage, None);
        assert_eq!(response.choices[0].finish_reason, FinishReason::Unknown);
        assert_eq!(response.choices[1].finish_reason, FinishReason::Unknown);
        assert_eq!(response.choices[1].index, 1);
        assert_eq!(response.choices[0].message.role, "assistant");
    }

    #[test]
    fn maps_tool_calls_and_part_content() {
        let resp = parse(json!({
            "id": "gen-1",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": [{ "type": "text", "text": "checking" }],
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": { "name": "get_weather", "arguments": "{\"city\":\"Paris\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }));

        let response = map_response(resp, &ctx()).expect("mapped");
        let message = &response.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("checking"));
        let calls = message.tool_calls.as_ref().expect("tool calls");
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, "{\"city\":\"Paris\"}");
        assert_eq!(response.choices[0].finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn missing_choices_is_a_normalization_error() {
        let resp = parse(json!({ "id": "chatcmpl-2", "model": "gpt-4o" }));
        let err = map_response(resp, &ctx()).unwrap_err();
        assert!(matches!(err, LLMError::Normalization { provider: "openai", .. }));
    }
}
