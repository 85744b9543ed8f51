use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{
    ChatCompletionMessageParam, ChatCompletionMessageToolCall, ChatCompletionTool, CompletionRequest,
    ContentPart, MessageContent, ToolChoice, ToolChoiceMode,
};

/// Anthropic rejects requests without `max_tokens`.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

const PROVIDER: &str = "anthropic";

/// 构建 Anthropic Messages 请求体
pub(crate) fn build_anthropic_body(
    request: &CompletionRequest,
    stream: bool,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(request.model.clone()));

    // 1. system / developer 折叠为顶层 system，其余进入 messages
    let mut system_texts = Vec::new();
    let mut messages: Vec<Value> = Vec::new();
    // 上一条是否为 tool_result 组成的 user 消息，连续的工具结果合并到同一条
    let mut open_tool_results = false;
    for message in &request.messages {
        match message {
            ChatCompletionMessageParam::System { content, .. }
            | ChatCompletionMessageParam::Developer { content, .. } => {
                if let Some(text) = content.text() {
                    system_texts.push(text);
                }
            }
            ChatCompletionMessageParam::User { content, .. } => {
                messages.push(json!({
                    "role": "user",
                    "content": convert_content(content)?,
                }));
                open_tool_results = false;
            }
            ChatCompletionMessageParam::Assistant {
                content,
                refusal,
                tool_calls,
                ..
            } => {
                messages.push(convert_assistant(
                    content.as_ref(),
                    refusal.as_deref(),
                    tool_calls.as_deref().unwrap_or_default(),
                )?);
                open_tool_results = false;
            }
            ChatCompletionMessageParam::Tool {
                content,
                tool_call_id,
            } => {
                let block = convert_tool_result(tool_call_id, content)?;
                if open_tool_results {
                    if let Some(blocks) = messages
                        .last_mut()
                        .and_then(|last| last.get_mut("content"))
                        .and_then(Value::as_array_mut)
                    {
                        blocks.push(block);
                        continue;
                    }
                }
                messages.push(json!({ "role": "user", "content": [block] }));
                open_tool_results = true;
            }
        }
    }

    if messages.is_empty() {
        return Err(LLMError::invalid_request(
            PROVIDER,
            "request requires at least one user/assistant message",
        ));
    }
    body.insert("messages".to_string(), Value::Array(messages));

    if !system_texts.is_empty() {
        body.insert(
            "system".to_string(),
            Value::String(system_texts.join("\n\n")),
        );
    }

    // 2. 采样与生成控制参数
    body.insert(
        "max_tokens".to_string(),
        Value::from(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );
    if let Some(temperature) = request.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = request.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    let stop = request.stop_sequences();
    if !stop.is_empty() {
        body.insert("stop_sequences".to_string(), json!(stop));
    }

    // 3. tools 与 tool_choice
    if !request.tools().is_empty() {
        body.insert(
            "tools".to_string(),
            Value::Array(request.tools().iter().map(convert_tool).collect()),
        );
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("tool_choice".to_string(), convert_tool_choice(choice));
    }

    // 4. user 映射到 metadata.user_id
    if let Some(user) = &request.user {
        body.insert("metadata".to_string(), json!({ "user_id": user }));
    }

    body.insert("stream".to_string(), Value::Bool(stream));

    Ok(Value::Object(body))
}

fn convert_content(content: &MessageContent) -> Result<Vec<Value>, LLMError> {
    content.parts().iter().map(convert_content_part).collect()
}

fn convert_content_part(part: &ContentPart) -> Result<Value, LLMError> {
    match part {
        ContentPart::Text { text } => Ok(json!({ "type": "text", "text": text })),
        ContentPart::Refusal { refusal } => Ok(json!({ "type": "text", "text": refusal })),
        ContentPart::ImageUrl { image_url } => match image_url.data_uri() {
            Some((media_type, data)) => Ok(json!({
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": data },
            })),
            None => Ok(json!({
                "type": "image",
                "source": { "type": "url", "url": image_url.url },
            })),
        },
        ContentPart::InputAudio { .. } => Err(LLMError::invalid_request(
            PROVIDER,
            "audio input is not supported by Anthropic Messages",
        )),
    }
}

fn convert_assistant(
    content: Option<&MessageContent>,
    refusal: Option<&str>,
    tool_calls: &[ChatCompletionMessageToolCall],
) -> Result<Value, LLMError> {
    let mut blocks = match content {
        Some(content) => convert_content(content)?,
        None => Vec::new(),
    };
    // Anthropic 拒绝空文本块
    blocks.retain(|block| block.get("text").and_then(Value::as_str) != Some(""));
    if blocks.is_empty() {
        if let Some(refusal) = refusal {
            blocks.push(json!({ "type": "text", "text": refusal }));
        }
    }

    for call in tool_calls {
        let input = if call.function.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str::<Value>(&call.function.arguments).map_err(|err| {
                LLMError::invalid_request(
                    PROVIDER,
                    format!(
                        "tool call `{}` arguments are not valid JSON: {err}",
                        call.id
                    ),
                )
            })?
        };
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.function.name,
            "input": input,
        }));
    }

    if blocks.is_empty() {
        return Err(LLMError::invalid_request(
            PROVIDER,
            "assistant message must carry content or tool calls",
        ));
    }
    Ok(json!({ "role": "assistant", "content": blocks }))
}

fn convert_tool_result(tool_call_id: &str, content: &MessageContent) -> Result<Value, LLMError> {
    if tool_call_id.is_empty() {
        return Err(LLMError::invalid_request(
            PROVIDER,
            "tool message requires a tool_call_id",
        ));
    }
    Ok(json!({
        "type": "tool_result",
        "tool_use_id": tool_call_id,
        "content": content.text().unwrap_or_default(),
    }))
}

fn convert_tool(tool: &ChatCompletionTool) -> Value {
    let mut obj = Map::new();
    obj.insert(
        "name".to_string(),
        Value::String(tool.function.name.clone()),
    );
    if let Some(description) = &tool.function.description {
        obj.insert(
            "description".to_string(),
            Value::String(description.clone()),
        );
    }
    obj.insert(
        "input_schema".to_string(),
        tool.function
            .parameters
            .clone()
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
    );
    Value::Object(obj)
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => json!({ "type": "auto" }),
        ToolChoice::Mode(ToolChoiceMode::Required) => json!({ "type": "any" }),
        ToolChoice::Mode(ToolChoiceMode::None) => json!({ "type": "none" }),
        ToolChoice::Named(named) => json!({ "type": "tool", "name": named.function.name }),
    }
}
