use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{
    ChatCompletionMessageParam, ChatCompletionMessageToolCall, CompletionRequest, ContentPart,
    MessageContent, ResponseFormat, ToolChoice, ToolChoiceMode,
};

const PROVIDER: &str = "gemini";

/// 构建 Gemini GenerateContent 请求体
pub(crate) fn build_gemini_body(request: &CompletionRequest) -> Result<Value, LLMError> {
    let mut body = Map::new();

    // 1. system / developer 折叠为 system_instruction，其余进入 contents
    let mut system_texts = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    // tool_call_id -> 函数名；functionResponse 需要函数名而非 id
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    let mut open_function_responses = false;
    for message in &request.messages {
        match message {
            ChatCompletionMessageParam::System { content, .. }
            | ChatCompletionMessageParam::Developer { content, .. } => {
                if let Some(text) = content.text() {
                    system_texts.push(text);
                }
            }
            ChatCompletionMessageParam::User { content, .. } => {
                contents.push(json!({ "role": "user", "parts": convert_content(content)? }));
                open_function_responses = false;
            }
            ChatCompletionMessageParam::Assistant {
                content,
                refusal,
                tool_calls,
                ..
            } => {
                let calls = tool_calls.as_deref().unwrap_or_default();
                for call in calls {
                    call_names.insert(call.id.as_str(), call.function.name.as_str());
                }
                contents.push(convert_assistant(content.as_ref(), refusal.as_deref(), calls)?);
                open_function_responses = false;
            }
            ChatCompletionMessageParam::Tool {
                content,
                tool_call_id,
            } => {
                let part = convert_tool_result(tool_call_id, content, &call_names)?;
                if open_function_responses {
                    if let Some(parts) = contents
                        .last_mut()
                        .and_then(|last| last.get_mut("parts"))
                        .and_then(Value::as_array_mut)
                    {
                        parts.push(part);
                        continue;
                    }
                }
                contents.push(json!({ "role": "user", "parts": [part] }));
                open_function_responses = true;
            }
        }
    }

    if contents.is_empty() {
        return Err(LLMError::invalid_request(
            PROVIDER,
            "request requires at least one non-system message",
        ));
    }
    body.insert("contents".to_string(), Value::Array(contents));

    if !system_texts.is_empty() {
        body.insert(
            "system_instruction".to_string(),
            json!({ "parts": [{ "text": system_texts.join("\n\n") }] }),
        );
    }

    // 2. generationConfig
    if let Some(config) = build_generation_config(request) {
        body.insert("generationConfig".to_string(), config);
    }

    // 3. tools 与 toolConfig
    if !request.tools().is_empty() {
        let declarations: Vec<Value> = request
            .tools()
            .iter()
            .map(|tool| {
                let mut decl = Map::new();
                decl.insert(
                    "name".to_string(),
                    Value::String(tool.function.name.clone()),
                );
                if let Some(description) = &tool.function.description {
                    decl.insert(
                        "description".to_string(),
                        Value::String(description.clone()),
                    );
                }
                if let Some(parameters) = &tool.function.parameters {
                    decl.insert("parameters".to_string(), parameters.clone());
                }
                Value::Object(decl)
            })
            .collect();
        body.insert(
            "tools".to_string(),
            json!([{ "functionDeclarations": declarations }]),
        );
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("toolConfig".to_string(), convert_tool_choice(choice));
    }

    Ok(Value::Object(body))
}

fn convert_content(content: &MessageContent) -> Result<Vec<Value>, LLMError> {
    content.parts().iter().map(convert_content_part).collect()
}

fn convert_content_part(part: &ContentPart) -> Result<Value, LLMError> {
    match part {
        ContentPart::Text { text } => Ok(json!({ "text": text })),
        ContentPart::Refusal { refusal } => Ok(json!({ "text": refusal })),
        ContentPart::ImageUrl { image_url } => match image_url.data_uri() {
            Some((mime, data)) => Ok(json!({
                "inlineData": { "mimeType": mime, "data": data }
            })),
            None => Ok(json!({
                "fileData": {
                    "mimeType": guess_image_mime(&image_url.url),
                    "fileUri": image_url.url,
                }
            })),
        },
        ContentPart::InputAudio { input_audio } => Ok(json!({
            "inlineData": {
                "mimeType": format!("audio/{}", input_audio.format),
                "data": input_audio.data,
            }
        })),
    }
}

fn guess_image_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn convert_assistant(
    content: Option<&MessageContent>,
    refusal: Option<&str>,
    tool_calls: &[ChatCompletionMessageToolCall],
) -> Result<Value, LLMError> {
    let mut parts = match content {
        Some(content) => convert_content(content)?,
        None => Vec::new(),
    };
    parts.retain(|part| part.get("text").and_then(Value::as_str) != Some(""));
    if parts.is_empty() {
        if let Some(refusal) = refusal {
            parts.push(json!({ "text": refusal }));
        }
    }

    for call in tool_calls {
        let args = if call.function.arguments.trim().is_empty() {
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
        parts.push(json!({
            "functionCall": { "name": call.function.name, "args": args }
        }));
    }

    if parts.is_empty() {
        return Err(LLMError::invalid_request(
            PROVIDER,
            "assistant message must carry content or tool calls",
        ));
    }
    // Gemini 使用 model 表示助手
    Ok(json!({ "role": "model", "parts": parts }))
}

fn convert_tool_result(
    tool_call_id: &str,
    content: &MessageContent,
    call_names: &HashMap<&str, &str>,
) -> Result<Value, LLMError> {
    if tool_call_id.is_empty() {
        return Err(LLMError::invalid_request(
            PROVIDER,
            "tool message requires a tool_call_id",
        ));
    }
    let Some(name) = call_names.get(tool_call_id) else {
        return Err(LLMError::invalid_request(
            PROVIDER,
            format!("tool message `{tool_call_id}` does not answer any earlier tool call"),
        ));
    };

    // response 必须是 JSON 对象；非对象结果包一层 content
    let text = content.text().unwrap_or_default();
    let response = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(object)) => Value::Object(object),
        _ => json!({ "content": text }),
    };
    Ok(json!({
        "functionResponse": { "name": name, "response": response }
    }))
}

fn build_generation_config(request: &CompletionRequest) -> Option<Value> {
    let mut cfg = Map::new();
    if let Some(temperature) = request.temperature {
        cfg.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = request.top_p {
        cfg.insert("topP".to_string(), Value::from(top_p));
    }
    if let Some(max_tokens) = request.max_tokens {
        cfg.insert("maxOutputTokens".to_string(), Value::from(max_tokens));
    }
    let stop = request.stop_sequences();
    if !stop.is_empty() {
        cfg.insert("stopSequences".to_string(), json!(stop));
    }
    if let Some(presence) = request.presence_penalty {
        cfg.insert("presencePenalty".to_string(), Value::from(presence));
    }
    if let Some(frequency) = request.frequency_penalty {
        cfg.insert("frequencyPenalty".to_string(), Value::from(frequency));
    }
    if let Some(n) = request.n {
        cfg.insert("candidateCount".to_string(), Value::from(n));
    }
    if let Some(seed) = request.seed {
        cfg.insert("seed".to_string(), Value::from(seed));
    }
    match &request.response_format {
        Some(ResponseFormat::JsonObject) => {
            cfg.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
        }
        Some(ResponseFormat::JsonSchema { json_schema }) => {
            cfg.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
            // OpenAI 形式为 { name, schema, strict }
            let schema = json_schema.get("schema").unwrap_or(json_schema);
            cfg.insert("responseSchema".to_string(), schema.clone());
        }
        Some(ResponseFormat::Text) | None => {}
    }

    if cfg.is_empty() {
        None
    } else {
        Some(Value::Object(cfg))
    }
}

/// ToolChoice -> toolConfig.functionCallingConfig
fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => {
            json!({ "functionCallingConfig": { "mode": "AUTO" } })
        }
        ToolChoice::Mode(ToolChoiceMode::Required) => {
            json!({ "functionCallingConfig": { "mode": "ANY" } })
        }
        ToolChoice::Mode(ToolChoiceMode::None) => {
            json!({ "functionCallingConfig": { "mode": "NONE" } })
        }
        ToolChoice::Named(named) => json!({
            "functionCallingConfig": {
                "mode": "ANY",
                "allowedFunctionNames": [named.function.name]
            }
        }),
    }
}
