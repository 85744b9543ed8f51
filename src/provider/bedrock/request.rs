use aws_sdk_bedrockruntime::error::BuildError;
use aws_sdk_bedrockruntime::types::{
    AnyToolChoice, AutoToolChoice, ContentBlock, ConversationRole, ImageBlock, ImageFormat,
    ImageSource, InferenceConfiguration, Message, SpecificToolChoice, SystemContentBlock, Tool,
    ToolChoice as BedrockToolChoice, ToolConfiguration, ToolInputSchema, ToolResultBlock,
    ToolResultContentBlock, ToolSpecification, ToolUseBlock,
};
use aws_smithy_types::Blob;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use crate::error::LLMError;
use crate::types::{
    ChatCompletionMessageParam, ChatCompletionMessageToolCall, ChatCompletionTool, CompletionRequest,
    ContentPart, MessageContent, ToolChoice, ToolChoiceMode,
};

use super::document::value_to_document;

const PROVIDER: &str = "bedrock";

/// Converse / ConverseStream 共用的输入
#[derive(Debug, Clone)]
pub(crate) struct ConverseInput {
    pub(crate) system: Vec<SystemContentBlock>,
    pub(crate) messages: Vec<Message>,
    pub(crate) inference_config: Option<InferenceConfiguration>,
    pub(crate) tool_config: Option<ToolConfiguration>,
}

/// Build Bedrock Converse API input from the canonical request
pub(crate) fn build_converse_input(request: &CompletionRequest) -> Result<ConverseInput, LLMError> {
    let mut system = Vec::new();
    let mut messages = Vec::new();
    // 连续的 tool 消息合并为同一条 user 消息
    let mut pending_results: Vec<ContentBlock> = Vec::new();

    for message in &request.messages {
        if !matches!(message, ChatCompletionMessageParam::Tool { .. }) && !pending_results.is_empty()
        {
            messages.push(build_message(
                ConversationRole::User,
                std::mem::take(&mut pending_results),
            )?);
        }
        match message {
            ChatCompletionMessageParam::System { content, .. }
            | ChatCompletionMessageParam::Developer { content, .. } => {
                if let Some(text) = content.text() {
                    system.push(SystemContentBlock::Text(text));
                }
            }
            ChatCompletionMessageParam::User { content, .. } => {
                messages.push(build_message(
                    ConversationRole::User,
                    convert_content(content)?,
                )?);
            }
            ChatCompletionMessageParam::Assistant {
                content,
                refusal,
                tool_calls,
                ..
            } => {
                let blocks = convert_assistant(
                    content.as_ref(),
                    refusal.as_deref(),
                    tool_calls.as_deref().unwrap_or_default(),
                )?;
                messages.push(build_message(ConversationRole::Assistant, blocks)?);
            }
            ChatCompletionMessageParam::Tool {
                content,
                tool_call_id,
            } => pending_results.push(convert_tool_result(tool_call_id, content)?),
        }
    }
    if !pending_results.is_empty() {
        messages.push(build_message(ConversationRole::User, pending_results)?);
    }

    if messages.is_empty() {
        return Err(LLMError::invalid_request(
            PROVIDER,
            "request requires at least one user/assistant message",
        ));
    }

    Ok(ConverseInput {
        system,
        messages,
        inference_config: build_inference_config(request),
        tool_config: build_tool_config(request)?,
    })
}

fn build_error(err: BuildError) -> LLMError {
    LLMError::invalid_request(PROVIDER, err.to_string())
}

fn build_message(role: ConversationRole, content: Vec<ContentBlock>) -> Result<Message, LLMError> {
    Message::builder()
        .role(role)
        .set_content(Some(content))
        .build()
        .map_err(build_error)
}

fn convert_content(content: &MessageContent) -> Result<Vec<ContentBlock>, LLMError> {
    content.parts().iter().map(convert_content_part).collect()
}

fn convert_content_part(part: &ContentPart) -> Result<ContentBlock, LLMError> {
    match part {
        ContentPart::Text { text } => Ok(ContentBlock::Text(text.clone())),
        ContentPart::Refusal { refusal } => Ok(ContentBlock::Text(refusal.clone())),
        ContentPart::ImageUrl { image_url } => {
            // Converse 只接受内联图片字节
            let Some((mime, data)) = image_url.data_uri() else {
                return Err(LLMError::invalid_request(
                    PROVIDER,
                    "images must be sent as base64 data URIs",
                ));
            };
            let format = match mime {
                "image/png" => ImageFormat::Png,
                "image/jpeg" | "image/jpg" => ImageFormat::Jpeg,
                "image/gif" => ImageFormat::Gif,
                "image/webp" => ImageFormat::Webp,
                other => {
                    return Err(LLMError::invalid_request(
                        PROVIDER,
                        format!("unsupported image type `{other}`"),
                    ));
                }
            };
            let bytes = STANDARD.decode(data).map_err(|err| {
                LLMError::invalid_request(PROVIDER, format!("invalid base64 image data: {err}"))
            })?;
            let image = ImageBlock::builder()
                .format(format)
                .source(ImageSource::Bytes(Blob::new(bytes)))
                .build()
                .map_err(build_error)?;
            Ok(ContentBlock::Image(image))
        }
        ContentPart::InputAudio { .. } => Err(LLMError::invalid_request(
            PROVIDER,
            "audio input is not supported by Bedrock Converse",
        )),
    }
}

fn convert_assistant(
    content: Option<&MessageContent>,
    refusal: Option<&str>,
    tool_calls: &[ChatCompletionMessageToolCall],
) -> Result<Vec<ContentBlock>, LLMError> {
    let mut blocks = match content {
        Some(content) => convert_content(content)?,
        None => Vec::new(),
    };
    // Converse 拒绝空文本块
    blocks.retain(|block| !matches!(block, ContentBlock::Text(text) if text.is_empty()));
    if blocks.is_empty() {
        if let Some(refusal) = refusal {
            blocks.push(ContentBlock::Text(refusal.to_string()));
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
        let tool_use = ToolUseBlock::builder()
            .tool_use_id(&call.id)
            .name(&call.function.name)
            .input(value_to_document(&input))
            .build()
            .map_err(build_error)?;
        blocks.push(ContentBlock::ToolUse(tool_use));
    }

    if blocks.is_empty() {
        return Err(LLMError::invalid_request(
            PROVIDER,
            "assistant message must carry content or tool calls",
        ));
    }
    Ok(blocks)
}

fn convert_tool_result(tool_call_id: &str, content: &MessageContent) -> Result<ContentBlock, LLMError> {
    if tool_call_id.is_empty() {
        return Err(LLMError::invalid_request(
            PROVIDER,
            "tool message requires a tool_call_id",
        ));
    }
    let result = ToolResultBlock::builder()
        .tool_use_id(tool_call_id)
        .content(ToolResultContentBlock::Text(
            content.text().unwrap_or_default(),
        ))
        .build()
        .map_err(build_error)?;
    Ok(ContentBlock::ToolResult(result))
}

/// Build inference configuration from the request parameters
fn build_inference_config(request: &CompletionRequest) -> Option<InferenceConfiguration> {
    let stop = request.stop_sequences();
    if request.max_tokens.is_none()
        && request.temperature.is_none()
        && request.top_p.is_none()
        && stop.is_empty()
    {
        return None;
    }

    let mut config = InferenceConfiguration::builder();
    if let Some(max_tokens) = request.max_tokens {
        config = config.max_tokens(i32::try_from(max_tokens).unwrap_or(i32::MAX));
    }
    if let Some(temperature) = request.temperature {
        config = config.temperature(temperature as f32);
    }
    if let Some(top_p) = request.top_p {
        config = config.top_p(top_p as f32);
    }
    if !stop.is_empty() {
        config = config.set_stop_sequences(Some(stop));
    }
    Some(config.build())
}

/// Build tool configuration; `tool_choice: none` drops the tools entirely.
fn build_tool_config(request: &CompletionRequest) -> Result<Option<ToolConfiguration>, LLMError> {
    if request.tools().is_empty()
        || matches!(request.tool_choice, Some(ToolChoice::Mode(ToolChoiceMode::None)))
    {
        return Ok(None);
    }

    let mut builder = ToolConfiguration::builder();
    for tool in request.tools() {
        builder = builder.tools(convert_tool(tool)?);
    }
    let choice = match &request.tool_choice {
        Some(ToolChoice::Mode(ToolChoiceMode::Auto)) => {
            Some(BedrockToolChoice::Auto(AutoToolChoice::builder().build()))
        }
        Some(ToolChoice::Mode(ToolChoiceMode::Required)) => {
            Some(BedrockToolChoice::Any(AnyToolChoice::builder().build()))
        }
        Some(ToolChoice::Named(named)) => Some(BedrockToolChoice::Tool(
            SpecificToolChoice::builder()
                .name(&named.function.name)
                .build()
                .map_err(build_error)?,
        )),
        Some(ToolChoice::Mode(ToolChoiceMode::None)) | None => None,
    };
    builder = builder.set_tool_choice(choice);
    builder.build().map(Some).map_err(build_error)
}

fn convert_tool(tool: &ChatCompletionTool) -> Result<Tool, LLMError> {
    let schema = tool
        .function
        .parameters
        .clone()
        .unwrap_or_else(|| json!({ "type": "object", "properties": {} }));
    let spec = ToolSpecification::builder()
        .name(&tool.function.name)
        .set_description(tool.function.description.clone())
        .input_schema(ToolInputSchema::Json(value_to_document(&schema)))
        .build()
        .map_err(build_error)?;
    Ok(Tool::ToolSpec(spec))
}
