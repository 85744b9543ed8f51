//! Canonical chat-completion request and response shapes shared by every provider.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `object` value of a non-streaming completion.
pub const CHAT_COMPLETION_OBJECT: &str = "chat.completion";
/// `object` value of a streaming chunk.
pub const CHAT_COMPLETION_CHUNK_OBJECT: &str = "chat.completion.chunk";

/// One turn in a conversation, tagged by `role`.
///
/// The order of a request's messages is meaningful and is forwarded unchanged to the
/// provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatCompletionMessageParam {
    System {
        content: MessageContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Developer {
        content: MessageContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    User {
        content: MessageContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Assistant {
        #[serde(default)]
        content: Option<MessageContent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refusal: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ChatCompletionMessageToolCall>>,
    },
    Tool {
        content: MessageContent,
        tool_call_id: String,
    },
}

impl ChatCompletionMessageParam {
    /// Builds a system message with text content.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: MessageContent::Text(text.into()),
            name: None,
        }
    }

    /// Builds a developer message with text content.
    pub fn developer(text: impl Into<String>) -> Self {
        Self::Developer {
            content: MessageContent::Text(text.into()),
            name: None,
        }
    }

    /// Builds a user message with text content.
    ///
    /// # Examples
    ///
    /// ```
    /// use polyllm::types::ChatCompletionMessageParam;
    ///
    /// let message = ChatCompletionMessageParam::user("hi");
    /// assert_eq!(message.role(), "user");
    /// assert_eq!(message.text().as_deref(), Some("hi"));
    /// ```
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: MessageContent::Text(text.into()),
            name: None,
        }
    }

    /// Builds an assistant message with text content.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(MessageContent::Text(text.into())),
            name: None,
            refusal: None,
            tool_calls: None,
        }
    }

    /// Builds an assistant message that only carries tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<ChatCompletionMessageToolCall>) -> Self {
        Self::Assistant {
            content: None,
            name: None,
            refusal: None,
            tool_calls: Some(tool_calls),
        }
    }

    /// Builds a tool-result message answering the call `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Tool {
            content: MessageContent::Text(text.into()),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// Returns the wire name of the message role.
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Developer { .. } => "developer",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    /// Returns the message content, if any.
    pub fn content(&self) -> Option<&MessageContent> {
        match self {
            Self::System { content, .. }
            | Self::Developer { content, .. }
            | Self::User { content, .. }
            | Self::Tool { content, .. } => Some(content),
            Self::Assistant { content, .. } => content.as_ref(),
        }
    }

    /// Concatenates all text carried by the message.
    pub fn text(&self) -> Option<String> {
        self.content().and_then(MessageContent::text)
    }
}

/// Message content: either a plain string or an ordered list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Joins the text parts with newlines; `None` when there is no text at all.
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Parts(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join("\n"))
                }
            }
        }
    }

    /// Returns the content as a list of parts, wrapping plain text in a single part.
    pub fn parts(&self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) => vec![ContentPart::Text { text: text.clone() }],
            Self::Parts(parts) => parts.clone(),
        }
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// A typed piece of multimodal message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InputAudio { input_audio: InputAudio },
    Refusal { refusal: String },
}

/// Image reference: an `http(s)` URL or a `data:` URI with base64 payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ImageUrl {
    /// Splits a `data:<mime>;base64,<payload>` URI into its MIME type and payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use polyllm::types::ImageUrl;
    ///
    /// let image = ImageUrl { url: "data:image/png;base64,AAAA".into(), detail: None };
    /// assert_eq!(image.data_uri(), Some(("image/png", "AAAA")));
    /// ```
    pub fn data_uri(&self) -> Option<(&str, &str)> {
        let rest = self.url.strip_prefix("data:")?;
        let (header, data) = rest.split_once(',')?;
        let mime = header.strip_suffix(";base64")?;
        Some((mime, data))
    }
}

/// Base64 audio payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudio {
    pub data: String,
    pub format: String,
}

/// Tool call issued by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionMessageToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ChatCompletionMessageToolCall {
    /// Builds a function tool call with JSON-encoded arguments.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function name plus JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

/// Tool declaration; forwarded to providers without modification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionTool {
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionDefinition,
}

impl ChatCompletionTool {
    /// Declares a function tool.
    pub fn function(
        name: impl Into<String>,
        description: Option<String>,
        parameters: Option<Value>,
    ) -> Self {
        Self {
            kind: function_kind(),
            function: FunctionDefinition {
                name: name.into(),
                description,
                parameters,
                strict: None,
            },
        }
    }
}

/// Function signature: name, description and JSON-schema parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// How the model may pick tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Named(NamedToolChoice),
}

impl ToolChoice {
    /// Forces a call of the named function.
    pub fn function(name: impl Into<String>) -> Self {
        Self::Named(NamedToolChoice {
            kind: function_kind(),
            function: NamedFunction { name: name.into() },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedToolChoice {
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: NamedFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFunction {
    pub name: String,
}

/// Requested output format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    /// `json_schema` holds `{name, schema, strict?}` as sent by the caller.
    JsonSchema { json_schema: Value },
}

/// Stop sequences, accepted as a single string or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    Single(String),
    Multiple(Vec<String>),
}

impl StopSequences {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::Single(value) => vec![value.clone()],
            Self::Multiple(values) => values.clone(),
        }
    }
}

/// Canonical chat-completion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatCompletionMessageParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatCompletionTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl CompletionRequest {
    /// Creates a request for `model` with the given conversation.
    ///
    /// # Examples
    ///
    /// ```
    /// use polyllm::types::{ChatCompletionMessageParam, CompletionRequest};
    ///
    /// let request = CompletionRequest::new("gpt-4o-mini", vec![ChatCompletionMessageParam::user("hi")])
    ///     .with_max_tokens(64);
    /// assert_eq!(request.max_tokens, Some(64));
    /// assert!(!request.is_stream());
    /// ```
    pub fn new(model: impl Into<String>, messages: Vec<ChatCompletionMessageParam>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ChatCompletionTool>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Whether the caller asked for a streaming response.
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Declared tools, empty when none were given.
    pub fn tools(&self) -> &[ChatCompletionTool] {
        self.tools.as_deref().unwrap_or_default()
    }

    /// Stop sequences as a list, empty when none were given.
    pub fn stop_sequences(&self) -> Vec<String> {
        self.stop.as_ref().map(StopSequences::to_vec).unwrap_or_default()
    }
}

/// Why generation stopped.
///
/// `Unknown` is the canonical sentinel used whenever the provider's value is absent,
/// null or not one of the recognized reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    FunctionCall,
    #[serde(other)]
    Unknown,
}

impl FinishReason {
    /// Parses an OpenAI-style reason, falling back to [`FinishReason::Unknown`].
    ///
    /// # Examples
    ///
    /// ```
    /// use polyllm::types::FinishReason;
    ///
    /// assert_eq!(FinishReason::from_openai(Some("tool_calls")), FinishReason::ToolCalls);
    /// assert_eq!(FinishReason::from_openai(Some("eos")), FinishReason::Unknown);
    /// assert_eq!(FinishReason::from_openai(None), FinishReason::Unknown);
    /// ```
    pub fn from_openai(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => Self::Stop,
            Some("length") => Self::Length,
            Some("tool_calls") => Self::ToolCalls,
            Some("content_filter") => Self::ContentFilter,
            Some("function_call") => Self::FunctionCall,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::FunctionCall => "function_call",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token accounting.
///
/// The `*_details` objects are only filled by OpenAI-compatible vendors and are
/// copied as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<Value>,
}

impl CompletionUsage {
    /// Builds usage from optional counters; a missing total is the sum of the parts.
    pub fn from_counts(prompt: Option<u64>, completion: Option<u64>, total: Option<u64>) -> Self {
        let prompt_tokens = prompt.unwrap_or(0);
        let completion_tokens = completion.unwrap_or(0);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: total.unwrap_or(prompt_tokens + completion_tokens),
            ..Self::default()
        }
    }
}

/// Canonical non-streaming completion.
///
/// Every field is always serialized; absent vendor data becomes `null` or
/// [`FinishReason::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: Option<String>,
    pub created: u64,
    pub model: String,
    pub usage: Option<CompletionUsage>,
    pub object: String,
    pub choices: Vec<ChatCompletionChoice>,
}

impl CompletionResponse {
    /// Text of the first choice, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatCompletionMessage,
    pub finish_reason: FinishReason,
    pub logprobs: Option<Value>,
}

/// Assistant message produced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionMessage {
    pub role: String,
    pub content: Option<String>,
    pub refusal: Option<String>,
    pub tool_calls: Option<Vec<ChatCompletionMessageToolCall>>,
}

impl ChatCompletionMessage {
    /// Assistant message; empty text and empty tool lists collapse to `None`.
    pub fn assistant(content: Option<String>, tool_calls: Vec<ChatCompletionMessageToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.filter(|text| !text.is_empty()),
            refusal: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        }
    }
}

/// Canonical streaming chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponseChunk {
    pub id: Option<String>,
    pub created: u64,
    pub model: String,
    pub usage: Option<CompletionUsage>,
    pub object: String,
    pub choices: Vec<ChatCompletionChunkChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunkChoice {
    pub index: u32,
    pub delta: ChoiceDelta,
    pub finish_reason: FinishReason,
    pub logprobs: Option<Value>,
}

impl ChatCompletionChunkChoice {
    pub fn new(index: u32, delta: ChoiceDelta, finish_reason: FinishReason) -> Self {
        Self {
            index,
            delta,
            finish_reason,
            logprobs: None,
        }
    }
}

/// Incremental piece of the assistant message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDelta {
    pub role: Option<String>,
    pub content: Option<String>,
    pub refusal: Option<String>,
    pub tool_calls: Option<Vec<ChoiceDeltaToolCall>>,
}

/// Incremental tool call; fragments sharing an `index` belong to the same call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDeltaToolCall {
    pub index: u32,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub function: Option<ChoiceDeltaFunctionCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDeltaFunctionCall {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_deserialize_from_openai_shape() {
        let messages: Vec<ChatCompletionMessageParam> = serde_json::from_value(json!([
            { "role": "system", "content": "be brief" },
            { "role": "user", "content": [
                { "type": "text", "text": "what is this?" },
                { "type": "image_url", "image_url": { "url": "https://example.com/a.png" } }
            ]},
            { "role": "assistant", "content": null, "tool_calls": [
                { "id": "call_1", "type": "function", "function": { "name": "look", "arguments": "{}" } }
            ]},
            { "role": "tool", "tool_call_id": "call_1", "content": "a cat" }
        ]))
        .expect("messages should parse");

        let roles: Vec<&str> = messages.iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(messages[1].text().as_deref(), Some("what is this?"));
        match &messages[2] {
            ChatCompletionMessageParam::Assistant { tool_calls, content, .. } => {
                assert!(content.is_none());
                let calls = tool_calls.as_ref().expect("tool calls");
                assert_eq!(calls[0].function.name, "look");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn finish_reason_serializes_sentinel_and_accepts_unknown_values() {
        assert_eq!(
            serde_json::to_value(FinishReason::Unknown).expect("serialize"),
            json!("unknown")
        );
        let parsed: FinishReason = serde_json::from_value(json!("eos_token")).expect("parse");
        assert_eq!(parsed, FinishReason::Unknown);
        let parsed: FinishReason = serde_json::from_value(json!("content_filter")).expect("parse");
        assert_eq!(parsed, FinishReason::ContentFilter);
    }

    #[test]
    fn completion_response_always_serializes_every_field() {
        let response = CompletionResponse {
            id: None,
            created: 10,
            model: "m".to_string(),
            usage: None,
            object: CHAT_COMPLETION_OBJECT.to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionMessage::assistant(Some(String::new()), Vec::new()),
                finish_reason: FinishReason::Unknown,
                logprobs: None,
            }],
        };
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["usage"], Value::Null);
        assert_eq!(value["choices"][0]["finish_reason"], json!("unknown"));
        assert_eq!(value["choices"][0]["message"]["content"], Value::Null);
        assert_eq!(value["choices"][0]["message"]["tool_calls"], Value::Null);
    }

    #[test]
    fn tool_choice_accepts_modes_and_named_functions() {
        let auto: ToolChoice = serde_json::from_value(json!("auto")).expect("mode");
        assert_eq!(auto, ToolChoice::Mode(ToolChoiceMode::Auto));
        let named: ToolChoice = serde_json::from_value(json!({
            "type": "function",
            "function": { "name": "get_weather" }
        }))
        .expect("named");
        assert_eq!(named, ToolChoice::function("get_weather"));
    }

    #[test]
    fn usage_total_defaults_to_sum() {
        let usage = CompletionUsage::from_counts(Some(3), Some(4), None);
        assert_eq!(usage.total_tokens, 7);
        let usage = CompletionUsage::from_counts(None, Some(4), Some(9));
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.total_tokens, 9);
    }
}
