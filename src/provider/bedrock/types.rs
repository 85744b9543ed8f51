//! Crate-owned mirrors of the Converse output shapes.
//!
//! SDK outputs are copied into these types first so that normalization works on plain
//! data. Field names follow the Converse JSON wire format.

use serde::Deserialize;
use serde_json::Value;

/// Converse 非流式响应
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConverseResponse {
    #[serde(default)]
    pub(crate) output: Option<ConverseOutputBody>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<ConverseUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ConverseOutputBody {
    #[serde(default)]
    pub(crate) message: Option<ConverseMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ConverseMessage {
    #[serde(default)]
    pub(crate) content: Vec<ConverseContentBlock>,
}

/// Content block union; only text and toolUse are carried over.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConverseContentBlock {
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) tool_use: Option<ConverseToolUse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConverseToolUse {
    pub(crate) tool_use_id: String,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) input: Value,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConverseUsage {
    #[serde(default)]
    pub(crate) input_tokens: u64,
    #[serde(default)]
    pub(crate) output_tokens: u64,
    #[serde(default)]
    pub(crate) total_tokens: Option<u64>,
}

/// ConverseStream 事件
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum ConverseStreamEvent {
    MessageStart(MessageStart),
    ContentBlockStart(ContentBlockStart),
    ContentBlockDelta(ContentBlockDelta),
    ContentBlockStop(ContentBlockStop),
    MessageStop(MessageStop),
    Metadata(StreamMetadata),
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageStart {
    pub(crate) role: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContentBlockStart {
    pub(crate) content_block_index: u32,
    #[serde(default)]
    pub(crate) start: Option<BlockStart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BlockStart {
    #[serde(default)]
    pub(crate) tool_use: Option<ToolUseStart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolUseStart {
    pub(crate) tool_use_id: String,
    pub(crate) name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContentBlockDelta {
    pub(crate) content_block_index: u32,
    #[serde(default)]
    pub(crate) delta: Option<BlockDelta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BlockDelta {
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) tool_use: Option<ToolUseDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ToolUseDelta {
    pub(crate) input: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContentBlockStop {
    pub(crate) content_block_index: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageStop {
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StreamMetadata {
    #[serde(default)]
    pub(crate) usage: Option<ConverseUsage>,
}
