use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::config::{BedrockEndpoint, HttpEndpoint, ProviderKind};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::stream::StreamCompletionResponse;
use crate::types::{CompletionRequest, CompletionResponse};

pub mod anthropic;
pub mod bedrock;
pub mod gemini;
pub(crate) mod headers;
pub mod openai;

use anthropic::AnthropicProvider;
use bedrock::BedrockProvider;
use gemini::GeminiProvider;
use openai::OpenAiProvider;

/// 统一的 Provider Trait 所有供应商实现该接口即可接入
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// 提交完整请求并等待完整响应
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError>;

    /// 以流式方式返回增量 chunk
    async fn create_streaming_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<StreamCompletionResponse, LLMError>;

    /// Configured provider kind.
    fn kind(&self) -> ProviderKind;

    /// 供应商名称
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// The closed set of adapters an [`crate::LLM`] can be bound to.
pub enum ProviderAdapter {
    /// OpenAI and every OpenAI-compatible vendor.
    OpenAi(OpenAiProvider),
    Anthropic(AnthropicProvider),
    Gemini(GeminiProvider),
    Bedrock(BedrockProvider),
}

impl ProviderAdapter {
    /// Builds the adapter for an HTTP provider on top of `transport`.
    pub fn from_http(endpoint: HttpEndpoint, transport: DynHttpTransport) -> Self {
        match endpoint.provider {
            ProviderKind::Anthropic => Self::Anthropic(AnthropicProvider::new(endpoint, transport)),
            ProviderKind::Gemini => Self::Gemini(GeminiProvider::new(endpoint, transport)),
            _ => Self::OpenAi(OpenAiProvider::new(endpoint, transport)),
        }
    }

    /// Builds the Bedrock adapter and its SDK client.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when a default header cannot be sent over HTTP.
    pub fn from_bedrock(endpoint: BedrockEndpoint) -> Result<Self, LLMError> {
        BedrockProvider::new(endpoint).map(Self::Bedrock)
    }

    fn inner(&self) -> &dyn LLMProvider {
        match self {
            Self::OpenAi(provider) => provider,
            Self::Anthropic(provider) => provider,
            Self::Gemini(provider) => provider,
            Self::Bedrock(provider) => provider,
        }
    }
}

#[async_trait]
impl LLMProvider for ProviderAdapter {
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        self.inner().create_completion(request).await
    }

    async fn create_streaming_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<StreamCompletionResponse, LLMError> {
        self.inner().create_streaming_completion(request).await
    }

    fn kind(&self) -> ProviderKind {
        self.inner().kind()
    }
}

/// Call-time facts a normalizer needs besides the vendor payload.
///
/// Capturing them once per call keeps the normalizers pure functions of their input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseContext {
    pub(crate) provider: &'static str,
    /// Model named in the request; used when the vendor does not echo one.
    pub(crate) model: String,
    /// Unix timestamp used when the vendor does not report one.
    pub(crate) created: u64,
}

impl ResponseContext {
    pub(crate) fn new(provider: &'static str, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            created: unix_now(),
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
