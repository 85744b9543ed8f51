use crate::config::{ConfigOptions, ProviderKind, ResolvedConfig};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::http::reqwest::default_dyn_transport;
use crate::provider::{LLMProvider, ProviderAdapter};
use crate::stream::StreamCompletionResponse;
use crate::types::{CompletionRequest, CompletionResponse};

/// LLM 调用入口，绑定一个供应商
///
/// The adapter and its vendor client are built once in [`LLM::new`] and reused for every
/// call. `LLM` is `Send + Sync`; overlapping calls on one instance need no locking.
pub struct LLM {
    adapter: ProviderAdapter,
}

/// Result of [`LLM::create`], chosen by the request's `stream` flag.
#[derive(Debug)]
pub enum Completion {
    Response(CompletionResponse),
    Stream(StreamCompletionResponse),
}

impl Completion {
    pub fn into_response(self) -> Option<CompletionResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<StreamCompletionResponse> {
        match self {
            Self::Stream(stream) => Some(stream),
            Self::Response(_) => None,
        }
    }
}

impl LLM {
    /// Resolves `config` and builds the provider client.
    ///
    /// # Examples
    ///
    /// ```
    /// use polyllm::{ConfigOptions, LLM, LLMError, ProviderKind};
    ///
    /// let llm = LLM::new(ConfigOptions::new(ProviderKind::Gemini, "key")).unwrap();
    /// assert_eq!(llm.provider(), ProviderKind::Gemini);
    ///
    /// let err = LLM::new(ConfigOptions::new(ProviderKind::Bedrock, "key")).unwrap_err();
    /// assert!(matches!(err, LLMError::Configuration { .. }));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when the options are incomplete or the HTTP
    /// client cannot be created.
    pub fn new(config: ConfigOptions) -> Result<Self, LLMError> {
        let adapter = match config.resolve()? {
            ResolvedConfig::Http(endpoint) => {
                let transport = default_dyn_transport()
                    .map_err(|err| LLMError::configuration("transport", err.to_string()))?;
                ProviderAdapter::from_http(endpoint, transport)
            }
            ResolvedConfig::Bedrock(endpoint) => ProviderAdapter::from_bedrock(endpoint)?,
        };
        Ok(Self { adapter })
    }

    /// Like [`LLM::new`] but sends HTTP requests through `transport`.
    ///
    /// Bedrock calls go through the AWS SDK and ignore `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when the options are incomplete.
    pub fn with_transport(
        config: ConfigOptions,
        transport: DynHttpTransport,
    ) -> Result<Self, LLMError> {
        let adapter = match config.resolve()? {
            ResolvedConfig::Http(endpoint) => ProviderAdapter::from_http(endpoint, transport),
            ResolvedConfig::Bedrock(endpoint) => ProviderAdapter::from_bedrock(endpoint)?,
        };
        Ok(Self { adapter })
    }

    pub fn provider(&self) -> ProviderKind {
        self.adapter.kind()
    }

    /// 根据 `stream` 字段选择普通或流式调用
    ///
    /// # Errors
    ///
    /// Propagates the error of the selected call.
    pub async fn create(&self, request: CompletionRequest) -> Result<Completion, LLMError> {
        if request.is_stream() {
            self.create_streaming_completion(request)
                .await
                .map(Completion::Stream)
        } else {
            self.create_completion(request)
                .await
                .map(Completion::Response)
        }
    }

    /// 发送非流式请求
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidRequest`] when the request cannot be expressed for the
    /// provider, [`LLMError::Provider`] for vendor failures and
    /// [`LLMError::Normalization`] when the response is malformed.
    pub async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        self.adapter.create_completion(request).await
    }

    /// 发起流式请求，chunk 在轮询时才会读取
    ///
    /// # Errors
    ///
    /// Fails like [`LLM::create_completion`] when the stream cannot be opened; errors
    /// after that are yielded by the stream.
    pub async fn create_streaming_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<StreamCompletionResponse, LLMError> {
        self.adapter.create_streaming_completion(request).await
    }
}

impl std::fmt::Debug for LLM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LLM")
            .field("provider", &self.provider())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::BedrockOptions;

    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn llm_is_send_and_sync() {
        assert_send_sync::<LLM>();
    }

    #[test]
    fn openai_compatible_vendors_share_the_openai_adapter() {
        for kind in [ProviderKind::Groq, ProviderKind::Mistral, ProviderKind::OpenRouter] {
            let llm = LLM::new(ConfigOptions::new(kind, "key")).expect("client");
            assert_eq!(llm.provider(), kind);
            assert!(matches!(llm.adapter, ProviderAdapter::OpenAi(_)));
        }
    }

    #[test]
    fn bedrock_requires_region() {
        let err = LLM::new(ConfigOptions::new(ProviderKind::Bedrock, "k")).expect_err("no region");
        assert!(
            matches!(&err, LLMError::Configuration { field, .. } if field == "bedrock.region"),
            "{err:?}"
        );
    }

    #[test]
    fn bedrock_with_region_builds() {
        let llm = LLM::new(
            ConfigOptions::new(ProviderKind::Bedrock, "k")
                .with_bedrock(BedrockOptions::new("us-west-2").with_static_credentials("a", "b")),
        )
        .expect("client");
        assert_eq!(llm.provider(), ProviderKind::Bedrock);
    }

    #[test]
    fn empty_api_key_is_rejected_for_http_providers() {
        let err = LLM::new(ConfigOptions::new(ProviderKind::Anthropic, " ")).expect_err("empty key");
        assert!(matches!(err, LLMError::Configuration { .. }));
    }
}
