use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::{HttpEndpoint, ProviderKind};
use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::headers::merge_headers;
use crate::provider::{LLMProvider, ResponseContext};
use crate::stream::{SseChunkStream, StreamCompletionResponse, collect_stream_text};
use crate::types::{CompletionRequest, CompletionResponse};

use super::error::parse_openai_error;
use super::response::map_response;
use super::stream::OpenAiChunkMapper;
use super::types::OpenAiChatResponse;

/// OpenAI Chat Completions Provider
///
/// Also serves Groq, Mistral and OpenRouter, which expose the same wire format under
/// their own base URL.
pub struct OpenAiProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) kind: ProviderKind,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) default_headers: HashMap<String, String>,
}

impl OpenAiProvider {
    /// 使用解析后的配置创建 Provider
    pub fn new(endpoint: HttpEndpoint, transport: DynHttpTransport) -> Self {
        Self {
            transport,
            kind: endpoint.provider,
            base_url: endpoint.base_url,
            api_key: endpoint.api_key,
            default_headers: endpoint.default_headers,
        }
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let builtin = HashMap::from([
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ]);
        merge_headers(builtin, &self.default_headers)
    }

    /// The canonical request already is the OpenAI body; only the stream flag is pinned.
    fn build_request_body(request: CompletionRequest, stream: bool) -> CompletionRequest {
        CompletionRequest {
            stream: stream.then_some(true),
            ..request
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        let ctx = ResponseContext::new(self.name(), request.model.clone());
        let endpoint = self.endpoint();
        let body = Self::build_request_body(request, false);
        tracing::debug!(
            provider = self.name(),
            model = %ctx.model,
            stream = false,
            endpoint = %endpoint,
            "dispatching chat completion"
        );

        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.name(),
            endpoint,
            self.build_headers(),
            &body,
        )
        .await?;
        if !response.is_success() {
            return Err(parse_openai_error(
                self.name(),
                response.status,
                &response.headers,
                &response.text(),
            ));
        }

        let parsed: OpenAiChatResponse = serde_json::from_slice(&response.body).map_err(|err| {
            LLMError::normalization(self.name(), format!("failed to parse response: {err}"))
        })?;
        map_response(parsed, &ctx)
    }

    async fn create_streaming_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<StreamCompletionResponse, LLMError> {
        let ctx = ResponseContext::new(self.name(), request.model.clone());
        let endpoint = self.endpoint();
        let body = Self::build_request_body(request, true);
        tracing::debug!(
            provider = self.name(),
            model = %ctx.model,
            stream = true,
            endpoint = %endpoint,
            "dispatching chat completion"
        );

        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.name(),
            endpoint,
            self.build_headers(),
            &body,
        )
        .await?;
        if !response.is_success() {
            let status = response.status;
            let headers = response.headers;
            let text = collect_stream_text(response.body, self.name()).await?;
            return Err(parse_openai_error(self.name(), status, &headers, &text));
        }

        let mapper = OpenAiChunkMapper::new(ctx);
        Ok(StreamCompletionResponse::new(
            self.name(),
            SseChunkStream::new(response.body, self.name(), mapper),
        ))
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}
