use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::{HttpEndpoint, ProviderKind};
use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::headers::merge_headers;
use crate::provider::{LLMProvider, ResponseContext};
use crate::stream::{SseChunkStream, StreamCompletionResponse, collect_stream_text};
use crate::types::{CompletionRequest, CompletionResponse};

use super::error::parse_anthropic_error;
use super::request::build_anthropic_body;
use super::response::map_response;
use super::stream::AnthropicChunkMapper;
use super::types::AnthropicMessageResponse;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages Provider
pub struct AnthropicProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) default_headers: HashMap<String, String>,
}

impl AnthropicProvider {
    pub fn new(endpoint: HttpEndpoint, transport: DynHttpTransport) -> Self {
        Self {
            transport,
            base_url: endpoint.base_url,
            api_key: endpoint.api_key,
            default_headers: endpoint.default_headers,
        }
    }

    /// 兼容 base_url 是否已包含 `/v1`
    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn build_headers(&self, stream: bool) -> HashMap<String, String> {
        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        let builtin = HashMap::from([
            ("x-api-key".to_string(), self.api_key.clone()),
            (
                "anthropic-version".to_string(),
                ANTHROPIC_VERSION.to_string(),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), accept.to_string()),
        ]);
        merge_headers(builtin, &self.default_headers)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        let ctx = ResponseContext::new(self.name(), request.model.clone());
        let endpoint = self.endpoint();
        let body = build_anthropic_body(&request, false)?;
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
            self.build_headers(false),
            &body,
        )
        .await?;
        if !response.is_success() {
            return Err(parse_anthropic_error(
                self.name(),
                response.status,
                &response.headers,
                &response.text(),
            ));
        }

        let parsed: AnthropicMessageResponse =
            serde_json::from_slice(&response.body).map_err(|err| {
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
        let body = build_anthropic_body(&request, true)?;
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
            self.build_headers(true),
            &body,
        )
        .await?;
        if !response.is_success() {
            let status = response.status;
            let headers = response.headers;
            let text = collect_stream_text(response.body, self.name()).await?;
            return Err(parse_anthropic_error(self.name(), status, &headers, &text));
        }

        let mapper = AnthropicChunkMapper::new(ctx);
        Ok(StreamCompletionResponse::new(
            self.name(),
            SseChunkStream::new(response.body, self.name(), mapper),
        ))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
}
