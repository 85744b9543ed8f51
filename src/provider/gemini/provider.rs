use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::{HttpEndpoint, ProviderKind};
use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::headers::merge_headers;
use crate::provider::{LLMProvider, ResponseContext};
use crate::stream::{SseChunkStream, StreamCompletionResponse, collect_stream_text};
use crate::types::{CompletionRequest, CompletionResponse};

use super::error::parse_gemini_error;
use super::request::build_gemini_body;
use super::response::map_response;
use super::stream::GeminiChunkMapper;
use super::types::GeminiGenerateContentResponse;

/// Google Gemini GenerateContent provider implementation.
pub struct GeminiProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) default_headers: HashMap<String, String>,
}

impl GeminiProvider {
    pub fn new(endpoint: HttpEndpoint, transport: DynHttpTransport) -> Self {
        Self {
            transport,
            base_url: endpoint.base_url,
            api_key: endpoint.api_key,
            default_headers: endpoint.default_headers,
        }
    }

    /// Builds the non-streaming endpoint URL for GenerateContent.
    pub(crate) fn endpoint(&self, model: &str) -> String {
        format!("{}:generateContent", self.model_url(model))
    }

    /// Builds the streaming endpoint URL (SSE) for GenerateContent.
    pub(crate) fn stream_endpoint(&self, model: &str) -> String {
        format!("{}:streamGenerateContent?alt=sse", self.model_url(model))
    }

    /// The base URL is the API root; `/v1beta` is always appended.
    fn model_url(&self, model: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/v1beta/{}", normalize_model(model))
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let builtin = HashMap::from([
            ("x-goog-api-key".to_string(), self.api_key.clone()),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ]);
        merge_headers(builtin, &self.default_headers)
    }
}

fn normalize_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        let ctx = ResponseContext::new(self.name(), request.model.clone());
        let endpoint = self.endpoint(&request.model);
        let body = build_gemini_body(&request)?;
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
            return Err(parse_gemini_error(
                self.name(),
                response.status,
                &response.headers,
                &response.text(),
            ));
        }

        let parsed: GeminiGenerateContentResponse = serde_json::from_slice(&response.body)
            .map_err(|err| {
                LLMError::normalization(self.name(), format!("failed to parse response: {err}"))
            })?;
        map_response(parsed, &ctx)
    }

    async fn create_streaming_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<StreamCompletionResponse, LLMError> {
        let ctx = ResponseContext::new(self.name(), request.model.clone());
        let endpoint = self.stream_endpoint(&request.model);
        let body = build_gemini_body(&request)?;
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
            return Err(parse_gemini_error(self.name(), status, &headers, &text));
        }

        let mapper = GeminiChunkMapper::new(ctx);
        Ok(StreamCompletionResponse::new(
            self.name(),
            SseChunkStream::new(response.body, self.name(), mapper),
        ))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }
}
