use async_trait::async_trait;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use futures_util::stream;

use crate::config::{BedrockEndpoint, ProviderKind};
use crate::error::LLMError;
use crate::provider::{LLMProvider, ResponseContext};
use crate::stream::{ChunkStep, StreamCompletionResponse};
use crate::types::{CompletionRequest, CompletionResponse};

use super::client::build_bedrock_client;
use super::error::map_sdk_error;
use super::request::build_converse_input;
use super::response::{from_sdk_output, map_response};
use super::stream::{BedrockChunkMapper, event_from_sdk};

/// AWS Bedrock Converse Provider
///
/// Requests are signed by the SDK; the API key configured on [`crate::ConfigOptions`] is
/// not used.
pub struct BedrockProvider {
    client: BedrockClient,
    region: String,
}

impl BedrockProvider {
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when a default header is not a valid HTTP header.
    pub fn new(endpoint: BedrockEndpoint) -> Result<Self, LLMError> {
        let client = build_bedrock_client(&endpoint)?;
        Ok(Self {
            client,
            region: endpoint.region,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl LLMProvider for BedrockProvider {
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        let ctx = ResponseContext::new(self.name(), request.model.clone());
        let input = build_converse_input(&request)?;
        tracing::debug!(
            provider = self.name(),
            model = %ctx.model,
            stream = false,
            region = %self.region,
            "dispatching chat completion"
        );

        let output = self
            .client
            .converse()
            .model_id(&request.model)
            .set_system((!input.system.is_empty()).then_some(input.system))
            .set_messages(Some(input.messages))
            .set_inference_config(input.inference_config)
            .set_tool_config(input.tool_config)
            .send()
            .await
            .map_err(|err| map_sdk_error(self.name(), err))?;

        map_response(from_sdk_output(&output), &ctx)
    }

    async fn create_streaming_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<StreamCompletionResponse, LLMError> {
        let provider = self.name();
        let ctx = ResponseContext::new(provider, request.model.clone());
        let input = build_converse_input(&request)?;
        tracing::debug!(
            provider,
            model = %ctx.model,
            stream = true,
            region = %self.region,
            "dispatching chat completion"
        );

        let output = self
            .client
            .converse_stream()
            .model_id(&request.model)
            .set_system((!input.system.is_empty()).then_some(input.system))
            .set_messages(Some(input.messages))
            .set_inference_config(input.inference_config)
            .set_tool_config(input.tool_config)
            .send()
            .await
            .map_err(|err| map_sdk_error(provider, err))?;

        // 状态为 None 表示流已结束，之后的 poll 都返回 None
        let state = Some((output.stream, BedrockChunkMapper::new(ctx)));
        let chunks = stream::unfold(state, move |state| async move {
            let Some((mut receiver, mut mapper)) = state else {
                return None;
            };
            loop {
                let event = match receiver.recv().await {
                    Ok(Some(output)) => output,
                    Ok(None) => return None,
                    Err(err) => return Some((Err(map_sdk_error(provider, err)), None)),
                };
                let Some(event) = event_from_sdk(&event) else {
                    continue;
                };
                match mapper.map_event(event) {
                    Ok(ChunkStep::Emit(chunk)) => {
                        return Some((Ok(chunk), Some((receiver, mapper))));
                    }
                    Ok(ChunkStep::Skip) => continue,
                    Ok(ChunkStep::Finish) => return None,
                    Err(err) => return Some((Err(err), None)),
                }
            }
        });

        Ok(StreamCompletionResponse::new(provider, chunks))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Bedrock
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::config::BedrockCredentials;

    use super::*;

    #[test]
    fn provider_reports_bedrock_kind_and_region() {
        let provider = BedrockProvider::new(BedrockEndpoint {
            region: "eu-west-3".to_string(),
            credentials: BedrockCredentials::Static {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
            endpoint_url: None,
            default_headers: HashMap::new(),
        })
        .expect("provider");
        assert_eq!(provider.kind(), ProviderKind::Bedrock);
        assert_eq!(provider.name(), "bedrock");
        assert_eq!(provider.region(), "eu-west-3");
    }
}
