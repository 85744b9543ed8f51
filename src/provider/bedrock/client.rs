use std::collections::HashMap;
use std::fmt;

use aws_config::default_provider::credentials::DefaultCredentialsChain;
use aws_credential_types::Credentials;
use aws_credential_types::provider::{self, ProvideCredentials};
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_sdk_bedrockruntime::config::{BehaviorVersion, Region};
use aws_smithy_runtime_api::box_error::BoxError;
use aws_smithy_runtime_api::client::interceptors::Intercept;
use aws_smithy_runtime_api::client::interceptors::context::BeforeTransmitInterceptorContextMut;
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_types::config_bag::ConfigBag;
use reqwest::header::{HeaderName, HeaderValue};
use tokio::sync::OnceCell;

use crate::config::{BedrockCredentials, BedrockEndpoint};
use crate::error::LLMError;

const CREDENTIALS_SOURCE: &str = "polyllm";

/// Build a Bedrock runtime client from the resolved endpoint.
///
/// Static credentials are used when configured; otherwise the AWS default credential
/// chain is resolved on the first request.
pub(crate) fn build_bedrock_client(endpoint: &BedrockEndpoint) -> Result<BedrockClient, LLMError> {
    let mut builder = aws_sdk_bedrockruntime::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(endpoint.region.clone()));

    builder = match &endpoint.credentials {
        BedrockCredentials::Static {
            access_key_id,
            secret_access_key,
            session_token,
        } => builder.credentials_provider(Credentials::new(
            access_key_id.clone(),
            secret_access_key.clone(),
            session_token.clone(),
            None,
            CREDENTIALS_SOURCE,
        )),
        BedrockCredentials::DefaultChain => {
            builder.credentials_provider(LazyDefaultChain::new(&endpoint.region))
        }
    };

    if let Some(url) = &endpoint.endpoint_url {
        builder = builder.endpoint_url(url.clone());
    }
    if !endpoint.default_headers.is_empty() {
        builder = builder.interceptor(DefaultHeadersInterceptor::new(&endpoint.default_headers)?);
    }

    Ok(BedrockClient::from_conf(builder.build()))
}

/// Wraps [`DefaultCredentialsChain`], whose construction is async, so the client can
/// still be built synchronously.
pub(crate) struct LazyDefaultChain {
    region: Region,
    chain: OnceCell<DefaultCredentialsChain>,
}

impl LazyDefaultChain {
    pub(crate) fn new(region: &str) -> Self {
        Self {
            region: Region::new(region.to_string()),
            chain: OnceCell::new(),
        }
    }
}

impl fmt::Debug for LazyDefaultChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyDefaultChain")
            .field("region", &self.region)
            .field("initialized", &self.chain.initialized())
            .finish()
    }
}

impl ProvideCredentials for LazyDefaultChain {
    fn provide_credentials<'a>(&'a self) -> provider::future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        provider::future::ProvideCredentials::new(async move {
            let chain = self
                .chain
                .get_or_init(|| {
                    DefaultCredentialsChain::builder()
                        .region(self.region.clone())
                        .build()
                })
                .await;
            chain.provide_credentials().await
        })
    }
}

/// Adds the configured default headers to every signed Bedrock request.
#[derive(Debug)]
pub(crate) struct DefaultHeadersInterceptor {
    headers: Vec<(String, String)>,
}

impl DefaultHeadersInterceptor {
    /// 非法的 header 在构造时报错，而不是在请求时
    pub(crate) fn new(headers: &HashMap<String, String>) -> Result<Self, LLMError> {
        let mut validated = Vec::with_capacity(headers.len());
        for (name, value) in headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                LLMError::configuration("default_headers", format!("invalid header name `{name}`: {err}"))
            })?;
            HeaderValue::from_str(value).map_err(|err| {
                LLMError::configuration(
                    "default_headers",
                    format!("invalid value for header `{name}`: {err}"),
                )
            })?;
            validated.push((name.to_ascii_lowercase(), value.clone()));
        }
        validated.sort();
        Ok(Self { headers: validated })
    }
}

impl Intercept for DefaultHeadersInterceptor {
    fn name(&self) -> &'static str {
        "PolyllmDefaultHeaders"
    }

    // 签名前写入，header 会被纳入 SigV4 签名
    fn modify_before_signing(
        &self,
        context: &mut BeforeTransmitInterceptorContextMut<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let headers = context.request_mut().headers_mut();
        for (name, value) in &self.headers {
            headers.try_insert(name.clone(), value.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(headers: HashMap<String, String>) -> BedrockEndpoint {
        BedrockEndpoint {
            region: "us-east-1".to_string(),
            credentials: BedrockCredentials::Static {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
            endpoint_url: Some("http://localhost:4566".to_string()),
            default_headers: headers,
        }
    }

    #[test]
    fn interceptor_normalizes_header_names() {
        let interceptor = DefaultHeadersInterceptor::new(&HashMap::from([(
            "X-Team".to_string(),
            "search".to_string(),
        )]))
        .expect("valid headers");
        assert_eq!(
            interceptor.headers,
            vec![("x-team".to_string(), "search".to_string())]
        );
    }

    #[test]
    fn invalid_default_header_is_a_configuration_error() {
        let err = build_bedrock_client(&endpoint(HashMap::from([(
            "bad header".to_string(),
            "v".to_string(),
        )])))
        .expect_err("invalid header name");
        assert!(matches!(err, LLMError::Configuration { field, .. } if field == "default_headers"));

        let err = DefaultHeadersInterceptor::new(&HashMap::from([(
            "x-ok".to_string(),
            "line\nbreak".to_string(),
        )]))
        .expect_err("invalid header value");
        assert!(matches!(err, LLMError::Configuration { .. }));
    }

    #[test]
    fn default_chain_is_resolved_on_first_request_only() {
        let chain = LazyDefaultChain::new("us-west-2");
        assert!(!chain.chain.initialized());
        assert!(format!("{chain:?}").contains("us-west-2"));

        let client = build_bedrock_client(&BedrockEndpoint {
            credentials: BedrockCredentials::DefaultChain,
            ..endpoint(HashMap::new())
        })
        .expect("client without static keys");
        assert_eq!(
            client.config().region().map(|region| region.as_ref()),
            Some("us-east-1")
        );
    }

    #[test]
    fn client_builds_with_static_credentials_and_endpoint() {
        let client = build_bedrock_client(&endpoint(HashMap::new())).expect("client");
        assert_eq!(
            client.config().region().map(|region| region.as_ref()),
            Some("us-east-1")
        );
    }
}
