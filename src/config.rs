use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LLMError;

/// 供应商类型
///
/// OpenAI-compatible vendors (`groq`, `mistral`, `openrouter`) share the OpenAI adapter
/// and only differ by their default base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Groq,
    Mistral,
    OpenRouter,
    Anthropic,
    Gemini,
    Bedrock,
}

impl ProviderKind {
    /// Every supported provider, in declaration order.
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::OpenAi,
        ProviderKind::Groq,
        ProviderKind::Mistral,
        ProviderKind::OpenRouter,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::Bedrock,
    ];

    /// Stable identifier used in configuration and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::Mistral => "mistral",
            Self::OpenRouter => "openrouter",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Bedrock => "bedrock",
        }
    }

    /// Vendor endpoint used when `base_url` is not configured.
    ///
    /// Bedrock has none: the AWS SDK derives the regional endpoint itself.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Mistral => Some("https://api.mistral.ai/v1"),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::Anthropic => Some("https://api.anthropic.com"),
            Self::Gemini => Some("https://generativelanguage.googleapis.com"),
            Self::Bedrock => None,
        }
    }

    /// Whether the provider speaks the OpenAI chat-completions wire format.
    pub fn is_openai_compatible(&self) -> bool {
        matches!(
            self,
            Self::OpenAi | Self::Groq | Self::Mistral | Self::OpenRouter
        )
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LLMError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lower = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| {
                LLMError::configuration("provider", format!("unsupported provider `{value}`"))
            })
    }
}

/// User-facing options for one [`crate::LLM`] instance.
///
/// Accepts both snake_case and the camelCase spellings (`apiKey`, `baseURL`,
/// `defaultHeaders`) when deserialized.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOptions {
    pub provider: ProviderKind,
    #[serde(default, alias = "apiKey")]
    pub api_key: String,
    #[serde(
        default,
        alias = "baseURL",
        alias = "baseUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub base_url: Option<String>,
    /// 附加到每个请求的 header
    #[serde(
        default,
        alias = "defaultHeaders",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub default_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrock: Option<BedrockOptions>,
}

impl ConfigOptions {
    /// Creates options for `provider` authenticated with `api_key`.
    ///
    /// # Examples
    ///
    /// ```
    /// use polyllm::config::{ConfigOptions, ProviderKind};
    ///
    /// let options = ConfigOptions::new(ProviderKind::Groq, "gsk-test")
    ///     .with_header("X-Trace", "on");
    /// assert_eq!(options.default_headers.get("X-Trace").map(String::as_str), Some("on"));
    /// ```
    pub fn new(provider: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: None,
            default_headers: HashMap::new(),
            bedrock: None,
        }
    }

    /// Replaces the provider's default endpoint.
    ///
    /// For OpenAI-compatible providers this is the URL that `/chat/completions` is
    /// appended to (it usually ends in `/v1`). For Anthropic, `/v1/messages` is appended,
    /// or only `/messages` when the URL already ends in `/v1`. For Gemini it is the API
    /// root and `/v1beta/models/...` is always appended. Bedrock uses it as the SDK
    /// endpoint URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Adds one header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_default_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.default_headers.extend(headers);
        self
    }

    /// Sets the Bedrock-specific options.
    pub fn with_bedrock(mut self, bedrock: BedrockOptions) -> Self {
        self.bedrock = Some(bedrock);
        self
    }

    /// Validates the options and computes the effective client parameters.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when an HTTP provider has an empty API key,
    /// when `base_url` is not an absolute URL, when Bedrock has no region, or when only
    /// half of the Bedrock access-key pair is given.
    pub fn resolve(&self) -> Result<ResolvedConfig, LLMError> {
        let base_url = self
            .base_url
            .as_deref()
            .map(validate_base_url)
            .transpose()?;

        if self.provider == ProviderKind::Bedrock {
            return self.resolve_bedrock(base_url);
        }

        if self.api_key.trim().is_empty() {
            return Err(LLMError::configuration(
                "api_key",
                format!("provider {} requires a non-empty API key", self.provider),
            ));
        }

        let base_url = match base_url {
            Some(url) => url,
            None => self
                .provider
                .default_base_url()
                .map(str::to_string)
                .ok_or_else(|| {
                    LLMError::configuration(
                        "base_url",
                        format!("provider {} has no default endpoint", self.provider),
                    )
                })?,
        };

        Ok(ResolvedConfig::Http(HttpEndpoint {
            provider: self.provider,
            api_key: self.api_key.clone(),
            base_url,
            default_headers: self.default_headers.clone(),
        }))
    }

    fn resolve_bedrock(&self, endpoint_url: Option<String>) -> Result<ResolvedConfig, LLMError> {
        let options = self.bedrock.clone().unwrap_or_default();
        let region = options
            .region
            .filter(|region| !region.trim().is_empty())
            .ok_or_else(|| {
                LLMError::configuration("bedrock.region", "region is required for bedrock")
            })?;

        let access_key_id = options.access_key_id.filter(|value| !value.is_empty());
        let secret_access_key = options.secret_access_key.filter(|value| !value.is_empty());
        let credentials = match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => BedrockCredentials::Static {
                access_key_id,
                secret_access_key,
                session_token: options.session_token,
            },
            (None, None) => BedrockCredentials::DefaultChain,
            (Some(_), None) => {
                return Err(LLMError::configuration(
                    "bedrock.secret_access_key",
                    "access_key_id was given without secret_access_key",
                ));
            }
            (None, Some(_)) => {
                return Err(LLMError::configuration(
                    "bedrock.access_key_id",
                    "secret_access_key was given without access_key_id",
                ));
            }
        };

        Ok(ResolvedConfig::Bedrock(BedrockEndpoint {
            region,
            credentials,
            endpoint_url,
            default_headers: self.default_headers.clone(),
        }))
    }
}

impl fmt::Debug for ConfigOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOptions")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers.keys().collect::<Vec<_>>())
            .field("bedrock", &self.bedrock)
            .finish()
    }
}

/// Bedrock-only options. Without an access-key pair the AWS default credential
/// chain is used (environment, shared profile, SSO, web identity, ECS, IMDS).
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BedrockOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(
        default,
        alias = "accessKeyId",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_key_id: Option<String>,
    #[serde(
        default,
        alias = "secretAccessKey",
        skip_serializing_if = "Option::is_none"
    )]
    pub secret_access_key: Option<String>,
    #[serde(
        default,
        alias = "sessionToken",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_token: Option<String>,
}

impl BedrockOptions {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    /// Uses a static access-key pair instead of the default credential chain.
    pub fn with_static_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }
}

impl fmt::Debug for BedrockOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BedrockOptions")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_deref().map(redact),
            )
            .field("session_token", &self.session_token.as_deref().map(redact))
            .finish()
    }
}

/// Validated client parameters produced by [`ConfigOptions::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedConfig {
    Http(HttpEndpoint),
    Bedrock(BedrockEndpoint),
}

impl ResolvedConfig {
    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Http(endpoint) => endpoint.provider,
            Self::Bedrock(_) => ProviderKind::Bedrock,
        }
    }

    pub fn default_headers(&self) -> &HashMap<String, String> {
        match self {
            Self::Http(endpoint) => &endpoint.default_headers,
            Self::Bedrock(endpoint) => &endpoint.default_headers,
        }
    }
}

/// Parameters for providers reached over plain HTTPS.
#[derive(Clone, PartialEq)]
pub struct HttpEndpoint {
    pub provider: ProviderKind,
    pub api_key: String,
    /// Effective base URL without a trailing slash.
    pub base_url: String,
    pub default_headers: HashMap<String, String>,
}

impl fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parameters for the Bedrock runtime client.
#[derive(Debug, Clone, PartialEq)]
pub struct BedrockEndpoint {
    pub region: String,
    pub credentials: BedrockCredentials,
    pub endpoint_url: Option<String>,
    pub default_headers: HashMap<String, String>,
}

#[derive(Clone, PartialEq)]
pub enum BedrockCredentials {
    Static {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
    /// AWS 默认凭证链
    DefaultChain,
}

impl fmt::Debug for BedrockCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"***")
                .finish_non_exhaustive(),
            Self::DefaultChain => f.write_str("DefaultChain"),
        }
    }
}

fn validate_base_url(url: &str) -> Result<String, LLMError> {
    let trimmed = url.trim().trim_end_matches('/');
    reqwest::Url::parse(trimmed)
        .map_err(|err| LLMError::configuration("base_url", format!("`{url}` is not a valid URL: {err}")))?;
    Ok(trimmed.to_string())
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "***" }
}
