use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Boxed error kept as the source of SDK and transport failures.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Aggregates every failure mode exposed by an [`crate::LLM`] instance.
///
/// Errors are never logged or retried inside the crate: each one is surfaced to the
/// direct caller, which decides whether to retry, fall back, or report it.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Raised when the configuration for the selected provider is missing or invalid.
    #[error("invalid configuration for {field}: {reason}")]
    Configuration {
        /// Name of the configuration field that failed validation, e.g. `bedrock.region`.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// Wraps a failure reported by the provider's client or API.
    #[error("provider {provider} error: {kind}")]
    Provider {
        /// Name of the provider, such as `openai` or `bedrock`.
        provider: &'static str,
        /// Classified failure, preserving the provider's original message.
        kind: ProviderErrorKind,
    },
    /// The provider answered, but the payload lacks the shape required to build a
    /// canonical response (undecodable JSON, no `choices`, malformed stream event).
    #[error("provider {provider} returned an unexpected payload: {message}")]
    Normalization {
        provider: &'static str,
        message: String,
    },
    /// The canonical request cannot be expressed in the provider's request shape.
    #[error("request cannot be sent to {provider}: {message}")]
    InvalidRequest {
        provider: &'static str,
        message: String,
    },
}

/// Classification of a provider-side failure.
#[derive(Debug, Error)]
pub enum ProviderErrorKind {
    /// Network or connection failure before a response was received.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Invalid or missing credentials.
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// The provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Raw message returned by the upstream provider.
        message: String,
        /// Optional wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// The prompt or expected completion exceeds the model's context window.
    #[error("token limit exceeded: {message}")]
    TokenLimitExceeded { message: String },
    /// The requested model could not be resolved.
    #[error("model not found: {message}")]
    ModelNotFound {
        /// Model identifier extracted from the error payload when available.
        model: Option<String>,
        message: String,
    },
    /// The provider rejected the request as malformed.
    #[error("bad request: {message}")]
    BadRequest { message: String },
    /// Any other non-success HTTP status.
    #[error("status {status}: {message}")]
    Api { status: u16, message: String },
    /// Failure surfaced by a vendor SDK, with the SDK error kept as the source.
    #[error("{message}")]
    Sdk {
        message: String,
        #[source]
        source: BoxError,
    },
}

/// Failure raised by an [`crate::http::HttpTransport`] implementation.
#[derive(Debug, Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl TransportError {
    /// Creates a transport error from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use polyllm::error::TransportError;
    ///
    /// let err = TransportError::new("dns lookup failed");
    /// assert_eq!(err.to_string(), "transport error: dns lookup failed");
    /// ```
    pub fn new<T: Into<String>>(message: T) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error that keeps the underlying client error as its source.
    pub fn with_source<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl LLMError {
    /// Creates an [`LLMError::Configuration`] for the given field.
    ///
    /// # Examples
    ///
    /// ```
    /// use polyllm::error::LLMError;
    ///
    /// let err = LLMError::configuration("bedrock.region", "region is required");
    /// assert!(matches!(err, LLMError::Configuration { .. }));
    /// ```
    pub fn configuration<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an [`LLMError::Provider`] with the given provider name and classification.
    ///
    /// # Examples
    ///
    /// ```
    /// use polyllm::error::{LLMError, ProviderErrorKind};
    ///
    /// let err = LLMError::provider(
    ///     "openai",
    ///     ProviderErrorKind::Auth { message: "bad key".into() },
    /// );
    /// assert_eq!(err.provider_name(), Some("openai"));
    /// ```
    pub fn provider(provider: &'static str, kind: ProviderErrorKind) -> Self {
        Self::Provider { provider, kind }
    }

    /// Creates an [`LLMError::Normalization`].
    pub fn normalization<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Normalization {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::InvalidRequest`].
    pub fn invalid_request<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::InvalidRequest {
            provider,
            message: message.into(),
        }
    }

    /// Wraps a transport failure for the given provider.
    pub fn transport(provider: &'static str, error: TransportError) -> Self {
        Self::Provider {
            provider,
            kind: ProviderErrorKind::Transport(error),
        }
    }

    /// Wraps an SDK failure for the given provider, keeping the SDK error as the source.
    pub fn sdk<E>(provider: &'static str, message: impl Into<String>, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Provider {
            provider,
            kind: ProviderErrorKind::Sdk {
                message: message.into(),
                source: Box::new(error),
            },
        }
    }

    /// Returns the provider the error originates from, if any.
    pub fn provider_name(&self) -> Option<&'static str> {
        match self {
            Self::Configuration { .. } => None,
            Self::Provider { provider, .. }
            | Self::Normalization { provider, .. }
            | Self::InvalidRequest { provider, .. } => Some(provider),
        }
    }
}

/// Maps an HTTP status and decoded provider message onto [`ProviderErrorKind`].
///
/// `code_hint` carries the provider's own error code or status string (for example
/// `context_length_exceeded` or `NOT_FOUND`) and refines the status-based decision.
pub(crate) fn classify_status(
    status: u16,
    message: String,
    code_hint: Option<&str>,
    retry_after: Option<Duration>,
) -> ProviderErrorKind {
    if looks_like_token_limit_error(code_hint, &message) {
        return ProviderErrorKind::TokenLimitExceeded { message };
    }
    let not_found_hint = code_hint.is_some_and(|code| {
        code.eq_ignore_ascii_case("not_found") || code.eq_ignore_ascii_case("model_not_found")
    });
    if status == 404 || not_found_hint {
        return ProviderErrorKind::ModelNotFound {
            model: extract_model_identifier(&message),
            message,
        };
    }
    match status {
        401 | 403 => ProviderErrorKind::Auth { message },
        429 => ProviderErrorKind::RateLimit {
            message,
            retry_after,
        },
        400 | 422 => ProviderErrorKind::BadRequest { message },
        _ => ProviderErrorKind::Api { status, message },
    }
}

/// Returns `true` when an error code or message suggests a context/window overflow.
pub(crate) fn looks_like_token_limit_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "context_length_exceeded"
                | "max_context_length_exceeded"
                | "prompt_tokens_exceeded"
                | "context_window_exceeded"
        ) {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 7] = [
        "context length",
        "context window",
        "token limit",
        "maximum output tokens",
        "max output tokens",
        "prompt is too long",
        "input is too long",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
}

/// Attempts to extract a model identifier from an error payload.
pub(crate) fn extract_model_identifier(message: &str) -> Option<String> {
    for delimiter in ['`', '"', '\''] {
        if let Some(value) = between_delimiters(message, delimiter) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn between_delimiters(message: &str, delimiter: char) -> Option<String> {
    let start = message.find(delimiter)? + delimiter.len_utf8();
    let rel_end = message[start..].find(delimiter)?;
    Some(message[start..start + rel_end].to_string())
}
