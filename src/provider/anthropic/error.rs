use std::collections::HashMap;

use crate::error::{LLMError, classify_status};
use crate::provider::headers::retry_after_from_headers;

use super::types::{AnthropicErrorBody, AnthropicErrorDetail};

/// Parses error responses returned by the Anthropic Messages API.
pub(crate) fn parse_anthropic_error(
    provider: &'static str,
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> LLMError {
    let retry_after = retry_after_from_headers(headers);
    match serde_json::from_str::<AnthropicErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
    {
        Some(detail) => {
            let message = detail
                .message
                .unwrap_or_else(|| "unknown error".to_string());
            LLMError::provider(
                provider,
                classify_status(status, message, detail.kind.as_deref(), retry_after),
            )
        }
        // Fallback: if the payload cannot be parsed, surface the raw body.
        None => LLMError::provider(
            provider,
            classify_status(status, format!("status {status}: {body}"), None, retry_after),
        ),
    }
}

/// Converts an in-stream `error` event into a provider error.
///
/// The HTTP status was already 200, so the status is inferred from the error type.
pub(crate) fn stream_error(provider: &'static str, detail: AnthropicErrorDetail) -> LLMError {
    let status = match detail.kind.as_deref() {
        Some("invalid_request_error") => 400,
        Some("authentication_error") => 401,
        Some("permission_error") => 403,
        Some("not_found_error") => 404,
        Some("request_too_large") => 413,
        Some("rate_limit_error") => 429,
        Some("overloaded_error") => 529,
        _ => 500,
    };
    let message = detail
        .message
        .unwrap_or_else(|| "stream error".to_string());
    LLMError::provider(
        provider,
        classify_status(status, message, detail.kind.as_deref(), None),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ProviderErrorKind;

    #[test]
    fn parse_auth_and_rate_limit_errors() {
        let body = r#"{
  "type": "error",
  "error": {
    "type": "authentication_error",
    "message": "invalid x-api-key"
  }
}"#;
        let err = parse_anthropic_error("anthropic", 401, &HashMap::new(), body);
        match err {
            LLMError::Provider {
                kind: ProviderErrorKind::Auth { message },
                ..
            } => assert!(message.contains("invalid x-api-key")),
            other => panic!("expected Auth error, got {other:?}"),
        }

        let headers = HashMap::from([("retry-after".to_string(), "2".to_string())]);
        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"Too many requests"}}"#;
        match parse_anthropic_error("anthropic", 429, &headers, body) {
            LLMError::Provider {
                kind: ProviderErrorKind::RateLimit { retry_after, .. },
                ..
            } => assert_eq!(retry_after, Some(Duration::from_secs(2))),
            other => panic!("expected RateLimit error, got {other:?}"),
        }
    }

    #[test]
    fn parse_model_not_found_and_token_limit() {
        let body = r#"{"type":"error","error":{"type":"not_found_error","message":"model: claude-bogus"}}"#;
        assert!(matches!(
            parse_anthropic_error("anthropic", 404, &HashMap::new(), body),
            LLMError::Provider {
                kind: ProviderErrorKind::ModelNotFound { .. },
                ..
            }
        ));

        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"prompt is too long: 215000 tokens > 200000 maximum"}}"#;
        assert!(matches!(
            parse_anthropic_error("anthropic", 400, &HashMap::new(), body),
            LLMError::Provider {
                kind: ProviderErrorKind::TokenLimitExceeded { .. },
                ..
            }
        ));
    }

    #[test]
    fn unparseable_body_falls_back_to_status() {
        match parse_anthropic_error("anthropic", 500, &HashMap::new(), "not a json") {
            LLMError::Provider {
                kind: ProviderErrorKind::Api { status, message },
                ..
            } => {
                assert_eq!(status, 500);
                assert!(message.contains("status 500: not a json"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn overloaded_stream_error_keeps_status() {
        let err = stream_error(
            "anthropic",
            AnthropicErrorDetail {
                kind: Some("overloaded_error".to_string()),
                message: Some("Overloaded".to_string()),
            },
        );
        assert!(matches!(
            err,
            LLMError::Provider {
                kind: ProviderErrorKind::Api { status: 529, .. },
                ..
            }
        ));
    }
}
