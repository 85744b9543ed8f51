use std::collections::HashMap;

use serde_json::Value;

use crate::error::{LLMError, classify_status};
use crate::provider::headers::retry_after_from_headers;

use super::types::OpenAiErrorBody;

/// Decodes an `{"error": {...}}` body into a classified provider error.
pub(crate) fn parse_openai_error(
    provider: &'static str,
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> LLMError {
    let retry_after = retry_after_from_headers(headers);
    let detail = serde_json::from_str::<OpenAiErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error);

    let (message, code) = match detail {
        Some(detail) => {
            let code = match detail.code {
                Some(Value::String(code)) => Some(code),
                Some(Value::Number(code)) => Some(code.to_string()),
                _ => detail.kind,
            };
            let message = detail
                .message
                .unwrap_or_else(|| "unknown error".to_string());
            (message, code)
        }
        None => (fallback_message(status, body), None),
    };

    LLMError::provider(
        provider,
        classify_status(status, message, code.as_deref(), retry_after),
    )
}

fn fallback_message(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("status {status} with empty body")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ProviderErrorKind;

    #[test]
    fn context_length_code_maps_to_token_limit() {
        let body = r#"{"error":{"message":"This model's maximum context length is 8192 tokens.","type":"invalid_request_error","code":"context_length_exceeded"}}"#;
        let err = parse_openai_error("openai", 400, &HashMap::new(), body);
        assert!(matches!(
            err,
            LLMError::Provider {
                provider: "openai",
                kind: ProviderErrorKind::TokenLimitExceeded { .. }
            }
        ));
    }

    #[test]
    fn rate_limit_keeps_retry_after() {
        let headers = HashMap::from([("retry-after".to_string(), "12".to_string())]);
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#;
        match parse_openai_error("groq", 429, &headers, body) {
            LLMError::Provider {
                provider,
                kind: ProviderErrorKind::RateLimit { retry_after, message },
            } => {
                assert_eq!(provider, "groq");
                assert_eq!(retry_after, Some(Duration::from_secs(12)));
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_json_body_is_kept_verbatim() {
        match parse_openai_error("openrouter", 502, &HashMap::new(), "bad gateway") {
            LLMError::Provider {
                kind: ProviderErrorKind::Api { status, message },
                ..
            } => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
