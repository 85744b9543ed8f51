use std::collections::HashMap;

use crate::error::{LLMError, classify_status};
use crate::provider::headers::retry_after_from_headers;

use super::types::GeminiErrorBody;

/// Parses error responses returned by Google Gemini.
///
/// The google.rpc status string (`NOT_FOUND`, `RESOURCE_EXHAUSTED`...) refines the HTTP status.
pub(crate) fn parse_gemini_error(
    provider: &'static str,
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> LLMError {
    let retry_after = retry_after_from_headers(headers);
    let Some(detail) = serde_json::from_str::<GeminiErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
    else {
        return LLMError::provider(
            provider,
            classify_status(status, format!("status {status}: {body}"), None, retry_after),
        );
    };

    let mut message = detail
        .message
        .unwrap_or_else(|| "unknown error".to_string());
    let status_hint = detail.status.as_deref().filter(|text| !text.is_empty());
    if let Some(status_text) = status_hint {
        message = format!("{message} ({status_text})");
    }
    LLMError::provider(
        provider,
        classify_status(status, message, status_hint, retry_after),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;

    #[test]
    fn parse_auth_and_rate_limit_errors() {
        let body = r#"{"error":{"code":403,"message":"API key not valid. Please pass a valid API key.","status":"PERMISSION_DENIED"}}"#;
        match parse_gemini_error("gemini", 403, &HashMap::new(), body) {
            LLMError::Provider {
                provider: "gemini",
                kind: ProviderErrorKind::Auth { message },
            } => assert!(message.contains("API key not valid")),
            other => panic!("expected Auth error, got {other:?}"),
        }

        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(
            parse_gemini_error("gemini", 429, &HashMap::new(), body),
            LLMError::Provider {
                kind: ProviderErrorKind::RateLimit { .. },
                ..
            }
        ));
    }

    #[test]
    fn parse_gemini_token_limit_and_model_errors() {
        let body = r#"{"error":{"code":400,"message":"The input token count (1200000) exceeds the maximum number of tokens allowed; input is too long","status":"INVALID_ARGUMENT"}}"#;
        assert!(matches!(
            parse_gemini_error("gemini", 400, &HashMap::new(), body),
            LLMError::Provider {
                kind: ProviderErrorKind::TokenLimitExceeded { .. },
                ..
            }
        ));

        let body = r#"{"error":{"code":404,"message":"models/gemini-bogus is not found for API version v1beta","status":"NOT_FOUND"}}"#;
        match parse_gemini_error("gemini", 404, &HashMap::new(), body) {
            LLMError::Provider {
                kind: ProviderErrorKind::ModelNotFound { message, .. },
                ..
            } => assert!(message.ends_with("(NOT_FOUND)")),
            other => panic!("expected ModelNotFound error, got {other:?}"),
        }
    }

    #[test]
    fn plain_bad_request_and_unparseable_body() {
        let body = r#"{"error":{"code":400,"message":"Invalid JSON payload received.","status":"INVALID_ARGUMENT"}}"#;
        assert!(matches!(
            parse_gemini_error("gemini", 400, &HashMap::new(), body),
            LLMError::Provider {
                kind: ProviderErrorKind::BadRequest { .. },
                ..
            }
        ));

        assert!(matches!(
            parse_gemini_error("gemini", 503, &HashMap::new(), "<html>unavailable</html>"),
            LLMError::Provider {
                kind: ProviderErrorKind::Api { status: 503, .. },
                ..
            }
        ));
    }
}
