use std::error::Error as StdError;
use std::fmt;

use aws_sdk_bedrockruntime::error::{ProvideErrorMetadata, SdkError};

use crate::error::{
    LLMError, ProviderErrorKind, TransportError, extract_model_identifier,
    looks_like_token_limit_error,
};

/// Maps an SDK failure onto [`LLMError`].
///
/// Connection and timeout failures become transport errors; service errors are
/// classified by their AWS error code.
pub(crate) fn map_sdk_error<E, R>(provider: &'static str, err: SdkError<E, R>) -> LLMError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: fmt::Debug + Send + Sync + 'static,
{
    if matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)
    ) {
        return LLMError::transport(provider, TransportError::with_source(err));
    }

    let service = err.as_service_error();
    let code = service.and_then(|service| service.code()).map(str::to_string);
    let message = service
        .and_then(|service| service.message())
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());

    match classify_code(code.as_deref(), message) {
        Some(kind) => LLMError::provider(provider, kind),
        None => {
            let message = match &code {
                Some(code) => format!("{code}: {err}"),
                None => err.to_string(),
            };
            LLMError::sdk(provider, message, err)
        }
    }
}

/// Classifies well-known Bedrock error codes; `None` leaves the SDK error as is.
pub(crate) fn classify_code(code: Option<&str>, message: String) -> Option<ProviderErrorKind> {
    let kind = match code? {
        "ThrottlingException" | "ServiceQuotaExceededException" | "TooManyRequestsException" => {
            ProviderErrorKind::RateLimit {
                message,
                retry_after: None,
            }
        }
        "AccessDeniedException"
        | "UnrecognizedClientException"
        | "ExpiredTokenException"
        | "InvalidSignatureException"
        | "IncompleteSignature" => ProviderErrorKind::Auth { message },
        "ResourceNotFoundException" => ProviderErrorKind::ModelNotFound {
            model: extract_model_identifier(&message),
            message,
        },
        "ValidationException" if looks_like_token_limit_error(None, &message) => {
            ProviderErrorKind::TokenLimitExceeded { message }
        }
        "ValidationException" => ProviderErrorKind::BadRequest { message },
        _ => return None,
    };
    Some(kind)
}
