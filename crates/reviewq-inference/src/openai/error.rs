//! OpenAI-specific error handling.

use reviewq_core::Error;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid authentication credentials.
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Request too large for the model context.
    ContextLengthExceeded,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status, error type and error code.
    pub fn from_response(status: u16, error_type: &str, code: Option<&str>) -> Self {
        let code = code.unwrap_or_default();
        if code.contains("context_length") || error_type.contains("context_length") {
            return Self::ContextLengthExceeded;
        }
        match status {
            401 => Self::AuthenticationError,
            413 => Self::ContextLengthExceeded,
            429 => Self::RateLimitExceeded,
            404 => Self::ModelNotFound,
            _ if code == "model_not_found" => Self::ModelNotFound,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError)
    }
}

/// Convert an OpenAI error to a reviewq error.
///
/// Context-length errors become [`Error::ContextOverflow`] so the review
/// handler can split the document and try again.
pub fn to_reviewq_error(code: OpenAIErrorCode, message: &str) -> Error {
    match code {
        OpenAIErrorCode::AuthenticationError => {
            Error::Config(format!("Authentication failed: {}", message))
        }
        OpenAIErrorCode::RateLimitExceeded => {
            Error::Inference(format!("Rate limit exceeded: {}", message))
        }
        OpenAIErrorCode::ModelNotFound => Error::Config(format!("Model not found: {}", message)),
        OpenAIErrorCode::ContextLengthExceeded => Error::ContextOverflow(message.to_string()),
        OpenAIErrorCode::ServerError => Error::Inference(format!("Server error: {}", message)),
        OpenAIErrorCode::Unknown => Error::Inference(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_401() {
        let code = OpenAIErrorCode::from_response(401, "invalid_request_error", Some("invalid_api_key"));
        assert_eq!(code, OpenAIErrorCode::AuthenticationError);
    }

    #[test]
    fn test_error_code_from_429() {
        let code = OpenAIErrorCode::from_response(429, "rate_limit_exceeded", None);
        assert_eq!(code, OpenAIErrorCode::RateLimitExceeded);
    }

    #[test]
    fn test_context_length_from_code() {
        let code = OpenAIErrorCode::from_response(
            400,
            "invalid_request_error",
            Some("context_length_exceeded"),
        );
        assert_eq!(code, OpenAIErrorCode::ContextLengthExceeded);
    }

    #[test]
    fn test_context_length_from_413() {
        assert_eq!(
            OpenAIErrorCode::from_response(413, "", None),
            OpenAIErrorCode::ContextLengthExceeded
        );
    }

    #[test]
    fn test_error_code_from_502() {
        let code = OpenAIErrorCode::from_response(502, "bad_gateway", None);
        assert_eq!(code, OpenAIErrorCode::ServerError);
        assert!(code.is_retryable());
    }

    #[test]
    fn test_error_code_from_unknown() {
        let code = OpenAIErrorCode::from_response(418, "im_a_teapot", None);
        assert_eq!(code, OpenAIErrorCode::Unknown);
        assert!(!code.is_retryable());
    }

    #[test]
    fn test_context_length_maps_to_overflow() {
        let err = to_reviewq_error(OpenAIErrorCode::ContextLengthExceeded, "8192 tokens");
        assert!(matches!(err, Error::ContextOverflow(_)));
    }

    #[test]
    fn test_auth_maps_to_config() {
        let err = to_reviewq_error(OpenAIErrorCode::AuthenticationError, "Invalid key");
        assert!(err.to_string().contains("Authentication failed"));
    }
}
