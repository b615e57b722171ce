//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

#[derive(Debug)]
pub enum ApiError {
    Core(reviewq_core::Error),
    Unauthorized(String),
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use reviewq_core::Error;
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(err) => match err {
                Error::NotFound(_) | Error::TaskNotFound(_) => StatusCode::NOT_FOUND,
                Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                Error::Conflict(_)
                | Error::CannotCancelProcessing(_)
                | Error::InvalidTransition { .. } => StatusCode::CONFLICT,
                Error::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::BadRequest(_) => "INVALID_INPUT",
            ApiError::Core(err) => err.code(),
        }
    }
}

impl From<reviewq_core::Error> for ApiError {
    fn from(err: reviewq_core::Error) -> Self {
        ApiError::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            ApiError::Core(err) => {
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(subsystem = "api", code, error = %err, "Request failed");
                }
                err.to_string()
            }
            ApiError::Unauthorized(msg) | ApiError::BadRequest(msg) => msg,
        };

        let body = Json(serde_json::json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewq_core::Error;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::TaskNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (Error::Conflict("x".into()), StatusCode::CONFLICT),
            (Error::CannotCancelProcessing(Uuid::nil()), StatusCode::CONFLICT),
            (Error::QueueFull("x".into()), StatusCode::TOO_MANY_REQUESTS),
            (Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_code_passthrough() {
        let err = ApiError::from(Error::CannotCancelProcessing(Uuid::nil()));
        assert_eq!(err.code(), "CANNOT_CANCEL_PROCESSING");
        assert_eq!(ApiError::Unauthorized("no".into()).code(), "UNAUTHORIZED");
    }
}
