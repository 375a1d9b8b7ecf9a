use thiserror::Error;

/// Error taxonomy surfaced to API callers.
///
/// Adapters carry their own error enums (store, object store, LLM) and are
/// converted into one of these kinds at the service boundary, so handlers
/// only ever map this type to an HTTP response.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    UnprocessableEntity(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Short error code string included in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::UnprocessableEntity(_) => "UNPROCESSABLE_ENTITY",
            ApiError::TooManyRequests(_) => "TOO_MANY_REQUESTS",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code for this error kind.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::PayloadTooLarge(_) => 413,
            ApiError::UnprocessableEntity(_) => 422,
            ApiError::TooManyRequests(_) => 429,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("serialization: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_kinds() {
        assert_eq!(ApiError::NotFound("x".into()).status(), 404);
        assert_eq!(ApiError::Conflict("x".into()).status(), 409);
        assert_eq!(ApiError::ServiceUnavailable("x".into()).status(), 503);
        assert_eq!(ApiError::PayloadTooLarge("x".into()).status(), 413);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::Forbidden("x".into()).code(), "FORBIDDEN");
        assert_eq!(ApiError::Internal("x".into()).code(), "INTERNAL_ERROR");
    }
}
