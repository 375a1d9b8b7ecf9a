//! ApiError → HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use confab_core::ApiError;

/// Newtype so `?` works in handlers: any `ApiError` (or adapter error with
/// a `From` into it) becomes a JSON error response.
pub struct HttpError(pub ApiError);

pub type HttpResult<T> = std::result::Result<T, HttpError>;

impl<E> From<E> for HttpError
where
    E: Into<ApiError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(code = self.0.code(), error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
