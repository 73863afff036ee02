use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use s5_pins_core::PinningError;
use s5_pins_core::api::ErrorResponse;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid access token")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Pinning(#[from] PinningError),
}

impl ApiError {
    fn status_and_reason(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "ERR_NOT_AUTHORIZED"),
            ApiError::BadRequest(_) | ApiError::Pinning(PinningError::InvalidParameters(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            ApiError::Pinning(PinningError::NotFound) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Pinning(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = self.status_and_reason();
        if status.is_server_error() {
            error!("request failed: {self:#}");
        }
        (status, Json(ErrorResponse::new(reason, self.to_string()))).into_response()
    }
}
