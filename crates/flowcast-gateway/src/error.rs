//! Maps engine errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use flowcast_core::error::FlowcastError;

/// Handler error. Status comes from `FlowcastError::status_code`.
#[derive(Debug)]
pub struct ApiError(pub FlowcastError);

impl From<FlowcastError> for ApiError {
    fn from(err: FlowcastError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("❌ API error: {}", self.0);
        }
        let body = serde_json::json!({
            "ok": false,
            "kind": self.0.kind(),
            "error": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
