//! Maps `BoardError` onto the HTTP status codes and `{"error": "<message>"}`
//! body shape the interface table promises.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use boardmesh_types::BoardError;

pub struct ApiError(pub BoardError);

impl From<BoardError> for ApiError {
    fn from(e: BoardError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            BoardError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            BoardError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            BoardError::InvalidKeyFormat(m) | BoardError::InvalidKeyBytes(m) => {
                (StatusCode::BAD_REQUEST, m.clone())
            }
            BoardError::Unauthorized(m) => (StatusCode::FORBIDDEN, m.clone()),
            BoardError::SignatureInvalid => {
                (StatusCode::BAD_REQUEST, "signature verification failed".to_string())
            }
            BoardError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            BoardError::Upstream(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            BoardError::NotConfigured(m) => (StatusCode::NOT_IMPLEMENTED, m.clone()),
            BoardError::Capacity(m) => (StatusCode::PAYLOAD_TOO_LARGE, m.clone()),
            BoardError::Transient(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
