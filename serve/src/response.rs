//! Error-to-HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use weft::CoreError;

/// Wraps core errors so handlers can use `?`.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code() {
            "permission_denied" => StatusCode::FORBIDDEN,
            "playbook_unusable" | "schema_violation" | "tool_call_malformed" => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            "cost_cap_exceeded" => StatusCode::PAYMENT_REQUIRED,
            "cancelled" => StatusCode::CONFLICT,
            "provider_unavailable" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
                "details": self.0.details(),
            }
        }));
        (status, body).into_response()
    }
}
