// =============================================================================
// HTTP surface: REST routes and the SSE trade stream
// =============================================================================

pub mod rest;
pub mod sse;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error envelope returned on every failing route:
/// `{error, code, details?}` with a matching HTTP status.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn bad_request(code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn not_found(code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn conflict(code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: error.into(),
            code: "internal",
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_without_status() {
        let err = ApiError::conflict("round_in_progress", "a round is running")
            .with_details(serde_json::json!({ "roundId": "round-1" }));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "round_in_progress");
        assert_eq!(json["error"], "a round is running");
        assert_eq!(json["details"]["roundId"], "round-1");
        assert!(json.get("status").is_none());
    }

    #[test]
    fn details_are_omitted_when_absent() {
        let err = ApiError::bad_request("validation", "bad limit");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("details").is_none());
    }
}
