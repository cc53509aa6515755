//! HTTP error response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use portbridge_domain::error::{BridgeError, UnavailableError, ValidationError};

/// JSON error body returned by API endpoints.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps [`BridgeError`] to an HTTP response with appropriate status code.
#[derive(Debug)]
pub struct ApiError(BridgeError);

impl ApiError {
    /// A path segment that is not a valid identifier.
    pub(crate) fn invalid_id(raw: &str) -> Self {
        Self(ValidationError::InvalidId(raw.to_string()).into())
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BridgeError::Validation(_) => StatusCode::BAD_REQUEST,
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::Conflict(_) => StatusCode::CONFLICT,
            BridgeError::Unavailable(UnavailableError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Storage(err) => {
                tracing::error!(error = %err, "internal error");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        error: "internal server error".to_string(),
                    }),
                )
                    .into_response();
            }
        };

        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
