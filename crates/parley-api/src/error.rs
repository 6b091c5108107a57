use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use parley_delivery::DeliveryError;
use parley_types::api::ErrorResponse;

/// Renders a [`DeliveryError`] as `(status, {"error": ...})`.
#[derive(Debug)]
pub struct ApiError(pub DeliveryError);

impl From<DeliveryError> for ApiError {
    fn from(e: DeliveryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Store details stay in the log.
        let message = if status.is_server_error() {
            error!("Request failed: {}", self.0);
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
