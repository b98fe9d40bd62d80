//! Error type for HTTP handlers.
//!
//! Bridges [`BookingError`] to HTTP responses with a `{code, message}` JSON
//! body.

use crate::error::BookingError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Application error returned by handlers.
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Booking>, AppError> {
///     Ok(Json(state.engine.booking(id).await?))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
    /// Internal error (logged, not exposed to the client)
    source: Option<BookingError>,
}

impl AppError {
    /// Create an error
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST".to_string())
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = %self.code,
                message = %self.message,
                "Request failed"
            );
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<BookingError> for AppError {
    fn from(error: BookingError) -> Self {
        let status = match &error {
            BookingError::InvalidDateRange
            | BookingError::InvalidGuestCount { .. }
            | BookingError::AmountOutOfRange
            | BookingError::ReservationMismatch { .. }
            | BookingError::InsufficientWalletBalance { .. }
            | BookingError::InsufficientPoints { .. }
            | BookingError::MinimumRedemptionNotMet { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BookingError::InventoryNotConfigured { .. }
            | BookingError::InsufficientInventory { .. }
            | BookingError::AlreadyCancelled { .. } => StatusCode::CONFLICT,
            BookingError::PaymentVerificationFailed => StatusCode::PAYMENT_REQUIRED,
            BookingError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Transient causes carry storage details; clients get a generic message.
        let message = if error.is_transient() {
            "service temporarily unavailable, retry later".to_string()
        } else {
            error.to_string()
        };

        Self {
            status,
            message,
            code: error.code().to_string(),
            source: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookingId, RoomType};

    #[test]
    fn inventory_shortage_is_a_conflict() {
        let err = AppError::from(BookingError::InsufficientInventory {
            missing: vec![RoomType::Single],
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "[INSUFFICIENT_INVENTORY] not enough single rooms available");
    }

    #[test]
    fn forged_payment_is_payment_required() {
        let err = AppError::from(BookingError::PaymentVerificationFailed);
        assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn transient_details_are_hidden() {
        let err = AppError::from(BookingError::transient("pool timed out after 30s"));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.to_string().contains("pool"));
    }

    #[test]
    fn second_cancel_is_a_conflict() {
        let err = AppError::from(BookingError::AlreadyCancelled {
            booking_id: BookingId::new(),
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "ALREADY_CANCELLED");
    }
}
