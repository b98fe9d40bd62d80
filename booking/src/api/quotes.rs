//! Stay pricing.
//!
//! - POST /api/quotes

use super::{ApiResult, AppError};
use crate::pricing::PricingResult;
use crate::server::AppState;
use crate::types::{ListingId, StayDates, UserId};
use axum::{Json, extract::State};
use serde::Deserialize;

/// Request to price a stay.
///
/// With `user_id` the membership is resolved from the user's wallet;
/// otherwise `membership_active` is taken as given.
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    /// Listing to price
    pub listing_id: ListingId,
    /// `YYYY-MM-DD` or RFC 3339
    pub check_in: String,
    /// `YYYY-MM-DD` or RFC 3339
    pub check_out: String,
    /// Guest count
    pub guests: u32,
    /// Guest whose membership applies
    pub user_id: Option<UserId>,
    /// Explicit membership flag
    pub membership_active: Option<bool>,
}

/// Price a stay.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/quotes \
///   -H "Content-Type: application/json" \
///   -d '{"listing_id": "...", "check_in": "2025-03-01", "check_out": "2025-03-04", "guests": 2}'
/// ```
///
/// Response:
/// ```json
/// {"nights": 3, "base": 300000, "surcharge": 0, "service_fee": 15000, "total": 315000}
/// ```
pub async fn create_quote(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<Json<PricingResult>> {
    let stay = StayDates::parse(&request.check_in, &request.check_out)?;

    let quote = match (request.user_id, request.membership_active) {
        (Some(_), Some(_)) => {
            return Err(AppError::bad_request(
                "pass either user_id or membership_active, not both",
            ));
        },
        (Some(user_id), None) => {
            state
                .engine
                .quote_for_user(user_id, request.listing_id, &stay, request.guests)
                .await?
        },
        (None, membership_active) => {
            state
                .engine
                .quote(
                    request.listing_id,
                    &stay,
                    request.guests,
                    membership_active.unwrap_or(false),
                )
                .await?
        },
    };

    Ok(Json(quote))
}
