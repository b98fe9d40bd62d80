//! Booking settlement, lookup and cancellation.
//!
//! - POST /api/bookings - settle a booking
//! - GET /api/bookings/:id - load a booking
//! - POST /api/bookings/:id/cancel - cancel with best-effort refund
//!
//! # Settlement
//!
//! With a `reservation_id` from an earlier reservation the hold is consumed
//! and only settlement runs. Without one the rooms are reserved first and
//! the hold is released if settlement never consumed it.

use super::ApiResult;
use crate::engine::{BookRequest, SettledBooking, SettlementRequest};
use crate::server::AppState;
use crate::types::{
    Booking, BookingId, ListingId, Money, PaymentConfirmation, ReservationId, StayDates,
    UserId,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

/// Request to settle a booking.
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    /// Guest
    pub user_id: UserId,
    /// Listing
    pub listing_id: ListingId,
    /// `YYYY-MM-DD` or RFC 3339
    pub check_in: String,
    /// `YYYY-MM-DD` or RFC 3339
    pub check_out: String,
    /// Guest count
    pub guests: u32,
    /// Hold from an earlier reservation
    pub reservation_id: Option<ReservationId>,
    /// Wallet co-payment in minor units
    #[serde(default)]
    pub wallet_deduction: Money,
    /// Gateway checkout result; omit for fully wallet-paid bookings
    pub payment: Option<PaymentConfirmation>,
}

/// Request to cancel a booking.
#[derive(Debug, Deserialize)]
pub struct CancelBookingRequest {
    /// Who cancels
    pub cancelled_by: UserId,
}

/// Settle a booking.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/bookings \
///   -H "Content-Type: application/json" \
///   -d '{
///     "user_id": "...",
///     "listing_id": "...",
///     "check_in": "2025-03-01",
///     "check_out": "2025-03-04",
///     "guests": 2,
///     "wallet_deduction": 50000,
///     "payment": {"order_id": "order_...", "payment_id": "pay_...", "signature": "..."}
///   }'
/// ```
pub async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> ApiResult<(StatusCode, Json<SettledBooking>)> {
    let stay = StayDates::parse(&request.check_in, &request.check_out)?;

    let settled = match request.reservation_id {
        Some(reservation_id) => {
            state
                .engine
                .settle(SettlementRequest {
                    user_id: request.user_id,
                    listing_id: request.listing_id,
                    stay,
                    guests: request.guests,
                    reservation_id,
                    wallet_deduction: request.wallet_deduction,
                    payment: request.payment,
                })
                .await?
        },
        None => {
            state
                .engine
                .book(BookRequest {
                    user_id: request.user_id,
                    listing_id: request.listing_id,
                    stay,
                    guests: request.guests,
                    wallet_deduction: request.wallet_deduction,
                    payment: request.payment,
                })
                .await?
        },
    };

    Ok((StatusCode::CREATED, Json(settled)))
}

/// Load a booking.
pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Json<Booking>> {
    Ok(Json(state.engine.booking(booking_id).await?))
}

/// Cancel a booking.
///
/// The response carries `refund_status`: `succeeded` with the refund id,
/// `failed` with the gateway reason, or `not_required`.
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<BookingId>,
    Json(request): Json<CancelBookingRequest>,
) -> ApiResult<Json<Booking>> {
    Ok(Json(
        state.engine.cancel(booking_id, request.cancelled_by).await?,
    ))
}
