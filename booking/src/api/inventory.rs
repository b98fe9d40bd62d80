//! Room holds.
//!
//! - POST /api/listings/:id/reservations - hold rooms for a guest count
//! - POST /api/listings/:id/restorations - release an unsettled hold

use super::ApiResult;
use crate::server::AppState;
use crate::types::{ListingId, Reservation, ReservationId, RoomTypes};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

/// Request to reserve rooms for a guest count.
#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    /// Guest count (1-5)
    pub guests: u32,
}

/// Request to release a hold.
#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    /// Id returned by the reservation
    pub reservation_id: ReservationId,
}

/// Unbooked rooms after a release.
#[derive(Debug, Serialize, Deserialize)]
pub struct RestorationResponse {
    /// Listing
    pub listing_id: ListingId,
    /// Unbooked rooms by type
    pub room_types: RoomTypes,
}

/// Hold the rooms a guest count needs.
///
/// The returned `id` is passed as `reservation_id` when settling.
pub async fn reserve_rooms(
    State(state): State<AppState>,
    Path(listing_id): Path<ListingId>,
    Json(request): Json<ReserveRequest>,
) -> ApiResult<(StatusCode, Json<Reservation>)> {
    let reservation = state.engine.reserve(listing_id, request.guests).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// Release a hold that was never settled.
pub async fn restore_rooms(
    State(state): State<AppState>,
    Path(listing_id): Path<ListingId>,
    Json(request): Json<RestoreRequest>,
) -> ApiResult<Json<RestorationResponse>> {
    let room_types = state.engine.restore(listing_id, request.reservation_id).await?;

    Ok(Json(RestorationResponse {
        listing_id,
        room_types,
    }))
}
