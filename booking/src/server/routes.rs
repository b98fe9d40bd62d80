//! Router configuration.

use super::health::health_check;
use super::state::AppState;
use crate::api::{bookings, inventory, payments, quotes, wallets};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router with every endpoint.
///
/// ```text
/// GET  /health
/// POST /api/quotes
/// POST /api/payments/orders
/// POST /api/listings/:id/reservations
/// POST /api/listings/:id/restorations
/// POST /api/bookings
/// GET  /api/bookings/:id
/// POST /api/bookings/:id/cancel
/// GET  /api/wallets/:user_id
/// POST /api/wallets/:user_id/redemptions
/// ```
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Pricing
        .route("/quotes", post(quotes::create_quote))
        // Payments
        .route("/payments/orders", post(payments::create_order))
        // Inventory
        .route("/listings/:id/reservations", post(inventory::reserve_rooms))
        .route("/listings/:id/restorations", post(inventory::restore_rooms))
        // Bookings
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        // Wallets
        .route("/wallets/:user_id", get(wallets::get_wallet))
        .route("/wallets/:user_id/redemptions", post(wallets::redeem_points));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
