//! Gateway orders.
//!
//! - POST /api/payments/orders

use super::ApiResult;
use crate::payment_gateway::PaymentOrder;
use crate::server::AppState;
use crate::types::Money;
use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use uuid::Uuid;

/// Request to open a gateway order.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Amount the guest pays by card, in minor units
    pub amount: Money,
    /// Merchant receipt reference; generated when absent
    pub receipt: Option<String>,
}

/// Open a gateway order for the card-paid portion of a booking.
///
/// The client completes the order through the gateway checkout and submits
/// the returned `{order_id, payment_id, signature}` with the booking.
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<PaymentOrder>)> {
    let receipt = request
        .receipt
        .unwrap_or_else(|| format!("rcpt_{}", Uuid::new_v4().simple()));

    let order = state
        .engine
        .create_payment_order(request.amount, receipt)
        .await?;

    Ok((StatusCode::CREATED, Json(order)))
}
