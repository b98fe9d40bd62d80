//! Wallet balance, history and point redemption.
//!
//! - GET /api/wallets/:user_id
//! - POST /api/wallets/:user_id/redemptions

use super::ApiResult;
use crate::engine::Redemption;
use crate::server::AppState;
use crate::types::{Transaction, UserId, WalletAccount};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

/// Wallet with its history, newest first.
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    /// Balance, points and membership
    #[serde(flatten)]
    pub account: WalletAccount,
    /// Transactions, newest first
    pub transactions: Vec<Transaction>,
}

/// Request to redeem points.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// Points to convert
    pub points: u64,
}

/// Load a wallet and its transactions.
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<WalletResponse>> {
    let (account, transactions) = tokio::try_join!(
        state.engine.wallet(user_id),
        state.engine.transactions(user_id),
    )?;

    Ok(Json(WalletResponse {
        account,
        transactions,
    }))
}

/// Convert reward points into wallet balance.
pub async fn redeem_points(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(request): Json<RedeemRequest>,
) -> ApiResult<Json<Redemption>> {
    Ok(Json(
        state.engine.redeem_points(user_id, request.points).await?,
    ))
}
