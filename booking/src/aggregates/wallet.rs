//! Wallet aggregate: reward-point redemption.

use crate::config::RewardsConfig;
use crate::error::BookingError;
use crate::pricing;
use crate::repositories::WalletRepository;
use crate::types::{Money, Transaction, TransactionKind, UserId, WalletAccount};
use staybook_core::environment::Clock;
use staybook_core::{SmallVec, async_effect, effect::Effect, reducer::Reducer, smallvec};
use std::sync::Arc;
use uuid::Uuid;

/// Redemption totals since start
#[derive(Debug, Clone, Default)]
pub struct WalletState {
    /// Completed redemptions
    pub redemptions: u64,
    /// Points converted to balance
    pub points_redeemed: u64,
    /// Most recent rejection
    pub last_error: Option<BookingError>,
}

/// Wallet commands and their outcomes
#[derive(Debug, Clone)]
pub enum WalletAction {
    // Commands
    /// Convert reward points to wallet balance
    RedeemPoints {
        /// Request correlation
        correlation_id: Uuid,
        /// Account owner
        user_id: UserId,
        /// Points to redeem
        points: u64,
    },

    // Events
    /// Points were converted
    PointsRedeemed {
        /// Request correlation
        correlation_id: Uuid,
        /// Points debited
        points: u64,
        /// Balance credited
        credited: Money,
        /// Account after the redemption
        account: WalletAccount,
    },

    /// Redemption refused
    RedemptionRejected {
        /// Request correlation
        correlation_id: Uuid,
        /// Account owner
        user_id: UserId,
        /// Why
        error: BookingError,
    },
}

impl WalletAction {
    /// Whether this is the outcome of the command with `correlation_id`
    #[must_use]
    pub fn is_outcome_of(&self, correlation_id: Uuid) -> bool {
        match self {
            Self::PointsRedeemed { correlation_id: id, .. }
            | Self::RedemptionRejected { correlation_id: id, .. } => *id == correlation_id,
            Self::RedeemPoints { .. } => false,
        }
    }
}

/// Wallet collaborators
#[derive(Clone)]
pub struct WalletEnvironment {
    /// Wallet storage
    pub wallets: Arc<dyn WalletRepository>,
    /// Time source for transaction records
    pub clock: Arc<dyn Clock>,
    /// Redemption rate and minimum
    pub rewards: RewardsConfig,
}

/// Reducer for [`WalletAction`]
#[derive(Debug, Clone, Copy, Default)]
pub struct WalletReducer;

impl Reducer for WalletReducer {
    type State = WalletState;
    type Action = WalletAction;
    type Environment = WalletEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            WalletAction::RedeemPoints {
                correlation_id,
                user_id,
                points,
            } => {
                let credit = match pricing::redemption_credit(points, &env.rewards) {
                    Ok(credit) => credit,
                    Err(error) => {
                        return smallvec![Effect::send(WalletAction::RedemptionRejected {
                            correlation_id,
                            user_id,
                            error,
                        })];
                    },
                };

                let entry = Transaction::new(
                    user_id,
                    TransactionKind::Redeem,
                    points,
                    format!("Redeemed {points} points for {credit}"),
                    env.clock.now(),
                );
                let wallets = Arc::clone(&env.wallets);

                smallvec![async_effect! {
                    match wallets.redeem_points(user_id, points, credit, entry).await {
                        Ok(account) => Some(WalletAction::PointsRedeemed {
                            correlation_id,
                            points,
                            credited: credit,
                            account,
                        }),
                        Err(error) => Some(WalletAction::RedemptionRejected {
                            correlation_id,
                            user_id,
                            error,
                        }),
                    }
                }]
            },

            WalletAction::PointsRedeemed {
                points,
                credited,
                account,
                ..
            } => {
                tracing::info!(
                    user_id = %account.user_id,
                    points,
                    %credited,
                    balance = %account.wallet_balance,
                    "Points redeemed"
                );
                metrics::counter!("staybook.wallet.points_redeemed").increment(points);
                state.redemptions += 1;
                state.points_redeemed += points;
                SmallVec::new()
            },

            WalletAction::RedemptionRejected { user_id, error, .. } => {
                tracing::warn!(%user_id, %error, "Redemption rejected");
                state.last_error = Some(error);
                SmallVec::new()
            },
        }
    }
}
