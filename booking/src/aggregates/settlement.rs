//! Settlement aggregate: turning a priced stay and a room hold into a
//! booking, and cancelling it again.
//!
//! Settlement is a saga that compensates its own steps:
//!
//! ```text
//! SettleBooking ─► signature, order amount ─► PaymentVerified
//!     PaymentVerified ─► consume hold ─► RoomsClaimed ─► insert ─► BookingRecorded
//!     BookingRecorded ─► debit wallet (if any) ─► WalletCharged
//!                                      └─► WalletChargeRejected ─► delete booking
//!     WalletCharged ─► accrue points ─► SettlementCompleted
//!     failure after RoomsClaimed ─► SettlementRejected ─► return rooms
//! ```
//!
//! Failures before the hold is consumed leave it in place
//! (`reservation_kept`); after that the saga owns the rooms and gives them
//! back itself, so a caller that stops waiting never has to.
//!
//! Cancellation claims the booking first, so a second cancel always loses,
//! then refunds through the gateway, returns the rooms and records the
//! refund outcome:
//!
//! ```text
//! CancelBooking ─► claim ─► CancellationClaimed ─► refund ─► RefundSettled
//!     RefundSettled ─► restore rooms ─► RoomsReturned ─► record ─► BookingCancelled
//!                               └─► RoomReturnFailed ─► (delay) RetryRoomReturn
//! ```
//!
//! A refund failure never blocks the cancellation; it is recorded as
//! [`RefundStatus::Failed`]. Every attempt for one booking carries the same
//! idempotency key, so a retry after a lost response refunds once.

use crate::config::RewardsConfig;
use crate::error::BookingError;
use crate::payment_gateway::{GatewayError, PaymentGateway};
use crate::pricing;
use crate::repositories::{BookingRepository, ListingRepository, WalletRepository};
use crate::types::{
    Booking, BookingId, Money, PaymentConfirmation, PaymentReference, RefundStatus,
    ReservationId, Transaction, TransactionKind, UserId,
};
use staybook_core::environment::Clock;
use staybook_core::{SmallVec, async_effect, delay, effect::Effect, reducer::Reducer, smallvec};
use staybook_runtime::retry::{RetryPolicy, retry_if};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// State
// ============================================================================

/// Step an in-flight flow is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Checking the gateway order behind the payment
    VerifyingPayment,
    /// Consuming the room hold
    ClaimingRooms,
    /// Inserting the booking
    Recording,
    /// Debiting the wallet co-payment
    ChargingWallet,
    /// Crediting reward points
    AccruingPoints,
    /// Deleting a booking whose wallet debit failed
    RollingBack,
    /// Giving a failed settlement's rooms back
    ReleasingRooms,
    /// Claiming the cancellation
    Claiming,
    /// Waiting on the gateway refund
    Refunding,
    /// Returning rooms to the listing
    RestoringRooms,
    /// Writing the refund outcome
    RecordingRefund,
}

/// Settlement and cancellation progress
#[derive(Debug, Clone, Default)]
pub struct SettlementState {
    /// Flows in progress by correlation id
    pub in_flight: HashMap<Uuid, Stage>,
    /// Completed settlements
    pub settled: u64,
    /// Failed settlements
    pub settlement_failures: u64,
    /// Completed cancellations
    pub cancelled: u64,
    /// Cancellations whose gateway refund failed
    pub refund_failures: u64,
    /// Most recent failure
    pub last_error: Option<BookingError>,
}

impl SettlementState {
    fn advance(&mut self, correlation_id: Uuid, stage: Stage) {
        self.in_flight.insert(correlation_id, stage);
    }

    fn finish(&mut self, correlation_id: Uuid) {
        self.in_flight.remove(&correlation_id);
    }
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Settlement and cancellation commands and their outcomes
#[derive(Debug, Clone)]
pub enum SettlementAction {
    // Commands
    /// Verify payment, take over a room hold, persist and charge a booking
    SettleBooking {
        /// Request correlation
        correlation_id: Uuid,
        /// Priced booking to record; its rooms come from the hold
        booking: Booking,
        /// Hold made for this listing and guest count
        reservation_id: ReservationId,
        /// Gateway proof; not needed when the wallet covers the total
        payment: Option<PaymentConfirmation>,
    },

    /// Cancel a confirmed booking
    CancelBooking {
        /// Request correlation
        correlation_id: Uuid,
        /// Booking to cancel
        booking_id: BookingId,
        /// Who cancels
        cancelled_by: UserId,
    },

    // Settlement events
    /// The gateway order matches the amount due by card
    PaymentVerified {
        /// Request correlation
        correlation_id: Uuid,
        /// Booking with its gateway references
        booking: Booking,
        /// Hold to consume
        reservation_id: ReservationId,
    },

    /// Hold consumed; its rooms now belong to the booking
    RoomsClaimed {
        /// Request correlation
        correlation_id: Uuid,
        /// Booking with the held allocation
        booking: Booking,
    },

    /// Booking row written
    BookingRecorded {
        /// Request correlation
        correlation_id: Uuid,
        /// Stored booking
        booking: Booking,
    },

    /// Wallet co-payment debited
    WalletCharged {
        /// Request correlation
        correlation_id: Uuid,
        /// Booking being settled
        booking: Booking,
        /// Balance after the debit
        balance: Money,
    },

    /// Wallet co-payment refused; the booking must be removed
    WalletChargeRejected {
        /// Request correlation
        correlation_id: Uuid,
        /// Booking to roll back
        booking: Booking,
        /// Why
        error: BookingError,
    },

    /// A step after the rooms were claimed failed; they must go back
    SettlementRejected {
        /// Request correlation
        correlation_id: Uuid,
        /// Booking that will not be kept
        booking: Booking,
        /// Why
        error: BookingError,
    },

    /// Booking settled and points accrued
    SettlementCompleted {
        /// Request correlation
        correlation_id: Uuid,
        /// Settled booking
        booking: Booking,
        /// Reward points credited
        points_earned: u64,
    },

    /// Settlement did not complete
    SettlementFailed {
        /// Request correlation
        correlation_id: Uuid,
        /// Why
        error: BookingError,
        /// Booking that stays recorded despite the failure, if any
        retained: Option<Booking>,
        /// The hold was not consumed and still holds its rooms
        reservation_kept: bool,
    },

    // Cancellation events
    /// Booking moved to cancelled
    CancellationClaimed {
        /// Request correlation
        correlation_id: Uuid,
        /// Cancelled booking
        booking: Booking,
    },

    /// Gateway refund attempted
    RefundSettled {
        /// Request correlation
        correlation_id: Uuid,
        /// Cancelled booking
        booking: Booking,
        /// Refund outcome
        refund: RefundStatus,
    },

    /// Rooms given back to the listing
    RoomsReturned {
        /// Request correlation
        correlation_id: Uuid,
        /// Cancelled booking
        booking: Booking,
        /// Refund outcome to record
        refund: RefundStatus,
    },

    /// Returning rooms failed
    RoomReturnFailed {
        /// Request correlation
        correlation_id: Uuid,
        /// Cancelled booking
        booking: Booking,
        /// Refund outcome to record
        refund: RefundStatus,
        /// Zero-based attempt that failed
        attempt: u32,
        /// Why
        error: BookingError,
    },

    /// Try returning rooms again
    RetryRoomReturn {
        /// Request correlation
        correlation_id: Uuid,
        /// Cancelled booking
        booking: Booking,
        /// Refund outcome to record
        refund: RefundStatus,
        /// Attempt number
        attempt: u32,
    },

    /// Cancellation finished
    BookingCancelled {
        /// Request correlation
        correlation_id: Uuid,
        /// Final booking record
        booking: Booking,
    },

    /// Cancellation did not happen or could not be recorded
    CancellationFailed {
        /// Request correlation
        correlation_id: Uuid,
        /// Booking
        booking_id: BookingId,
        /// Why
        error: BookingError,
    },
}

impl SettlementAction {
    /// Whether this terminates the flow started with `correlation_id`
    #[must_use]
    pub fn is_outcome_of(&self, correlation_id: Uuid) -> bool {
        match self {
            Self::SettlementCompleted { correlation_id: id, .. }
            | Self::SettlementFailed { correlation_id: id, .. }
            | Self::BookingCancelled { correlation_id: id, .. }
            | Self::CancellationFailed { correlation_id: id, .. } => *id == correlation_id,
            _ => false,
        }
    }

    fn failed(correlation_id: Uuid, error: BookingError, reservation_kept: bool) -> Self {
        Self::SettlementFailed {
            correlation_id,
            error,
            retained: None,
            reservation_kept,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Settlement collaborators
#[derive(Clone)]
pub struct SettlementEnvironment {
    /// Booking storage
    pub bookings: Arc<dyn BookingRepository>,
    /// Wallet storage
    pub wallets: Arc<dyn WalletRepository>,
    /// Listing storage (holds and room restoration)
    pub listings: Arc<dyn ListingRepository>,
    /// Payment gateway
    pub gateway: Arc<dyn PaymentGateway>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Points accrual
    pub rewards: RewardsConfig,
    /// Overall refund deadline, retries included
    pub refund_timeout: Duration,
    /// Refund retry schedule
    pub refund_retry: RetryPolicy,
    /// Room-return retry schedule, for cancellations and failed settlements
    pub restore_retry: RetryPolicy,
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for [`SettlementAction`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementReducer;

impl SettlementReducer {
    /// Signature check; the order amount is checked against the gateway next.
    fn check_signature(
        booking: &Booking,
        payment: Option<&PaymentConfirmation>,
        gateway: &dyn PaymentGateway,
    ) -> Result<(), BookingError> {
        match payment {
            _ if booking.gateway_amount().is_zero() => Ok(()),
            Some(payment) if gateway.verify_signature(payment) => Ok(()),
            _ => Err(BookingError::PaymentVerificationFailed),
        }
    }

    fn verify_order(
        env: &SettlementEnvironment,
        correlation_id: Uuid,
        mut booking: Booking,
        reservation_id: ReservationId,
        payment: PaymentConfirmation,
    ) -> Effect<SettlementAction> {
        let gateway = Arc::clone(&env.gateway);
        let due = booking.gateway_amount();

        async_effect! {
            let verified = match gateway.fetch_order(payment.order_id.clone()).await {
                Ok(order) if order.amount == due => Ok(()),
                Ok(order) => {
                    tracing::warn!(
                        order_id = %order.order_id,
                        ordered = %order.amount,
                        %due,
                        "Order amount does not match the booking"
                    );
                    Err(BookingError::PaymentVerificationFailed)
                },
                Err(GatewayError::Rejected { reason }) => {
                    tracing::warn!(order_id = %payment.order_id, %reason, "Order not accepted");
                    Err(BookingError::PaymentVerificationFailed)
                },
                Err(error) => Err(BookingError::transient(format!("payment gateway: {error}"))),
            };

            match verified {
                Ok(()) => {
                    booking.payment = Some(PaymentReference {
                        order_id: payment.order_id,
                        payment_id: payment.payment_id,
                    });
                    Some(SettlementAction::PaymentVerified {
                        correlation_id,
                        booking,
                        reservation_id,
                    })
                },
                Err(error) => Some(SettlementAction::failed(correlation_id, error, true)),
            }
        }
    }

    fn release_rooms(
        env: &SettlementEnvironment,
        correlation_id: Uuid,
        booking: Booking,
        error: BookingError,
    ) -> Effect<SettlementAction> {
        let listings = Arc::clone(&env.listings);
        let policy = env.restore_retry.clone();

        async_effect! {
            let restored = retry_if(
                "settlement_release_rooms",
                &policy,
                || listings.restore_rooms(booking.listing_id, booking.room_allocation),
                BookingError::is_transient,
            )
            .await;
            if let Err(restore_error) = restored {
                tracing::error!(
                    booking_id = %booking.id,
                    listing_id = %booking.listing_id,
                    rooms = %booking.room_allocation.rooms(),
                    error = %restore_error,
                    "Rooms not returned after failed settlement"
                );
                metrics::counter!("staybook.settlement.orphaned_rooms").increment(1);
            }
            Some(SettlementAction::failed(correlation_id, error, false))
        }
    }

    fn accrue_points(
        env: &SettlementEnvironment,
        correlation_id: Uuid,
        booking: Booking,
    ) -> Effect<SettlementAction> {
        let points = pricing::points_earned(booking.total_amount, &env.rewards);
        let wallets = Arc::clone(&env.wallets);
        let entry = Transaction::new(
            booking.user_id,
            TransactionKind::Earn,
            points,
            format!("Earned {points} points for booking {}", booking.id),
            env.clock.now(),
        );

        async_effect! {
            if points == 0 {
                return Some(SettlementAction::SettlementCompleted {
                    correlation_id,
                    booking,
                    points_earned: 0,
                });
            }
            match wallets.credit_points(booking.user_id, points, entry).await {
                Ok(_) => Some(SettlementAction::SettlementCompleted {
                    correlation_id,
                    booking,
                    points_earned: points,
                }),
                Err(error) => Some(SettlementAction::SettlementFailed {
                    correlation_id,
                    error: BookingError::transient(format!(
                        "booking {} recorded but points accrual failed: {error}",
                        booking.id
                    )),
                    retained: Some(booking),
                    reservation_kept: false,
                }),
            }
        }
    }

    fn refund(
        env: &SettlementEnvironment,
        correlation_id: Uuid,
        booking: Booking,
    ) -> Effect<SettlementAction> {
        let amount = booking.gateway_amount();
        let idempotency_key = format!("refund_{}", booking.id);
        let payment_id = booking
            .payment
            .as_ref()
            .filter(|_| !amount.is_zero())
            .map(|payment| payment.payment_id.clone());
        let gateway = Arc::clone(&env.gateway);
        let timeout = env.refund_timeout;
        let policy = env.refund_retry.clone();

        async_effect! {
            let refund = match payment_id {
                None => RefundStatus::NotRequired,
                Some(payment_id) => {
                    let attempt = retry_if(
                        "gateway_refund",
                        &policy,
                        || gateway.refund(payment_id.clone(), amount, idempotency_key.clone()),
                        GatewayError::is_retryable,
                    );
                    match tokio::time::timeout(timeout, attempt).await {
                        Ok(Ok(refund_id)) => RefundStatus::Succeeded { refund_id },
                        Ok(Err(error)) => RefundStatus::Failed {
                            reason: error.to_string(),
                        },
                        Err(_) => RefundStatus::Failed {
                            reason: GatewayError::Timeout.to_string(),
                        },
                    }
                },
            };
            Some(SettlementAction::RefundSettled {
                correlation_id,
                booking,
                refund,
            })
        }
    }

    fn return_rooms(
        env: &SettlementEnvironment,
        correlation_id: Uuid,
        booking: Booking,
        refund: RefundStatus,
        attempt: u32,
    ) -> Effect<SettlementAction> {
        let listings = Arc::clone(&env.listings);

        async_effect! {
            match listings.restore_rooms(booking.listing_id, booking.room_allocation).await {
                Ok(_) => Some(SettlementAction::RoomsReturned {
                    correlation_id,
                    booking,
                    refund,
                }),
                Err(error) => Some(SettlementAction::RoomReturnFailed {
                    correlation_id,
                    booking,
                    refund,
                    attempt,
                    error,
                }),
            }
        }
    }

    fn record_refund(
        env: &SettlementEnvironment,
        correlation_id: Uuid,
        booking_id: BookingId,
        refund: RefundStatus,
    ) -> Effect<SettlementAction> {
        let bookings = Arc::clone(&env.bookings);

        async_effect! {
            match bookings.record_refund(booking_id, refund).await {
                Ok(booking) => Some(SettlementAction::BookingCancelled {
                    correlation_id,
                    booking,
                }),
                Err(error) => Some(SettlementAction::CancellationFailed {
                    correlation_id,
                    booking_id,
                    error,
                }),
            }
        }
    }
}

impl Reducer for SettlementReducer {
    type State = SettlementState;
    type Action = SettlementAction;
    type Environment = SettlementEnvironment;

    #[allow(clippy::too_many_lines)]
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Settlement ==========
            SettlementAction::SettleBooking {
                correlation_id,
                mut booking,
                reservation_id,
                payment,
            } => {
                if let Err(error) =
                    Self::check_signature(&booking, payment.as_ref(), env.gateway.as_ref())
                {
                    return smallvec![Effect::send(SettlementAction::failed(
                        correlation_id,
                        error,
                        true,
                    ))];
                }

                match payment.filter(|_| !booking.gateway_amount().is_zero()) {
                    Some(payment) => {
                        state.advance(correlation_id, Stage::VerifyingPayment);
                        smallvec![Self::verify_order(
                            env,
                            correlation_id,
                            booking,
                            reservation_id,
                            payment,
                        )]
                    },
                    None => {
                        booking.payment = None;
                        smallvec![Effect::send(SettlementAction::PaymentVerified {
                            correlation_id,
                            booking,
                            reservation_id,
                        })]
                    },
                }
            },

            SettlementAction::PaymentVerified {
                correlation_id,
                mut booking,
                reservation_id,
            } => {
                state.advance(correlation_id, Stage::ClaimingRooms);
                let listings = Arc::clone(&env.listings);

                smallvec![async_effect! {
                    let claimed = listings
                        .consume_reservation(reservation_id, booking.listing_id, booking.guests)
                        .await;
                    match claimed {
                        Ok(reservation) => {
                            booking.room_allocation = reservation.allocation;
                            Some(SettlementAction::RoomsClaimed {
                                correlation_id,
                                booking,
                            })
                        },
                        Err(error) => {
                            let kept = !matches!(error, BookingError::NotFound { .. });
                            Some(SettlementAction::failed(correlation_id, error, kept))
                        },
                    }
                }]
            },

            SettlementAction::RoomsClaimed {
                correlation_id,
                booking,
            } => {
                tracing::debug!(
                    booking_id = %booking.id,
                    rooms = %booking.room_allocation.rooms(),
                    "Rooms claimed"
                );
                state.advance(correlation_id, Stage::Recording);

                let bookings = Arc::clone(&env.bookings);
                smallvec![async_effect! {
                    match bookings.insert(booking.clone()).await {
                        Ok(()) => Some(SettlementAction::BookingRecorded {
                            correlation_id,
                            booking,
                        }),
                        Err(error) => Some(SettlementAction::SettlementRejected {
                            correlation_id,
                            booking,
                            error,
                        }),
                    }
                }]
            },

            SettlementAction::BookingRecorded {
                correlation_id,
                booking,
            } => {
                tracing::debug!(booking_id = %booking.id, "Booking recorded");

                if booking.wallet_deduction.is_zero() {
                    state.advance(correlation_id, Stage::AccruingPoints);
                    return smallvec![Self::accrue_points(env, correlation_id, booking)];
                }

                state.advance(correlation_id, Stage::ChargingWallet);
                let amount = booking.wallet_deduction;
                let entry = Transaction::new(
                    booking.user_id,
                    TransactionKind::Spend,
                    amount.minor(),
                    format!("Wallet payment for booking {}", booking.id),
                    env.clock.now(),
                );
                let wallets = Arc::clone(&env.wallets);

                smallvec![async_effect! {
                    match wallets.debit_balance(booking.user_id, amount, entry).await {
                        Ok(balance) => Some(SettlementAction::WalletCharged {
                            correlation_id,
                            booking,
                            balance,
                        }),
                        Err(error) => Some(SettlementAction::WalletChargeRejected {
                            correlation_id,
                            booking,
                            error,
                        }),
                    }
                }]
            },

            SettlementAction::WalletCharged {
                correlation_id,
                booking,
                balance,
            } => {
                tracing::debug!(booking_id = %booking.id, %balance, "Wallet charged");
                state.advance(correlation_id, Stage::AccruingPoints);
                smallvec![Self::accrue_points(env, correlation_id, booking)]
            },

            SettlementAction::WalletChargeRejected {
                correlation_id,
                booking,
                error,
            } => {
                tracing::warn!(
                    booking_id = %booking.id,
                    %error,
                    "Wallet charge rejected, rolling back booking"
                );
                state.advance(correlation_id, Stage::RollingBack);

                let bookings = Arc::clone(&env.bookings);
                smallvec![async_effect! {
                    if let Err(delete_error) = bookings.delete(booking.id).await {
                        tracing::error!(
                            booking_id = %booking.id,
                            error = %delete_error,
                            "Failed to roll back booking after wallet charge failure"
                        );
                        metrics::counter!("staybook.settlement.rollback_failures").increment(1);
                    }
                    Some(SettlementAction::SettlementRejected {
                        correlation_id,
                        booking,
                        error,
                    })
                }]
            },

            SettlementAction::SettlementRejected {
                correlation_id,
                booking,
                error,
            } => {
                state.advance(correlation_id, Stage::ReleasingRooms);
                smallvec![Self::release_rooms(env, correlation_id, booking, error)]
            },

            SettlementAction::SettlementCompleted {
                correlation_id,
                booking,
                points_earned,
            } => {
                tracing::info!(
                    booking_id = %booking.id,
                    user_id = %booking.user_id,
                    total = %booking.total_amount,
                    points_earned,
                    "Booking settled"
                );
                metrics::counter!("staybook.settlement.completed").increment(1);
                state.finish(correlation_id);
                state.settled += 1;
                SmallVec::new()
            },

            SettlementAction::SettlementFailed {
                correlation_id,
                error,
                ..
            } => {
                tracing::warn!(%error, "Settlement failed");
                metrics::counter!("staybook.settlement.failed", "code" => error.code())
                    .increment(1);
                state.finish(correlation_id);
                state.settlement_failures += 1;
                state.last_error = Some(error);
                SmallVec::new()
            },

            // ========== Cancellation ==========
            SettlementAction::CancelBooking {
                correlation_id,
                booking_id,
                cancelled_by,
            } => {
                state.advance(correlation_id, Stage::Claiming);
                let bookings = Arc::clone(&env.bookings);
                let now = env.clock.now();

                smallvec![async_effect! {
                    match bookings.claim_cancellation(booking_id, cancelled_by, now).await {
                        Ok(booking) => Some(SettlementAction::CancellationClaimed {
                            correlation_id,
                            booking,
                        }),
                        Err(error) => Some(SettlementAction::CancellationFailed {
                            correlation_id,
                            booking_id,
                            error,
                        }),
                    }
                }]
            },

            SettlementAction::CancellationClaimed {
                correlation_id,
                booking,
            } => {
                tracing::info!(
                    booking_id = %booking.id,
                    refund = %booking.gateway_amount(),
                    "Cancellation claimed"
                );
                state.advance(correlation_id, Stage::Refunding);
                smallvec![Self::refund(env, correlation_id, booking)]
            },

            SettlementAction::RefundSettled {
                correlation_id,
                booking,
                refund,
            } => {
                if let RefundStatus::Failed { reason } = &refund {
                    tracing::error!(
                        booking_id = %booking.id,
                        %reason,
                        "Gateway refund failed; cancellation continues"
                    );
                    metrics::counter!("staybook.cancellation.refund_failed").increment(1);
                    state.refund_failures += 1;
                }
                state.advance(correlation_id, Stage::RestoringRooms);
                smallvec![Self::return_rooms(env, correlation_id, booking, refund, 0)]
            },

            SettlementAction::RoomReturnFailed {
                correlation_id,
                booking,
                refund,
                attempt,
                error,
            } => {
                if error.is_transient() && attempt < env.restore_retry.max_retries {
                    let duration = env.restore_retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        booking_id = %booking.id,
                        attempt,
                        %error,
                        "Room return failed, retrying"
                    );
                    return smallvec![delay! {
                        duration: duration,
                        action: SettlementAction::RetryRoomReturn {
                            correlation_id,
                            booking,
                            refund,
                            attempt: attempt + 1,
                        }
                    }];
                }

                tracing::error!(
                    booking_id = %booking.id,
                    listing_id = %booking.listing_id,
                    rooms = %booking.room_allocation.rooms(),
                    %error,
                    "Rooms not returned after cancellation"
                );
                metrics::counter!("staybook.cancellation.restore_failed").increment(1);
                state.last_error = Some(error);
                state.advance(correlation_id, Stage::RecordingRefund);
                smallvec![Self::record_refund(env, correlation_id, booking.id, refund)]
            },

            SettlementAction::RetryRoomReturn {
                correlation_id,
                booking,
                refund,
                attempt,
            } => smallvec![Self::return_rooms(env, correlation_id, booking, refund, attempt)],

            SettlementAction::RoomsReturned {
                correlation_id,
                booking,
                refund,
            } => {
                state.advance(correlation_id, Stage::RecordingRefund);
                smallvec![Self::record_refund(env, correlation_id, booking.id, refund)]
            },

            SettlementAction::BookingCancelled {
                correlation_id,
                booking,
            } => {
                tracing::info!(
                    booking_id = %booking.id,
                    refund_status = booking.refund_status.as_str(),
                    "Booking cancelled"
                );
                metrics::counter!("staybook.cancellation.completed").increment(1);
                state.finish(correlation_id);
                state.cancelled += 1;
                SmallVec::new()
            },

            SettlementAction::CancellationFailed {
                correlation_id,
                booking_id,
                error,
            } => {
                tracing::warn!(%booking_id, %error, "Cancellation failed");
                state.finish(correlation_id);
                state.last_error = Some(error);
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::allocation;
    use crate::mocks::{
        InMemoryBookingRepository, InMemoryListingRepository, InMemoryWalletRepository,
        MockPaymentGateway,
    };
    use crate::test_support;
    use crate::types::{
        Allocation, BookingStatus, Listing, ListingId, PaymentStatus, Reservation, RoomTypes,
        WalletAccount,
    };
    use staybook_testing::{ReducerTest, assertions, effects, test_clock};

    const ROOMS: RoomTypes = RoomTypes::new(1, 2, 1);

    struct Fixture {
        env: SettlementEnvironment,
        bookings: InMemoryBookingRepository,
        wallets: InMemoryWalletRepository,
        listings: InMemoryListingRepository,
        gateway: MockPaymentGateway,
        user_id: UserId,
        listing_id: ListingId,
    }

    fn fixture(balance: Money) -> Fixture {
        let bookings = InMemoryBookingRepository::new();
        let wallets = InMemoryWalletRepository::new();
        let listings = InMemoryListingRepository::new();
        let gateway = MockPaymentGateway::new();

        let user_id = UserId::new();
        let mut account = WalletAccount::new(user_id);
        account.wallet_balance = balance;
        wallets.insert_account(account).unwrap();

        let listing_id = ListingId::new();
        listings
            .insert_listing(Listing::new(
                listing_id,
                "Harbour View",
                Money::from_major(1000),
                Some(ROOMS),
            ))
            .unwrap();

        let env = SettlementEnvironment {
            bookings: Arc::new(bookings.clone()),
            wallets: Arc::new(wallets.clone()),
            listings: Arc::new(listings.clone()),
            gateway: Arc::new(gateway.clone()),
            clock: Arc::new(test_clock()),
            rewards: RewardsConfig::default(),
            refund_timeout: Duration::from_secs(1),
            refund_retry: RetryPolicy::builder()
                .max_retries(1)
                .initial_delay(Duration::from_millis(1))
                .build(),
            restore_retry: RetryPolicy::no_retry(),
        };

        Fixture {
            env,
            bookings,
            wallets,
            listings,
            gateway,
            user_id,
            listing_id,
        }
    }

    impl Fixture {
        /// Two guests, three nights at 1000: total 3150, no rooms yet.
        fn booking(&self) -> Booking {
            let mut booking = test_support::booking(self.user_id, self.listing_id);
            booking.room_allocation = Allocation::default();
            booking.payment = None;
            booking
        }

        async fn hold(&self, guests: u32) -> ReservationId {
            let reservation = Reservation {
                id: ReservationId::new(),
                listing_id: self.listing_id,
                guests,
                allocation: Allocation::new(allocation::required_rooms(guests).unwrap()),
                created_at: test_clock().now(),
            };
            self.listings.reserve_rooms(reservation).await.unwrap();
            reservation.id
        }

        async fn pay(&self, amount: Money) -> PaymentConfirmation {
            let order = self
                .gateway
                .create_order(amount, "rcpt_test".to_string())
                .await
                .unwrap();
            self.gateway.confirm(&order.order_id)
        }

        async fn rooms(&self) -> Option<RoomTypes> {
            self.listings.listing(self.listing_id).await.unwrap().room_types
        }
    }

    fn settle(
        booking: Booking,
        reservation_id: ReservationId,
        payment: Option<PaymentConfirmation>,
    ) -> SettlementAction {
        SettlementAction::SettleBooking {
            correlation_id: Uuid::new_v4(),
            booking,
            reservation_id,
            payment,
        }
    }

    /// Drive actions through the reducer until nothing more is produced.
    async fn run_flow(
        env: &SettlementEnvironment,
        command: SettlementAction,
    ) -> Vec<SettlementAction> {
        let reducer = SettlementReducer;
        let mut state = SettlementState::default();
        let mut queue = vec![command];
        let mut seen = Vec::new();

        while let Some(action) = queue.pop() {
            let effects = reducer.reduce(&mut state, action.clone(), env);
            seen.push(action);
            queue.extend(effects::resolve(effects.into_vec()).await);
        }
        assert!(state.in_flight.is_empty(), "flow left work in flight: {:?}", state.in_flight);
        seen
    }

    fn last(actions: &[SettlementAction]) -> &SettlementAction {
        actions.last().unwrap()
    }

    #[test]
    fn forged_signature_is_rejected_before_io() {
        let f = fixture(Money::ZERO);
        let mut payment = f.gateway.confirm("order_mock_1");
        payment.signature = "00".repeat(32);

        ReducerTest::new(SettlementReducer)
            .with_env(f.env.clone())
            .given_state(SettlementState::default())
            .when_action(settle(f.booking(), ReservationId::new(), Some(payment)))
            .then_state(|state| assert!(state.in_flight.is_empty()))
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[tokio::test]
    async fn card_payment_settles_with_the_held_rooms() {
        let f = fixture(Money::ZERO);
        let booking = f.booking();
        let reservation_id = f.hold(2).await;
        let payment = f.pay(Money::from_major(3150)).await;

        let command = settle(booking.clone(), reservation_id, Some(payment.clone()));
        let actions = run_flow(&f.env, command).await;

        let SettlementAction::SettlementCompleted {
            booking: settled,
            points_earned,
            ..
        } = last(&actions)
        else {
            panic!("expected completion, got {actions:?}");
        };
        assert_eq!(*points_earned, 310);
        assert_eq!(settled.payment.as_ref().unwrap().payment_id, payment.payment_id);
        assert_eq!(settled.room_allocation.rooms(), RoomTypes::new(0, 1, 0));

        let stored = f.bookings.booking(booking.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(f.wallets.account(f.user_id).await.unwrap().reward_points, 310);
        assert_eq!(f.listings.holds(), 0);
        assert_eq!(f.rooms().await, Some(RoomTypes::new(1, 1, 1)));
    }

    #[tokio::test]
    async fn order_for_another_amount_is_rejected_and_the_hold_kept() {
        let f = fixture(Money::ZERO);
        let reservation_id = f.hold(2).await;
        let payment = f.pay(Money::from_major(1)).await;

        let actions = run_flow(&f.env, settle(f.booking(), reservation_id, Some(payment))).await;

        assert!(matches!(
            last(&actions),
            SettlementAction::SettlementFailed {
                error: BookingError::PaymentVerificationFailed,
                retained: None,
                reservation_kept: true,
                ..
            }
        ));
        assert!(f.bookings.is_empty());
        assert_eq!(f.listings.holds(), 1);
    }

    #[tokio::test]
    async fn unknown_order_fails_verification() {
        let f = fixture(Money::ZERO);
        let reservation_id = f.hold(2).await;
        let payment = f.gateway.confirm("order_never_created");

        let actions = run_flow(&f.env, settle(f.booking(), reservation_id, Some(payment))).await;

        assert!(matches!(
            last(&actions),
            SettlementAction::SettlementFailed {
                error: BookingError::PaymentVerificationFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn reused_payment_is_rejected_and_its_rooms_returned() {
        let f = fixture(Money::ZERO);
        let payment = f.pay(Money::from_major(3150)).await;
        let first = f.hold(2).await;
        run_flow(&f.env, settle(f.booking(), first, Some(payment.clone()))).await;
        let second = f.hold(2).await;

        let actions = run_flow(&f.env, settle(f.booking(), second, Some(payment))).await;

        assert!(matches!(
            last(&actions),
            SettlementAction::SettlementFailed {
                error: BookingError::PaymentVerificationFailed,
                reservation_kept: false,
                ..
            }
        ));
        assert!(actions
            .iter()
            .any(|a| matches!(a, SettlementAction::SettlementRejected { .. })));
        assert_eq!(f.bookings.len(), 1);
        assert_eq!(f.listings.holds(), 0);
        assert_eq!(f.rooms().await, Some(RoomTypes::new(1, 1, 1)));
    }

    #[tokio::test]
    async fn hold_for_another_guest_count_is_refused() {
        let f = fixture(Money::ZERO);
        let reservation_id = f.hold(1).await;
        let payment = f.pay(Money::from_major(3150)).await;

        let actions = run_flow(&f.env, settle(f.booking(), reservation_id, Some(payment))).await;

        assert!(matches!(
            last(&actions),
            SettlementAction::SettlementFailed {
                error: BookingError::ReservationMismatch { .. },
                reservation_kept: true,
                ..
            }
        ));
        assert!(f.bookings.is_empty());
        assert_eq!(f.rooms().await, Some(RoomTypes::new(0, 2, 1)));
    }

    #[tokio::test]
    async fn a_hold_backs_one_booking() {
        let f = fixture(Money::ZERO);
        let reservation_id = f.hold(2).await;
        let first = f.pay(Money::from_major(3150)).await;
        let second = f.pay(Money::from_major(3150)).await;
        run_flow(&f.env, settle(f.booking(), reservation_id, Some(first))).await;

        let actions = run_flow(&f.env, settle(f.booking(), reservation_id, Some(second))).await;

        assert!(matches!(
            last(&actions),
            SettlementAction::SettlementFailed {
                error: BookingError::NotFound {
                    resource: "reservation",
                    ..
                },
                reservation_kept: false,
                ..
            }
        ));
        assert_eq!(f.bookings.len(), 1);
        assert_eq!(f.rooms().await, Some(RoomTypes::new(1, 1, 1)));
    }

    #[tokio::test]
    async fn missing_payment_needs_full_wallet_cover() {
        let f = fixture(Money::from_major(10_000));
        let mut booking = f.booking();
        booking.wallet_deduction = Money::from_major(100);
        let reservation_id = f.hold(2).await;

        let actions = run_flow(&f.env, settle(booking, reservation_id, None)).await;

        assert!(matches!(
            last(&actions),
            SettlementAction::SettlementFailed {
                error: BookingError::PaymentVerificationFailed,
                retained: None,
                reservation_kept: true,
                ..
            }
        ));
        assert!(f.bookings.is_empty());
    }

    #[tokio::test]
    async fn wallet_shortfall_deletes_the_booking_and_returns_rooms() {
        let f = fixture(Money::from_major(50));
        let mut booking = f.booking();
        booking.wallet_deduction = Money::from_major(100);
        let reservation_id = f.hold(2).await;
        let payment = f.pay(Money::from_major(3050)).await;

        let actions = run_flow(&f.env, settle(booking, reservation_id, Some(payment))).await;

        assert!(matches!(
            last(&actions),
            SettlementAction::SettlementFailed {
                error: BookingError::InsufficientWalletBalance { .. },
                retained: None,
                reservation_kept: false,
                ..
            }
        ));
        assert!(f.bookings.is_empty());
        assert_eq!(f.rooms().await, Some(ROOMS));
        let account = f.wallets.account(f.user_id).await.unwrap();
        assert_eq!(account.wallet_balance, Money::from_major(50));
        assert_eq!(account.reward_points, 0);
    }

    #[tokio::test]
    async fn wallet_only_booking_writes_spend_then_earn() {
        let f = fixture(Money::from_major(5000));
        let mut booking = f.booking();
        booking.wallet_deduction = booking.total_amount;
        let reservation_id = f.hold(2).await;

        let actions = run_flow(&f.env, settle(booking, reservation_id, None)).await;

        assert!(matches!(last(&actions), SettlementAction::SettlementCompleted { .. }));
        let history = f.wallets.transactions(f.user_id).await.unwrap();
        let kinds: Vec<_> = history.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TransactionKind::Earn, TransactionKind::Spend]);
        assert_eq!(
            f.wallets.account(f.user_id).await.unwrap().wallet_balance,
            Money::from_major(1850)
        );
    }

    async fn settled_booking(f: &Fixture) -> Booking {
        let booking = f.booking();
        let reservation_id = f.hold(2).await;
        let payment = f.pay(Money::from_major(3150)).await;
        run_flow(&f.env, settle(booking.clone(), reservation_id, Some(payment))).await;
        booking
    }

    fn cancel(f: &Fixture, booking_id: BookingId) -> SettlementAction {
        SettlementAction::CancelBooking {
            correlation_id: Uuid::new_v4(),
            booking_id,
            cancelled_by: f.user_id,
        }
    }

    #[tokio::test]
    async fn cancel_refunds_and_returns_rooms() {
        let f = fixture(Money::ZERO);
        let booking = settled_booking(&f).await;

        let actions = run_flow(&f.env, cancel(&f, booking.id)).await;

        let SettlementAction::BookingCancelled {
            booking: cancelled, ..
        } = last(&actions)
        else {
            panic!("expected cancellation, got {actions:?}");
        };
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
        assert!(matches!(cancelled.refund_status, RefundStatus::Succeeded { .. }));
        assert_eq!(cancelled.cancelled_by, Some(f.user_id));
        assert_eq!(f.gateway.refunds().len(), 1);

        let listing = f.listings.listing(f.listing_id).await.unwrap();
        assert_eq!(listing.room_types, Some(ROOMS));
        assert_eq!(listing.rooms, 4);
    }

    #[tokio::test]
    async fn refund_failure_still_cancels_and_returns_rooms() {
        let f = fixture(Money::ZERO);
        let booking = settled_booking(&f).await;
        f.gateway.fail_next_refunds(5);

        let actions = run_flow(&f.env, cancel(&f, booking.id)).await;

        let SettlementAction::BookingCancelled {
            booking: cancelled, ..
        } = last(&actions)
        else {
            panic!("expected cancellation, got {actions:?}");
        };
        assert!(matches!(cancelled.refund_status, RefundStatus::Failed { .. }));
        assert!(f.gateway.refunds().is_empty());
        assert_eq!(f.rooms().await, Some(ROOMS));
    }

    #[tokio::test]
    async fn retry_after_a_lost_refund_response_refunds_once() {
        let f = fixture(Money::ZERO);
        let booking = settled_booking(&f).await;
        f.gateway.lose_next_refund_responses(1);

        let actions = run_flow(&f.env, cancel(&f, booking.id)).await;

        let SettlementAction::BookingCancelled {
            booking: cancelled, ..
        } = last(&actions)
        else {
            panic!("expected cancellation, got {actions:?}");
        };
        assert!(matches!(cancelled.refund_status, RefundStatus::Succeeded { .. }));
        assert_eq!(f.gateway.refunds().len(), 1);
    }

    #[tokio::test]
    async fn second_cancel_is_already_cancelled() {
        let f = fixture(Money::ZERO);
        let booking = settled_booking(&f).await;

        run_flow(&f.env, cancel(&f, booking.id)).await;
        let actions = run_flow(&f.env, cancel(&f, booking.id)).await;

        assert!(matches!(
            last(&actions),
            SettlementAction::CancellationFailed {
                error: BookingError::AlreadyCancelled { .. },
                ..
            }
        ));
        assert_eq!(f.gateway.refunds().len(), 1);
    }

    #[test]
    fn transient_room_return_failure_is_retried_after_a_delay() {
        let mut f = fixture(Money::ZERO);
        f.env.restore_retry = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(20))
            .build();
        let booking = test_support::booking(f.user_id, f.listing_id);

        ReducerTest::new(SettlementReducer)
            .with_env(f.env)
            .given_state(SettlementState::default())
            .when_action(SettlementAction::RoomReturnFailed {
                correlation_id: Uuid::new_v4(),
                booking,
                refund: RefundStatus::NotRequired,
                attempt: 0,
                error: BookingError::transient("connection reset"),
            })
            .then_effects(|effects| {
                assert!(matches!(
                    effects,
                    [Effect::Delay { duration, action }]
                        if *duration == Duration::from_millis(20)
                            && matches!(
                                **action,
                                SettlementAction::RetryRoomReturn { attempt: 1, .. }
                            )
                ));
            })
            .run();
    }
}
