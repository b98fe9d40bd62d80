//! Caller-facing booking operations.
//!
//! [`BookingEngine`] owns one store per aggregate. Each operation sends a
//! command carrying a fresh correlation id, waits for the terminal action of
//! that flow and converts it into a `Result`.
//!
//! ```text
//! quote ──────────────► pricing (pure)
//! reserve / restore ──► inventory store
//! settle / cancel ────► settlement store
//! redeem_points ──────► wallet store
//! book ───────────────► reserve → settle, release the hold if it went unused
//! ```
//!
//! Settlement consumes the hold by id, so rooms are always those the
//! inventory store actually took. Once the hold is consumed the settlement
//! saga owns the rooms; `book` only releases holds the saga reports as kept.

use crate::aggregates::{
    InventoryAction, InventoryEnvironment, InventoryReducer, InventoryState, SettlementAction,
    SettlementEnvironment, SettlementReducer, SettlementState, WalletAction, WalletEnvironment,
    WalletReducer, WalletState,
};
use crate::config::EngineConfig;
use crate::error::BookingError;
use crate::payment_gateway::{PaymentGateway, PaymentOrder};
use crate::pricing::{self, PricingResult};
use crate::repositories::{BookingRepository, ListingRepository, WalletRepository};
use crate::types::{
    Allocation, Booking, BookingId, BookingStatus, ListingId, Money, PaymentConfirmation,
    PaymentStatus, RefundStatus, Reservation, ReservationId, RoomTypes, StayDates, Transaction,
    UserId, WalletAccount,
};
use serde::Serialize;
use staybook_core::environment::Clock;
use staybook_runtime::{Store, StoreError};
use staybook_runtime::retry::RetryPolicy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Store running the inventory aggregate
pub type InventoryStore =
    Store<InventoryState, InventoryAction, InventoryEnvironment, InventoryReducer>;

/// Store running the settlement aggregate
pub type SettlementStore =
    Store<SettlementState, SettlementAction, SettlementEnvironment, SettlementReducer>;

/// Store running the wallet aggregate
pub type WalletStore = Store<WalletState, WalletAction, WalletEnvironment, WalletReducer>;

/// External collaborators the engine is built from.
#[derive(Clone)]
pub struct Collaborators {
    /// Listing storage
    pub listings: Arc<dyn ListingRepository>,
    /// Booking storage
    pub bookings: Arc<dyn BookingRepository>,
    /// Wallet storage
    pub wallets: Arc<dyn WalletRepository>,
    /// Payment gateway
    pub gateway: Arc<dyn PaymentGateway>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Input to [`BookingEngine::settle`].
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    /// Guest
    pub user_id: UserId,
    /// Listing being booked
    pub listing_id: ListingId,
    /// Stay dates
    pub stay: StayDates,
    /// Guest count
    pub guests: u32,
    /// Hold from [`BookingEngine::reserve`]; consumed by the settlement
    pub reservation_id: ReservationId,
    /// Requested wallet co-payment; clamped to the total
    pub wallet_deduction: Money,
    /// Gateway proof for the remainder
    pub payment: Option<PaymentConfirmation>,
}

/// Input to [`BookingEngine::book`].
#[derive(Debug, Clone)]
pub struct BookRequest {
    /// Guest
    pub user_id: UserId,
    /// Listing being booked
    pub listing_id: ListingId,
    /// Stay dates
    pub stay: StayDates,
    /// Guest count
    pub guests: u32,
    /// Requested wallet co-payment; clamped to the total
    pub wallet_deduction: Money,
    /// Gateway proof for the remainder
    pub payment: Option<PaymentConfirmation>,
}

/// A booking that settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettledBooking {
    /// Stored booking
    pub booking: Booking,
    /// Price breakdown it was charged at
    pub pricing: PricingResult,
    /// Reward points credited
    pub points_earned: u64,
}

/// Result of a points redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Redemption {
    /// Balance credited
    pub credited: Money,
    /// Wallet balance afterwards
    pub new_balance: Money,
    /// Points left
    pub remaining_points: u64,
}

struct SettlementFailure {
    error: BookingError,
    retained: Option<Booking>,
    /// The hold was never consumed and still belongs to the caller
    reservation_kept: bool,
}

impl From<BookingError> for SettlementFailure {
    fn from(error: BookingError) -> Self {
        Self {
            error,
            retained: None,
            reservation_kept: true,
        }
    }
}

impl From<StoreError> for SettlementFailure {
    fn from(error: StoreError) -> Self {
        // Only a refused send guarantees the saga never saw the hold.
        Self {
            reservation_kept: matches!(error, StoreError::ShutdownInProgress),
            error: error.into(),
            retained: None,
        }
    }
}

/// The booking pricing and inventory engine.
///
/// Cloning is cheap; clones share the same stores.
#[derive(Clone)]
pub struct BookingEngine {
    inventory: InventoryStore,
    settlement: SettlementStore,
    wallet: WalletStore,
    listings: Arc<dyn ListingRepository>,
    bookings: Arc<dyn BookingRepository>,
    wallets: Arc<dyn WalletRepository>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl BookingEngine {
    /// Build the engine and its stores.
    #[must_use]
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        let Collaborators {
            listings,
            bookings,
            wallets,
            gateway,
            clock,
        } = collaborators;

        let inventory = Store::new(
            InventoryState::default(),
            InventoryReducer,
            InventoryEnvironment::new(Arc::clone(&listings), Arc::clone(&clock)),
        );

        let settlement = Store::new(
            SettlementState::default(),
            SettlementReducer,
            SettlementEnvironment {
                bookings: Arc::clone(&bookings),
                wallets: Arc::clone(&wallets),
                listings: Arc::clone(&listings),
                gateway: Arc::clone(&gateway),
                clock: Arc::clone(&clock),
                rewards: config.rewards.clone(),
                refund_timeout: config.refund_timeout(),
                refund_retry: RetryPolicy::builder()
                    .max_retries(config.refund_retries)
                    .initial_delay(Duration::from_millis(200))
                    .max_delay(Duration::from_secs(2))
                    .jitter(true)
                    .build(),
                restore_retry: RetryPolicy::builder()
                    .max_retries(3)
                    .initial_delay(Duration::from_millis(100))
                    .max_delay(Duration::from_secs(1))
                    .build(),
            },
        );

        let wallet = Store::new(
            WalletState::default(),
            WalletReducer,
            WalletEnvironment {
                wallets: Arc::clone(&wallets),
                clock: Arc::clone(&clock),
                rewards: config.rewards.clone(),
            },
        );

        Self {
            inventory,
            settlement,
            wallet,
            listings,
            bookings,
            wallets,
            gateway,
            clock,
            config,
        }
    }

    /// Engine parameters
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Inventory store, for inspection
    #[must_use]
    pub const fn inventory_store(&self) -> &InventoryStore {
        &self.inventory
    }

    /// Settlement store, for inspection
    #[must_use]
    pub const fn settlement_store(&self) -> &SettlementStore {
        &self.settlement
    }

    // ========== Pricing ==========

    /// Price a stay at a listing's nightly rate.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown listing, `InvalidGuestCount`, or
    /// `AmountOutOfRange`.
    pub async fn quote(
        &self,
        listing_id: ListingId,
        stay: &StayDates,
        guests: u32,
        membership_active: bool,
    ) -> Result<PricingResult, BookingError> {
        let listing = self.listings.listing(listing_id).await?;
        pricing::quote(
            listing.nightly_rate,
            stay,
            guests,
            membership_active,
            &self.config.pricing,
        )
    }

    /// Price a stay for a user, resolving their membership now.
    ///
    /// # Errors
    ///
    /// As [`BookingEngine::quote`], plus `NotFound` for an unknown wallet.
    pub async fn quote_for_user(
        &self,
        user_id: UserId,
        listing_id: ListingId,
        stay: &StayDates,
        guests: u32,
    ) -> Result<PricingResult, BookingError> {
        let account = self.wallets.account(user_id).await?;
        let active = account.membership_active(self.clock.now());
        self.quote(listing_id, stay, guests, active).await
    }

    /// Open a gateway order for the amount the guest pays by card.
    ///
    /// # Errors
    ///
    /// `AmountOutOfRange` for a zero amount, `Transient` if the gateway fails.
    pub async fn create_payment_order(
        &self,
        amount: Money,
        receipt: String,
    ) -> Result<PaymentOrder, BookingError> {
        if amount.is_zero() {
            return Err(BookingError::AmountOutOfRange);
        }
        self.gateway
            .create_order(amount, receipt)
            .await
            .map_err(|error| BookingError::transient(format!("payment gateway: {error}")))
    }

    // ========== Inventory ==========

    /// Hold the rooms `guests` need.
    ///
    /// The returned reservation is what [`BookingEngine::settle`] consumes.
    ///
    /// # Errors
    ///
    /// `InvalidGuestCount`, `NotFound`, `InventoryNotConfigured`,
    /// `InsufficientInventory`, or `Transient`.
    #[tracing::instrument(skip(self), name = "engine_reserve")]
    pub async fn reserve(
        &self,
        listing_id: ListingId,
        guests: u32,
    ) -> Result<Reservation, BookingError> {
        let correlation_id = Uuid::new_v4();
        let started = Instant::now();
        let outcome = self
            .inventory
            .send_and_wait_for(
                InventoryAction::ReserveRooms {
                    correlation_id,
                    listing_id,
                    guests,
                },
                move |action| action.is_outcome_of(correlation_id),
                self.config.request_timeout(),
            )
            .await;
        record("reserve", started);

        match outcome? {
            InventoryAction::RoomsReserved { reservation, .. } => Ok(reservation),
            InventoryAction::InventoryRejected { error, .. } => Err(error),
            other => Err(unexpected(&other)),
        }
    }

    /// Release an unsettled hold, giving its rooms back to the listing.
    ///
    /// # Errors
    ///
    /// `NotFound` if the hold is unknown, already consumed or on another
    /// listing; `InventoryNotConfigured`, or `Transient`.
    #[tracing::instrument(skip(self), name = "engine_restore")]
    pub async fn restore(
        &self,
        listing_id: ListingId,
        reservation_id: ReservationId,
    ) -> Result<RoomTypes, BookingError> {
        let correlation_id = Uuid::new_v4();
        let started = Instant::now();
        let outcome = self
            .inventory
            .send_and_wait_for(
                InventoryAction::ReleaseReservation {
                    correlation_id,
                    listing_id,
                    reservation_id,
                },
                move |action| action.is_outcome_of(correlation_id),
                self.config.request_timeout(),
            )
            .await;
        record("restore", started);

        match outcome? {
            InventoryAction::ReservationReleased { remaining, .. } => Ok(remaining),
            InventoryAction::InventoryRejected { error, .. } => Err(error),
            other => Err(unexpected(&other)),
        }
    }

    // ========== Settlement ==========

    /// Price, record and charge a booking against a hold.
    ///
    /// The wallet deduction is clamped to the quoted total. The gateway
    /// order must be for exactly the card amount and a gateway payment backs
    /// at most one booking. A settlement without a gateway payment is only
    /// accepted when the wallet covers the whole total. The hold is consumed
    /// once; its rooms become the booking's allocation.
    ///
    /// # Errors
    ///
    /// `PaymentVerificationFailed`, `ReservationMismatch`,
    /// `InsufficientWalletBalance`, `NotFound`, pricing errors, or
    /// `Transient`.
    pub async fn settle(
        &self,
        request: SettlementRequest,
    ) -> Result<SettledBooking, BookingError> {
        self.run_settlement(request).await.map_err(|failure| failure.error)
    }

    /// Reserve rooms and settle in one call.
    ///
    /// If settlement fails without consuming the hold, the hold is released.
    /// A hold the saga already consumed is its to give back, even when this
    /// call stopped waiting on a timeout.
    ///
    /// # Errors
    ///
    /// Any error of [`BookingEngine::reserve`] or [`BookingEngine::settle`].
    #[tracing::instrument(
        skip(self, request),
        fields(listing_id = %request.listing_id, guests = request.guests),
        name = "engine_book"
    )]
    pub async fn book(&self, request: BookRequest) -> Result<SettledBooking, BookingError> {
        let reservation = self.reserve(request.listing_id, request.guests).await?;

        let settlement = SettlementRequest {
            user_id: request.user_id,
            listing_id: request.listing_id,
            stay: request.stay,
            guests: request.guests,
            reservation_id: reservation.id,
            wallet_deduction: request.wallet_deduction,
            payment: request.payment,
        };

        let failure = match self.run_settlement(settlement).await {
            Ok(settled) => return Ok(settled),
            Err(failure) => failure,
        };
        if let Some(booking) = &failure.retained {
            tracing::warn!(
                booking_id = %booking.id,
                error = %failure.error,
                "Booking kept despite settlement failure"
            );
        }
        if failure.reservation_kept {
            if let Err(release_error) = self.restore(request.listing_id, reservation.id).await {
                tracing::error!(
                    listing_id = %request.listing_id,
                    reservation_id = %reservation.id,
                    rooms = %reservation.allocation.rooms(),
                    error = %release_error,
                    "Failed to release hold after settlement failure"
                );
                metrics::counter!("staybook.engine.orphaned_reservations").increment(1);
            }
        }
        Err(failure.error)
    }

    #[tracing::instrument(
        skip(self, request),
        fields(user_id = %request.user_id, listing_id = %request.listing_id),
        name = "engine_settle"
    )]
    async fn run_settlement(
        &self,
        request: SettlementRequest,
    ) -> Result<SettledBooking, SettlementFailure> {
        let listing = self.listings.listing(request.listing_id).await?;
        let account = self.wallets.account(request.user_id).await?;
        let now = self.clock.now();
        let quoted = pricing::quote(
            listing.nightly_rate,
            &request.stay,
            request.guests,
            account.membership_active(now),
            &self.config.pricing,
        )?;

        let booking = Booking {
            id: BookingId::new(),
            user_id: request.user_id,
            listing_id: request.listing_id,
            check_in: request.stay.check_in(),
            check_out: request.stay.check_out(),
            guests: request.guests,
            nights: quoted.nights,
            total_amount: quoted.total,
            service_fee: quoted.service_fee,
            wallet_deduction: request.wallet_deduction.min(quoted.total),
            room_allocation: Allocation::default(),
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            refund_status: RefundStatus::NotRequired,
            payment: None,
            created_at: now,
            cancelled_by: None,
            cancelled_at: None,
        };

        let correlation_id = Uuid::new_v4();
        let started = Instant::now();
        let outcome = self
            .settlement
            .send_and_wait_for(
                SettlementAction::SettleBooking {
                    correlation_id,
                    booking,
                    reservation_id: request.reservation_id,
                    payment: request.payment,
                },
                move |action| action.is_outcome_of(correlation_id),
                self.config.request_timeout(),
            )
            .await;
        record("settle", started);

        match outcome? {
            SettlementAction::SettlementCompleted {
                booking,
                points_earned,
                ..
            } => Ok(SettledBooking {
                booking,
                pricing: quoted,
                points_earned,
            }),
            SettlementAction::SettlementFailed {
                error,
                retained,
                reservation_kept,
                ..
            } => Err(SettlementFailure {
                error,
                retained,
                reservation_kept,
            }),
            other => Err(SettlementFailure {
                error: unexpected(&other),
                retained: None,
                reservation_kept: false,
            }),
        }
    }

    /// Cancel a confirmed booking.
    ///
    /// The gateway refund is best effort: its outcome is recorded on the
    /// returned booking and never blocks the cancellation.
    ///
    /// # Errors
    ///
    /// `NotFound`, `AlreadyCancelled`, or `Transient`.
    #[tracing::instrument(skip(self), name = "engine_cancel")]
    pub async fn cancel(
        &self,
        booking_id: BookingId,
        cancelled_by: UserId,
    ) -> Result<Booking, BookingError> {
        let correlation_id = Uuid::new_v4();
        let started = Instant::now();
        let outcome = self
            .settlement
            .send_and_wait_for(
                SettlementAction::CancelBooking {
                    correlation_id,
                    booking_id,
                    cancelled_by,
                },
                move |action| action.is_outcome_of(correlation_id),
                self.config.request_timeout() + self.config.refund_timeout(),
            )
            .await;
        record("cancel", started);

        match outcome? {
            SettlementAction::BookingCancelled { booking, .. } => Ok(booking),
            SettlementAction::CancellationFailed { error, .. } => Err(error),
            other => Err(unexpected(&other)),
        }
    }

    // ========== Wallet ==========

    /// Convert reward points into wallet balance.
    ///
    /// # Errors
    ///
    /// `MinimumRedemptionNotMet`, `InsufficientPoints`, `NotFound`, or
    /// `Transient`.
    #[tracing::instrument(skip(self), name = "engine_redeem_points")]
    pub async fn redeem_points(
        &self,
        user_id: UserId,
        points: u64,
    ) -> Result<Redemption, BookingError> {
        let correlation_id = Uuid::new_v4();
        let started = Instant::now();
        let outcome = self
            .wallet
            .send_and_wait_for(
                WalletAction::RedeemPoints {
                    correlation_id,
                    user_id,
                    points,
                },
                move |action| action.is_outcome_of(correlation_id),
                self.config.request_timeout(),
            )
            .await;
        record("redeem_points", started);

        match outcome? {
            WalletAction::PointsRedeemed {
                credited, account, ..
            } => Ok(Redemption {
                credited,
                new_balance: account.wallet_balance,
                remaining_points: account.reward_points,
            }),
            WalletAction::RedemptionRejected { error, .. } => Err(error),
            other @ WalletAction::RedeemPoints { .. } => Err(unexpected(&other)),
        }
    }

    // ========== Queries ==========

    /// Load a booking.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Transient`.
    pub async fn booking(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        self.bookings.booking(booking_id).await
    }

    /// Load a wallet account.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Transient`.
    pub async fn wallet(&self, user_id: UserId) -> Result<WalletAccount, BookingError> {
        self.wallets.account(user_id).await
    }

    /// A user's wallet history, newest first.
    ///
    /// # Errors
    ///
    /// `Transient`.
    pub async fn transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, BookingError> {
        self.wallets.transactions(user_id).await
    }

    /// Stop accepting commands and let in-flight flows finish.
    ///
    /// # Errors
    ///
    /// `Transient` if any store still has running effects after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), BookingError> {
        let (inventory, settlement, wallet) = tokio::join!(
            self.inventory.shutdown(timeout),
            self.settlement.shutdown(timeout),
            self.wallet.shutdown(timeout),
        );
        inventory?;
        settlement?;
        wallet?;
        Ok(())
    }
}

fn record(operation: &'static str, started: Instant) {
    metrics::histogram!("staybook.engine.duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

fn unexpected(action: &impl std::fmt::Debug) -> BookingError {
    tracing::error!(?action, "Unexpected terminal action");
    BookingError::transient("unexpected aggregate response")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{
        InMemoryBookingRepository, InMemoryListingRepository, InMemoryWalletRepository,
        MockPaymentGateway,
    };
    use crate::types::Listing;
    use staybook_testing::test_clock;

    fn engine() -> (BookingEngine, InMemoryListingRepository, InMemoryWalletRepository) {
        let listings = InMemoryListingRepository::new();
        let wallets = InMemoryWalletRepository::new();
        let engine = BookingEngine::new(
            Collaborators {
                listings: Arc::new(listings.clone()),
                bookings: Arc::new(InMemoryBookingRepository::new()),
                wallets: Arc::new(wallets.clone()),
                gateway: Arc::new(MockPaymentGateway::new()),
                clock: Arc::new(test_clock()),
            },
            EngineConfig::default(),
        );
        (engine, listings, wallets)
    }

    #[tokio::test]
    async fn quote_uses_the_listing_rate() {
        let (engine, listings, _) = engine();
        let listing_id = ListingId::new();
        listings
            .insert_listing(Listing::new(listing_id, "Lakeside", Money::from_major(1000), None))
            .unwrap();
        let stay = StayDates::parse("2025-03-01", "2025-03-04").unwrap();

        let quote = engine.quote(listing_id, &stay, 4, false).await.unwrap();

        assert_eq!(quote.surcharge, Money::from_major(3000));
        assert_eq!(quote.total, Money::from_major(6300));
    }

    #[tokio::test]
    async fn quote_for_member_waives_the_fee() {
        let (engine, listings, wallets) = engine();
        let listing_id = ListingId::new();
        listings
            .insert_listing(Listing::new(listing_id, "Lakeside", Money::from_major(1000), None))
            .unwrap();
        let user_id = UserId::new();
        let mut account = WalletAccount::new(user_id);
        account.is_member = true;
        account.membership_expires_at = Some(test_clock().now() + chrono::Duration::days(30));
        wallets.insert_account(account).unwrap();
        let stay = StayDates::parse("2025-03-01", "2025-03-04").unwrap();

        let quote = engine.quote_for_user(user_id, listing_id, &stay, 2).await.unwrap();

        assert_eq!(quote.service_fee, Money::ZERO);
        assert_eq!(quote.total, Money::from_major(3000));
    }

    #[tokio::test]
    async fn zero_amount_orders_are_refused() {
        let (engine, _, _) = engine();

        let result = engine.create_payment_order(Money::ZERO, "r1".to_string()).await;

        assert_eq!(result, Err(BookingError::AmountOutOfRange));
    }

    #[tokio::test]
    async fn reserve_on_unknown_listing_is_not_found() {
        let (engine, _, _) = engine();

        let result = engine.reserve(ListingId::new(), 2).await;

        assert!(matches!(result, Err(BookingError::NotFound { resource: "listing", .. })));
    }
}
