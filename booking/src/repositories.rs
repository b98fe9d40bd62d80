//! Persistence traits.
//!
//! The traits are dyn-compatible (boxed futures) so environments can hold
//! `Arc<dyn ...>` and swap the in-memory stores for Postgres without generics
//! leaking into every aggregate.
//!
//! Every mutating method is a single atomic conditional update: it checks
//! its precondition and applies the change in one step, so concurrent
//! callers cannot both pass the check.

use crate::error::BookingError;
use crate::types::{
    Allocation, Booking, BookingId, Listing, ListingId, Money, RefundStatus, Reservation,
    ReservationId, RoomTypes, Transaction, UserId, WalletAccount,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// Boxed `Send` future resolving to a repository result.
pub type RepoFuture<'a, T> = BoxFuture<'a, Result<T, BookingError>>;

/// Listing inventory.
pub trait ListingRepository: Send + Sync {
    /// Load a listing.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown listing.
    fn listing(&self, listing_id: ListingId) -> RepoFuture<'_, Listing>;

    /// Atomically take the reservation's rooms iff every type has enough
    /// unbooked rooms, and record the hold in the same step.
    ///
    /// Returns the remaining rooms; the cached total is recomputed.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InventoryNotConfigured`, or `InsufficientInventory`
    /// naming every short type.
    fn reserve_rooms(&self, reservation: Reservation) -> RepoFuture<'_, RoomTypes>;

    /// Atomically drop a hold and give its recorded rooms back.
    ///
    /// # Errors
    ///
    /// `NotFound` if no hold with this id exists on the listing.
    fn release_reservation(
        &self,
        listing_id: ListingId,
        reservation_id: ReservationId,
    ) -> RepoFuture<'_, RoomTypes>;

    /// Atomically remove a hold so its rooms belong to a booking.
    ///
    /// The hold is only consumed when it was made for `listing_id` and
    /// `guests`; at most one caller gets it.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown or already consumed hold,
    /// `ReservationMismatch` if it was made for something else.
    fn consume_reservation(
        &self,
        reservation_id: ReservationId,
        listing_id: ListingId,
        guests: u32,
    ) -> RepoFuture<'_, Reservation>;

    /// Atomically add a booking's allocation snapshot back.
    ///
    /// # Errors
    ///
    /// `NotFound` or `InventoryNotConfigured`.
    fn restore_rooms(
        &self,
        listing_id: ListingId,
        allocation: Allocation,
    ) -> RepoFuture<'_, RoomTypes>;
}

/// Booking records.
pub trait BookingRepository: Send + Sync {
    /// Persist a new booking.
    ///
    /// A gateway order or payment is accepted by at most one booking.
    ///
    /// # Errors
    ///
    /// `PaymentVerificationFailed` if the booking's gateway order or payment
    /// is already recorded, or transient storage failures.
    fn insert(&self, booking: Booking) -> RepoFuture<'_, ()>;

    /// Load a booking.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown booking.
    fn booking(&self, booking_id: BookingId) -> RepoFuture<'_, Booking>;

    /// Remove a booking (settlement rollback).
    ///
    /// # Errors
    ///
    /// Transient storage failures. Deleting an unknown booking is not an error.
    fn delete(&self, booking_id: BookingId) -> RepoFuture<'_, ()>;

    /// Atomically move a confirmed booking to cancelled.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `AlreadyCancelled` if another caller got there first.
    fn claim_cancellation(
        &self,
        booking_id: BookingId,
        cancelled_by: UserId,
        cancelled_at: DateTime<Utc>,
    ) -> RepoFuture<'_, Booking>;

    /// Mark the payment refunded and store the gateway refund outcome.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown booking.
    fn record_refund(
        &self,
        booking_id: BookingId,
        refund: RefundStatus,
    ) -> RepoFuture<'_, Booking>;
}

/// Wallet balances, reward points and their audit trail.
pub trait WalletRepository: Send + Sync {
    /// Load a user's account.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown user.
    fn account(&self, user_id: UserId) -> RepoFuture<'_, WalletAccount>;

    /// Debit the balance iff it covers `amount`, writing `entry` in the same step.
    ///
    /// Returns the new balance.
    ///
    /// # Errors
    ///
    /// `NotFound` or `InsufficientWalletBalance`.
    fn debit_balance(
        &self,
        user_id: UserId,
        amount: Money,
        entry: Transaction,
    ) -> RepoFuture<'_, Money>;

    /// Add reward points, writing `entry` in the same step.
    ///
    /// Returns the new points balance.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown user.
    fn credit_points(
        &self,
        user_id: UserId,
        points: u64,
        entry: Transaction,
    ) -> RepoFuture<'_, u64>;

    /// Debit `points` iff available and credit `credit` to the balance,
    /// writing `entry` in the same step.
    ///
    /// # Errors
    ///
    /// `NotFound` or `InsufficientPoints`.
    fn redeem_points(
        &self,
        user_id: UserId,
        points: u64,
        credit: Money,
        entry: Transaction,
    ) -> RepoFuture<'_, WalletAccount>;

    /// A user's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Transient storage failures.
    fn transactions(&self, user_id: UserId) -> RepoFuture<'_, Vec<Transaction>>;
}
