//! Domain errors for pricing, inventory, settlement and wallet operations.

use crate::types::{BookingId, ListingId, Money, ReservationId, RoomType};
use serde::Serialize;
use thiserror::Error;

/// Every way a booking operation can fail.
///
/// All variants except [`BookingError::Transient`] are final answers: retrying
/// the same request will fail the same way. `Transient` covers persistence,
/// gateway and runtime failures where a retry may succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BookingError {
    /// Check-out is not after check-in, or a date did not parse
    #[error("check-out must be after check-in")]
    InvalidDateRange,

    /// Guest count outside the supported range
    #[error("guest count {guests} is not supported (1-5 guests)")]
    InvalidGuestCount {
        /// Requested guests
        guests: u32,
    },

    /// Listing has no per-type room breakdown
    #[error("listing {listing_id} has no room type inventory configured")]
    InventoryNotConfigured {
        /// Listing
        listing_id: ListingId,
    },

    /// Not enough rooms of one or more types
    #[error("not enough {} rooms available", join_room_types(.missing))]
    InsufficientInventory {
        /// Every room type that fell short
        missing: Vec<RoomType>,
    },

    /// Reservation was made for another listing or guest count
    #[error("reservation {reservation_id} does not match this booking")]
    ReservationMismatch {
        /// Reservation
        reservation_id: ReservationId,
    },

    /// Gateway signature or order amount mismatch, a payment already used by
    /// another booking, or no gateway payment for a partial wallet charge
    #[error("payment verification failed")]
    PaymentVerificationFailed,

    /// Wallet balance below the requested deduction
    #[error("insufficient wallet balance: {available} available, {requested} requested")]
    InsufficientWalletBalance {
        /// Current balance
        available: Money,
        /// Requested deduction
        requested: Money,
    },

    /// Points balance below the requested redemption
    #[error("insufficient reward points: {available} available, {requested} requested")]
    InsufficientPoints {
        /// Current points
        available: u64,
        /// Requested points
        requested: u64,
    },

    /// Redemption below the minimum
    #[error("at least {minimum} points must be redeemed, {requested} requested")]
    MinimumRedemptionNotMet {
        /// Minimum redeemable points
        minimum: u64,
        /// Requested points
        requested: u64,
    },

    /// Booking was already cancelled
    #[error("booking {booking_id} is already cancelled")]
    AlreadyCancelled {
        /// Booking
        booking_id: BookingId,
    },

    /// Unknown entity
    #[error("{resource} {id} not found")]
    NotFound {
        /// Entity kind ("listing", "reservation", "booking", "wallet")
        resource: &'static str,
        /// Entity id
        id: String,
    },

    /// An amount computation overflowed
    #[error("amount out of range")]
    AmountOutOfRange,

    /// Persistence, gateway or runtime failure; retry may succeed
    #[error("temporarily unavailable: {0}")]
    Transient(String),
}

impl BookingError {
    /// Creates a not-found error
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Creates a transient error from any displayable cause
    #[must_use]
    pub fn transient(cause: impl std::fmt::Display) -> Self {
        Self::Transient(cause.to_string())
    }

    /// Whether retrying the same request may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the request itself was invalid (bad input or a foreign reservation)
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidDateRange
                | Self::InvalidGuestCount { .. }
                | Self::AmountOutOfRange
                | Self::ReservationMismatch { .. }
        )
    }

    /// Stable machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidDateRange => "INVALID_DATE_RANGE",
            Self::InvalidGuestCount { .. } => "INVALID_GUEST_COUNT",
            Self::InventoryNotConfigured { .. } => "INVENTORY_NOT_CONFIGURED",
            Self::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            Self::ReservationMismatch { .. } => "RESERVATION_MISMATCH",
            Self::PaymentVerificationFailed => "PAYMENT_VERIFICATION_FAILED",
            Self::InsufficientWalletBalance { .. } => "INSUFFICIENT_WALLET_BALANCE",
            Self::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            Self::MinimumRedemptionNotMet { .. } => "MINIMUM_REDEMPTION_NOT_MET",
            Self::AlreadyCancelled { .. } => "ALREADY_CANCELLED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AmountOutOfRange => "AMOUNT_OUT_OF_RANGE",
            Self::Transient(_) => "TRANSIENT",
        }
    }
}

impl From<staybook_runtime::StoreError> for BookingError {
    fn from(error: staybook_runtime::StoreError) -> Self {
        Self::transient(error)
    }
}

fn join_room_types(types: &[RoomType]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
