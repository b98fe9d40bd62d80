//! Domain types for listings, bookings, wallets and money.

use crate::error::BookingError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a listing (a hotel property)
    ListingId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a marketplace user
    UserId
);
uuid_id!(
    /// Unique identifier for a wallet/points transaction record
    TransactionId
);
uuid_id!(
    /// Unique identifier for a room hold
    ReservationId
);

// ============================================================================
// Money
// ============================================================================

/// Non-negative amount in minor currency units (two decimal places).
///
/// All arithmetic is checked. Percentages are applied in basis points and
/// rounded half-up to the nearest minor unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Minor units per major unit
    pub const MINOR_PER_MAJOR: u64 = 100;

    /// Creates an amount from minor units
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Creates an amount from whole major units, `None` on overflow
    #[must_use]
    pub const fn checked_from_major(major: u64) -> Option<Self> {
        match major.checked_mul(Self::MINOR_PER_MAJOR) {
            Some(minor) => Some(Self(minor)),
            None => None,
        }
    }

    /// Creates an amount from whole major units, saturating on overflow
    #[must_use]
    pub const fn from_major(major: u64) -> Self {
        Self(major.saturating_mul(Self::MINOR_PER_MAJOR))
    }

    /// Amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Whole major units, rounded down
    #[must_use]
    pub const fn major(&self) -> u64 {
        self.0 / Self::MINOR_PER_MAJOR
    }

    /// Whether the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Checked subtraction, `None` if the result would be negative
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(diff) => Some(Self(diff)),
            None => None,
        }
    }

    /// Subtraction clamped at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Checked multiplication by a count (nights, guests)
    #[must_use]
    pub const fn checked_mul(self, factor: u64) -> Option<Self> {
        match self.0.checked_mul(factor) {
            Some(product) => Some(Self(product)),
            None => None,
        }
    }

    /// `self × bps / 10_000`, rounded half-up to the minor unit.
    #[must_use]
    pub fn percent_bps(self, bps: u32) -> Self {
        let scaled = u128::from(self.0) * u128::from(bps) + 5_000;
        Self(u64::try_from(scaled / 10_000).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major(), self.0 % Self::MINOR_PER_MAJOR)
    }
}

// ============================================================================
// Rooms
// ============================================================================

/// Bookable room category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// One-person room
    Single,
    /// Two-person room
    Double,
    /// Three-person room
    Triple,
}

impl RoomType {
    /// Every room type in allocation order
    pub const ALL: [Self; 3] = [Self::Single, Self::Double, Self::Triple];
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Double => write!(f, "double"),
            Self::Triple => write!(f, "triple"),
        }
    }
}

/// Room counts by type.
///
/// Used both for a listing's currently unbooked rooms and for the set of
/// rooms a booking consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RoomTypes {
    /// Single rooms
    pub single: u32,
    /// Double rooms
    pub double: u32,
    /// Triple rooms
    pub triple: u32,
}

impl RoomTypes {
    /// Creates a room count set
    #[must_use]
    pub const fn new(single: u32, double: u32, triple: u32) -> Self {
        Self {
            single,
            double,
            triple,
        }
    }

    /// Count for one room type
    #[must_use]
    pub const fn get(&self, room_type: RoomType) -> u32 {
        match room_type {
            RoomType::Single => self.single,
            RoomType::Double => self.double,
            RoomType::Triple => self.triple,
        }
    }

    /// Sum of all room counts
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.single
            .saturating_add(self.double)
            .saturating_add(self.triple)
    }

    /// Whether every count is zero
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Room types for which `self` has fewer rooms than `required`
    #[must_use]
    pub fn shortfall(&self, required: &Self) -> Vec<RoomType> {
        RoomType::ALL
            .into_iter()
            .filter(|room_type| self.get(*room_type) < required.get(*room_type))
            .collect()
    }

    /// `self - other` per type, `None` if any type would go negative
    #[must_use]
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        Some(Self {
            single: self.single.checked_sub(other.single)?,
            double: self.double.checked_sub(other.double)?,
            triple: self.triple.checked_sub(other.triple)?,
        })
    }

    /// `self + other` per type, `None` on overflow
    #[must_use]
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        Some(Self {
            single: self.single.checked_add(other.single)?,
            double: self.double.checked_add(other.double)?,
            triple: self.triple.checked_add(other.triple)?,
        })
    }
}

impl fmt::Display for RoomTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} single, {} double, {} triple",
            self.single, self.double, self.triple
        )
    }
}

/// Snapshot of the rooms a booking consumed.
///
/// Restoration always returns exactly this snapshot, never a value
/// recomputed from the guest count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allocation(RoomTypes);

impl Allocation {
    /// Wraps a set of consumed rooms
    #[must_use]
    pub const fn new(rooms: RoomTypes) -> Self {
        Self(rooms)
    }

    /// The consumed rooms by type
    #[must_use]
    pub const fn rooms(&self) -> RoomTypes {
        self.0
    }

    /// Number of rooms consumed
    #[must_use]
    pub const fn room_count(&self) -> u32 {
        self.0.total()
    }
}

/// Rooms held for a guest count until a settlement consumes them or they are
/// released.
///
/// The allocation is recorded server-side when the rooms are taken; callers
/// only ever hand back the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Hold id
    pub id: ReservationId,
    /// Listing the rooms were taken from
    pub listing_id: ListingId,
    /// Guest count the rooms were sized for
    pub guests: u32,
    /// Rooms taken
    pub allocation: Allocation,
    /// When the rooms were taken
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// Whether a settlement for `listing_id` and `guests` may consume this hold
    #[must_use]
    pub fn matches(&self, listing_id: ListingId, guests: u32) -> bool {
        self.listing_id == listing_id && self.guests == guests
    }
}

// ============================================================================
// Listings
// ============================================================================

/// A hotel listing with its current unbooked room inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Listing id
    pub id: ListingId,
    /// Display title
    pub title: String,
    /// Nightly rate for the listing
    pub nightly_rate: Money,
    /// Unbooked rooms by type; `None` for legacy listings without a breakdown
    pub room_types: Option<RoomTypes>,
    /// Cached sum of `room_types`, never authoritative
    pub rooms: u32,
}

impl Listing {
    /// Creates a listing, deriving the cached room total
    #[must_use]
    pub fn new(
        id: ListingId,
        title: impl Into<String>,
        nightly_rate: Money,
        room_types: Option<RoomTypes>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            nightly_rate,
            room_types,
            rooms: room_types.map_or(0, |r| r.total()),
        }
    }

    /// Replace the room breakdown and recompute the cached total
    pub fn set_room_types(&mut self, room_types: RoomTypes) {
        self.room_types = Some(room_types);
        self.rooms = room_types.total();
    }
}

// ============================================================================
// Stay dates
// ============================================================================

/// Validated check-in/check-out pair with its night count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StayDates {
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
    nights: u32,
}

impl StayDates {
    const SECONDS_PER_NIGHT: i64 = 86_400;

    /// Builds a stay, rounding partial days up to whole nights.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidDateRange`] unless check-out is after
    /// check-in.
    pub fn new(check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> Result<Self, BookingError> {
        let seconds = (check_out - check_in).num_seconds();
        if seconds <= 0 {
            return Err(BookingError::InvalidDateRange);
        }
        let nights = (seconds + Self::SECONDS_PER_NIGHT - 1) / Self::SECONDS_PER_NIGHT;
        let nights = u32::try_from(nights).map_err(|_| BookingError::InvalidDateRange)?;

        Ok(Self {
            check_in,
            check_out,
            nights,
        })
    }

    /// Parses `YYYY-MM-DD` (midnight UTC) or RFC 3339 timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidDateRange`] if either value does not
    /// parse or the range is empty.
    pub fn parse(check_in: &str, check_out: &str) -> Result<Self, BookingError> {
        Self::new(parse_instant(check_in)?, parse_instant(check_out)?)
    }

    /// Check-in instant
    #[must_use]
    pub const fn check_in(&self) -> DateTime<Utc> {
        self.check_in
    }

    /// Check-out instant
    #[must_use]
    pub const fn check_out(&self) -> DateTime<Utc> {
        self.check_out
    }

    /// Number of nights, at least one
    #[must_use]
    pub const fn nights(&self) -> u32 {
        self.nights
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, BookingError> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|_| BookingError::InvalidDateRange)
}

// ============================================================================
// Bookings
// ============================================================================

/// Booking lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Paid and holding rooms
    Confirmed,
    /// Cancelled; rooms returned
    Cancelled,
}

impl BookingStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Payment state of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Not yet paid
    Pending,
    /// Paid by gateway and/or wallet
    Paid,
    /// Cancelled and marked refunded
    Refunded,
}

impl PaymentStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
        }
    }
}

/// Outcome of the gateway refund attempted on cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefundStatus {
    /// Nothing to refund through the gateway (not cancelled, or wallet-only)
    NotRequired,
    /// Gateway accepted the refund
    Succeeded {
        /// Gateway refund reference
        refund_id: String,
    },
    /// Gateway refund failed after retries
    Failed {
        /// Last gateway error
        reason: String,
    },
}

impl RefundStatus {
    /// Storage tag
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }

    /// Refund id or failure reason, if any
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::NotRequired => None,
            Self::Succeeded { refund_id } => Some(refund_id),
            Self::Failed { reason } => Some(reason),
        }
    }
}

/// Gateway payment proof submitted with a settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Gateway order id
    pub order_id: String,
    /// Gateway payment id
    pub payment_id: String,
    /// Hex HMAC-SHA256 signature over `order_id|payment_id`
    pub signature: String,
}

/// Gateway references stored on a booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    /// Gateway order id
    pub order_id: String,
    /// Gateway payment id (refunds are issued against it)
    pub payment_id: String,
}

/// A settled booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking id
    pub id: BookingId,
    /// Guest who booked
    pub user_id: UserId,
    /// Booked listing
    pub listing_id: ListingId,
    /// Check-in instant
    pub check_in: DateTime<Utc>,
    /// Check-out instant
    pub check_out: DateTime<Utc>,
    /// Guest count (1-5)
    pub guests: u32,
    /// Nights charged
    pub nights: u32,
    /// Total charged, fee included
    pub total_amount: Money,
    /// Service fee portion of the total
    pub service_fee: Money,
    /// Portion paid from the wallet balance
    pub wallet_deduction: Money,
    /// Rooms consumed
    pub room_allocation: Allocation,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Gateway refund outcome
    pub refund_status: RefundStatus,
    /// Gateway references, absent for wallet-only bookings
    pub payment: Option<PaymentReference>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Who cancelled
    pub cancelled_by: Option<UserId>,
    /// When it was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Portion of the total that went through the payment gateway
    #[must_use]
    pub const fn gateway_amount(&self) -> Money {
        self.total_amount.saturating_sub(self.wallet_deduction)
    }

    /// Whether the booking can still be cancelled
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self.status, BookingStatus::Confirmed)
    }
}

// ============================================================================
// Wallet
// ============================================================================

/// Kind of wallet/points mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Points earned (amount in points)
    Earn,
    /// Wallet balance spent (amount in minor units)
    Spend,
    /// Points redeemed for balance (amount in points)
    Redeem,
}

impl TransactionKind {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Spend => "spend",
            Self::Redeem => "redeem",
        }
    }
}

/// Immutable audit record of one wallet or points mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Record id
    pub id: TransactionId,
    /// Owner
    pub user_id: UserId,
    /// Mutation kind
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Minor units for `spend`, points for `earn` and `redeem`
    pub amount: u64,
    /// Human-readable description
    pub description: String,
    /// When the mutation happened
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Creates a record with a fresh id
    #[must_use]
    pub fn new(
        user_id: UserId,
        kind: TransactionKind,
        amount: u64,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            user_id,
            kind,
            amount,
            description: description.into(),
            created_at,
        }
    }
}

/// A user's wallet balance, reward points and membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    /// Owner
    pub user_id: UserId,
    /// Spendable balance
    pub wallet_balance: Money,
    /// Reward points
    pub reward_points: u64,
    /// Membership flag
    pub is_member: bool,
    /// Membership expiry
    pub membership_expires_at: Option<DateTime<Utc>>,
}

impl WalletAccount {
    /// Empty account without membership
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            wallet_balance: Money::ZERO,
            reward_points: 0,
            is_member: false,
            membership_expires_at: None,
        }
    }

    /// Membership is active iff flagged and the expiry is strictly after `now`
    #[must_use]
    pub fn membership_active(&self, now: DateTime<Utc>) -> bool {
        self.is_member && self.membership_expires_at.is_some_and(|expires| expires > now)
    }
}
