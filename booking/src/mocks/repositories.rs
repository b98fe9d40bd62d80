use crate::allocation;
use crate::error::BookingError;
use crate::repositories::{BookingRepository, ListingRepository, RepoFuture, WalletRepository};
use crate::types::{
    Allocation, Booking, BookingId, BookingStatus, Listing, ListingId, Money, PaymentStatus,
    RefundStatus, Reservation, ReservationId, RoomTypes, Transaction, UserId, WalletAccount,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, BookingError> {
    lock.read().map_err(|_| BookingError::transient("in-memory store poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, BookingError> {
    lock.write().map_err(|_| BookingError::transient("in-memory store poisoned"))
}

// ============================================================================
// Listings
// ============================================================================

#[derive(Debug, Default)]
struct Inventory {
    listings: HashMap<ListingId, Listing>,
    holds: HashMap<ReservationId, Reservation>,
}

impl Inventory {
    fn listing_mut(&mut self, listing_id: ListingId) -> Result<&mut Listing, BookingError> {
        self.listings
            .get_mut(&listing_id)
            .ok_or_else(|| BookingError::not_found("listing", listing_id))
    }
}

/// `HashMap`-backed listing inventory and room holds.
#[derive(Clone, Debug, Default)]
pub struct InMemoryListingRepository {
    inventory: Arc<RwLock<Inventory>>,
}

impl InMemoryListingRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a listing.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Transient`] if the store is poisoned.
    pub fn insert_listing(&self, listing: Listing) -> Result<(), BookingError> {
        write(&self.inventory)?.listings.insert(listing.id, listing);
        Ok(())
    }

    /// Number of outstanding holds
    #[must_use]
    pub fn holds(&self) -> usize {
        self.inventory.read().map_or(0, |inventory| inventory.holds.len())
    }
}

impl ListingRepository for InMemoryListingRepository {
    fn listing(&self, listing_id: ListingId) -> RepoFuture<'_, Listing> {
        Box::pin(async move {
            read(&self.inventory)?
                .listings
                .get(&listing_id)
                .cloned()
                .ok_or_else(|| BookingError::not_found("listing", listing_id))
        })
    }

    fn reserve_rooms(&self, reservation: Reservation) -> RepoFuture<'_, RoomTypes> {
        Box::pin(async move {
            let mut inventory = write(&self.inventory)?;
            let listing_id = reservation.listing_id;
            let listing = inventory.listing_mut(listing_id)?;

            let remaining =
                allocation::take(listing_id, listing.room_types, &reservation.allocation.rooms())?;
            listing.set_room_types(remaining);
            inventory.holds.insert(reservation.id, reservation);
            Ok(remaining)
        })
    }

    fn release_reservation(
        &self,
        listing_id: ListingId,
        reservation_id: ReservationId,
    ) -> RepoFuture<'_, RoomTypes> {
        Box::pin(async move {
            let mut inventory = write(&self.inventory)?;
            let held = inventory
                .holds
                .get(&reservation_id)
                .filter(|hold| hold.listing_id == listing_id)
                .copied()
                .ok_or_else(|| BookingError::not_found("reservation", reservation_id))?;
            let listing = inventory.listing_mut(listing_id)?;

            let remaining =
                allocation::give_back(listing_id, listing.room_types, &held.allocation)?;
            listing.set_room_types(remaining);
            inventory.holds.remove(&reservation_id);
            Ok(remaining)
        })
    }

    fn consume_reservation(
        &self,
        reservation_id: ReservationId,
        listing_id: ListingId,
        guests: u32,
    ) -> RepoFuture<'_, Reservation> {
        Box::pin(async move {
            let mut inventory = write(&self.inventory)?;
            let held = inventory
                .holds
                .get(&reservation_id)
                .ok_or_else(|| BookingError::not_found("reservation", reservation_id))?;

            if !held.matches(listing_id, guests) {
                return Err(BookingError::ReservationMismatch { reservation_id });
            }
            inventory
                .holds
                .remove(&reservation_id)
                .ok_or_else(|| BookingError::not_found("reservation", reservation_id))
        })
    }

    fn restore_rooms(
        &self,
        listing_id: ListingId,
        allocation: Allocation,
    ) -> RepoFuture<'_, RoomTypes> {
        Box::pin(async move {
            let mut inventory = write(&self.inventory)?;
            let listing = inventory.listing_mut(listing_id)?;

            let remaining = allocation::give_back(listing_id, listing.room_types, &allocation)?;
            listing.set_room_types(remaining);
            Ok(remaining)
        })
    }
}

// ============================================================================
// Bookings
// ============================================================================

/// `HashMap`-backed booking records.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBookingRepository {
    bookings: Arc<RwLock<HashMap<BookingId, Booking>>>,
}

impl InMemoryBookingRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bookings
    #[must_use]
    pub fn len(&self) -> usize {
        self.bookings.read().map_or(0, |bookings| bookings.len())
    }

    /// Whether no booking is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BookingRepository for InMemoryBookingRepository {
    fn insert(&self, booking: Booking) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let mut bookings = write(&self.bookings)?;
            if let Some(payment) = &booking.payment {
                let reused = bookings.values().filter_map(|b| b.payment.as_ref()).any(|p| {
                    p.payment_id == payment.payment_id || p.order_id == payment.order_id
                });
                if reused {
                    return Err(BookingError::PaymentVerificationFailed);
                }
            }
            bookings.insert(booking.id, booking);
            Ok(())
        })
    }

    fn booking(&self, booking_id: BookingId) -> RepoFuture<'_, Booking> {
        Box::pin(async move {
            read(&self.bookings)?
                .get(&booking_id)
                .cloned()
                .ok_or_else(|| BookingError::not_found("booking", booking_id))
        })
    }

    fn delete(&self, booking_id: BookingId) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            write(&self.bookings)?.remove(&booking_id);
            Ok(())
        })
    }

    fn claim_cancellation(
        &self,
        booking_id: BookingId,
        cancelled_by: UserId,
        cancelled_at: DateTime<Utc>,
    ) -> RepoFuture<'_, Booking> {
        Box::pin(async move {
            let mut bookings = write(&self.bookings)?;
            let booking = bookings
                .get_mut(&booking_id)
                .ok_or_else(|| BookingError::not_found("booking", booking_id))?;

            if !booking.is_confirmed() {
                return Err(BookingError::AlreadyCancelled { booking_id });
            }
            booking.status = BookingStatus::Cancelled;
            booking.cancelled_by = Some(cancelled_by);
            booking.cancelled_at = Some(cancelled_at);
            Ok(booking.clone())
        })
    }

    fn record_refund(
        &self,
        booking_id: BookingId,
        refund: RefundStatus,
    ) -> RepoFuture<'_, Booking> {
        Box::pin(async move {
            let mut bookings = write(&self.bookings)?;
            let booking = bookings
                .get_mut(&booking_id)
                .ok_or_else(|| BookingError::not_found("booking", booking_id))?;

            booking.payment_status = PaymentStatus::Refunded;
            booking.refund_status = refund;
            Ok(booking.clone())
        })
    }
}

// ============================================================================
// Wallets
// ============================================================================

#[derive(Debug, Default)]
struct Ledger {
    accounts: HashMap<UserId, WalletAccount>,
    transactions: Vec<Transaction>,
}

/// `HashMap`-backed wallets with an append-only transaction log.
#[derive(Clone, Debug, Default)]
pub struct InMemoryWalletRepository {
    ledger: Arc<RwLock<Ledger>>,
}

impl InMemoryWalletRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Transient`] if the store is poisoned.
    pub fn insert_account(&self, account: WalletAccount) -> Result<(), BookingError> {
        write(&self.ledger)?.accounts.insert(account.user_id, account);
        Ok(())
    }

    fn apply<F, T>(&self, user_id: UserId, entry: Transaction, mutate: F) -> Result<T, BookingError>
    where
        F: FnOnce(&mut WalletAccount) -> Result<T, BookingError>,
    {
        let mut ledger = write(&self.ledger)?;
        let account = ledger
            .accounts
            .get_mut(&user_id)
            .ok_or_else(|| BookingError::not_found("wallet", user_id))?;

        let result = mutate(account)?;
        ledger.transactions.push(entry);
        Ok(result)
    }
}

impl WalletRepository for InMemoryWalletRepository {
    fn account(&self, user_id: UserId) -> RepoFuture<'_, WalletAccount> {
        Box::pin(async move {
            read(&self.ledger)?
                .accounts
                .get(&user_id)
                .cloned()
                .ok_or_else(|| BookingError::not_found("wallet", user_id))
        })
    }

    fn debit_balance(
        &self,
        user_id: UserId,
        amount: Money,
        entry: Transaction,
    ) -> RepoFuture<'_, Money> {
        Box::pin(async move {
            self.apply(user_id, entry, |account| {
                account.wallet_balance = account.wallet_balance.checked_sub(amount).ok_or(
                    BookingError::InsufficientWalletBalance {
                        available: account.wallet_balance,
                        requested: amount,
                    },
                )?;
                Ok(account.wallet_balance)
            })
        })
    }

    fn credit_points(
        &self,
        user_id: UserId,
        points: u64,
        entry: Transaction,
    ) -> RepoFuture<'_, u64> {
        Box::pin(async move {
            self.apply(user_id, entry, |account| {
                account.reward_points = account
                    .reward_points
                    .checked_add(points)
                    .ok_or(BookingError::AmountOutOfRange)?;
                Ok(account.reward_points)
            })
        })
    }

    fn redeem_points(
        &self,
        user_id: UserId,
        points: u64,
        credit: Money,
        entry: Transaction,
    ) -> RepoFuture<'_, WalletAccount> {
        Box::pin(async move {
            self.apply(user_id, entry, |account| {
                let remaining = account.reward_points.checked_sub(points).ok_or(
                    BookingError::InsufficientPoints {
                        available: account.reward_points,
                        requested: points,
                    },
                )?;
                let balance = account
                    .wallet_balance
                    .checked_add(credit)
                    .ok_or(BookingError::AmountOutOfRange)?;

                account.reward_points = remaining;
                account.wallet_balance = balance;
                Ok(account.clone())
            })
        })
    }

    fn transactions(&self, user_id: UserId) -> RepoFuture<'_, Vec<Transaction>> {
        Box::pin(async move {
            let ledger = read(&self.ledger)?;
            Ok(ledger
                .transactions
                .iter()
                .rev()
                .filter(|entry| entry.user_id == user_id)
                .cloned()
                .collect())
        })
    }
}
