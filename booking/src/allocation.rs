//! Guest-count → room allocation rules.
//!
//! | guests | rooms                   |
//! |--------|-------------------------|
//! | 1      | 1 single                |
//! | 2      | 1 double                |
//! | 3      | 1 triple                |
//! | 4      | 1 triple + 1 single     |
//! | 5      | 1 triple + 1 double     |
//!
//! The functions here decide *what* to take and whether it fits. Making the
//! check-and-decrement atomic is the repository's job.

use crate::error::BookingError;
use crate::types::{Allocation, ListingId, RoomTypes};

/// Fewest guests per booking
pub const MIN_GUESTS: u32 = 1;

/// Most guests per booking
pub const MAX_GUESTS: u32 = 5;

/// # Errors
///
/// Returns [`BookingError::InvalidGuestCount`] outside `MIN_GUESTS..=MAX_GUESTS`.
pub const fn validate_guests(guests: u32) -> Result<(), BookingError> {
    if guests < MIN_GUESTS || guests > MAX_GUESTS {
        return Err(BookingError::InvalidGuestCount { guests });
    }
    Ok(())
}

/// Rooms required for a guest count.
///
/// # Errors
///
/// Returns [`BookingError::InvalidGuestCount`] outside 1-5 guests.
pub const fn required_rooms(guests: u32) -> Result<RoomTypes, BookingError> {
    match guests {
        1 => Ok(RoomTypes::new(1, 0, 0)),
        2 => Ok(RoomTypes::new(0, 1, 0)),
        3 => Ok(RoomTypes::new(0, 0, 1)),
        4 => Ok(RoomTypes::new(1, 0, 1)),
        5 => Ok(RoomTypes::new(0, 1, 1)),
        _ => Err(BookingError::InvalidGuestCount { guests }),
    }
}

/// Remove `required` from a listing's unbooked rooms.
///
/// Returns the remaining rooms.
///
/// # Errors
///
/// - [`BookingError::InventoryNotConfigured`] if the listing has no breakdown
/// - [`BookingError::InsufficientInventory`] naming every short room type
pub fn take(
    listing_id: ListingId,
    available: Option<RoomTypes>,
    required: &RoomTypes,
) -> Result<RoomTypes, BookingError> {
    let available = available.ok_or(BookingError::InventoryNotConfigured { listing_id })?;

    available
        .checked_sub(required)
        .ok_or_else(|| BookingError::InsufficientInventory {
            missing: available.shortfall(required),
        })
}

/// Add a booking's allocation snapshot back to a listing's unbooked rooms.
///
/// # Errors
///
/// - [`BookingError::InventoryNotConfigured`] if the listing has no breakdown
/// - [`BookingError::AmountOutOfRange`] if a count would overflow
pub fn give_back(
    listing_id: ListingId,
    available: Option<RoomTypes>,
    allocation: &Allocation,
) -> Result<RoomTypes, BookingError> {
    let available = available.ok_or(BookingError::InventoryNotConfigured { listing_id })?;

    available
        .checked_add(&allocation.rooms())
        .ok_or(BookingError::AmountOutOfRange)
}
