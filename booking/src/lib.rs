//! Staybook - booking pricing and room-inventory engine for a hotel marketplace.
//!
//! The engine prices stays, allocates rooms by guest count, settles bookings
//! against wallet balance and an external payment gateway, accrues and
//! redeems reward points, and cancels bookings with a best-effort refund.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │  Inventory   │  │  Settlement  │  │    Wallet    │
//! │  Aggregate   │  │    (Saga)    │  │  Aggregate   │
//! └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!        │                 │                 │
//!        └─────────────────┼─────────────────┘
//!                          │ effects
//!                          ▼
//!      Listing / Booking / Wallet repositories, payment gateway
//! ```
//!
//! Each aggregate is a pure reducer run by a `staybook_runtime::Store`.
//! [`BookingEngine`] sends commands and waits for their outcome; the
//! [`server`] module exposes the engine over HTTP.
//!
//! # Room allocation
//!
//! | guests | rooms                |
//! |--------|----------------------|
//! | 1      | 1 single             |
//! | 2      | 1 double             |
//! | 3      | 1 triple             |
//! | 4      | 1 triple + 1 single  |
//! | 5      | 1 triple + 1 double  |
//!
//! Reservation is a single conditional update in the repository, so two
//! concurrent requests for the last room cannot both succeed. It records a
//! hold; settlement consumes the hold by id and books exactly its rooms.

#![forbid(unsafe_code)]

pub mod aggregates;
pub mod allocation;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod mocks;
pub mod payment_gateway;
pub mod pricing;
pub mod repositories;
pub mod server;
pub mod stores;
pub mod types;

pub use config::{Config, EngineConfig};
pub use engine::{
    BookRequest, BookingEngine, Collaborators, Redemption, SettledBooking, SettlementRequest,
};
pub use error::BookingError;
pub use pricing::PricingResult;
pub use types::{
    Allocation, Booking, BookingId, Listing, ListingId, Money, Reservation, ReservationId,
    RoomTypes, StayDates, UserId, WalletAccount,
};
