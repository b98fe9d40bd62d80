//! HTTP API handlers, organized by domain:
//! - Quotes: pricing a stay
//! - Payments: gateway orders
//! - Inventory: reserving and restoring rooms
//! - Bookings: settlement, lookup, cancellation
//! - Wallets: balance, history, redemption
//!
//! Amounts are minor currency units in every request and response.

pub mod bookings;
pub mod error;
pub mod inventory;
pub mod payments;
pub mod quotes;
pub mod wallets;

pub use error::AppError;

/// Result type for handlers.
pub type ApiResult<T> = Result<T, AppError>;
