//! In-memory collaborators for tests and local runs.
//!
//! - [`InMemoryListingRepository`], [`InMemoryBookingRepository`],
//!   [`InMemoryWalletRepository`]: `HashMap`-backed repositories whose
//!   conditional updates hold the lock for the whole check-and-apply
//! - [`MockPaymentGateway`]: signs and verifies like the real gateway, records
//!   orders and refunds, and can be told to fail refunds

mod gateway;
mod repositories;

pub use gateway::MockPaymentGateway;
pub use repositories::{
    InMemoryBookingRepository, InMemoryListingRepository, InMemoryWalletRepository,
};
