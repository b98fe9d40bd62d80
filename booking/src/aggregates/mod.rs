//! Stateful booking flows, each a reducer run by a `Store`.
//!
//! - [`inventory`]: room reservation and restoration
//! - [`settlement`]: booking settlement and cancellation
//! - [`wallet`]: reward-point redemption

pub mod inventory;
pub mod settlement;
pub mod wallet;

pub use inventory::{InventoryAction, InventoryEnvironment, InventoryReducer, InventoryState};
pub use settlement::{
    SettlementAction, SettlementEnvironment, SettlementReducer, SettlementState, Stage,
};
pub use wallet::{WalletAction, WalletEnvironment, WalletReducer, WalletState};
