//! Application state for the HTTP server.

use crate::engine::BookingEngine;

/// State shared by every handler.
///
/// Cloned per request; the engine's stores are shared between clones.
#[derive(Clone)]
pub struct AppState {
    /// Booking engine
    pub engine: BookingEngine,
}

impl AppState {
    /// Create the state
    #[must_use]
    pub const fn new(engine: BookingEngine) -> Self {
        Self { engine }
    }
}
