//! # Staybook Testing
//!
//! Helpers for testing Staybook reducers without a running store:
//!
//! - [`FixedClock`] / [`test_clock`]: deterministic time
//! - [`ReducerTest`]: Given-When-Then harness for a single reducer call
//! - [`assertions`]: checks on returned effects
//! - [`effects::resolve`]: drive the returned effects to collect the
//!   actions they would feed back
//!
//! ```ignore
//! use staybook_testing::{ReducerTest, test_clock};
//!
//! ReducerTest::new(WalletReducer)
//!     .with_env(environment(test_clock()))
//!     .given_state(WalletState::default())
//!     .when_action(WalletAction::RedeemPoints { correlation_id, user_id, points: 19 })
//!     .then_state(|state| assert!(state.last_error.is_some()))
//!     .run();
//! ```

use chrono::{DateTime, Duration, Utc};
use staybook_core::environment::Clock;
use std::sync::{Arc, Mutex, PoisonError};


pub use reducer_test::{ReducerTest, assertions, effects};

/// Deterministic clocks.
pub mod mocks {
    use super::{Arc, Clock, DateTime, Duration, Mutex, PoisonError, Utc};

    /// Clock that returns a pinned instant until told to advance.
    ///
    /// Clones share the same instant, so a test can hold one clone and move
    /// time for the environment that owns the other.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a clock pinned at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Pin the clock at a new instant.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Clock pinned at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1_735_689_600))
    }
}

pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_new_year_2025() {
        let clock = test_clock();
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn clones_share_advances() {
        let clock = test_clock();
        let shared = clock.clone();
        shared.advance(Duration::days(31));
        assert_eq!(clock.now().to_rfc3339(), "2025-02-01T00:00:00+00:00");
    }
}
