//! # Staybook Core
//!
//! The functional core shared by every Staybook aggregate.
//!
//! Business rules live in reducers: pure functions of
//! `(State, Action, Environment) → (State, Effects)`. Reducers never touch a
//! database or the network themselves. They return [`effect::Effect`] values
//! that the runtime executes, and whatever action an effect produces is fed
//! back into the same reducer.
//!
//! - **State**: owned, cloneable aggregate state
//! - **Action**: commands (requests) and events (facts) in one enum
//! - **Environment**: injected collaborators (repositories, gateway, clock)
//! - **Effect**: a description of I/O to run later
//!
//! ## Example
//!
//! ```ignore
//! use staybook_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
//!
//! impl Reducer for WalletReducer {
//!     type State = WalletState;
//!     type Action = WalletAction;
//!     type Environment = WalletEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut WalletState,
//!         action: WalletAction,
//!         env: &WalletEnvironment,
//!     ) -> SmallVec<[Effect<WalletAction>; 4]> {
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

/// Declarative helpers for building effects
pub mod effect_macros;

/// The reducer trait
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// Business logic for one aggregate.
    ///
    /// `reduce` validates the action, mutates `state` in place and describes
    /// any follow-up I/O as effects. It must not block or perform I/O.
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects.
        ///
        /// Most actions produce zero or one effect, so the result is stored
        /// inline for up to four effects.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Side effect descriptions
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// A side effect to be executed by the runtime.
    ///
    /// Effects are values. Returning one from a reducer does nothing until the
    /// store executes it.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Dispatch an action after a delay
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after the delay
            action: Box<Action>,
        },

        /// Arbitrary async computation.
        ///
        /// If it resolves to `Some(action)`, the action is broadcast to
        /// observers and fed back into the reducer.
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap an already-known action so it is delivered like any other
        /// effect result (broadcast, then reduced).
        ///
        /// Reducers use this to answer a command that fails validation
        /// before any I/O happens.
        #[must_use]
        pub fn send(action: Action) -> Effect<Action>
        where
            Action: Send + 'static,
        {
            Effect::Future(Box::pin(async move { Some(action) }))
        }

        /// Returns `true` for [`Effect::None`].
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of the current time.
    ///
    /// Membership expiry and booking timestamps read the clock through this
    /// trait so tests can pin time with a fixed clock.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use super::environment::{Clock, SystemClock};

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        Pong,
    }

    #[tokio::test]
    async fn send_effect_resolves_to_its_action() {
        let effect = Effect::send(Ping::Pong);
        let Effect::Future(fut) = effect else {
            unreachable!("send always builds a future effect");
        };
        assert_eq!(fut.await, Some(Ping::Pong));
    }

    #[test]
    fn debug_hides_future_body() {
        let effect: Effect<Ping> = Effect::send(Ping::Pong);
        assert_eq!(format!("{effect:?}"), "Effect::Future(<future>)");
        assert!(Effect::<Ping>::None.is_none());
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        assert!(clock.now() >= first);
    }
}
