//! # Staybook Runtime
//!
//! The imperative shell around Staybook reducers.
//!
//! A [`Store`] owns one aggregate's state, runs its reducer for every action
//! and executes the effects the reducer returns. Actions produced by effects
//! are broadcast to observers and fed back into the reducer, which is how
//! multi-step flows (reserve → persist → charge → accrue) advance.
//!
//! Callers that need an answer use [`Store::send_and_wait_for`]: it sends a
//! command and waits for the first matching result action, usually matched on
//! a correlation id carried by the command.
//!
//! ```ignore
//! use staybook_runtime::Store;
//!
//! let store = Store::new(WalletState::default(), WalletReducer, env);
//! let reply = store
//!     .send_and_wait_for(command, |a| a.is_outcome_of(correlation_id), timeout)
//!     .await?;
//! ```

use staybook_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};

/// Retry with exponential backoff for transient failures
pub mod retry;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// No matching result action arrived before the deadline
        #[error("Timeout waiting for action")]
        Timeout,

        /// The action broadcast channel was closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Default number of effect-produced actions buffered for slow observers.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Decrements the in-flight effect counter when an effect task ends,
/// including when the task panics.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The Store: runtime for one reducer.
///
/// - State sits behind an `RwLock`; the reducer runs under the write lock.
/// - Effects run on spawned tokio tasks, never under the lock.
/// - Every action produced by an effect is broadcast before it is reduced.
///
/// Cloning a store is cheap and shares the same state and broadcast channel.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: R,
    environment: E,
    shutdown: Arc<AtomicBool>,
    pending_effects: Arc<AtomicUsize>,
    action_broadcast: broadcast::Sender<A>,
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
    A: Clone + Send + 'static,
    S: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a store with the default broadcast capacity.
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_broadcast_capacity(
            initial_state,
            reducer,
            environment,
            DEFAULT_BROADCAST_CAPACITY,
        )
    }

    /// Create a store whose action broadcast buffers `capacity` actions.
    ///
    /// Raise the capacity when many concurrent requests wait on the same
    /// store, so observers do not lag past their terminal action.
    #[must_use]
    pub fn with_broadcast_capacity(
        initial_state: S,
        reducer: R,
        environment: E,
        capacity: usize,
    ) -> Self {
        let (action_broadcast, _) = broadcast::channel(capacity.max(1));

        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer,
            environment,
            shutdown: Arc::new(AtomicBool::new(false)),
            pending_effects: Arc::new(AtomicUsize::new(0)),
            action_broadcast,
        }
    }

    /// Send an action to the store.
    ///
    /// Runs the reducer under the write lock, then starts the returned
    /// effects. Returns once the effects are started, not finished.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<(), StoreError> {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::warn!("Rejected action: store is shutting down");
            metrics::counter!("store.shutdown.rejected_actions").increment(1);
            return Err(StoreError::ShutdownInProgress);
        }

        self.dispatch(action).await;
        Ok(())
    }

    /// Reduce an action and start its effects. Effect results go through
    /// here directly so in-flight flows can finish during shutdown.
    async fn dispatch(&self, action: A) {
        metrics::counter!("store.actions.total").increment(1);

        let effects = {
            let mut state = self.state.write().await;
            let start = std::time::Instant::now();
            let effects = self.reducer.reduce(&mut *state, action, &self.environment);
            metrics::histogram!("store.reducer.duration_seconds")
                .record(start.elapsed().as_secs_f64());
            effects
        };

        tracing::trace!(effects = effects.len(), "Reducer completed");
        for effect in effects {
            self.execute_effect(effect);
        }
    }

    /// Send a command and wait for the first effect-produced action that
    /// satisfies `predicate`.
    ///
    /// The subscription is taken before the command is sent, so a result
    /// produced immediately is never missed. Only actions produced by effects
    /// are observed; the command itself is not.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`]: no matching action before `timeout`
    /// - [`StoreError::ChannelClosed`]: the broadcast channel closed
    /// - [`StoreError::ShutdownInProgress`]: the store is shutting down
    pub async fn send_and_wait_for<F>(
        &self,
        action: A,
        predicate: F,
        timeout: Duration,
    ) -> Result<A, StoreError>
    where
        F: Fn(&A) -> bool,
    {
        let mut rx = self.action_broadcast.subscribe();

        self.send(action).await?;

        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(action) if predicate(&action) => return Ok(action),
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Action observer lagged");
                        metrics::counter!("store.observer.lagged").increment(skipped);
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StoreError::ChannelClosed);
                    },
                }
            }
        })
        .await
        .map_err(|_| {
            metrics::counter!("store.request.timeouts").increment(1);
            StoreError::Timeout
        })?
    }

    /// Read current state through a closure.
    ///
    /// ```ignore
    /// let cached = store.state(|s| s.rooms_for(&listing_id)).await;
    /// ```
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&state)
    }

    /// Number of effect tasks currently running.
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.pending_effects.load(Ordering::Acquire)
    }

    /// Stop accepting actions and wait for running effects to finish.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
    /// when `timeout` elapses.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!("Initiating graceful shutdown");
        self.shutdown.store(true, Ordering::Release);

        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(25);

        loop {
            let pending = self.pending_effects.load(Ordering::Acquire);
            if pending == 0 {
                tracing::info!("All effects completed, shutdown successful");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                tracing::error!(pending_effects = pending, "Shutdown timed out");
                return Err(StoreError::ShutdownTimeout(pending));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Spawn a task for one effect. Kept synchronous so the feedback loop
    /// (`send` → effect → `send`) does not form a recursive async type.
    fn execute_effect(&self, effect: Effect<A>) {
        match effect {
            Effect::None => {
                metrics::counter!("store.effects.executed", "type" => "none").increment(1);
            },
            Effect::Future(fut) => {
                metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                let guard = self.track_pending();
                let store = self.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    if let Some(action) = fut.await {
                        store.feed_back(action).await;
                    }
                });
            },
            Effect::Delay { duration, action } => {
                metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                let guard = self.track_pending();
                let store = self.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    tokio::time::sleep(duration).await;
                    store.feed_back(*action).await;
                });
            },
        }
    }

    fn track_pending(&self) -> PendingGuard {
        self.pending_effects.fetch_add(1, Ordering::SeqCst);
        PendingGuard(Arc::clone(&self.pending_effects))
    }

    async fn feed_back(&self, action: A) {
        // No receivers is normal when nobody waits on this store.
        let _ = self.action_broadcast.send(action.clone());
        self.dispatch(action).await;
    }
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: self.reducer.clone(),
            environment: self.environment.clone(),
            shutdown: Arc::clone(&self.shutdown),
            pending_effects: Arc::clone(&self.pending_effects),
            action_broadcast: self.action_broadcast.clone(),
        }
    }
}
