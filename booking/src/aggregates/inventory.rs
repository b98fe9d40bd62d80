//! Inventory aggregate: room holds per listing.
//!
//! The reducer turns a guest count into the rooms it needs and hands the
//! check-and-decrement to [`ListingRepository::reserve_rooms`], which applies
//! it atomically and records the hold. Two concurrent reservations for the
//! last room therefore cannot both succeed, whichever store instance they
//! run on. Releasing a hold gives back exactly the rooms it recorded.

use crate::allocation;
use crate::error::BookingError;
use crate::repositories::ListingRepository;
use crate::types::{Allocation, ListingId, Reservation, ReservationId, RoomTypes};
use staybook_core::environment::Clock;
use staybook_core::{SmallVec, async_effect, effect::Effect, reducer::Reducer, smallvec};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Listings remembered in [`InventoryState::last_known`] by default
pub const DEFAULT_LAST_KNOWN_CAPACITY: usize = 1024;

// ============================================================================
// State
// ============================================================================

/// Last-known inventory per listing, for inspection and logging.
///
/// The repository is authoritative; this is only what the aggregate saw
/// most recently, for at most `capacity` listings.
#[derive(Debug, Clone)]
pub struct InventoryState {
    /// Unbooked rooms reported by the last reserve/release per listing
    pub last_known: HashMap<ListingId, RoomTypes>,
    /// Successful reservations
    pub reservations: u64,
    /// Successful releases
    pub restorations: u64,
    /// Most recent rejection
    pub last_error: Option<BookingError>,
    capacity: usize,
}

impl Default for InventoryState {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LAST_KNOWN_CAPACITY)
    }
}

impl InventoryState {
    /// State remembering at most `capacity` listings
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            last_known: HashMap::new(),
            reservations: 0,
            restorations: 0,
            last_error: None,
            capacity,
        }
    }

    /// Last-known unbooked rooms for a listing
    #[must_use]
    pub fn rooms_for(&self, listing_id: &ListingId) -> Option<RoomTypes> {
        self.last_known.get(listing_id).copied()
    }

    fn remember(&mut self, listing_id: ListingId, remaining: RoomTypes) {
        if self.capacity == 0 {
            return;
        }
        if !self.last_known.contains_key(&listing_id) && self.last_known.len() >= self.capacity {
            // Any entry will do; the repository holds the real counts
            if let Some(evicted) = self.last_known.keys().next().copied() {
                self.last_known.remove(&evicted);
            }
        }
        self.last_known.insert(listing_id, remaining);
    }
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Inventory commands and their outcomes
#[derive(Debug, Clone)]
pub enum InventoryAction {
    // Commands
    /// Hold the rooms a guest count needs
    ReserveRooms {
        /// Request correlation
        correlation_id: Uuid,
        /// Listing to reserve from
        listing_id: ListingId,
        /// Guest count (1-5)
        guests: u32,
    },

    /// Drop a hold and give its rooms back
    ReleaseReservation {
        /// Request correlation
        correlation_id: Uuid,
        /// Listing the hold is on
        listing_id: ListingId,
        /// Hold to drop
        reservation_id: ReservationId,
    },

    // Events
    /// Rooms were taken and held
    RoomsReserved {
        /// Request correlation
        correlation_id: Uuid,
        /// The hold
        reservation: Reservation,
        /// Unbooked rooms left
        remaining: RoomTypes,
    },

    /// A hold was dropped and its rooms given back
    ReservationReleased {
        /// Request correlation
        correlation_id: Uuid,
        /// Listing
        listing_id: ListingId,
        /// Unbooked rooms after the release
        remaining: RoomTypes,
    },

    /// The command failed
    InventoryRejected {
        /// Request correlation
        correlation_id: Uuid,
        /// Listing
        listing_id: ListingId,
        /// Why
        error: BookingError,
    },
}

impl InventoryAction {
    /// Whether this is the outcome of the command with `correlation_id`
    #[must_use]
    pub fn is_outcome_of(&self, correlation_id: Uuid) -> bool {
        match self {
            Self::RoomsReserved { correlation_id: id, .. }
            | Self::ReservationReleased { correlation_id: id, .. }
            | Self::InventoryRejected { correlation_id: id, .. } => *id == correlation_id,
            Self::ReserveRooms { .. } | Self::ReleaseReservation { .. } => false,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Inventory collaborators
#[derive(Clone)]
pub struct InventoryEnvironment {
    /// Listing storage
    pub listings: Arc<dyn ListingRepository>,
    /// Time source for hold timestamps
    pub clock: Arc<dyn Clock>,
}

impl InventoryEnvironment {
    /// Creates an environment
    #[must_use]
    pub fn new(listings: Arc<dyn ListingRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { listings, clock }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for [`InventoryAction`]
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryReducer;

impl Reducer for InventoryReducer {
    type State = InventoryState;
    type Action = InventoryAction;
    type Environment = InventoryEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Commands ==========
            InventoryAction::ReserveRooms {
                correlation_id,
                listing_id,
                guests,
            } => {
                let required = match allocation::required_rooms(guests) {
                    Ok(required) => required,
                    Err(error) => {
                        return smallvec![Effect::send(InventoryAction::InventoryRejected {
                            correlation_id,
                            listing_id,
                            error,
                        })];
                    },
                };

                let reservation = Reservation {
                    id: ReservationId::new(),
                    listing_id,
                    guests,
                    allocation: Allocation::new(required),
                    created_at: env.clock.now(),
                };
                let listings = Arc::clone(&env.listings);
                smallvec![async_effect! {
                    match listings.reserve_rooms(reservation).await {
                        Ok(remaining) => Some(InventoryAction::RoomsReserved {
                            correlation_id,
                            reservation,
                            remaining,
                        }),
                        Err(error) => Some(InventoryAction::InventoryRejected {
                            correlation_id,
                            listing_id,
                            error,
                        }),
                    }
                }]
            },

            InventoryAction::ReleaseReservation {
                correlation_id,
                listing_id,
                reservation_id,
            } => {
                let listings = Arc::clone(&env.listings);
                smallvec![async_effect! {
                    match listings.release_reservation(listing_id, reservation_id).await {
                        Ok(remaining) => Some(InventoryAction::ReservationReleased {
                            correlation_id,
                            listing_id,
                            remaining,
                        }),
                        Err(error) => Some(InventoryAction::InventoryRejected {
                            correlation_id,
                            listing_id,
                            error,
                        }),
                    }
                }]
            },

            // ========== Events ==========
            InventoryAction::RoomsReserved {
                reservation,
                remaining,
                ..
            } => {
                tracing::info!(
                    listing_id = %reservation.listing_id,
                    reservation_id = %reservation.id,
                    rooms = %reservation.allocation.rooms(),
                    %remaining,
                    "Rooms reserved"
                );
                metrics::counter!("staybook.inventory.reserved").increment(1);
                state.remember(reservation.listing_id, remaining);
                state.reservations += 1;
                SmallVec::new()
            },

            InventoryAction::ReservationReleased {
                listing_id,
                remaining,
                ..
            } => {
                tracing::info!(%listing_id, %remaining, "Reservation released");
                metrics::counter!("staybook.inventory.released").increment(1);
                state.remember(listing_id, remaining);
                state.restorations += 1;
                SmallVec::new()
            },

            InventoryAction::InventoryRejected {
                listing_id, error, ..
            } => {
                tracing::warn!(%listing_id, %error, "Inventory command rejected");
                metrics::counter!("staybook.inventory.rejected", "code" => error.code())
                    .increment(1);
                state.last_error = Some(error);
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mocks::InMemoryListingRepository;
    use crate::types::{Listing, Money, RoomType};
    use staybook_testing::{ReducerTest, assertions, effects, test_clock};

    fn environment(rooms: Option<RoomTypes>) -> (InventoryEnvironment, ListingId) {
        let repo = InMemoryListingRepository::new();
        let listing_id = ListingId::new();
        repo.insert_listing(Listing::new(listing_id, "Old Town", Money::from_major(900), rooms))
            .unwrap();
        let env = InventoryEnvironment::new(Arc::new(repo), Arc::new(test_clock()));
        (env, listing_id)
    }

    #[tokio::test]
    async fn reserve_resolves_to_a_recorded_hold() {
        let (env, listing_id) = environment(Some(RoomTypes::new(2, 2, 2)));
        let correlation_id = Uuid::new_v4();

        let effects = ReducerTest::new(InventoryReducer)
            .with_env(env)
            .given_state(InventoryState::default())
            .when_action(InventoryAction::ReserveRooms {
                correlation_id,
                listing_id,
                guests: 5,
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run_returning_effects();

        let actions = effects::resolve(effects).await;
        assert!(matches!(
            actions.as_slice(),
            [InventoryAction::RoomsReserved { reservation, remaining, .. }]
                if reservation.allocation.rooms() == RoomTypes::new(0, 1, 1)
                    && reservation.guests == 5
                    && reservation.listing_id == listing_id
                    && reservation.created_at == test_clock().now()
                    && *remaining == RoomTypes::new(2, 1, 1)
        ));
        assert!(actions[0].is_outcome_of(correlation_id));
    }

    #[tokio::test]
    async fn release_gives_back_the_held_rooms() {
        let (env, listing_id) = environment(Some(RoomTypes::new(1, 1, 1)));
        let reserve = ReducerTest::new(InventoryReducer)
            .with_env(env.clone())
            .given_state(InventoryState::default())
            .when_action(InventoryAction::ReserveRooms {
                correlation_id: Uuid::new_v4(),
                listing_id,
                guests: 4,
            })
            .run_returning_effects();
        let Some(InventoryAction::RoomsReserved { reservation, .. }) =
            effects::resolve(reserve).await.pop()
        else {
            panic!("reservation failed");
        };

        let release = ReducerTest::new(InventoryReducer)
            .with_env(env)
            .given_state(InventoryState::default())
            .when_action(InventoryAction::ReleaseReservation {
                correlation_id: Uuid::new_v4(),
                listing_id,
                reservation_id: reservation.id,
            })
            .run_returning_effects();

        assert!(matches!(
            effects::resolve(release).await.as_slice(),
            [InventoryAction::ReservationReleased { remaining, .. }]
                if *remaining == RoomTypes::new(1, 1, 1)
        ));
    }

    #[tokio::test]
    async fn invalid_guest_count_is_rejected_without_io() {
        let (env, listing_id) = environment(Some(RoomTypes::new(2, 2, 2)));

        let effects = ReducerTest::new(InventoryReducer)
            .with_env(env.clone())
            .given_state(InventoryState::default())
            .when_action(InventoryAction::ReserveRooms {
                correlation_id: Uuid::new_v4(),
                listing_id,
                guests: 6,
            })
            .run_returning_effects();

        let actions = effects::resolve(effects).await;
        assert!(matches!(
            actions.as_slice(),
            [InventoryAction::InventoryRejected {
                error: BookingError::InvalidGuestCount { guests: 6 },
                ..
            }]
        ));
        let listing = env.listings.listing(listing_id).await.unwrap();
        assert_eq!(listing.room_types, Some(RoomTypes::new(2, 2, 2)));
    }

    #[tokio::test]
    async fn shortage_names_the_missing_type() {
        let (env, listing_id) = environment(Some(RoomTypes::new(0, 1, 1)));

        let effects = ReducerTest::new(InventoryReducer)
            .with_env(env)
            .given_state(InventoryState::default())
            .when_action(InventoryAction::ReserveRooms {
                correlation_id: Uuid::new_v4(),
                listing_id,
                guests: 4,
            })
            .run_returning_effects();

        let actions = effects::resolve(effects).await;
        assert!(matches!(
            actions.as_slice(),
            [InventoryAction::InventoryRejected {
                error: BookingError::InsufficientInventory { missing },
                ..
            }] if missing == &vec![RoomType::Single]
        ));
    }

    fn reserved(listing_id: ListingId, remaining: RoomTypes) -> InventoryAction {
        InventoryAction::RoomsReserved {
            correlation_id: Uuid::new_v4(),
            reservation: Reservation {
                id: ReservationId::new(),
                listing_id,
                guests: 2,
                allocation: Allocation::new(RoomTypes::new(0, 1, 0)),
                created_at: test_clock().now(),
            },
            remaining,
        }
    }

    #[test]
    fn reserved_event_updates_last_known_rooms() {
        let (env, listing_id) = environment(None);

        ReducerTest::new(InventoryReducer)
            .with_env(env)
            .given_state(InventoryState::default())
            .when_action(reserved(listing_id, RoomTypes::new(1, 0, 3)))
            .then_state(move |state| {
                assert_eq!(state.rooms_for(&listing_id), Some(RoomTypes::new(1, 0, 3)));
                assert_eq!(state.reservations, 1);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn last_known_rooms_stay_within_capacity() {
        let (env, _) = environment(None);
        let reducer = InventoryReducer;
        let mut state = InventoryState::with_capacity(2);
        let listings = [ListingId::new(), ListingId::new(), ListingId::new()];

        for listing_id in listings {
            reducer.reduce(&mut state, reserved(listing_id, RoomTypes::new(1, 1, 1)), &env);
        }
        reducer.reduce(&mut state, reserved(listings[2], RoomTypes::new(0, 1, 1)), &env);

        assert_eq!(state.last_known.len(), 2);
        assert_eq!(state.rooms_for(&listings[2]), Some(RoomTypes::new(0, 1, 1)));
        assert_eq!(state.reservations, 4);
    }

    #[test]
    fn rejection_is_remembered() {
        let (env, listing_id) = environment(None);

        ReducerTest::new(InventoryReducer)
            .with_env(env)
            .given_state(InventoryState::default())
            .when_action(InventoryAction::InventoryRejected {
                correlation_id: Uuid::new_v4(),
                listing_id,
                error: BookingError::InventoryNotConfigured { listing_id },
            })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(BookingError::InventoryNotConfigured { listing_id })
                );
            })
            .run();
    }
}
