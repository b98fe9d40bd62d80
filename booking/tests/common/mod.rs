//! Shared setup for engine and API tests: an engine over in-memory stores
//! and the mock gateway, with handles for seeding and inspection.

#![allow(dead_code, clippy::unwrap_used)]

use staybook::config::EngineConfig;
use staybook::mocks::{
    InMemoryBookingRepository, InMemoryListingRepository, InMemoryWalletRepository,
    MockPaymentGateway,
};
use staybook::payment_gateway::PaymentGateway;
use staybook::repositories::WalletRepository;
use staybook::types::{
    Listing, ListingId, Money, PaymentConfirmation, RoomTypes, UserId, WalletAccount,
};
use staybook::{BookingEngine, Collaborators};
use staybook_testing::{FixedClock, test_clock};
use std::sync::Arc;

pub struct Harness {
    pub engine: BookingEngine,
    pub listings: InMemoryListingRepository,
    pub bookings: InMemoryBookingRepository,
    pub wallets: InMemoryWalletRepository,
    pub gateway: MockPaymentGateway,
    pub clock: FixedClock,
}

impl Harness {
    pub fn new() -> Self {
        let config = EngineConfig {
            refund_retries: 1,
            refund_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
            ..EngineConfig::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_wallet_store(config, |wallets| Arc::new(wallets))
    }

    /// Engine whose wallet repository is `wrap` applied to the in-memory one.
    pub fn with_wallet_store(
        config: EngineConfig,
        wrap: impl FnOnce(InMemoryWalletRepository) -> Arc<dyn WalletRepository>,
    ) -> Self {
        let listings = InMemoryListingRepository::new();
        let bookings = InMemoryBookingRepository::new();
        let wallets = InMemoryWalletRepository::new();
        let gateway = MockPaymentGateway::new();
        let clock = test_clock();

        let engine = BookingEngine::new(
            Collaborators {
                listings: Arc::new(listings.clone()),
                bookings: Arc::new(bookings.clone()),
                wallets: wrap(wallets.clone()),
                gateway: Arc::new(gateway.clone()),
                clock: Arc::new(clock.clone()),
            },
            config,
        );

        Self {
            engine,
            listings,
            bookings,
            wallets,
            gateway,
            clock,
        }
    }

    /// Listing at 1000 per night with the given unbooked rooms.
    pub fn listing(&self, rooms: Option<RoomTypes>) -> ListingId {
        let id = ListingId::new();
        self.listings
            .insert_listing(Listing::new(id, "Palm Court", Money::from_major(1000), rooms))
            .unwrap();
        id
    }

    /// Non-member with the given balance and points.
    pub fn guest(&self, balance: Money, points: u64) -> UserId {
        let id = UserId::new();
        let mut account = WalletAccount::new(id);
        account.wallet_balance = balance;
        account.reward_points = points;
        self.wallets.insert_account(account).unwrap();
        id
    }

    /// A signed confirmation for a fresh gateway order of `amount`.
    pub async fn pay(&self, amount: Money) -> PaymentConfirmation {
        let order = self
            .gateway
            .create_order(amount, "rcpt_harness".to_string())
            .await
            .unwrap();
        self.gateway.confirm(&order.order_id)
    }

    /// Member whose membership runs for another month.
    pub fn member(&self) -> UserId {
        let id = UserId::new();
        let mut account = WalletAccount::new(id);
        account.is_member = true;
        account.membership_expires_at = Some(
            staybook_core::environment::Clock::now(&self.clock) + chrono::Duration::days(30),
        );
        self.wallets.insert_account(account).unwrap();
        id
    }
}
