//! End-to-end engine flows over in-memory stores and the mock gateway.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::Harness;
use staybook::config::EngineConfig;
use staybook::engine::{BookRequest, SettlementRequest};
use staybook::mocks::InMemoryWalletRepository;
use staybook::repositories::{BookingRepository, ListingRepository, RepoFuture, WalletRepository};
use staybook::types::{
    BookingStatus, Money, PaymentConfirmation, PaymentStatus, RefundStatus, ReservationId,
    RoomType, RoomTypes, StayDates, Transaction, TransactionKind, UserId, WalletAccount,
};
use staybook::BookingError;
use std::sync::Arc;
use std::time::Duration;

fn three_nights() -> StayDates {
    StayDates::parse("2025-03-01", "2025-03-04").unwrap()
}

async fn card_payment(h: &Harness, amount: Money) -> PaymentConfirmation {
    let order = h
        .engine
        .create_payment_order(amount, "rcpt_1".to_string())
        .await
        .unwrap();
    assert_eq!(order.amount, amount);
    h.gateway.confirm(&order.order_id)
}

fn book_request(
    user_id: UserId,
    listing_id: staybook::ListingId,
    guests: u32,
    wallet_deduction: Money,
    payment: Option<PaymentConfirmation>,
) -> BookRequest {
    BookRequest {
        user_id,
        listing_id,
        stay: three_nights(),
        guests,
        wallet_deduction,
        payment,
    }
}

// ========== Inventory ==========

#[tokio::test]
async fn reserve_then_restore_leaves_inventory_unchanged() {
    let h = Harness::new();
    let start = RoomTypes::new(2, 2, 2);
    let listing_id = h.listing(Some(start));

    for guests in 1..=5 {
        let reservation = h.engine.reserve(listing_id, guests).await.unwrap();
        assert_eq!(reservation.guests, guests);
        let remaining = h.engine.restore(listing_id, reservation.id).await.unwrap();
        assert_eq!(remaining, start, "guests = {guests}");
    }

    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(start));
    assert_eq!(listing.rooms, 6);
    assert_eq!(h.listings.holds(), 0);
}

#[tokio::test]
async fn a_hold_is_released_once() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 1, 1)));
    let reservation = h.engine.reserve(listing_id, 3).await.unwrap();

    h.engine.restore(listing_id, reservation.id).await.unwrap();
    let again = h.engine.restore(listing_id, reservation.id).await;
    let unknown = h.engine.restore(listing_id, ReservationId::new()).await;

    assert!(matches!(again, Err(BookingError::NotFound { resource: "reservation", .. })));
    assert!(matches!(unknown, Err(BookingError::NotFound { .. })));
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(1, 1, 1)));
}

#[tokio::test]
async fn four_guests_without_a_single_room_fail_naming_single() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(0, 1, 1)));

    let result = h.engine.reserve(listing_id, 4).await;

    assert_eq!(
        result,
        Err(BookingError::InsufficientInventory {
            missing: vec![RoomType::Single]
        })
    );
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(0, 1, 1)));
}

#[tokio::test]
async fn out_of_range_guest_counts_are_rejected() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(5, 5, 5)));

    for guests in [0, 6] {
        assert_eq!(
            h.engine.reserve(listing_id, guests).await,
            Err(BookingError::InvalidGuestCount { guests })
        );
    }
}

#[tokio::test]
async fn legacy_listing_is_not_allocatable() {
    let h = Harness::new();
    let listing_id = h.listing(None);

    let result = h.engine.reserve(listing_id, 1).await;

    assert_eq!(result, Err(BookingError::InventoryNotConfigured { listing_id }));
}

#[tokio::test]
async fn concurrent_reservations_for_the_last_double_room() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(0, 1, 0)));

    let (first, second) = tokio::join!(
        h.engine.reserve(listing_id, 2),
        h.engine.reserve(listing_id, 2),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(BookingError::InsufficientInventory { missing }) if missing == &vec![RoomType::Double]
    )));
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(0, 0, 0)));
    assert_eq!(listing.rooms, 0);
}

// ========== Settlement ==========

#[tokio::test]
async fn card_booking_settles_and_accrues_points() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 1, 1)));
    let user_id = h.guest(Money::ZERO, 0);
    let payment = card_payment(&h, Money::from_major(3150)).await;

    let settled = h
        .engine
        .book(book_request(user_id, listing_id, 2, Money::ZERO, Some(payment.clone())))
        .await
        .unwrap();

    assert_eq!(settled.pricing.total, Money::from_major(3150));
    assert_eq!(settled.pricing.service_fee, Money::from_major(150));
    assert_eq!(settled.points_earned, 310);
    assert_eq!(settled.booking.status, BookingStatus::Confirmed);
    assert_eq!(settled.booking.payment_status, PaymentStatus::Paid);
    assert_eq!(
        settled.booking.payment.as_ref().unwrap().payment_id,
        payment.payment_id
    );

    let stored = h.engine.booking(settled.booking.id).await.unwrap();
    assert_eq!(stored, settled.booking);
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(1, 0, 1)));

    let wallet = h.engine.wallet(user_id).await.unwrap();
    assert_eq!(wallet.reward_points, 310);
    let history = h.engine.transactions(user_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransactionKind::Earn);
    assert_eq!(history[0].amount, 310);
}

#[tokio::test]
async fn members_pay_no_service_fee() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 1, 1)));
    let user_id = h.member();
    let payment = card_payment(&h, Money::from_major(3000)).await;

    let settled = h
        .engine
        .book(book_request(user_id, listing_id, 2, Money::ZERO, Some(payment)))
        .await
        .unwrap();

    assert_eq!(settled.booking.service_fee, Money::ZERO);
    assert_eq!(settled.booking.total_amount, Money::from_major(3000));
}

#[tokio::test]
async fn settle_uses_an_earlier_reservation() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 1, 1)));
    let user_id = h.guest(Money::ZERO, 0);
    let reservation = h.engine.reserve(listing_id, 5).await.unwrap();
    let payment = card_payment(&h, Money::from_major(7875)).await;

    let settled = h
        .engine
        .settle(SettlementRequest {
            user_id,
            listing_id,
            stay: three_nights(),
            guests: 5,
            reservation_id: reservation.id,
            wallet_deduction: Money::ZERO,
            payment: Some(payment),
        })
        .await
        .unwrap();

    assert_eq!(settled.booking.room_allocation, reservation.allocation);
    assert_eq!(reservation.allocation.rooms(), RoomTypes::new(0, 1, 1));
    assert_eq!(h.listings.holds(), 0);
    // 3 nights × 1000 + 3 extra guests × 500 × 3 nights = 7500, plus 5% fee
    assert_eq!(settled.pricing.surcharge, Money::from_major(4500));
    assert_eq!(settled.pricing.total, Money::from_major(7875));
}

fn settle_request(
    user_id: UserId,
    listing_id: staybook::ListingId,
    guests: u32,
    reservation_id: ReservationId,
    payment: PaymentConfirmation,
) -> SettlementRequest {
    SettlementRequest {
        user_id,
        listing_id,
        stay: three_nights(),
        guests,
        reservation_id,
        wallet_deduction: Money::ZERO,
        payment: Some(payment),
    }
}

#[tokio::test]
async fn a_hold_settles_one_booking() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 1, 1)));
    let user_id = h.guest(Money::ZERO, 0);
    let reservation = h.engine.reserve(listing_id, 2).await.unwrap();
    let first = card_payment(&h, Money::from_major(3150)).await;
    let second = card_payment(&h, Money::from_major(3150)).await;

    h.engine
        .settle(settle_request(user_id, listing_id, 2, reservation.id, first))
        .await
        .unwrap();
    let again = h
        .engine
        .settle(settle_request(user_id, listing_id, 2, reservation.id, second))
        .await;

    assert!(matches!(again, Err(BookingError::NotFound { resource: "reservation", .. })));
    assert_eq!(h.bookings.len(), 1);
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(1, 0, 1)));
}

#[tokio::test]
async fn a_hold_for_fewer_guests_cannot_settle_a_larger_stay() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 1, 1)));
    let user_id = h.guest(Money::ZERO, 0);
    let reservation = h.engine.reserve(listing_id, 1).await.unwrap();
    let payment = card_payment(&h, Money::from_major(7875)).await;

    let result = h
        .engine
        .settle(settle_request(user_id, listing_id, 5, reservation.id, payment))
        .await;

    assert_eq!(
        result.map(|s| s.booking.id),
        Err(BookingError::ReservationMismatch {
            reservation_id: reservation.id
        })
    );
    assert!(h.bookings.is_empty());
    let remaining = h.engine.restore(listing_id, reservation.id).await.unwrap();
    assert_eq!(remaining, RoomTypes::new(1, 1, 1));
}

#[tokio::test]
async fn order_for_a_smaller_amount_is_rejected() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(0, 1, 0)));
    let user_id = h.guest(Money::ZERO, 0);
    let payment = card_payment(&h, Money::from_major(1)).await;

    let result = h
        .engine
        .book(book_request(user_id, listing_id, 2, Money::ZERO, Some(payment)))
        .await;

    assert_eq!(result.map(|s| s.booking.id), Err(BookingError::PaymentVerificationFailed));
    assert!(h.bookings.is_empty());
    assert_eq!(h.listings.holds(), 0);
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(0, 1, 0)));
}

#[tokio::test]
async fn one_payment_backs_one_booking() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(0, 2, 0)));
    let user_id = h.guest(Money::ZERO, 0);
    let payment = card_payment(&h, Money::from_major(3150)).await;

    h.engine
        .book(book_request(user_id, listing_id, 2, Money::ZERO, Some(payment.clone())))
        .await
        .unwrap();
    let replay = h
        .engine
        .book(book_request(user_id, listing_id, 2, Money::ZERO, Some(payment)))
        .await;

    assert_eq!(replay.map(|s| s.booking.id), Err(BookingError::PaymentVerificationFailed));
    assert_eq!(h.bookings.len(), 1);
    assert_eq!(h.listings.holds(), 0);
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(0, 1, 0)));
}

/// Wallet store whose point accrual is slow.
struct SlowAccrual {
    inner: InMemoryWalletRepository,
    delay: Duration,
}

impl WalletRepository for SlowAccrual {
    fn account(&self, user_id: UserId) -> RepoFuture<'_, WalletAccount> {
        self.inner.account(user_id)
    }

    fn debit_balance(
        &self,
        user_id: UserId,
        amount: Money,
        entry: Transaction,
    ) -> RepoFuture<'_, Money> {
        self.inner.debit_balance(user_id, amount, entry)
    }

    fn credit_points(
        &self,
        user_id: UserId,
        points: u64,
        entry: Transaction,
    ) -> RepoFuture<'_, u64> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.credit_points(user_id, points, entry).await
        })
    }

    fn redeem_points(
        &self,
        user_id: UserId,
        points: u64,
        credit: Money,
        entry: Transaction,
    ) -> RepoFuture<'_, WalletAccount> {
        self.inner.redeem_points(user_id, points, credit, entry)
    }

    fn transactions(&self, user_id: UserId) -> RepoFuture<'_, Vec<Transaction>> {
        self.inner.transactions(user_id)
    }
}

#[tokio::test]
async fn booking_that_outlives_the_request_keeps_its_rooms() {
    let config = EngineConfig {
        request_timeout_ms: 100,
        ..EngineConfig::default()
    };
    let h = Harness::with_wallet_store(config, |inner| {
        Arc::new(SlowAccrual {
            inner,
            delay: Duration::from_millis(400),
        })
    });
    let listing_id = h.listing(Some(RoomTypes::new(0, 1, 0)));
    let user_id = h.guest(Money::ZERO, 0);
    let payment = card_payment(&h, Money::from_major(3150)).await;

    let result = h
        .engine
        .book(book_request(user_id, listing_id, 2, Money::ZERO, Some(payment)))
        .await;
    assert!(matches!(result, Err(BookingError::Transient(_))));

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(h.bookings.len(), 1);
    assert_eq!(h.engine.wallet(user_id).await.unwrap().reward_points, 310);
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(0, 0, 0)));
    assert_eq!(listing.rooms, 0);
}

#[tokio::test]
async fn forged_signature_fails_and_returns_the_rooms() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(0, 1, 0)));
    let user_id = h.guest(Money::ZERO, 0);
    let mut payment = card_payment(&h, Money::from_major(3150)).await;
    payment.payment_id = "pay_someone_else".to_string();

    let result = h
        .engine
        .book(book_request(user_id, listing_id, 2, Money::ZERO, Some(payment)))
        .await;

    assert_eq!(result.map(|s| s.booking.id), Err(BookingError::PaymentVerificationFailed));
    assert!(h.bookings.is_empty());
    assert_eq!(h.listings.holds(), 0);
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(0, 1, 0)));
}

#[tokio::test]
async fn wallet_shortfall_deletes_the_booking_and_returns_the_rooms() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(0, 1, 0)));
    let user_id = h.guest(Money::from_major(100), 0);
    let payment = card_payment(&h, Money::from_major(2650)).await;

    let result = h
        .engine
        .book(book_request(
            user_id,
            listing_id,
            2,
            Money::from_major(500),
            Some(payment),
        ))
        .await;

    assert_eq!(
        result.map(|s| s.booking.id),
        Err(BookingError::InsufficientWalletBalance {
            available: Money::from_major(100),
            requested: Money::from_major(500),
        })
    );
    assert!(h.bookings.is_empty());
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(0, 1, 0)));
    let wallet = h.engine.wallet(user_id).await.unwrap();
    assert_eq!(wallet.wallet_balance, Money::from_major(100));
    assert_eq!(wallet.reward_points, 0);
    assert!(h.engine.transactions(user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn wallet_covering_the_total_needs_no_card_payment() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 1, 1)));
    let user_id = h.guest(Money::from_major(5000), 0);

    let settled = h
        .engine
        .book(book_request(
            user_id,
            listing_id,
            2,
            Money::from_major(5000),
            None,
        ))
        .await
        .unwrap();

    // Deduction is clamped to the total
    assert_eq!(settled.booking.wallet_deduction, Money::from_major(3150));
    assert!(settled.booking.payment.is_none());
    let wallet = h.engine.wallet(user_id).await.unwrap();
    assert_eq!(wallet.wallet_balance, Money::from_major(1850));
    assert_eq!(wallet.reward_points, 310);

    let spend = h
        .engine
        .transactions(user_id)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.kind == TransactionKind::Spend)
        .unwrap();
    assert_eq!(spend.amount, Money::from_major(3150).minor());
}

#[tokio::test]
async fn partial_wallet_payment_without_card_proof_is_rejected() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 1, 1)));
    let user_id = h.guest(Money::from_major(5000), 0);

    let result = h
        .engine
        .book(book_request(user_id, listing_id, 2, Money::from_major(1000), None))
        .await;

    assert_eq!(result.map(|s| s.booking.id), Err(BookingError::PaymentVerificationFailed));
    assert_eq!(
        h.engine.wallet(user_id).await.unwrap().wallet_balance,
        Money::from_major(5000)
    );
}

// ========== Cancellation ==========

#[tokio::test]
async fn cancel_refunds_the_card_portion_and_restores_rooms() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 1, 1)));
    let user_id = h.guest(Money::from_major(1000), 0);
    let payment = card_payment(&h, Money::from_major(5300)).await;
    let settled = h
        .engine
        .book(book_request(
            user_id,
            listing_id,
            4,
            Money::from_major(1000),
            Some(payment.clone()),
        ))
        .await
        .unwrap();
    assert_eq!(
        h.listings.listing(listing_id).await.unwrap().room_types,
        Some(RoomTypes::new(0, 1, 0))
    );

    let cancelled = h.engine.cancel(settled.booking.id, user_id).await.unwrap();

    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    assert!(matches!(cancelled.refund_status, RefundStatus::Succeeded { .. }));
    assert_eq!(cancelled.cancelled_by, Some(user_id));
    assert!(cancelled.cancelled_at.is_some());

    assert_eq!(settled.booking.gateway_amount(), Money::from_major(5300));
    assert_eq!(
        h.gateway.refunds(),
        vec![(payment.payment_id, Money::from_major(5300))]
    );

    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(1, 1, 1)));
    assert_eq!(listing.rooms, 3);
}

#[tokio::test]
async fn refund_failure_still_cancels_and_restores_rooms() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(0, 1, 0)));
    let user_id = h.guest(Money::ZERO, 0);
    let payment = card_payment(&h, Money::from_major(3150)).await;
    let settled = h
        .engine
        .book(book_request(user_id, listing_id, 2, Money::ZERO, Some(payment)))
        .await
        .unwrap();
    h.gateway.fail_next_refunds(10);

    let cancelled = h.engine.cancel(settled.booking.id, user_id).await.unwrap();

    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(matches!(cancelled.refund_status, RefundStatus::Failed { .. }));
    assert!(h.gateway.refunds().is_empty());
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(0, 1, 0)));

    let stored = h.bookings.booking(settled.booking.id).await.unwrap();
    assert_eq!(stored.refund_status, cancelled.refund_status);
}

#[tokio::test]
async fn wallet_only_booking_needs_no_refund() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 0, 0)));
    let user_id = h.guest(Money::from_major(2000), 0);
    let settled = h
        .engine
        .book(book_request(user_id, listing_id, 1, Money::from_major(2000), None))
        .await
        .unwrap();

    let cancelled = h.engine.cancel(settled.booking.id, user_id).await.unwrap();

    assert_eq!(cancelled.refund_status, RefundStatus::NotRequired);
    assert!(h.gateway.refunds().is_empty());
}

#[tokio::test]
async fn second_cancel_is_already_cancelled() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(0, 1, 0)));
    let user_id = h.guest(Money::ZERO, 0);
    let payment = card_payment(&h, Money::from_major(3150)).await;
    let settled = h
        .engine
        .book(book_request(user_id, listing_id, 2, Money::ZERO, Some(payment)))
        .await
        .unwrap();
    let booking_id = settled.booking.id;

    h.engine.cancel(booking_id, user_id).await.unwrap();
    let second = h.engine.cancel(booking_id, user_id).await;

    assert_eq!(second, Err(BookingError::AlreadyCancelled { booking_id }));
    assert_eq!(h.gateway.refunds().len(), 1);
    let listing = h.listings.listing(listing_id).await.unwrap();
    assert_eq!(listing.room_types, Some(RoomTypes::new(0, 1, 0)));
}

#[tokio::test]
async fn cancelling_an_unknown_booking_is_not_found() {
    let h = Harness::new();

    let result = h
        .engine
        .cancel(staybook::BookingId::new(), UserId::new())
        .await;

    assert!(matches!(result, Err(BookingError::NotFound { resource: "booking", .. })));
}

// ========== Wallet ==========

#[tokio::test]
async fn twenty_points_redeem_for_one_unit() {
    let h = Harness::new();
    let user_id = h.guest(Money::ZERO, 45);

    let redemption = h.engine.redeem_points(user_id, 20).await.unwrap();

    assert_eq!(redemption.credited, Money::from_major(1));
    assert_eq!(redemption.new_balance, Money::from_major(1));
    assert_eq!(redemption.remaining_points, 25);
    let history = h.engine.transactions(user_id).await.unwrap();
    assert_eq!(history[0].kind, TransactionKind::Redeem);
    assert_eq!(history[0].amount, 20);
}

#[tokio::test]
async fn redemption_limits_are_enforced() {
    let h = Harness::new();
    let user_id = h.guest(Money::ZERO, 30);

    assert_eq!(
        h.engine.redeem_points(user_id, 19).await,
        Err(BookingError::MinimumRedemptionNotMet {
            minimum: 20,
            requested: 19
        })
    );
    assert_eq!(
        h.engine.redeem_points(user_id, 40).await,
        Err(BookingError::InsufficientPoints {
            available: 30,
            requested: 40
        })
    );
    assert_eq!(h.engine.wallet(user_id).await.unwrap().reward_points, 30);
}

#[tokio::test]
async fn shutdown_refuses_new_commands() {
    let h = Harness::new();
    let listing_id = h.listing(Some(RoomTypes::new(1, 1, 1)));

    h.engine
        .shutdown(std::time::Duration::from_secs(1))
        .await
        .unwrap();

    assert!(matches!(
        h.engine.reserve(listing_id, 1).await,
        Err(BookingError::Transient(_))
    ));
}
