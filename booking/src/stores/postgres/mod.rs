//! `PostgreSQL` repositories.
//!
//! Every precondition-guarded mutation is a single conditional `UPDATE ...
//! WHERE <precondition> RETURNING ...`. When no row comes back, a follow-up
//! read decides which error to report; it never retries the write.
//! Wallet mutations and their transaction records share one database
//! transaction, as do room counts and the hold rows that account for them.

use crate::config::PostgresConfig;
use crate::error::BookingError;
use crate::repositories::{BookingRepository, ListingRepository, RepoFuture, WalletRepository};
use crate::types::{
    Allocation, Booking, BookingId, BookingStatus, Listing, ListingId, Money, PaymentReference,
    PaymentStatus, RefundStatus, Reservation, ReservationId, RoomType, RoomTypes, Transaction,
    TransactionId, TransactionKind, UserId, WalletAccount,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use std::time::Duration;

const SCHEMA: &str = include_str!("schema.sql");

const BOOKING_COLUMNS: &str = r"
    id, user_id, listing_id, check_in, check_out, guests, nights,
    total_amount, service_fee, wallet_deduction,
    alloc_single, alloc_double, alloc_triple,
    status, payment_status, refund_status, refund_detail,
    gateway_order_id, gateway_payment_id,
    created_at, cancelled_by, cancelled_at
";

const RESERVATION_COLUMNS: &str =
    "id, listing_id, guests, alloc_single, alloc_double, alloc_triple, created_at";

const PAYMENT_CONSTRAINTS: [&str; 2] = ["uq_bookings_gateway_order", "uq_bookings_gateway_payment"];

/// Listing, booking and wallet repositories over one connection pool.
#[derive(Clone, Debug)]
pub struct PostgresStores {
    pool: PgPool,
}

impl PostgresStores {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the pool settings from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Transient`] if the database is unreachable.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, BookingError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(db)?;

        tracing::info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Transient`] if a statement fails.
    pub async fn ensure_schema(&self) -> Result<(), BookingError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await.map_err(db)?;
        Ok(())
    }

    /// Insert or replace a listing (administrative seeding).
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Transient`] on database failure.
    pub async fn upsert_listing(&self, listing: &Listing) -> Result<(), BookingError> {
        let rooms = listing.room_types.map(counts).transpose()?;
        sqlx::query(
            r"
            INSERT INTO listings
                (id, title, nightly_rate, single_rooms, double_rooms, triple_rooms, rooms)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                nightly_rate = EXCLUDED.nightly_rate,
                single_rooms = EXCLUDED.single_rooms,
                double_rooms = EXCLUDED.double_rooms,
                triple_rooms = EXCLUDED.triple_rooms,
                rooms = EXCLUDED.rooms
            ",
        )
        .bind(*listing.id.as_uuid())
        .bind(&listing.title)
        .bind(to_i64(listing.nightly_rate.minor())?)
        .bind(rooms.map(|r| r.0))
        .bind(rooms.map(|r| r.1))
        .bind(rooms.map(|r| r.2))
        .bind(to_i32(listing.room_types.map_or(0, |r| r.total()))?)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    /// Insert or replace a wallet account (administrative seeding).
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Transient`] on database failure.
    pub async fn upsert_account(&self, account: &WalletAccount) -> Result<(), BookingError> {
        sqlx::query(
            r"
            INSERT INTO wallets
                (user_id, wallet_balance, reward_points, is_member, membership_expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                wallet_balance = EXCLUDED.wallet_balance,
                reward_points = EXCLUDED.reward_points,
                is_member = EXCLUDED.is_member,
                membership_expires_at = EXCLUDED.membership_expires_at
            ",
        )
        .bind(*account.user_id.as_uuid())
        .bind(to_i64(account.wallet_balance.minor())?)
        .bind(to_i64(account.reward_points)?)
        .bind(account.is_member)
        .bind(account.membership_expires_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn fetch_listing(&self, listing_id: ListingId) -> Result<Listing, BookingError> {
        let row = sqlx::query(
            r"
            SELECT id, title, nightly_rate, single_rooms, double_rooms, triple_rooms, rooms
            FROM listings
            WHERE id = $1
            ",
        )
        .bind(*listing_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .ok_or_else(|| BookingError::not_found("listing", listing_id))?;

        row_to_listing(&row)
    }

    async fn fetch_booking(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
            .bind(*booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or_else(|| BookingError::not_found("booking", booking_id))?;

        row_to_booking(&row)
    }

    async fn fetch_account<'e, E>(
        executor: E,
        user_id: UserId,
    ) -> Result<WalletAccount, BookingError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query(
            r"
            SELECT user_id, wallet_balance, reward_points, is_member, membership_expires_at
            FROM wallets
            WHERE user_id = $1
            ",
        )
        .bind(*user_id.as_uuid())
        .fetch_optional(executor)
        .await
        .map_err(db)?
        .ok_or_else(|| BookingError::not_found("wallet", user_id))?;

        row_to_account(&row)
    }

    /// Error for a room update the guard refused
    async fn refusal(&self, listing_id: ListingId, rooms: RoomTypes) -> BookingError {
        // NULL breakdowns make the guard unknown, so legacy listings land here too
        match self.fetch_listing(listing_id).await {
            Err(error) => error,
            Ok(Listing {
                room_types: None, ..
            }) => BookingError::InventoryNotConfigured { listing_id },
            Ok(Listing {
                room_types: Some(available),
                ..
            }) => shortage(&available, &rooms),
        }
    }
}

/// Add `sign * rooms` to a listing iff no count goes negative.
///
/// `None` when the guard refused the update.
async fn adjust_rooms<'e, E>(
    executor: E,
    listing_id: ListingId,
    rooms: RoomTypes,
    sign: i32,
) -> Result<Option<RoomTypes>, BookingError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let (single, double, triple) = counts(rooms)?;
    let row = sqlx::query(
        r"
        UPDATE listings SET
            single_rooms = single_rooms + $2 * $3,
            double_rooms = double_rooms + $2 * $4,
            triple_rooms = triple_rooms + $2 * $5,
            rooms = (single_rooms + $2 * $3)
                + (double_rooms + $2 * $4)
                + (triple_rooms + $2 * $5)
        WHERE id = $1
          AND single_rooms + $2 * $3 >= 0
          AND double_rooms + $2 * $4 >= 0
          AND triple_rooms + $2 * $5 >= 0
        RETURNING single_rooms, double_rooms, triple_rooms
        ",
    )
    .bind(*listing_id.as_uuid())
    .bind(sign)
    .bind(single)
    .bind(double)
    .bind(triple)
    .fetch_optional(executor)
    .await
    .map_err(db)?;

    row.map(|row| {
        Ok(RoomTypes::new(
            to_u32(row.get("single_rooms"))?,
            to_u32(row.get("double_rooms"))?,
            to_u32(row.get("triple_rooms"))?,
        ))
    })
    .transpose()
}

/// Shortage reported for a refused reservation.
///
/// A concurrent restore can refill the listing between the refused update
/// and the follow-up read; every requested type is then named.
fn shortage(available: &RoomTypes, required: &RoomTypes) -> BookingError {
    let mut missing = available.shortfall(required);
    if missing.is_empty() {
        missing = RoomType::ALL
            .into_iter()
            .filter(|room_type| required.get(*room_type) > 0)
            .collect();
    }
    BookingError::InsufficientInventory { missing }
}

impl ListingRepository for PostgresStores {
    fn listing(&self, listing_id: ListingId) -> RepoFuture<'_, Listing> {
        Box::pin(self.fetch_listing(listing_id))
    }

    fn reserve_rooms(&self, reservation: Reservation) -> RepoFuture<'_, RoomTypes> {
        Box::pin(async move {
            let listing_id = reservation.listing_id;
            let rooms = reservation.allocation.rooms();
            let mut tx = self.pool.begin().await.map_err(db)?;

            let Some(remaining) = adjust_rooms(&mut *tx, listing_id, rooms, -1).await? else {
                tx.rollback().await.map_err(db)?;
                return Err(self.refusal(listing_id, rooms).await);
            };

            let (single, double, triple) = counts(rooms)?;
            sqlx::query(&format!(
                "INSERT INTO reservations ({RESERVATION_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)"
            ))
            .bind(*reservation.id.as_uuid())
            .bind(*listing_id.as_uuid())
            .bind(to_i32(reservation.guests)?)
            .bind(single)
            .bind(double)
            .bind(triple)
            .bind(reservation.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

            tx.commit().await.map_err(db)?;
            Ok(remaining)
        })
    }

    fn release_reservation(
        &self,
        listing_id: ListingId,
        reservation_id: ReservationId,
    ) -> RepoFuture<'_, RoomTypes> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db)?;

            let row = sqlx::query(&format!(
                "DELETE FROM reservations WHERE id = $1 AND listing_id = $2 \
                 RETURNING {RESERVATION_COLUMNS}"
            ))
            .bind(*reservation_id.as_uuid())
            .bind(*listing_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
            .ok_or_else(|| BookingError::not_found("reservation", reservation_id))?;
            let rooms = row_to_reservation(&row)?.allocation.rooms();

            let Some(remaining) = adjust_rooms(&mut *tx, listing_id, rooms, 1).await? else {
                tx.rollback().await.map_err(db)?;
                return Err(self.refusal(listing_id, rooms).await);
            };

            tx.commit().await.map_err(db)?;
            Ok(remaining)
        })
    }

    fn consume_reservation(
        &self,
        reservation_id: ReservationId,
        listing_id: ListingId,
        guests: u32,
    ) -> RepoFuture<'_, Reservation> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "DELETE FROM reservations WHERE id = $1 AND listing_id = $2 AND guests = $3 \
                 RETURNING {RESERVATION_COLUMNS}"
            ))
            .bind(*reservation_id.as_uuid())
            .bind(*listing_id.as_uuid())
            .bind(to_i32(guests)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

            if let Some(row) = row {
                return row_to_reservation(&row);
            }

            let held = sqlx::query("SELECT 1 FROM reservations WHERE id = $1")
                .bind(*reservation_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;
            Err(match held {
                Some(_) => BookingError::ReservationMismatch { reservation_id },
                None => BookingError::not_found("reservation", reservation_id),
            })
        })
    }

    fn restore_rooms(
        &self,
        listing_id: ListingId,
        allocation: Allocation,
    ) -> RepoFuture<'_, RoomTypes> {
        Box::pin(async move {
            let rooms = allocation.rooms();
            match adjust_rooms(&self.pool, listing_id, rooms, 1).await? {
                Some(remaining) => Ok(remaining),
                None => Err(self.refusal(listing_id, rooms).await),
            }
        })
    }
}

impl BookingRepository for PostgresStores {
    fn insert(&self, booking: Booking) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let alloc = counts(booking.room_allocation.rooms())?;
            sqlx::query(&format!(
                "INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES \
                 ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, \
                  $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)"
            ))
            .bind(*booking.id.as_uuid())
            .bind(*booking.user_id.as_uuid())
            .bind(*booking.listing_id.as_uuid())
            .bind(booking.check_in)
            .bind(booking.check_out)
            .bind(to_i32(booking.guests)?)
            .bind(to_i32(booking.nights)?)
            .bind(to_i64(booking.total_amount.minor())?)
            .bind(to_i64(booking.service_fee.minor())?)
            .bind(to_i64(booking.wallet_deduction.minor())?)
            .bind(alloc.0)
            .bind(alloc.1)
            .bind(alloc.2)
            .bind(booking.status.as_str())
            .bind(booking.payment_status.as_str())
            .bind(booking.refund_status.as_str())
            .bind(booking.refund_status.detail())
            .bind(booking.payment.as_ref().map(|p| p.order_id.as_str()))
            .bind(booking.payment.as_ref().map(|p| p.payment_id.as_str()))
            .bind(booking.created_at)
            .bind(booking.cancelled_by.map(|u| *u.as_uuid()))
            .bind(booking.cancelled_at)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                if reused_payment(&error) {
                    tracing::warn!(booking_id = %booking.id, "Gateway payment already used");
                    BookingError::PaymentVerificationFailed
                } else {
                    db(error)
                }
            })?;
            Ok(())
        })
    }

    fn booking(&self, booking_id: BookingId) -> RepoFuture<'_, Booking> {
        Box::pin(self.fetch_booking(booking_id))
    }

    fn delete(&self, booking_id: BookingId) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM bookings WHERE id = $1")
                .bind(*booking_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(db)?;
            Ok(())
        })
    }

    fn claim_cancellation(
        &self,
        booking_id: BookingId,
        cancelled_by: UserId,
        cancelled_at: DateTime<Utc>,
    ) -> RepoFuture<'_, Booking> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE bookings SET status = 'cancelled', cancelled_by = $2, cancelled_at = $3 \
                 WHERE id = $1 AND status = 'confirmed' RETURNING {BOOKING_COLUMNS}"
            ))
            .bind(*booking_id.as_uuid())
            .bind(*cancelled_by.as_uuid())
            .bind(cancelled_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

            match row {
                Some(row) => row_to_booking(&row),
                None => {
                    self.fetch_booking(booking_id).await?;
                    Err(BookingError::AlreadyCancelled { booking_id })
                }
            }
        })
    }

    fn record_refund(
        &self,
        booking_id: BookingId,
        refund: RefundStatus,
    ) -> RepoFuture<'_, Booking> {
        Box::pin(async move {
            sqlx::query(&format!(
                "UPDATE bookings SET payment_status = 'refunded', \
                 refund_status = $2, refund_detail = $3 \
                 WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
            ))
            .bind(*booking_id.as_uuid())
            .bind(refund.as_str())
            .bind(refund.detail())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or_else(|| BookingError::not_found("booking", booking_id))
            .and_then(|row| row_to_booking(&row))
        })
    }
}

impl WalletRepository for PostgresStores {
    fn account(&self, user_id: UserId) -> RepoFuture<'_, WalletAccount> {
        Box::pin(Self::fetch_account(&self.pool, user_id))
    }

    fn debit_balance(
        &self,
        user_id: UserId,
        amount: Money,
        entry: Transaction,
    ) -> RepoFuture<'_, Money> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db)?;

            let row = sqlx::query(
                r"
                UPDATE wallets SET wallet_balance = wallet_balance - $2
                WHERE user_id = $1 AND wallet_balance >= $2
                RETURNING wallet_balance
                ",
            )
            .bind(*user_id.as_uuid())
            .bind(to_i64(amount.minor())?)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?;

            let Some(row) = row else {
                let account = Self::fetch_account(&mut *tx, user_id).await?;
                return Err(BookingError::InsufficientWalletBalance {
                    available: account.wallet_balance,
                    requested: amount,
                });
            };

            insert_transaction(&mut tx, &entry).await?;
            tx.commit().await.map_err(db)?;
            Ok(Money::from_minor(to_u64(row.get("wallet_balance"))?))
        })
    }

    fn credit_points(
        &self,
        user_id: UserId,
        points: u64,
        entry: Transaction,
    ) -> RepoFuture<'_, u64> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db)?;

            let row = sqlx::query(
                r"
                UPDATE wallets SET reward_points = reward_points + $2
                WHERE user_id = $1
                RETURNING reward_points
                ",
            )
            .bind(*user_id.as_uuid())
            .bind(to_i64(points)?)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
            .ok_or_else(|| BookingError::not_found("wallet", user_id))?;

            insert_transaction(&mut tx, &entry).await?;
            tx.commit().await.map_err(db)?;
            to_u64(row.get("reward_points"))
        })
    }

    fn redeem_points(
        &self,
        user_id: UserId,
        points: u64,
        credit: Money,
        entry: Transaction,
    ) -> RepoFuture<'_, WalletAccount> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db)?;

            let row = sqlx::query(
                r"
                UPDATE wallets SET
                    reward_points = reward_points - $2,
                    wallet_balance = wallet_balance + $3
                WHERE user_id = $1 AND reward_points >= $2
                RETURNING user_id, wallet_balance, reward_points, is_member, membership_expires_at
                ",
            )
            .bind(*user_id.as_uuid())
            .bind(to_i64(points)?)
            .bind(to_i64(credit.minor())?)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?;

            let Some(row) = row else {
                let account = Self::fetch_account(&mut *tx, user_id).await?;
                return Err(BookingError::InsufficientPoints {
                    available: account.reward_points,
                    requested: points,
                });
            };

            insert_transaction(&mut tx, &entry).await?;
            tx.commit().await.map_err(db)?;
            row_to_account(&row)
        })
    }

    fn transactions(&self, user_id: UserId) -> RepoFuture<'_, Vec<Transaction>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, user_id, kind, amount, description, created_at
                FROM wallet_transactions
                WHERE user_id = $1
                ORDER BY seq DESC
                ",
            )
            .bind(*user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

            rows.iter().map(row_to_transaction).collect()
        })
    }
}

async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    entry: &Transaction,
) -> Result<(), BookingError> {
    sqlx::query(
        r"
        INSERT INTO wallet_transactions (id, user_id, kind, amount, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(*entry.id.as_uuid())
    .bind(*entry.user_id.as_uuid())
    .bind(entry.kind.as_str())
    .bind(to_i64(entry.amount)?)
    .bind(&entry.description)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await
    .map_err(db)?;
    Ok(())
}

// ============================================================================
// Row mapping
// ============================================================================

fn row_to_listing(row: &PgRow) -> Result<Listing, BookingError> {
    let single: Option<i32> = row.get("single_rooms");
    let double: Option<i32> = row.get("double_rooms");
    let triple: Option<i32> = row.get("triple_rooms");

    let room_types = match (single, double, triple) {
        (Some(s), Some(d), Some(t)) => Some(RoomTypes::new(to_u32(s)?, to_u32(d)?, to_u32(t)?)),
        _ => None,
    };

    Ok(Listing {
        id: ListingId::from_uuid(row.get("id")),
        title: row.get("title"),
        nightly_rate: Money::from_minor(to_u64(row.get("nightly_rate"))?),
        room_types,
        rooms: to_u32(row.get("rooms"))?,
    })
}

fn row_to_booking(row: &PgRow) -> Result<Booking, BookingError> {
    let order_id: Option<String> = row.get("gateway_order_id");
    let payment_id: Option<String> = row.get("gateway_payment_id");
    let cancelled_by: Option<uuid::Uuid> = row.get("cancelled_by");

    Ok(Booking {
        id: BookingId::from_uuid(row.get("id")),
        user_id: UserId::from_uuid(row.get("user_id")),
        listing_id: ListingId::from_uuid(row.get("listing_id")),
        check_in: row.get("check_in"),
        check_out: row.get("check_out"),
        guests: to_u32(row.get("guests"))?,
        nights: to_u32(row.get("nights"))?,
        total_amount: Money::from_minor(to_u64(row.get("total_amount"))?),
        service_fee: Money::from_minor(to_u64(row.get("service_fee"))?),
        wallet_deduction: Money::from_minor(to_u64(row.get("wallet_deduction"))?),
        room_allocation: allocation_columns(row)?,
        status: parse_booking_status(row.get("status"))?,
        payment_status: parse_payment_status(row.get("payment_status"))?,
        refund_status: parse_refund_status(row.get("refund_status"), row.get("refund_detail"))?,
        payment: order_id
            .zip(payment_id)
            .map(|(order_id, payment_id)| PaymentReference {
                order_id,
                payment_id,
            }),
        created_at: row.get("created_at"),
        cancelled_by: cancelled_by.map(UserId::from_uuid),
        cancelled_at: row.get("cancelled_at"),
    })
}

fn row_to_reservation(row: &PgRow) -> Result<Reservation, BookingError> {
    Ok(Reservation {
        id: ReservationId::from_uuid(row.get("id")),
        listing_id: ListingId::from_uuid(row.get("listing_id")),
        guests: to_u32(row.get("guests"))?,
        allocation: allocation_columns(row)?,
        created_at: row.get("created_at"),
    })
}

fn allocation_columns(row: &PgRow) -> Result<Allocation, BookingError> {
    Ok(Allocation::new(RoomTypes::new(
        to_u32(row.get("alloc_single"))?,
        to_u32(row.get("alloc_double"))?,
        to_u32(row.get("alloc_triple"))?,
    )))
}

fn row_to_account(row: &PgRow) -> Result<WalletAccount, BookingError> {
    Ok(WalletAccount {
        user_id: UserId::from_uuid(row.get("user_id")),
        wallet_balance: Money::from_minor(to_u64(row.get("wallet_balance"))?),
        reward_points: to_u64(row.get("reward_points"))?,
        is_member: row.get("is_member"),
        membership_expires_at: row.get("membership_expires_at"),
    })
}

fn row_to_transaction(row: &PgRow) -> Result<Transaction, BookingError> {
    let kind = match row.get::<&str, _>("kind") {
        "earn" => TransactionKind::Earn,
        "spend" => TransactionKind::Spend,
        "redeem" => TransactionKind::Redeem,
        other => return Err(corrupt("transaction kind", other)),
    };

    Ok(Transaction {
        id: TransactionId::from_uuid(row.get("id")),
        user_id: UserId::from_uuid(row.get("user_id")),
        kind,
        amount: to_u64(row.get("amount"))?,
        description: row.get("description"),
        created_at: row.get("created_at"),
    })
}

fn parse_booking_status(raw: &str) -> Result<BookingStatus, BookingError> {
    match raw {
        "confirmed" => Ok(BookingStatus::Confirmed),
        "cancelled" => Ok(BookingStatus::Cancelled),
        other => Err(corrupt("booking status", other)),
    }
}

fn parse_payment_status(raw: &str) -> Result<PaymentStatus, BookingError> {
    match raw {
        "pending" => Ok(PaymentStatus::Pending),
        "paid" => Ok(PaymentStatus::Paid),
        "refunded" => Ok(PaymentStatus::Refunded),
        other => Err(corrupt("payment status", other)),
    }
}

fn parse_refund_status(raw: &str, detail: Option<String>) -> Result<RefundStatus, BookingError> {
    match raw {
        "not_required" => Ok(RefundStatus::NotRequired),
        "succeeded" => Ok(RefundStatus::Succeeded {
            refund_id: detail.unwrap_or_default(),
        }),
        "failed" => Ok(RefundStatus::Failed {
            reason: detail.unwrap_or_default(),
        }),
        other => Err(corrupt("refund status", other)),
    }
}

// ============================================================================
// Conversions
// ============================================================================

fn db(error: sqlx::Error) -> BookingError {
    tracing::error!(error = %error, "Database operation failed");
    metrics::counter!("staybook.postgres.errors").increment(1);
    BookingError::transient(error)
}

fn reused_payment(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(e) if e.constraint().is_some_and(|c| PAYMENT_CONSTRAINTS.contains(&c))
    )
}

fn corrupt(what: &str, value: &str) -> BookingError {
    BookingError::transient(format!("unexpected {what} '{value}' in database"))
}

fn counts(rooms: RoomTypes) -> Result<(i32, i32, i32), BookingError> {
    Ok((to_i32(rooms.single)?, to_i32(rooms.double)?, to_i32(rooms.triple)?))
}

fn to_i32(value: u32) -> Result<i32, BookingError> {
    i32::try_from(value).map_err(|_| BookingError::AmountOutOfRange)
}

fn to_i64(value: u64) -> Result<i64, BookingError> {
    i64::try_from(value).map_err(|_| BookingError::AmountOutOfRange)
}

fn to_u32(value: i32) -> Result<u32, BookingError> {
    u32::try_from(value).map_err(|_| corrupt("count", &value.to_string()))
}

fn to_u64(value: i64) -> Result<u64, BookingError> {
    u64::try_from(value).map_err(|_| corrupt("amount", &value.to_string()))
}
