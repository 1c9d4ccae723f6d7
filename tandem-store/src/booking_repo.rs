use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use tandem_domain::booking::{Booking, BookingStatus, PaymentState};
use tandem_domain::repository::{BookingStore, RescheduleUpdate, StoreError, StoreResult};
use tandem_domain::slot::{SlotKey, SlotReservation, SlotState};

pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    learner_id: Uuid,
    instructor_id: Uuid,
    scheduled_start: DateTime<Utc>,
    duration_hours: i32,
    slot_key: String,
    status: String,
    payment_status: String,
    price_cents: i64,
    deposit_cents: i64,
    remaining_cents: i64,
    reschedule_count: i32,
    package_hours: Option<i32>,
    actual_duration_hours: Option<i32>,
    created_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<Uuid>,
    cancel_reason: Option<String>,
}

impl BookingRow {
    fn into_booking(self) -> StoreResult<Booking> {
        Ok(Booking {
            id: self.id,
            learner_id: self.learner_id,
            instructor_id: self.instructor_id,
            scheduled_start: self.scheduled_start,
            duration_hours: self.duration_hours,
            slot_key: SlotKey(self.slot_key),
            status: parse_status(&self.status)?,
            payment_status: parse_payment(&self.payment_status)?,
            price_cents: self.price_cents,
            deposit_cents: self.deposit_cents,
            remaining_cents: self.remaining_cents,
            reschedule_count: self.reschedule_count,
            package_hours: self.package_hours,
            actual_duration_hours: self.actual_duration_hours,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            cancelled_by: self.cancelled_by,
            cancel_reason: self.cancel_reason,
        })
    }
}

fn parse_status(s: &str) -> StoreResult<BookingStatus> {
    match s {
        "REQUESTED" => Ok(BookingStatus::Requested),
        "CONFIRMED" => Ok(BookingStatus::Confirmed),
        "COMPLETED" => Ok(BookingStatus::Completed),
        "CANCELLED" => Ok(BookingStatus::Cancelled),
        other => Err(StoreError::Backend(format!("unknown booking status {other}"))),
    }
}

fn parse_payment(s: &str) -> StoreResult<PaymentState> {
    match s {
        "UNPAID" => Ok(PaymentState::Unpaid),
        "DEPOSIT_PAID" => Ok(PaymentState::DepositPaid),
        "FULLY_PAID" => Ok(PaymentState::FullyPaid),
        "REFUNDED" => Ok(PaymentState::Refunded),
        other => Err(StoreError::Backend(format!("unknown payment state {other}"))),
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

const SELECT_BOOKING: &str = "SELECT id, learner_id, instructor_id, scheduled_start, \
     duration_hours, slot_key, status, payment_status, price_cents, deposit_cents, \
     remaining_cents, reschedule_count, package_hours, actual_duration_hours, created_at, \
     confirmed_at, completed_at, cancelled_at, cancelled_by, cancel_reason \
     FROM bookings WHERE id = $1";

/// Conditional reservation write: take the key when it is absent or released.
/// Zero rows affected means the slot is held by a live booking.
const RESERVE_SLOT: &str = "INSERT INTO slot_reservations \
     (instructor_id, slot_key, booking_id, state, updated_at) \
     VALUES ($1, $2, $3, 'RESERVED', $4) \
     ON CONFLICT (instructor_id, slot_key) DO UPDATE \
     SET booking_id = EXCLUDED.booking_id, state = 'RESERVED', updated_at = EXCLUDED.updated_at \
     WHERE slot_reservations.state = 'RELEASED'";

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn create_with_reservation(&self, booking: &Booking) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let reserved = sqlx::query(RESERVE_SLOT)
            .bind(booking.instructor_id)
            .bind(booking.slot_key.as_str())
            .bind(booking.id)
            .bind(booking.created_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if reserved.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "slot {} already reserved",
                booking.slot_key
            )));
        }

        sqlx::query(
            "INSERT INTO bookings (id, learner_id, instructor_id, scheduled_start, \
             duration_hours, slot_key, status, payment_status, price_cents, deposit_cents, \
             remaining_cents, reschedule_count, package_hours, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(booking.id)
        .bind(booking.learner_id)
        .bind(booking.instructor_id)
        .bind(booking.scheduled_start)
        .bind(booking.duration_hours)
        .bind(booking.slot_key.as_str())
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.price_cents)
        .bind(booking.deposit_cents)
        .bind(booking.remaining_cents)
        .bind(booking.reschedule_count)
        .bind(booking.package_hours)
        .bind(booking.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(SELECT_BOOKING)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(BookingRow::into_booking).transpose()
    }

    async fn confirm(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE bookings SET status = 'CONFIRMED', confirmed_at = $2 \
             WHERE id = $1 AND status = 'REQUESTED'",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        actual_duration_hours: i32,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE bookings SET status = 'COMPLETED', completed_at = $2, \
             actual_duration_hours = $3 \
             WHERE id = $1 AND status = 'CONFIRMED'",
        )
        .bind(id)
        .bind(at)
        .bind(actual_duration_hours)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel_and_release(
        &self,
        id: Uuid,
        cancelled_by: Option<Uuid>,
        reason: &str,
        at: DateTime<Utc>,
        from: &[BookingStatus],
    ) -> StoreResult<bool> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let cancelled = sqlx::query(
            "UPDATE bookings SET status = 'CANCELLED', cancelled_at = $2, \
             cancelled_by = $3, cancel_reason = $4 \
             WHERE id = $1 AND status = ANY($5) \
             RETURNING instructor_id, slot_key",
        )
        .bind(id)
        .bind(at)
        .bind(cancelled_by)
        .bind(reason)
        .bind(&from)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let row = match cancelled {
            Some(row) => row,
            None => return Ok(false),
        };
        let instructor_id: Uuid = row.try_get("instructor_id").map_err(backend)?;
        let slot_key: String = row.try_get("slot_key").map_err(backend)?;

        sqlx::query(
            "UPDATE slot_reservations SET state = 'RELEASED', updated_at = $3 \
             WHERE instructor_id = $1 AND slot_key = $2 AND booking_id = $4",
        )
        .bind(instructor_id)
        .bind(&slot_key)
        .bind(at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn apply_reschedule(
        &self,
        id: Uuid,
        old_slot_key: &SlotKey,
        update: &RescheduleUpdate,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let now = Utc::now();

        let current = sqlx::query(
            "SELECT instructor_id FROM bookings \
             WHERE id = $1 AND status IN ('REQUESTED', 'CONFIRMED') FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;
        let instructor_id: Uuid = match current {
            Some(row) => row.try_get("instructor_id").map_err(backend)?,
            None => return Ok(false),
        };

        let reserved = sqlx::query(RESERVE_SLOT)
            .bind(instructor_id)
            .bind(update.new_slot_key.as_str())
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if reserved.rows_affected() == 0 {
            // Transaction rolls back on drop; the booking stays untouched.
            return Err(StoreError::Conflict(format!(
                "slot {} already reserved",
                update.new_slot_key
            )));
        }

        sqlx::query(
            "UPDATE bookings SET scheduled_start = $2, duration_hours = $3, slot_key = $4, \
             price_cents = $5, remaining_cents = $6, reschedule_count = reschedule_count + 1 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.new_start)
        .bind(update.new_duration_hours)
        .bind(update.new_slot_key.as_str())
        .bind(update.new_price_cents)
        .bind(update.new_remaining_cents)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query(
            "UPDATE slot_reservations SET state = 'RELEASED', updated_at = $3 \
             WHERE instructor_id = $1 AND slot_key = $2 AND booking_id = $4",
        )
        .bind(instructor_id)
        .bind(old_slot_key.as_str())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn set_payment_state(&self, id: Uuid, state: PaymentState) -> StoreResult<()> {
        let result = sqlx::query("UPDATE bookings SET payment_status = $2 WHERE id = $1")
            .bind(id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get_reservation(
        &self,
        instructor_id: Uuid,
        slot_key: &SlotKey,
    ) -> StoreResult<Option<SlotReservation>> {
        let row = sqlx::query(
            "SELECT booking_id, state, updated_at FROM slot_reservations \
             WHERE instructor_id = $1 AND slot_key = $2",
        )
        .bind(instructor_id)
        .bind(slot_key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|row| {
            let state: String = row.try_get("state").map_err(backend)?;
            Ok(SlotReservation {
                instructor_id,
                slot_key: slot_key.clone(),
                booking_id: row.try_get("booking_id").map_err(backend)?,
                state: match state.as_str() {
                    "RESERVED" => SlotState::Reserved,
                    "RELEASED" => SlotState::Released,
                    other => {
                        return Err(StoreError::Backend(format!("unknown slot state {other}")))
                    }
                },
                updated_at: row.try_get("updated_at").map_err(backend)?,
            })
        })
        .transpose()
    }
}
