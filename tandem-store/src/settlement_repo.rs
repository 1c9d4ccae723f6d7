use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use tandem_core::money::Cents;
use tandem_core::payment::ChargeStatus;
use tandem_domain::repository::{SettlementStore, StoreError, StoreResult};
use tandem_domain::settlement::{
    ChargeKind, PaymentRecord, RefundRecord, SettlementRecord, SettlementState,
};

pub struct PgSettlementStore {
    pool: PgPool,
}

impl PgSettlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SettlementRow {
    booking_id: Uuid,
    instructor_id: Uuid,
    total_cents: i64,
    platform_fee_bps: i32,
    platform_fee_cents: i64,
    instructor_cents: i64,
    hold_until: DateTime<Utc>,
    state: String,
    created_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
}

impl SettlementRow {
    fn into_record(self) -> StoreResult<SettlementRecord> {
        Ok(SettlementRecord {
            booking_id: self.booking_id,
            instructor_id: self.instructor_id,
            total_cents: self.total_cents,
            platform_fee_bps: self.platform_fee_bps as u32,
            platform_fee_cents: self.platform_fee_cents,
            instructor_cents: self.instructor_cents,
            hold_until: self.hold_until,
            state: parse_settlement_state(&self.state)?,
            created_at: self.created_at,
            released_at: self.released_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    intent_id: String,
    booking_id: Uuid,
    kind: String,
    seq: i32,
    amount_cents: i64,
    method: String,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl PaymentRow {
    fn into_record(self) -> StoreResult<PaymentRecord> {
        Ok(PaymentRecord {
            intent_id: self.intent_id,
            booking_id: self.booking_id,
            kind: parse_kind(&self.kind)?,
            seq: self.seq,
            amount_cents: self.amount_cents,
            method: self.method,
            status: parse_charge_status(&self.status)?,
            expires_at: self.expires_at,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
        })
    }
}

fn parse_settlement_state(s: &str) -> StoreResult<SettlementState> {
    match s {
        "HELD" => Ok(SettlementState::Held),
        "RELEASED" => Ok(SettlementState::Released),
        "REVERSED" => Ok(SettlementState::Reversed),
        other => Err(StoreError::Backend(format!(
            "unknown settlement state {other}"
        ))),
    }
}

fn settlement_state_str(s: SettlementState) -> &'static str {
    match s {
        SettlementState::Held => "HELD",
        SettlementState::Released => "RELEASED",
        SettlementState::Reversed => "REVERSED",
    }
}

fn parse_kind(s: &str) -> StoreResult<ChargeKind> {
    match s {
        "DEPOSIT" => Ok(ChargeKind::Deposit),
        "REMAINDER" => Ok(ChargeKind::Remainder),
        "RESCHEDULE_FEE" => Ok(ChargeKind::RescheduleFee),
        other => Err(StoreError::Backend(format!("unknown charge kind {other}"))),
    }
}

fn parse_charge_status(s: &str) -> StoreResult<ChargeStatus> {
    match s {
        "PENDING" => Ok(ChargeStatus::Pending),
        "APPROVED" => Ok(ChargeStatus::Approved),
        "REJECTED" => Ok(ChargeStatus::Rejected),
        "EXPIRED" => Ok(ChargeStatus::Expired),
        other => Err(StoreError::Backend(format!("unknown charge status {other}"))),
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

const SELECT_PAYMENT: &str = "SELECT intent_id, booking_id, kind, seq, amount_cents, method, \
     status, expires_at, created_at, resolved_at FROM payments";

#[async_trait]
impl SettlementStore for PgSettlementStore {
    async fn insert(&self, record: &SettlementRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO settlement_records (booking_id, instructor_id, total_cents, \
             platform_fee_bps, platform_fee_cents, instructor_cents, hold_until, state, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (booking_id) DO NOTHING",
        )
        .bind(record.booking_id)
        .bind(record.instructor_id)
        .bind(record.total_cents)
        .bind(record.platform_fee_bps as i32)
        .bind(record.platform_fee_cents)
        .bind(record.instructor_cents)
        .bind(record.hold_until)
        .bind(settlement_state_str(record.state))
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, booking_id: Uuid) -> StoreResult<Option<SettlementRecord>> {
        let row = sqlx::query_as::<_, SettlementRow>(
            "SELECT booking_id, instructor_id, total_cents, platform_fee_bps, \
             platform_fee_cents, instructor_cents, hold_until, state, created_at, released_at \
             FROM settlement_records WHERE booking_id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(SettlementRow::into_record).transpose()
    }

    async fn mark_released(&self, booking_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE settlement_records SET state = 'RELEASED', released_at = $2 \
             WHERE booking_id = $1 AND state = 'HELD'",
        )
        .bind(booking_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_reversed(&self, booking_id: Uuid, _at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE settlement_records SET state = 'REVERSED' \
             WHERE booking_id = $1 AND state = 'HELD'",
        )
        .bind(booking_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_payment(&self, payment: &PaymentRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO payments (intent_id, booking_id, kind, seq, amount_cents, method, \
             status, expires_at, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&payment.intent_id)
        .bind(payment.booking_id)
        .bind(payment.kind.as_str())
        .bind(payment.seq)
        .bind(payment.amount_cents)
        .bind(&payment.method)
        .bind("PENDING")
        .bind(payment.expires_at)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn resolve_payment(
        &self,
        intent_id: &str,
        status: ChargeStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<PaymentRecord>> {
        let status_str = match status {
            ChargeStatus::Pending => return Ok(None),
            ChargeStatus::Approved => "APPROVED",
            ChargeStatus::Rejected => "REJECTED",
            ChargeStatus::Expired => "EXPIRED",
        };
        let row = sqlx::query_as::<_, PaymentRow>(
            "UPDATE payments SET status = $2, resolved_at = $3 \
             WHERE intent_id = $1 AND status = 'PENDING' \
             RETURNING intent_id, booking_id, kind, seq, amount_cents, method, status, \
             expires_at, created_at, resolved_at",
        )
        .bind(intent_id)
        .bind(status_str)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(PaymentRow::into_record).transpose()
    }

    async fn find_payment(
        &self,
        booking_id: Uuid,
        kind: ChargeKind,
        seq: i32,
    ) -> StoreResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "{SELECT_PAYMENT} WHERE booking_id = $1 AND kind = $2 AND seq = $3"
        ))
        .bind(booking_id)
        .bind(kind.as_str())
        .bind(seq)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(PaymentRow::into_record).transpose()
    }

    async fn approved_total(&self, booking_id: Uuid) -> StoreResult<Cents> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount_cents), 0)::bigint AS total FROM payments \
             WHERE booking_id = $1 AND status = 'APPROVED'",
        )
        .bind(booking_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        row.try_get::<i64, _>("total").map_err(backend)
    }

    async fn first_approved_payment(
        &self,
        booking_id: Uuid,
    ) -> StoreResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "{SELECT_PAYMENT} WHERE booking_id = $1 AND status = 'APPROVED' \
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(PaymentRow::into_record).transpose()
    }

    async fn insert_refund(&self, refund: &RefundRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO refunds (booking_id, amount_cents, reason, created_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (booking_id) DO NOTHING",
        )
        .bind(refund.booking_id)
        .bind(refund.amount_cents)
        .bind(&refund.reason)
        .bind(refund.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_refund(&self, booking_id: Uuid) -> StoreResult<Option<RefundRecord>> {
        let row = sqlx::query(
            "SELECT amount_cents, reason, created_at FROM refunds WHERE booking_id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(|row| RefundRecord {
            booking_id,
            amount_cents: row.get("amount_cents"),
            reason: row.get("reason"),
            created_at: row.get("created_at"),
        }))
    }
}
