use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tandem_core::money::Cents;
use tandem_core::payment::ChargeStatus;

use crate::booking::{Booking, BookingStatus, PaymentState};
use crate::deadline::{DeadlineKind, DeadlineRecord};
use crate::settlement::{ChargeKind, PaymentRecord, RefundRecord, SettlementRecord};
use crate::slot::{SlotKey, SlotReservation};
use crate::validation::{ValidationState, ValidationTask};
use crate::wallet::{Wallet, WalletTransaction};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Pending changes applied by a reschedule, precomputed by the engine so the
/// store can apply them in one guarded write.
#[derive(Debug, Clone)]
pub struct RescheduleUpdate {
    pub new_start: DateTime<Utc>,
    pub new_duration_hours: i32,
    pub new_slot_key: SlotKey,
    pub new_price_cents: Cents,
    pub new_remaining_cents: Cents,
}

/// Booking + slot-ledger storage. Slot state and booking state for one
/// booking always mutate in the same transaction; transition methods return
/// `false` when the status guard does not hold (the caller lost a race).
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Persist a new booking and its slot reservation atomically.
    /// `StoreError::Conflict` when the slot is already reserved.
    async fn create_with_reservation(&self, booking: &Booking) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    /// Requested -> Confirmed.
    async fn confirm(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Confirmed -> Completed, recording the instructor-reported duration.
    async fn complete(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        actual_duration_hours: i32,
    ) -> StoreResult<bool>;

    /// `from` -> Cancelled, releasing the slot in the same transaction.
    /// Client cancellation passes both active states; the acceptance-timeout
    /// handler passes only Requested so a confirmed booking survives a late
    /// redelivery.
    async fn cancel_and_release(
        &self,
        id: Uuid,
        cancelled_by: Option<Uuid>,
        reason: &str,
        at: DateTime<Utc>,
        from: &[BookingStatus],
    ) -> StoreResult<bool>;

    /// Reserve the new slot, apply the update, release the old slot — one
    /// transaction. `StoreError::Conflict` leaves the booking untouched when
    /// the new slot is taken; `false` when the status guard fails.
    async fn apply_reschedule(
        &self,
        id: Uuid,
        old_slot_key: &SlotKey,
        update: &RescheduleUpdate,
    ) -> StoreResult<bool>;

    async fn set_payment_state(&self, id: Uuid, state: PaymentState) -> StoreResult<()>;

    async fn get_reservation(
        &self,
        instructor_id: Uuid,
        slot_key: &SlotKey,
    ) -> StoreResult<Option<SlotReservation>>;
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Insert the escrow record; `false` if one already exists.
    async fn insert(&self, record: &SettlementRecord) -> StoreResult<bool>;

    async fn get(&self, booking_id: Uuid) -> StoreResult<Option<SettlementRecord>>;

    /// Held -> Released.
    async fn mark_released(&self, booking_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Held -> Reversed (manual reconciliation surface).
    async fn mark_reversed(&self, booking_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Record a charge; `false` when (booking, kind, seq) was already charged.
    async fn record_payment(&self, payment: &PaymentRecord) -> StoreResult<bool>;

    /// Pending -> resolved, compare-and-set. `None` when the intent is
    /// unknown or already resolved (webhook redelivery).
    async fn resolve_payment(
        &self,
        intent_id: &str,
        status: ChargeStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<PaymentRecord>>;

    async fn find_payment(
        &self,
        booking_id: Uuid,
        kind: ChargeKind,
        seq: i32,
    ) -> StoreResult<Option<PaymentRecord>>;

    /// Sum of approved charges for the booking.
    async fn approved_total(&self, booking_id: Uuid) -> StoreResult<Cents>;

    /// Earliest approved charge, used as the gateway refund reference.
    async fn first_approved_payment(&self, booking_id: Uuid)
        -> StoreResult<Option<PaymentRecord>>;

    /// Insert the refund guard record; `false` if one already exists.
    async fn insert_refund(&self, refund: &RefundRecord) -> StoreResult<bool>;

    async fn get_refund(&self, booking_id: Uuid) -> StoreResult<Option<RefundRecord>>;
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// available += amount. Commutative, safe under concurrent settlement.
    async fn credit(&self, txn: &WalletTransaction) -> StoreResult<()>;

    /// available -= amount; penalties += amount. May drive available negative.
    async fn apply_penalty(&self, txn: &WalletTransaction) -> StoreResult<()>;

    /// available -= amount; `false` when the balance does not cover it.
    async fn withdraw(&self, txn: &WalletTransaction) -> StoreResult<bool>;

    async fn get(&self, instructor_id: Uuid) -> StoreResult<Option<Wallet>>;

    async fn transactions(&self, instructor_id: Uuid) -> StoreResult<Vec<WalletTransaction>>;
}

#[async_trait]
pub trait ValidationStore: Send + Sync {
    /// Insert the task; `false` if one already exists for the booking.
    async fn open(&self, task: &ValidationTask) -> StoreResult<bool>;

    async fn get(&self, booking_id: Uuid) -> StoreResult<Option<ValidationTask>>;

    /// attempt += 1 while still Pending; returns the new attempt count.
    async fn bump_attempt(
        &self,
        booking_id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<u32>>;

    /// `from` -> Validated with the authority protocol id (and the
    /// authorizer, for manual overrides).
    async fn mark_validated(
        &self,
        booking_id: Uuid,
        protocol_id: &str,
        validated_by: Option<Uuid>,
        from: ValidationState,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Pending -> RequiresManualReview.
    async fn mark_manual_review(
        &self,
        booking_id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Accumulate certified hours for a learner; returns the new total.
    async fn add_certified_hours(&self, learner_id: Uuid, hours: i32) -> StoreResult<i32>;

    async fn certified_hours(&self, learner_id: Uuid) -> StoreResult<i32>;
}

#[async_trait]
pub trait DeadlineStore: Send + Sync {
    /// Persist a deadline; keeps the existing record if one is present.
    async fn schedule(&self, record: &DeadlineRecord) -> StoreResult<()>;

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<DeadlineRecord>>;

    /// Compare-and-set on `processed`; `false` when already consumed.
    async fn mark_processed(&self, subject_id: Uuid, kind: DeadlineKind) -> StoreResult<bool>;

    async fn get(&self, subject_id: Uuid, kind: DeadlineKind)
        -> StoreResult<Option<DeadlineRecord>>;
}
