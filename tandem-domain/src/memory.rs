//! In-memory reference implementations of the storage ports, mirroring the
//! conditional-write semantics of the SQL store. Used by the engine tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tandem_core::money::Cents;
use tandem_core::payment::ChargeStatus;

use crate::booking::{Booking, BookingStatus, PaymentState};
use crate::deadline::{DeadlineKind, DeadlineRecord};
use crate::repository::{
    BookingStore, DeadlineStore, RescheduleUpdate, SettlementStore, StoreError, StoreResult,
    ValidationStore, WalletStore,
};
use crate::settlement::{ChargeKind, PaymentRecord, RefundRecord, SettlementRecord, SettlementState};
use crate::slot::{SlotKey, SlotReservation, SlotState};
use crate::validation::{ValidationState, ValidationTask};
use crate::wallet::{Wallet, WalletTransaction};

#[derive(Default)]
struct BookingTables {
    bookings: HashMap<Uuid, Booking>,
    reservations: HashMap<(Uuid, SlotKey), SlotReservation>,
}

#[derive(Default)]
pub struct MemoryBookingStore {
    tables: Mutex<BookingTables>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn create_with_reservation(&self, booking: &Booking) -> StoreResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let key = (booking.instructor_id, booking.slot_key.clone());
        if let Some(existing) = tables.reservations.get(&key) {
            if existing.state == SlotState::Reserved {
                return Err(StoreError::Conflict(format!(
                    "slot {} already reserved",
                    booking.slot_key
                )));
            }
        }
        tables.reservations.insert(
            key,
            SlotReservation {
                instructor_id: booking.instructor_id,
                slot_key: booking.slot_key.clone(),
                booking_id: booking.id,
                state: SlotState::Reserved,
                updated_at: booking.created_at,
            },
        );
        tables.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.tables.lock().unwrap().bookings.get(&id).cloned())
    }

    async fn confirm(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        match tables.bookings.get_mut(&id) {
            Some(b) if b.status == BookingStatus::Requested => {
                b.status = BookingStatus::Confirmed;
                b.confirmed_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn complete(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        actual_duration_hours: i32,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        match tables.bookings.get_mut(&id) {
            Some(b) if b.status == BookingStatus::Confirmed => {
                b.status = BookingStatus::Completed;
                b.completed_at = Some(at);
                b.actual_duration_hours = Some(actual_duration_hours);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn cancel_and_release(
        &self,
        id: Uuid,
        cancelled_by: Option<Uuid>,
        reason: &str,
        at: DateTime<Utc>,
        from: &[BookingStatus],
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        let (instructor_id, slot_key) = match tables.bookings.get_mut(&id) {
            Some(b) if from.contains(&b.status) => {
                b.status = BookingStatus::Cancelled;
                b.cancelled_at = Some(at);
                b.cancelled_by = cancelled_by;
                b.cancel_reason = Some(reason.to_string());
                (b.instructor_id, b.slot_key.clone())
            }
            Some(_) => return Ok(false),
            None => return Err(StoreError::NotFound(id.to_string())),
        };
        if let Some(r) = tables.reservations.get_mut(&(instructor_id, slot_key)) {
            if r.booking_id == id {
                r.state = SlotState::Released;
                r.updated_at = at;
            }
        }
        Ok(true)
    }

    async fn apply_reschedule(
        &self,
        id: Uuid,
        old_slot_key: &SlotKey,
        update: &RescheduleUpdate,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        let instructor_id = match tables.bookings.get(&id) {
            Some(b) if b.is_active() => b.instructor_id,
            Some(_) => return Ok(false),
            None => return Err(StoreError::NotFound(id.to_string())),
        };
        let new_key = (instructor_id, update.new_slot_key.clone());
        if let Some(existing) = tables.reservations.get(&new_key) {
            if existing.state == SlotState::Reserved && existing.booking_id != id {
                return Err(StoreError::Conflict(format!(
                    "slot {} already reserved",
                    update.new_slot_key
                )));
            }
        }
        let now = Utc::now();
        tables.reservations.insert(
            new_key,
            SlotReservation {
                instructor_id,
                slot_key: update.new_slot_key.clone(),
                booking_id: id,
                state: SlotState::Reserved,
                updated_at: now,
            },
        );
        if update.new_slot_key != *old_slot_key {
            if let Some(r) = tables
                .reservations
                .get_mut(&(instructor_id, old_slot_key.clone()))
            {
                if r.booking_id == id {
                    r.state = SlotState::Released;
                    r.updated_at = now;
                }
            }
        }
        let b = tables.bookings.get_mut(&id).unwrap();
        b.scheduled_start = update.new_start;
        b.duration_hours = update.new_duration_hours;
        b.slot_key = update.new_slot_key.clone();
        b.price_cents = update.new_price_cents;
        b.remaining_cents = update.new_remaining_cents;
        b.reschedule_count += 1;
        Ok(true)
    }

    async fn set_payment_state(&self, id: Uuid, state: PaymentState) -> StoreResult<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables.bookings.get_mut(&id) {
            Some(b) => {
                b.payment_status = state;
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn get_reservation(
        &self,
        instructor_id: Uuid,
        slot_key: &SlotKey,
    ) -> StoreResult<Option<SlotReservation>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .reservations
            .get(&(instructor_id, slot_key.clone()))
            .cloned())
    }
}

#[derive(Default)]
struct SettlementTables {
    records: HashMap<Uuid, SettlementRecord>,
    payments: HashMap<String, PaymentRecord>,
    refunds: HashMap<Uuid, RefundRecord>,
}

#[derive(Default)]
pub struct MemorySettlementStore {
    tables: Mutex<SettlementTables>,
}

impl MemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettlementStore for MemorySettlementStore {
    async fn insert(&self, record: &SettlementRecord) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        if tables.records.contains_key(&record.booking_id) {
            return Ok(false);
        }
        tables.records.insert(record.booking_id, record.clone());
        Ok(true)
    }

    async fn get(&self, booking_id: Uuid) -> StoreResult<Option<SettlementRecord>> {
        Ok(self.tables.lock().unwrap().records.get(&booking_id).cloned())
    }

    async fn mark_released(&self, booking_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        match tables.records.get_mut(&booking_id) {
            Some(r) if r.state == SettlementState::Held => {
                r.state = SettlementState::Released;
                r.released_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(booking_id.to_string())),
        }
    }

    async fn mark_reversed(&self, booking_id: Uuid, _at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        match tables.records.get_mut(&booking_id) {
            Some(r) if r.state == SettlementState::Held => {
                r.state = SettlementState::Reversed;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(booking_id.to_string())),
        }
    }

    async fn record_payment(&self, payment: &PaymentRecord) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        let duplicate = tables.payments.values().any(|p| {
            p.booking_id == payment.booking_id && p.kind == payment.kind && p.seq == payment.seq
        });
        if duplicate {
            return Ok(false);
        }
        tables
            .payments
            .insert(payment.intent_id.clone(), payment.clone());
        Ok(true)
    }

    async fn resolve_payment(
        &self,
        intent_id: &str,
        status: ChargeStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<PaymentRecord>> {
        let mut tables = self.tables.lock().unwrap();
        match tables.payments.get_mut(intent_id) {
            Some(p) if p.status == ChargeStatus::Pending => {
                p.status = status;
                p.resolved_at = Some(at);
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_payment(
        &self,
        booking_id: Uuid,
        kind: ChargeKind,
        seq: i32,
    ) -> StoreResult<Option<PaymentRecord>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .payments
            .values()
            .find(|p| p.booking_id == booking_id && p.kind == kind && p.seq == seq)
            .cloned())
    }

    async fn approved_total(&self, booking_id: Uuid) -> StoreResult<Cents> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id && p.status == ChargeStatus::Approved)
            .map(|p| p.amount_cents)
            .sum())
    }

    async fn first_approved_payment(
        &self,
        booking_id: Uuid,
    ) -> StoreResult<Option<PaymentRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut approved: Vec<&PaymentRecord> = tables
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id && p.status == ChargeStatus::Approved)
            .collect();
        approved.sort_by_key(|p| p.created_at);
        Ok(approved.first().map(|p| (*p).clone()))
    }

    async fn insert_refund(&self, refund: &RefundRecord) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        if tables.refunds.contains_key(&refund.booking_id) {
            return Ok(false);
        }
        tables.refunds.insert(refund.booking_id, refund.clone());
        Ok(true)
    }

    async fn get_refund(&self, booking_id: Uuid) -> StoreResult<Option<RefundRecord>> {
        Ok(self.tables.lock().unwrap().refunds.get(&booking_id).cloned())
    }
}

#[derive(Default)]
struct WalletTables {
    wallets: HashMap<Uuid, Wallet>,
    transactions: Vec<WalletTransaction>,
}

#[derive(Default)]
pub struct MemoryWalletStore {
    tables: Mutex<WalletTables>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalletTables {
    fn entry(&mut self, instructor_id: Uuid, now: DateTime<Utc>) -> &mut Wallet {
        self.wallets
            .entry(instructor_id)
            .or_insert_with(|| Wallet::empty(instructor_id, now))
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn credit(&self, txn: &WalletTransaction) -> StoreResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let wallet = tables.entry(txn.instructor_id, txn.created_at);
        wallet.available_cents += txn.amount_cents;
        wallet.updated_at = txn.created_at;
        tables.transactions.push(txn.clone());
        Ok(())
    }

    async fn apply_penalty(&self, txn: &WalletTransaction) -> StoreResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let wallet = tables.entry(txn.instructor_id, txn.created_at);
        wallet.available_cents -= txn.amount_cents;
        wallet.penalties_cents += txn.amount_cents;
        wallet.updated_at = txn.created_at;
        tables.transactions.push(txn.clone());
        Ok(())
    }

    async fn withdraw(&self, txn: &WalletTransaction) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        let wallet = tables.entry(txn.instructor_id, txn.created_at);
        if wallet.available_cents < txn.amount_cents {
            return Ok(false);
        }
        wallet.available_cents -= txn.amount_cents;
        wallet.updated_at = txn.created_at;
        tables.transactions.push(txn.clone());
        Ok(true)
    }

    async fn get(&self, instructor_id: Uuid) -> StoreResult<Option<Wallet>> {
        Ok(self.tables.lock().unwrap().wallets.get(&instructor_id).cloned())
    }

    async fn transactions(&self, instructor_id: Uuid) -> StoreResult<Vec<WalletTransaction>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| t.instructor_id == instructor_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct ValidationTables {
    tasks: HashMap<Uuid, ValidationTask>,
    certified_hours: HashMap<Uuid, i32>,
}

#[derive(Default)]
pub struct MemoryValidationStore {
    tables: Mutex<ValidationTables>,
}

impl MemoryValidationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValidationStore for MemoryValidationStore {
    async fn open(&self, task: &ValidationTask) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        if tables.tasks.contains_key(&task.booking_id) {
            return Ok(false);
        }
        tables.tasks.insert(task.booking_id, task.clone());
        Ok(true)
    }

    async fn get(&self, booking_id: Uuid) -> StoreResult<Option<ValidationTask>> {
        Ok(self.tables.lock().unwrap().tasks.get(&booking_id).cloned())
    }

    async fn bump_attempt(
        &self,
        booking_id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<u32>> {
        let mut tables = self.tables.lock().unwrap();
        match tables.tasks.get_mut(&booking_id) {
            Some(t) if t.state == ValidationState::Pending => {
                t.attempt += 1;
                t.failure_reason = Some(reason.to_string());
                t.updated_at = at;
                Ok(Some(t.attempt))
            }
            _ => Ok(None),
        }
    }

    async fn mark_validated(
        &self,
        booking_id: Uuid,
        protocol_id: &str,
        validated_by: Option<Uuid>,
        from: ValidationState,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        match tables.tasks.get_mut(&booking_id) {
            Some(t) if t.state == from => {
                t.state = ValidationState::Validated;
                t.protocol_id = Some(protocol_id.to_string());
                t.validated_by = validated_by;
                t.updated_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(booking_id.to_string())),
        }
    }

    async fn mark_manual_review(
        &self,
        booking_id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        match tables.tasks.get_mut(&booking_id) {
            Some(t) if t.state == ValidationState::Pending => {
                t.state = ValidationState::RequiresManualReview;
                t.failure_reason = Some(reason.to_string());
                t.updated_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(booking_id.to_string())),
        }
    }

    async fn add_certified_hours(&self, learner_id: Uuid, hours: i32) -> StoreResult<i32> {
        let mut tables = self.tables.lock().unwrap();
        let total = tables.certified_hours.entry(learner_id).or_insert(0);
        *total += hours;
        Ok(*total)
    }

    async fn certified_hours(&self, learner_id: Uuid) -> StoreResult<i32> {
        Ok(*self
            .tables
            .lock()
            .unwrap()
            .certified_hours
            .get(&learner_id)
            .unwrap_or(&0))
    }
}

#[derive(Default)]
pub struct MemoryDeadlineStore {
    records: Mutex<HashMap<(Uuid, DeadlineKind), DeadlineRecord>>,
}

impl MemoryDeadlineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadlineStore for MemoryDeadlineStore {
    async fn schedule(&self, record: &DeadlineRecord) -> StoreResult<()> {
        let mut records = self.records.lock().unwrap();
        records
            .entry((record.subject_id, record.kind))
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<DeadlineRecord>> {
        let records = self.records.lock().unwrap();
        let mut due: Vec<DeadlineRecord> = records
            .values()
            .filter(|r| !r.processed && r.fires_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|r| r.fires_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_processed(&self, subject_id: Uuid, kind: DeadlineKind) -> StoreResult<bool> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&(subject_id, kind)) {
            Some(r) if !r.processed => {
                r.processed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(
        &self,
        subject_id: Uuid,
        kind: DeadlineKind,
    ) -> StoreResult<Option<DeadlineRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(subject_id, kind))
            .cloned())
    }
}
