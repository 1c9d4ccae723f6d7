use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_core::clock::Clock;
use tandem_core::config::BusinessRules;
use tandem_core::money::Cents;
use tandem_core::notify::NotificationEmitter;
use tandem_core::payment::{ChargeStatus, GatewayError, PaymentGateway};
use tandem_core::retry::Backoff;
use tandem_core::{CoreError, CoreResult};
use tandem_domain::booking::{Booking, PaymentState};
use tandem_domain::deadline::{DeadlineKind, DeadlineRecord};
use tandem_domain::events::{BookingEvent, EventSink};
use tandem_domain::repository::{
    BookingStore, DeadlineStore, SettlementStore, WalletStore,
};
use tandem_domain::settlement::{ChargeKind, PaymentRecord, RefundRecord, SettlementRecord};
use tandem_domain::wallet::{TransactionKind, WalletTransaction};

use crate::fees::fee_bps_for;

/// Owns the payment/escrow/payout lifecycle per booking. Every operation is
/// idempotent under redelivery: charges via the (booking, kind, seq) key,
/// refunds via the single refund record, release via compare-and-set on the
/// escrow state.
pub struct SettlementLedger {
    store: Arc<dyn SettlementStore>,
    wallets: Arc<dyn WalletStore>,
    bookings: Arc<dyn BookingStore>,
    deadlines: Arc<dyn DeadlineStore>,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventSink>,
    notifier: Arc<dyn NotificationEmitter>,
    clock: Arc<dyn Clock>,
    rules: BusinessRules,
    backoff: Backoff,
}

impl SettlementLedger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SettlementStore>,
        wallets: Arc<dyn WalletStore>,
        bookings: Arc<dyn BookingStore>,
        deadlines: Arc<dyn DeadlineStore>,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventSink>,
        notifier: Arc<dyn NotificationEmitter>,
        clock: Arc<dyn Clock>,
        rules: BusinessRules,
    ) -> Self {
        Self {
            store,
            wallets,
            bookings,
            deadlines,
            gateway,
            events,
            notifier,
            clock,
            rules,
            backoff: Backoff::default(),
        }
    }

    async fn open_charge(
        &self,
        booking: &Booking,
        kind: ChargeKind,
        seq: i32,
        amount_cents: Cents,
        method: &str,
    ) -> CoreResult<Option<PaymentRecord>> {
        if amount_cents <= 0 {
            return Ok(None);
        }
        if self
            .store
            .find_payment(booking.id, kind, seq)
            .await
            .map_err(store_err)?
            .is_some()
        {
            info!(
                "Charge {}/{} already open for booking {}, skipping",
                kind.as_str(),
                seq,
                booking.id
            );
            return Ok(None);
        }

        let booking_id = booking.id;
        let intent = self
            .backoff
            .run(|_| self.gateway.charge_intent(booking_id, amount_cents, method))
            .await
            .map_err(gateway_err)?;

        let now = self.clock.now();
        let record = PaymentRecord {
            intent_id: intent.id,
            booking_id,
            kind,
            seq,
            amount_cents,
            method: method.to_string(),
            status: ChargeStatus::Pending,
            expires_at: now + Duration::minutes(self.rules.intent_expiry_minutes),
            created_at: now,
            resolved_at: None,
        };
        if !self.store.record_payment(&record).await.map_err(store_err)? {
            // Concurrent open won the insert; the intent we just created
            // resolves as an orphan and the webhook consumer drops it.
            return Ok(None);
        }
        info!(
            "Opened {} charge of {} for booking {}",
            kind.as_str(),
            amount_cents,
            booking_id
        );
        Ok(Some(record))
    }

    /// Open the deposit charge for a freshly created booking.
    pub async fn open_deposit(
        &self,
        booking: &Booking,
        method: &str,
    ) -> CoreResult<Option<PaymentRecord>> {
        self.open_charge(booking, ChargeKind::Deposit, 0, booking.deposit_cents, method)
            .await
    }

    /// Charge the outstanding remainder at completion. Failure never blocks
    /// the completion itself; unresolved charges reconcile via webhook
    /// redelivery.
    pub async fn charge_remainder(&self, booking: &Booking) -> CoreResult<Option<PaymentRecord>> {
        match self
            .open_charge(
                booking,
                ChargeKind::Remainder,
                0,
                booking.remaining_cents,
                "default",
            )
            .await
        {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(
                    "Remainder charge for booking {} failed, left for reconciliation: {}",
                    booking.id, e
                );
                Ok(None)
            }
        }
    }

    /// Charge a reschedule fee; `seq` is the reschedule count so repeated
    /// reschedules each charge exactly once.
    pub async fn charge_reschedule_fee(
        &self,
        booking: &Booking,
        seq: i32,
        fee_cents: Cents,
    ) -> CoreResult<Option<PaymentRecord>> {
        match self
            .open_charge(booking, ChargeKind::RescheduleFee, seq, fee_cents, "default")
            .await
        {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(
                    "Reschedule fee charge for booking {} failed, left for reconciliation: {}",
                    booking.id, e
                );
                Ok(None)
            }
        }
    }

    /// Open the escrow record for a completed booking and schedule its
    /// release deadline. Idempotent: an existing record is returned as-is.
    pub async fn open_settlement(&self, booking: &Booking) -> CoreResult<SettlementRecord> {
        let completed_at = booking
            .completed_at
            .ok_or_else(|| CoreError::Validation("booking has no completion time".into()))?;
        let fee_bps = fee_bps_for(booking.fee_tier_hours(), &self.rules);
        let record = SettlementRecord::open(
            booking.id,
            booking.instructor_id,
            booking.price_cents,
            fee_bps,
            completed_at + Duration::hours(self.rules.release_hold_hours),
            self.clock.now(),
        );
        if !self.store.insert(&record).await.map_err(store_err)? {
            let existing = self
                .store
                .get(booking.id)
                .await
                .map_err(store_err)?
                .ok_or_else(|| {
                    CoreError::FatalInconsistency(format!(
                        "settlement record for {} vanished after duplicate insert",
                        booking.id
                    ))
                })?;
            return Ok(existing);
        }
        self.deadlines
            .schedule(&DeadlineRecord::schedule(
                booking.id,
                DeadlineKind::PaymentRelease,
                record.hold_until,
            ))
            .await
            .map_err(store_err)?;
        info!(
            "Settlement held for booking {}: fee {} / instructor {} (of {})",
            booking.id, record.platform_fee_cents, record.instructor_cents, record.total_cents
        );
        Ok(record)
    }

    /// Release held funds to the instructor wallet. Deadline-driven and
    /// redelivered at-least-once: only the compare-and-set winner credits.
    pub async fn release(&self, booking_id: Uuid) -> CoreResult<bool> {
        let record = match self.store.get(booking_id).await.map_err(store_err)? {
            Some(r) => r,
            None => {
                return Err(CoreError::FatalInconsistency(format!(
                    "release fired for booking {} without a settlement record",
                    booking_id
                )));
            }
        };
        let now = self.clock.now();
        if !self
            .store
            .mark_released(booking_id, now)
            .await
            .map_err(store_err)?
        {
            return Ok(false);
        }
        let txn = WalletTransaction::new(
            record.instructor_id,
            Some(booking_id),
            TransactionKind::Credit,
            record.instructor_cents,
            "lesson payout release",
            now,
        );
        self.wallets.credit(&txn).await.map_err(store_err)?;
        self.events
            .publish(BookingEvent::SettlementReleased {
                booking_id,
                instructor_id: record.instructor_id,
                amount_cents: record.instructor_cents,
            })
            .await;
        self.notifier
            .send(
                record.instructor_id,
                "payout_released",
                json!({ "booking_id": booking_id, "amount_cents": record.instructor_cents }),
            )
            .await;
        info!(
            "Released {} to instructor {} for booking {}",
            record.instructor_cents, record.instructor_id, booking_id
        );
        Ok(true)
    }

    /// Reverse a held settlement. Manual reconciliation surface only.
    pub async fn reverse(&self, booking_id: Uuid) -> CoreResult<bool> {
        let reversed = self
            .store
            .mark_reversed(booking_id, self.clock.now())
            .await
            .map_err(store_err)?;
        if reversed {
            warn!("Settlement for booking {} reversed", booking_id);
        }
        Ok(reversed)
    }

    /// Refund `amount_cents` of what was actually charged. No-op when a
    /// refund already exists or nothing approved was ever charged.
    pub async fn refund(
        &self,
        booking_id: Uuid,
        amount_cents: Cents,
        reason: &str,
    ) -> CoreResult<bool> {
        if amount_cents <= 0 {
            return Ok(false);
        }
        if self
            .store
            .get_refund(booking_id)
            .await
            .map_err(store_err)?
            .is_some()
        {
            info!("Refund for booking {} already issued, skipping", booking_id);
            return Ok(false);
        }
        let reference = match self
            .store
            .first_approved_payment(booking_id)
            .await
            .map_err(store_err)?
        {
            Some(p) => p,
            None => {
                info!(
                    "No approved charge to refund for booking {}, skipping",
                    booking_id
                );
                return Ok(false);
            }
        };

        self.backoff
            .run(|_| self.gateway.refund(&reference.intent_id, amount_cents))
            .await
            .map_err(gateway_err)?;

        let refund = RefundRecord {
            booking_id,
            amount_cents,
            reason: reason.to_string(),
            created_at: self.clock.now(),
        };
        if !self.store.insert_refund(&refund).await.map_err(store_err)? {
            return Ok(false);
        }
        self.bookings
            .set_payment_state(booking_id, PaymentState::Refunded)
            .await
            .map_err(store_err)?;
        info!(
            "Refunded {} for booking {} ({})",
            amount_cents, booking_id, reason
        );
        Ok(true)
    }

    /// Amount approved so far for a booking; the base a percentage refund
    /// applies to.
    pub async fn paid_total(&self, booking_id: Uuid) -> CoreResult<Cents> {
        self.store.approved_total(booking_id).await.map_err(store_err)
    }

    /// Debit an instructor penalty. The balance may go negative; the
    /// penalties counter tracks the running total for reconciliation.
    pub async fn apply_penalty(
        &self,
        instructor_id: Uuid,
        amount_cents: Cents,
        booking_id: Uuid,
        note: &str,
    ) -> CoreResult<()> {
        let txn = WalletTransaction::new(
            instructor_id,
            Some(booking_id),
            TransactionKind::Penalty,
            amount_cents,
            note,
            self.clock.now(),
        );
        self.wallets.apply_penalty(&txn).await.map_err(store_err)?;
        info!(
            "Penalty of {} applied to instructor {} for booking {}",
            amount_cents, instructor_id, booking_id
        );
        Ok(())
    }

    /// Credit compensation to an instructor (e.g. the learner's early-cancel
    /// share).
    pub async fn credit_instructor(
        &self,
        instructor_id: Uuid,
        amount_cents: Cents,
        booking_id: Uuid,
        note: &str,
    ) -> CoreResult<()> {
        let txn = WalletTransaction::new(
            instructor_id,
            Some(booking_id),
            TransactionKind::Compensation,
            amount_cents,
            note,
            self.clock.now(),
        );
        self.wallets.credit(&txn).await.map_err(store_err)?;
        info!(
            "Credited {} to instructor {} for booking {}",
            amount_cents, instructor_id, booking_id
        );
        Ok(())
    }

    /// Withdraw wallet balance to the instructor's payout destination.
    pub async fn payout(&self, instructor_id: Uuid, amount_cents: Cents) -> CoreResult<bool> {
        if amount_cents <= 0 {
            return Err(CoreError::Validation("payout amount must be positive".into()));
        }
        let txn = WalletTransaction::new(
            instructor_id,
            None,
            TransactionKind::Payout,
            amount_cents,
            "wallet payout",
            self.clock.now(),
        );
        if !self.wallets.withdraw(&txn).await.map_err(store_err)? {
            return Err(CoreError::Conflict("insufficient wallet balance".into()));
        }
        if let Err(e) = self
            .backoff
            .run(|_| self.gateway.payout(instructor_id, amount_cents))
            .await
        {
            // Put the money back before surfacing the failure.
            let reversal = WalletTransaction::new(
                instructor_id,
                None,
                TransactionKind::Credit,
                amount_cents,
                "payout reversal",
                self.clock.now(),
            );
            self.wallets.credit(&reversal).await.map_err(store_err)?;
            return Err(gateway_err(e));
        }
        Ok(true)
    }

    /// Consume an at-least-once charge-result callback. The compare-and-set
    /// resolve makes redelivery a no-op.
    pub async fn handle_charge_result(
        &self,
        intent_id: &str,
        status: ChargeStatus,
    ) -> CoreResult<()> {
        if status == ChargeStatus::Pending {
            return Ok(());
        }
        let payment = match self
            .store
            .resolve_payment(intent_id, status.clone(), self.clock.now())
            .await
            .map_err(store_err)?
        {
            Some(p) => p,
            None => {
                info!("Charge result for unknown/settled intent {}, ignoring", intent_id);
                return Ok(());
            }
        };

        match (payment.kind, status) {
            (ChargeKind::Deposit, ChargeStatus::Approved) => {
                self.bookings
                    .set_payment_state(payment.booking_id, PaymentState::DepositPaid)
                    .await
                    .map_err(store_err)?;
                info!("Deposit approved for booking {}", payment.booking_id);
            }
            (ChargeKind::Remainder, ChargeStatus::Approved) => {
                self.bookings
                    .set_payment_state(payment.booking_id, PaymentState::FullyPaid)
                    .await
                    .map_err(store_err)?;
                info!("Remainder approved for booking {}", payment.booking_id);
            }
            (ChargeKind::RescheduleFee, ChargeStatus::Approved) => {
                info!("Reschedule fee approved for booking {}", payment.booking_id);
            }
            (ChargeKind::Deposit, failed) => {
                // The event consumer cancels the booking and refunds whatever
                // was charged.
                self.events
                    .publish(BookingEvent::DepositFailed {
                        booking_id: payment.booking_id,
                        status: failed,
                    })
                    .await;
            }
            (kind, failed) => {
                warn!(
                    "Charge {}/{} for booking {} resolved {}, queued for reconciliation",
                    kind.as_str(),
                    payment.seq,
                    payment.booking_id,
                    failed
                );
            }
        }
        Ok(())
    }
}

fn store_err(e: tandem_domain::repository::StoreError) -> CoreError {
    match e {
        tandem_domain::repository::StoreError::Conflict(msg) => CoreError::Conflict(msg),
        tandem_domain::repository::StoreError::NotFound(msg) => CoreError::NotFound(msg),
        tandem_domain::repository::StoreError::Backend(msg) => CoreError::Internal(msg),
    }
}

fn gateway_err(e: GatewayError) -> CoreError {
    match e {
        GatewayError::Timeout => CoreError::ExternalTimeout("payment gateway".into()),
        GatewayError::Transient(msg) => CoreError::ExternalTransient(msg),
        GatewayError::Rejected(msg) => CoreError::Validation(msg),
    }
}
