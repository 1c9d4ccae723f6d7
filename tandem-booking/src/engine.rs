use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_core::clock::Clock;
use tandem_core::config::BusinessRules;
use tandem_core::money::{apply_bps, Cents};
use tandem_core::notify::NotificationEmitter;
use tandem_core::{CoreError, CoreResult};
use tandem_domain::booking::{ActorRole, Booking, BookingStatus};
use tandem_domain::deadline::{DeadlineKind, DeadlineRecord};
use tandem_domain::events::{BookingEvent, EventSink};
use tandem_domain::repository::{
    BookingStore, DeadlineStore, RescheduleUpdate, StoreError, ValidationStore,
};
use tandem_domain::slot::SlotKey;
use tandem_domain::validation::ValidationTask;
use tandem_settlement::SettlementLedger;

use crate::policy::{cancellation_policy, reschedule_fee};

const ACTIVE: &[BookingStatus] = &[BookingStatus::Requested, BookingStatus::Confirmed];
const REQUESTED_ONLY: &[BookingStatus] = &[BookingStatus::Requested];

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBooking {
    pub learner_id: Uuid,
    pub instructor_id: Uuid,
    pub scheduled_start: DateTime<Utc>,
    pub duration_hours: i32,
    pub price_cents: Cents,
    pub package_hours: Option<i32>,
    pub payment_method: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    pub new_start: DateTime<Utc>,
    pub new_duration_hours: Option<i32>,
}

/// The booking state machine. Composes the slot ledger (through the booking
/// store's transactional writes), the settlement ledger, the validation task
/// queue and the deadline scheduler.
///
/// All transitions are linearized by guard-conditioned writes: a stale caller
/// gets a structured Conflict, a stale deadline handler no-ops.
pub struct BookingEngine {
    bookings: Arc<dyn BookingStore>,
    validations: Arc<dyn ValidationStore>,
    deadlines: Arc<dyn DeadlineStore>,
    settlement: Arc<SettlementLedger>,
    events: Arc<dyn EventSink>,
    notifier: Arc<dyn NotificationEmitter>,
    clock: Arc<dyn Clock>,
    rules: BusinessRules,
}

impl BookingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        validations: Arc<dyn ValidationStore>,
        deadlines: Arc<dyn DeadlineStore>,
        settlement: Arc<SettlementLedger>,
        events: Arc<dyn EventSink>,
        notifier: Arc<dyn NotificationEmitter>,
        clock: Arc<dyn Clock>,
        rules: BusinessRules,
    ) -> Self {
        Self {
            bookings,
            validations,
            deadlines,
            settlement,
            events,
            notifier,
            clock,
            rules,
        }
    }

    /// Create a booking under an exclusive slot reservation. The reservation
    /// and the booking are durable before this returns; the deposit charge is
    /// dispatched asynchronously.
    pub async fn create(&self, req: CreateBooking) -> CoreResult<Booking> {
        let now = self.clock.now();
        if !(1..=4).contains(&req.duration_hours) {
            return Err(CoreError::Validation(
                "duration must be between 1 and 4 hours".into(),
            ));
        }
        if req.price_cents <= 0 {
            return Err(CoreError::Validation("price must be positive".into()));
        }
        if req.scheduled_start <= now {
            return Err(CoreError::Validation(
                "scheduled start must be in the future".into(),
            ));
        }
        if req.learner_id == req.instructor_id {
            return Err(CoreError::Validation(
                "learner and instructor must differ".into(),
            ));
        }

        let booking = Booking::new(
            req.learner_id,
            req.instructor_id,
            req.scheduled_start,
            req.duration_hours,
            req.price_cents,
            self.rules.deposit_bps,
            req.package_hours,
            now,
        );

        // Slot reservation and booking land in one transaction; a taken slot
        // is a permanent conflict and the caller must pick another.
        self.bookings
            .create_with_reservation(&booking)
            .await
            .map_err(store_err)?;

        self.deadlines
            .schedule(&DeadlineRecord::schedule(
                booking.id,
                DeadlineKind::AcceptanceTimeout,
                now + Duration::hours(self.rules.acceptance_window_hours),
            ))
            .await
            .map_err(store_err)?;

        info!(
            "Booking {} requested: instructor {} slot {}",
            booking.id, booking.instructor_id, booking.slot_key
        );
        self.events
            .publish(BookingEvent::Created {
                booking_id: booking.id,
                learner_id: booking.learner_id,
                instructor_id: booking.instructor_id,
            })
            .await;
        self.notifier
            .send(
                booking.instructor_id,
                "booking_requested",
                json!({ "booking_id": booking.id, "slot": booking.slot_key }),
            )
            .await;

        // Deposit intent is a collaborator call; never holds up creation.
        let settlement = self.settlement.clone();
        let for_deposit = booking.clone();
        let method = req.payment_method.clone();
        tokio::spawn(async move {
            if let Err(e) = settlement.open_deposit(&for_deposit, &method).await {
                warn!(
                    "Deposit intent for booking {} failed: {}",
                    for_deposit.id, e
                );
            }
        });

        Ok(booking)
    }

    /// Instructor accepts a requested booking within the acceptance window.
    pub async fn confirm(&self, booking_id: Uuid, caller: Uuid) -> CoreResult<Booking> {
        let booking = self.load(booking_id).await?;
        if caller != booking.instructor_id {
            return Err(CoreError::Authorization(
                "only the booked instructor can confirm".into(),
            ));
        }
        let now = self.clock.now();
        if now - booking.created_at > Duration::hours(self.rules.acceptance_window_hours) {
            return Err(CoreError::Conflict("acceptance window elapsed".into()));
        }
        if !self
            .bookings
            .confirm(booking_id, now)
            .await
            .map_err(store_err)?
        {
            return Err(CoreError::Conflict(
                "booking is no longer awaiting confirmation".into(),
            ));
        }
        // The timeout no longer has anything to do; consuming it here is
        // purely an optimization for the poller.
        let _ = self
            .deadlines
            .mark_processed(booking_id, DeadlineKind::AcceptanceTimeout)
            .await;

        info!("Booking {} confirmed by instructor {}", booking_id, caller);
        self.events
            .publish(BookingEvent::Confirmed {
                booking_id,
                learner_id: booking.learner_id,
            })
            .await;
        self.notifier
            .send(
                booking.learner_id,
                "booking_confirmed",
                json!({ "booking_id": booking_id }),
            )
            .await;
        self.load(booking_id).await
    }

    /// Instructor marks a confirmed lesson as held. Opens the escrow and the
    /// certification task; the remainder charge and the certification call
    /// run asynchronously off the Completed event.
    pub async fn complete(
        &self,
        booking_id: Uuid,
        caller: Uuid,
        actual_duration_hours: i32,
    ) -> CoreResult<Booking> {
        let booking = self.load(booking_id).await?;
        if caller != booking.instructor_id {
            return Err(CoreError::Authorization(
                "only the booked instructor can complete".into(),
            ));
        }
        if !(1..=4).contains(&actual_duration_hours) {
            return Err(CoreError::Validation(
                "actual duration must be between 1 and 4 hours".into(),
            ));
        }
        let now = self.clock.now();
        if booking.scheduled_start > now {
            return Err(CoreError::Validation(
                "cannot complete before the scheduled start".into(),
            ));
        }
        if !self
            .bookings
            .complete(booking_id, now, actual_duration_hours)
            .await
            .map_err(store_err)?
        {
            return Err(CoreError::Conflict("booking is not confirmed".into()));
        }

        let booking = self.load(booking_id).await?;
        self.settlement.open_settlement(&booking).await?;
        self.validations
            .open(&ValidationTask::open(booking_id, now))
            .await
            .map_err(store_err)?;

        info!("Booking {} completed ({}h)", booking_id, actual_duration_hours);
        self.events
            .publish(BookingEvent::Completed {
                booking_id,
                learner_id: booking.learner_id,
                instructor_id: booking.instructor_id,
                total_cents: booking.price_cents,
                remaining_cents: booking.remaining_cents,
            })
            .await;
        self.notifier
            .send(
                booking.learner_id,
                "lesson_completed",
                json!({ "booking_id": booking_id, "hours": actual_duration_hours }),
            )
            .await;
        Ok(booking)
    }

    /// Cancel by either party, refund/penalty per the policy table.
    pub async fn cancel(
        &self,
        booking_id: Uuid,
        caller: Uuid,
        role: ActorRole,
    ) -> CoreResult<Booking> {
        let booking = self.load(booking_id).await?;
        let authorized = match role {
            ActorRole::Learner => caller == booking.learner_id,
            ActorRole::Instructor => caller == booking.instructor_id,
            _ => false,
        };
        if !authorized {
            return Err(CoreError::Authorization(
                "caller is not a party to this booking".into(),
            ));
        }

        let now = self.clock.now();
        let hours_until_start = (booking.scheduled_start - now).num_hours();
        let outcome =
            cancellation_policy(role, hours_until_start, booking.price_cents, &self.rules)?;

        if !self
            .bookings
            .cancel_and_release(booking_id, Some(caller), &outcome.reason, now, ACTIVE)
            .await
            .map_err(store_err)?
        {
            return Err(CoreError::Conflict("booking is no longer active".into()));
        }
        let _ = self
            .deadlines
            .mark_processed(booking_id, DeadlineKind::AcceptanceTimeout)
            .await;

        info!(
            "Booking {} cancelled by {:?} ({}h to start): {}",
            booking_id, role, hours_until_start, outcome.reason
        );

        // Financial follow-ups are side effects: failures are logged and
        // reconciled, never surfaced as a cancellation failure.
        let paid = self.settlement.paid_total(booking_id).await.unwrap_or(0);
        let refund_cents = apply_bps(paid, outcome.refund_bps);
        if refund_cents > 0 {
            if let Err(e) = self
                .settlement
                .refund(booking_id, refund_cents, &outcome.reason)
                .await
            {
                warn!("Refund for booking {} failed: {}", booking_id, e);
            }
        }
        if outcome.instructor_credit_cents > 0 {
            if let Err(e) = self
                .settlement
                .credit_instructor(
                    booking.instructor_id,
                    outcome.instructor_credit_cents,
                    booking_id,
                    &outcome.reason,
                )
                .await
            {
                warn!("Instructor credit for booking {} failed: {}", booking_id, e);
            }
        }
        if outcome.instructor_penalty_cents > 0 {
            if let Err(e) = self
                .settlement
                .apply_penalty(
                    booking.instructor_id,
                    outcome.instructor_penalty_cents,
                    booking_id,
                    &outcome.reason,
                )
                .await
            {
                warn!("Penalty for booking {} failed: {}", booking_id, e);
            }
        }

        self.events
            .publish(BookingEvent::Cancelled {
                booking_id,
                by: role,
                reason: outcome.reason.clone(),
            })
            .await;
        let counterpart = match role {
            ActorRole::Learner => booking.instructor_id,
            _ => booking.learner_id,
        };
        self.notifier
            .send(
                counterpart,
                "booking_cancelled",
                json!({ "booking_id": booking_id, "reason": outcome.reason }),
            )
            .await;
        self.load(booking_id).await
    }

    /// Acceptance-timeout handler. Fires at-least-once from the deadline
    /// poller; a booking that was confirmed (or cancelled) in the meantime is
    /// left alone, with no error — that race is expected.
    pub async fn expire_acceptance(&self, booking_id: Uuid) -> CoreResult<bool> {
        self.system_cancel(booking_id, "provider non-response", REQUESTED_ONLY)
            .await
    }

    /// System-side cancellation: full refund of whatever was charged, no
    /// penalty. Shared by the acceptance timeout and deposit-failure paths.
    pub async fn system_cancel(
        &self,
        booking_id: Uuid,
        reason: &str,
        from: &[BookingStatus],
    ) -> CoreResult<bool> {
        let booking = match self.bookings.get(booking_id).await.map_err(store_err)? {
            Some(b) => b,
            None => return Ok(false),
        };
        let now = self.clock.now();
        if !self
            .bookings
            .cancel_and_release(booking_id, None, reason, now, from)
            .await
            .map_err(store_err)?
        {
            debug!(
                "System cancel of booking {} skipped, state already moved",
                booking_id
            );
            return Ok(false);
        }
        let _ = self
            .deadlines
            .mark_processed(booking_id, DeadlineKind::AcceptanceTimeout)
            .await;

        info!("Booking {} cancelled by system: {}", booking_id, reason);
        let paid = self.settlement.paid_total(booking_id).await.unwrap_or(0);
        if paid > 0 {
            if let Err(e) = self.settlement.refund(booking_id, paid, reason).await {
                warn!("System refund for booking {} failed: {}", booking_id, e);
            }
        }
        self.events
            .publish(BookingEvent::Cancelled {
                booking_id,
                by: ActorRole::System,
                reason: reason.to_string(),
            })
            .await;
        for user in [booking.learner_id, booking.instructor_id] {
            self.notifier
                .send(
                    user,
                    "booking_cancelled",
                    json!({ "booking_id": booking_id, "reason": reason }),
                )
                .await;
        }
        Ok(true)
    }

    /// Move a booking to a new slot. The new reservation, the booking update
    /// and the old release happen in one transaction; a taken target slot
    /// leaves the booking untouched.
    pub async fn reschedule(
        &self,
        booking_id: Uuid,
        caller: Uuid,
        req: RescheduleRequest,
    ) -> CoreResult<Booking> {
        let booking = self.load(booking_id).await?;
        if caller != booking.learner_id {
            return Err(CoreError::Authorization(
                "only the booking learner can reschedule".into(),
            ));
        }
        if !booking.is_active() {
            return Err(CoreError::Conflict("booking is no longer active".into()));
        }
        let now = self.clock.now();
        if req.new_start <= now {
            return Err(CoreError::Validation(
                "new start must be in the future".into(),
            ));
        }
        let new_duration = req.new_duration_hours.unwrap_or(booking.duration_hours);
        if !(1..=4).contains(&new_duration) {
            return Err(CoreError::Validation(
                "duration must be between 1 and 4 hours".into(),
            ));
        }

        // The fee is fixed against the price as it stands now, before any
        // duration-driven price change.
        let fee_cents = reschedule_fee(booking.reschedule_count, booking.price_cents, &self.rules);

        let new_price = if new_duration == booking.duration_hours {
            booking.price_cents
        } else {
            booking.price_cents * new_duration as i64 / booking.duration_hours as i64
        };
        if new_price < booking.deposit_cents {
            return Err(CoreError::Validation(
                "new duration would price the lesson below the paid deposit".into(),
            ));
        }

        let new_slot_key = SlotKey::new(req.new_start, new_duration);
        if new_slot_key == booking.slot_key {
            return Err(CoreError::Conflict(
                "new slot is the booking's current slot".into(),
            ));
        }

        let update = RescheduleUpdate {
            new_start: req.new_start,
            new_duration_hours: new_duration,
            new_slot_key: new_slot_key.clone(),
            new_price_cents: new_price,
            new_remaining_cents: new_price - booking.deposit_cents,
        };
        if !self
            .bookings
            .apply_reschedule(booking_id, &booking.slot_key, &update)
            .await
            .map_err(store_err)?
        {
            return Err(CoreError::Conflict("booking is no longer active".into()));
        }

        info!(
            "Booking {} rescheduled to {} (fee {})",
            booking_id, new_slot_key, fee_cents
        );
        let updated = self.load(booking_id).await?;
        if fee_cents > 0 {
            if let Err(e) = self
                .settlement
                .charge_reschedule_fee(&updated, updated.reschedule_count, fee_cents)
                .await
            {
                warn!(
                    "Reschedule fee charge for booking {} failed: {}",
                    booking_id, e
                );
            }
        }
        self.events
            .publish(BookingEvent::Rescheduled {
                booking_id,
                fee_cents,
            })
            .await;
        self.notifier
            .send(
                booking.instructor_id,
                "booking_rescheduled",
                json!({ "booking_id": booking_id, "slot": new_slot_key }),
            )
            .await;
        Ok(updated)
    }

    pub async fn get(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.load(booking_id).await
    }

    async fn load(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.bookings
            .get(booking_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| CoreError::NotFound(format!("booking {}", booking_id)))
    }
}

fn store_err(e: StoreError) -> CoreError {
    match e {
        StoreError::Conflict(msg) => CoreError::Conflict(msg),
        StoreError::NotFound(msg) => CoreError::NotFound(msg),
        StoreError::Backend(msg) => CoreError::Internal(msg),
    }
}
