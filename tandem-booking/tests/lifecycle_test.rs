use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use tandem_booking::{BookingEngine, CreateBooking, RescheduleRequest};
use tandem_core::clock::Clock;
use tandem_core::config::BusinessRules;
use tandem_core::notify::LogNotifier;
use tandem_core::payment::{ChargeStatus, MockPaymentGateway};
use tandem_core::CoreError;
use tandem_domain::booking::{ActorRole, Booking, BookingStatus, PaymentState};
use tandem_domain::deadline::DeadlineKind;
use tandem_domain::events::NullSink;
use tandem_domain::memory::{
    MemoryBookingStore, MemoryDeadlineStore, MemorySettlementStore, MemoryValidationStore,
    MemoryWalletStore,
};
use tandem_domain::repository::{
    BookingStore, DeadlineStore, SettlementStore, ValidationStore, WalletStore,
};
use tandem_domain::settlement::{ChargeKind, SettlementState};
use tandem_domain::validation::ValidationState;
use tandem_settlement::SettlementLedger;

struct TestClock(Mutex<DateTime<Utc>>);

impl TestClock {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Utc::now())))
    }

    fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

struct Harness {
    engine: BookingEngine,
    ledger: Arc<SettlementLedger>,
    bookings: Arc<MemoryBookingStore>,
    settlements: Arc<MemorySettlementStore>,
    wallets: Arc<MemoryWalletStore>,
    validations: Arc<MemoryValidationStore>,
    deadlines: Arc<MemoryDeadlineStore>,
    clock: Arc<TestClock>,
}

fn harness() -> Harness {
    let clock = TestClock::new();
    let bookings = Arc::new(MemoryBookingStore::new());
    let settlements = Arc::new(MemorySettlementStore::new());
    let wallets = Arc::new(MemoryWalletStore::new());
    let validations = Arc::new(MemoryValidationStore::new());
    let deadlines = Arc::new(MemoryDeadlineStore::new());
    let rules = BusinessRules::default();

    let ledger = Arc::new(SettlementLedger::new(
        settlements.clone(),
        wallets.clone(),
        bookings.clone(),
        deadlines.clone(),
        Arc::new(MockPaymentGateway::new(10)),
        Arc::new(NullSink),
        Arc::new(LogNotifier),
        clock.clone(),
        rules.clone(),
    ));
    let engine = BookingEngine::new(
        bookings.clone(),
        validations.clone(),
        deadlines.clone(),
        ledger.clone(),
        Arc::new(NullSink),
        Arc::new(LogNotifier),
        clock.clone(),
        rules,
    );
    Harness {
        engine,
        ledger,
        bookings,
        settlements,
        wallets,
        validations,
        deadlines,
        clock,
    }
}

fn request(h: &Harness, hours_ahead: i64, price: i64) -> CreateBooking {
    CreateBooking {
        learner_id: Uuid::new_v4(),
        instructor_id: Uuid::new_v4(),
        scheduled_start: h.clock.now() + Duration::hours(hours_ahead),
        duration_hours: 2,
        price_cents: price,
        package_hours: None,
        payment_method: "card".into(),
    }
}

/// Charge and approve the deposit so cancellation refunds have something
/// to work against. The engine may already have opened the intent from its
/// background task; either way exactly one record exists afterwards.
async fn pay_deposit(h: &Harness, booking: &Booking) {
    let record = match h.ledger.open_deposit(booking, "card").await.unwrap() {
        Some(r) => r,
        None => h
            .settlements
            .find_payment(booking.id, ChargeKind::Deposit, 0)
            .await
            .unwrap()
            .expect("deposit intent"),
    };
    h.ledger
        .handle_charge_result(&record.intent_id, ChargeStatus::Approved)
        .await
        .unwrap();
}

async fn pay_in_full(h: &Harness, booking: &Booking) {
    pay_deposit(h, booking).await;
    let record = h
        .ledger
        .charge_remainder(booking)
        .await
        .unwrap()
        .expect("remainder intent");
    h.ledger
        .handle_charge_result(&record.intent_id, ChargeStatus::Approved)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_create_reserves_slot_and_schedules_timeout() {
    let h = harness();
    let booking = h.engine.create(request(&h, 48, 14_000)).await.unwrap();

    assert_eq!(booking.status, BookingStatus::Requested);
    assert_eq!(booking.deposit_cents, 2_800);
    assert_eq!(booking.remaining_cents, 11_200);

    let reservation = h
        .bookings
        .get_reservation(booking.instructor_id, &booking.slot_key)
        .await
        .unwrap()
        .expect("reservation");
    assert_eq!(reservation.booking_id, booking.id);

    let deadline = h
        .deadlines
        .get(booking.id, DeadlineKind::AcceptanceTimeout)
        .await
        .unwrap()
        .expect("acceptance deadline");
    assert_eq!(deadline.fires_at, booking.created_at + Duration::hours(2));
}

#[tokio::test]
async fn test_concurrent_creates_one_winner() {
    let h = harness();
    let base = request(&h, 48, 14_000);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let mut req = base.clone();
        req.learner_id = Uuid::new_v4();
        let engine_req = req;
        let bookings = h.bookings.clone();
        let validations = h.validations.clone();
        let deadlines = h.deadlines.clone();
        let ledger = h.ledger.clone();
        let clock = h.clock.clone();
        tasks.push(tokio::spawn(async move {
            let engine = BookingEngine::new(
                bookings,
                validations,
                deadlines,
                ledger,
                Arc::new(NullSink),
                Arc::new(LogNotifier),
                clock,
                BusinessRules::default(),
            );
            engine.create(engine_req).await
        }));
    }

    let mut won = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => won += 1,
            Err(CoreError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn test_confirm_inside_window() {
    let h = harness();
    let booking = h.engine.create(request(&h, 48, 14_000)).await.unwrap();

    h.clock.advance(Duration::minutes(90));
    let confirmed = h
        .engine
        .confirm(booking.id, booking.instructor_id)
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert!(confirmed.confirmed_at.is_some());

    // The acceptance deadline was consumed on the way.
    let deadline = h
        .deadlines
        .get(booking.id, DeadlineKind::AcceptanceTimeout)
        .await
        .unwrap()
        .unwrap();
    assert!(deadline.processed);
}

#[tokio::test]
async fn test_confirm_after_window_rejected() {
    let h = harness();
    let booking = h.engine.create(request(&h, 48, 14_000)).await.unwrap();

    h.clock.advance(Duration::hours(3));
    let err = h
        .engine
        .confirm(booking.id, booking.instructor_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn test_confirm_requires_the_booked_instructor() {
    let h = harness();
    let booking = h.engine.create(request(&h, 48, 14_000)).await.unwrap();
    let err = h
        .engine
        .confirm(booking.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));
}

#[tokio::test]
async fn test_expire_after_confirm_noops() {
    let h = harness();
    let booking = h.engine.create(request(&h, 48, 14_000)).await.unwrap();
    h.engine
        .confirm(booking.id, booking.instructor_id)
        .await
        .unwrap();

    // Redelivered timeout loses the race quietly.
    assert!(!h.engine.expire_acceptance(booking.id).await.unwrap());
    let current = h.engine.get(booking.id).await.unwrap();
    assert_eq!(current.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_expire_cancels_and_refunds_in_full() {
    let h = harness();
    let booking = h.engine.create(request(&h, 48, 14_000)).await.unwrap();
    pay_deposit(&h, &booking).await;

    h.clock.advance(Duration::hours(3));
    assert!(h.engine.expire_acceptance(booking.id).await.unwrap());
    // Second delivery of the same deadline is absorbed.
    assert!(!h.engine.expire_acceptance(booking.id).await.unwrap());

    let current = h.engine.get(booking.id).await.unwrap();
    assert_eq!(current.status, BookingStatus::Cancelled);
    assert_eq!(current.cancel_reason.as_deref(), Some("provider non-response"));
    assert_eq!(current.payment_status, PaymentState::Refunded);

    let refund = h.settlements.get_refund(booking.id).await.unwrap().unwrap();
    assert_eq!(refund.amount_cents, 2_800);

    let err = h
        .engine
        .confirm(booking.id, booking.instructor_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn test_learner_early_cancel_half_refund_and_credit() {
    let h = harness();
    let booking = h.engine.create(request(&h, 30, 14_000)).await.unwrap();
    pay_deposit(&h, &booking).await;

    let cancelled = h
        .engine
        .cancel(booking.id, booking.learner_id, ActorRole::Learner)
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    // Half of the 2800 deposit comes back; half the price goes to the
    // instructor.
    let refund = h.settlements.get_refund(booking.id).await.unwrap().unwrap();
    assert_eq!(refund.amount_cents, 1_400);
    let wallet = h.wallets.get(booking.instructor_id).await.unwrap().unwrap();
    assert_eq!(wallet.available_cents, 7_000);
    assert_eq!(wallet.penalties_cents, 0);
}

#[tokio::test]
async fn test_learner_late_cancel_full_refund() {
    let h = harness();
    let booking = h.engine.create(request(&h, 10, 14_000)).await.unwrap();
    pay_deposit(&h, &booking).await;

    h.engine
        .cancel(booking.id, booking.learner_id, ActorRole::Learner)
        .await
        .unwrap();

    let refund = h.settlements.get_refund(booking.id).await.unwrap().unwrap();
    assert_eq!(refund.amount_cents, 2_800);
    assert!(h.wallets.get(booking.instructor_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_instructor_late_cancel_full_refund_and_penalty() {
    let h = harness();
    let booking = h.engine.create(request(&h, 5, 14_000)).await.unwrap();
    pay_in_full(&h, &booking).await;

    h.engine
        .cancel(booking.id, booking.instructor_id, ActorRole::Instructor)
        .await
        .unwrap();

    let refund = h.settlements.get_refund(booking.id).await.unwrap().unwrap();
    assert_eq!(refund.amount_cents, 14_000);
    let wallet = h.wallets.get(booking.instructor_id).await.unwrap().unwrap();
    assert_eq!(wallet.available_cents, -14_000);
    assert_eq!(wallet.penalties_cents, 14_000);
}

#[tokio::test]
async fn test_cancelled_is_absorbing() {
    let h = harness();
    let booking = h.engine.create(request(&h, 10, 14_000)).await.unwrap();
    h.engine
        .cancel(booking.id, booking.learner_id, ActorRole::Learner)
        .await
        .unwrap();

    let err = h
        .engine
        .cancel(booking.id, booking.learner_id, ActorRole::Learner)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    // The slot is free again for someone else.
    let mut retry = request(&h, 10, 14_000);
    retry.instructor_id = booking.instructor_id;
    retry.scheduled_start = booking.scheduled_start;
    assert!(h.engine.create(retry).await.is_ok());
}

#[tokio::test]
async fn test_complete_opens_settlement_and_validation() {
    let h = harness();
    let booking = h.engine.create(request(&h, 1, 14_000)).await.unwrap();
    h.engine
        .confirm(booking.id, booking.instructor_id)
        .await
        .unwrap();

    h.clock.advance(Duration::hours(2));
    let completed = h
        .engine
        .complete(booking.id, booking.instructor_id, 2)
        .await
        .unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);
    assert_eq!(completed.actual_duration_hours, Some(2));

    let settlement = h.settlements.get(booking.id).await.unwrap().unwrap();
    assert_eq!(settlement.state, SettlementState::Held);
    assert_eq!(settlement.platform_fee_cents, 2_100);
    assert_eq!(settlement.instructor_cents, 11_900);
    assert_eq!(
        settlement.hold_until,
        completed.completed_at.unwrap() + Duration::hours(24)
    );

    let task = h.validations.get(booking.id).await.unwrap().unwrap();
    assert_eq!(task.state, ValidationState::Pending);
    assert_eq!(task.attempt, 0);

    let release = h
        .deadlines
        .get(booking.id, DeadlineKind::PaymentRelease)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(release.fires_at, settlement.hold_until);
}

#[tokio::test]
async fn test_complete_rejected_before_start() {
    let h = harness();
    let booking = h.engine.create(request(&h, 48, 14_000)).await.unwrap();
    h.engine
        .confirm(booking.id, booking.instructor_id)
        .await
        .unwrap();

    let err = h
        .engine
        .complete(booking.id, booking.instructor_id, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn test_complete_rejected_while_requested() {
    let h = harness();
    let booking = h.engine.create(request(&h, 1, 14_000)).await.unwrap();
    h.clock.advance(Duration::hours(2));
    let err = h
        .engine
        .complete(booking.id, booking.instructor_id, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn test_reschedule_first_free_then_fee_on_original_price() {
    let h = harness();
    let booking = h.engine.create(request(&h, 48, 14_000)).await.unwrap();

    let first = h
        .engine
        .reschedule(
            booking.id,
            booking.learner_id,
            RescheduleRequest {
                new_start: h.clock.now() + Duration::hours(72),
                new_duration_hours: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(first.reschedule_count, 1);
    assert!(h
        .settlements
        .find_payment(booking.id, ChargeKind::RescheduleFee, 1)
        .await
        .unwrap()
        .is_none());

    let second = h
        .engine
        .reschedule(
            booking.id,
            booking.learner_id,
            RescheduleRequest {
                new_start: h.clock.now() + Duration::hours(96),
                new_duration_hours: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(second.reschedule_count, 2);
    let fee = h
        .settlements
        .find_payment(booking.id, ChargeKind::RescheduleFee, 2)
        .await
        .unwrap()
        .expect("fee charge");
    assert_eq!(fee.amount_cents, 1_400);

    // Old slot is free again, new one is held.
    let old = h
        .bookings
        .get_reservation(booking.instructor_id, &booking.slot_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.state, tandem_domain::slot::SlotState::Released);
}

#[tokio::test]
async fn test_reschedule_conflict_leaves_booking_untouched() {
    let h = harness();
    let booking = h.engine.create(request(&h, 48, 14_000)).await.unwrap();

    // Another learner holds the target slot with the same instructor.
    let mut other = request(&h, 96, 14_000);
    other.instructor_id = booking.instructor_id;
    let other = h.engine.create(other).await.unwrap();

    let err = h
        .engine
        .reschedule(
            booking.id,
            booking.learner_id,
            RescheduleRequest {
                new_start: other.scheduled_start,
                new_duration_hours: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let unchanged = h.engine.get(booking.id).await.unwrap();
    assert_eq!(unchanged.slot_key, booking.slot_key);
    assert_eq!(unchanged.reschedule_count, 0);
}

#[tokio::test]
async fn test_reschedule_duration_change_reprices() {
    let h = harness();
    let mut req = request(&h, 48, 14_000);
    req.duration_hours = 2;
    let booking = h.engine.create(req).await.unwrap();

    let updated = h
        .engine
        .reschedule(
            booking.id,
            booking.learner_id,
            RescheduleRequest {
                new_start: h.clock.now() + Duration::hours(72),
                new_duration_hours: Some(4),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.duration_hours, 4);
    assert_eq!(updated.price_cents, 28_000);
    // Deposit stays as charged; the remainder absorbs the difference.
    assert_eq!(updated.deposit_cents, 2_800);
    assert_eq!(updated.remaining_cents, 25_200);
    assert_eq!(
        updated.deposit_cents + updated.remaining_cents,
        updated.price_cents
    );
}

#[tokio::test]
async fn test_release_after_hold_credits_once() {
    let h = harness();
    let booking = h.engine.create(request(&h, 1, 14_000)).await.unwrap();
    h.engine
        .confirm(booking.id, booking.instructor_id)
        .await
        .unwrap();
    h.clock.advance(Duration::hours(2));
    h.engine
        .complete(booking.id, booking.instructor_id, 2)
        .await
        .unwrap();

    assert!(h.ledger.release(booking.id).await.unwrap());
    assert!(!h.ledger.release(booking.id).await.unwrap());

    let wallet = h.wallets.get(booking.instructor_id).await.unwrap().unwrap();
    assert_eq!(wallet.available_cents, 11_900);
}

#[tokio::test]
async fn test_create_validation_failures() {
    let h = harness();

    let mut bad_duration = request(&h, 48, 14_000);
    bad_duration.duration_hours = 5;
    assert!(matches!(
        h.engine.create(bad_duration).await.unwrap_err(),
        CoreError::Validation(_)
    ));

    let mut past = request(&h, 48, 14_000);
    past.scheduled_start = h.clock.now() - Duration::hours(1);
    assert!(matches!(
        h.engine.create(past).await.unwrap_err(),
        CoreError::Validation(_)
    ));

    let mut free = request(&h, 48, 14_000);
    free.price_cents = 0;
    assert!(matches!(
        h.engine.create(free).await.unwrap_err(),
        CoreError::Validation(_)
    ));
}
