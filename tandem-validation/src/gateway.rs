use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use uuid::Uuid;

use tandem_core::authority::{AuthorityError, CertificationRecord, ValidationAuthority};
use tandem_core::clock::Clock;
use tandem_core::config::BusinessRules;
use tandem_core::notify::NotificationEmitter;
use tandem_core::{CoreError, CoreResult};
use tandem_domain::booking::Booking;
use tandem_domain::repository::{StoreError, ValidationStore};
use tandem_domain::validation::ValidationState;

/// Drives the certification handshake for completed lessons.
///
/// Per task: Pending -> Validated on success, Pending -> Pending with a
/// bumped attempt on a transient authority error, Pending ->
/// RequiresManualReview on timeout, permanent error or exhausted retries.
pub struct ValidationGateway {
    authority: Arc<dyn ValidationAuthority>,
    store: Arc<dyn ValidationStore>,
    notifier: Arc<dyn NotificationEmitter>,
    clock: Arc<dyn Clock>,
    rules: BusinessRules,
}

impl ValidationGateway {
    pub fn new(
        authority: Arc<dyn ValidationAuthority>,
        store: Arc<dyn ValidationStore>,
        notifier: Arc<dyn NotificationEmitter>,
        clock: Arc<dyn Clock>,
        rules: BusinessRules,
    ) -> Self {
        Self {
            authority,
            store,
            notifier,
            clock,
            rules,
        }
    }

    /// Run the attempt loop for one booking until the task is terminal.
    /// Called from the side-effect worker; redelivery finds a terminal task
    /// and returns it untouched.
    pub async fn run_certification(&self, booking: &Booking) -> CoreResult<ValidationState> {
        let completed_at = booking
            .completed_at
            .ok_or_else(|| CoreError::Validation("booking has no completion time".into()))?;
        let record = CertificationRecord {
            booking_id: booking.id,
            learner_id: booking.learner_id,
            instructor_id: booking.instructor_id,
            completed_at,
            duration_hours: booking.certified_duration_hours(),
        };
        let attempt_deadline = Duration::from_secs(self.rules.certification.attempt_timeout_secs);

        loop {
            let task = self
                .store
                .get(booking.id)
                .await
                .map_err(store_err)?
                .ok_or_else(|| {
                    CoreError::NotFound(format!("validation task for booking {}", booking.id))
                })?;
            if task.is_terminal() {
                return Ok(task.state);
            }

            match timeout(attempt_deadline, self.authority.certify(&record)).await {
                Err(_elapsed) => {
                    // Hard timeout goes straight to a human, no retry.
                    return self
                        .to_manual_review(booking, "authority deadline elapsed")
                        .await;
                }
                Ok(Ok(receipt)) => {
                    return self.to_validated(booking, &receipt.protocol_id, None).await;
                }
                Ok(Err(AuthorityError::Timeout)) => {
                    return self
                        .to_manual_review(booking, "authority reported timeout")
                        .await;
                }
                Ok(Err(AuthorityError::Permanent(reason))) => {
                    warn!(
                        "Authority rejected booking {} permanently: {}",
                        booking.id, reason
                    );
                    return self.to_manual_review(booking, &reason).await;
                }
                Ok(Err(AuthorityError::Transient(reason))) => {
                    let attempt = match self
                        .store
                        .bump_attempt(booking.id, &reason, self.clock.now())
                        .await
                        .map_err(store_err)?
                    {
                        Some(a) => a,
                        // Task moved under us (e.g. manual override).
                        None => {
                            return self.current_state(booking.id).await;
                        }
                    };
                    if attempt >= self.rules.certification.max_attempts {
                        return self
                            .to_manual_review(
                                booking,
                                &format!("retries exhausted: {}", reason),
                            )
                            .await;
                    }
                    let delay = Duration::from_millis(
                        self.rules.certification.backoff_base_ms
                            * 2_u64.saturating_pow(attempt - 1),
                    );
                    warn!(
                        "Authority transient failure for booking {} (attempt {}), retrying in {:?}: {}",
                        booking.id, attempt, delay, reason
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Authorized manual override: RequiresManualReview -> Validated,
    /// recording who forced it. Certified hours accrue as on a normal pass.
    pub async fn override_validated(
        &self,
        booking: &Booking,
        authorizer: Uuid,
    ) -> CoreResult<ValidationState> {
        let protocol_id = format!("manual-{}", authorizer.simple());
        let applied = self
            .store
            .mark_validated(
                booking.id,
                &protocol_id,
                Some(authorizer),
                ValidationState::RequiresManualReview,
                self.clock.now(),
            )
            .await
            .map_err(store_err)?;
        if !applied {
            return Err(CoreError::Conflict(
                "validation task is not awaiting manual review".into(),
            ));
        }
        info!(
            "Certification for booking {} validated manually by {}",
            booking.id, authorizer
        );
        self.account_progress(booking).await?;
        Ok(ValidationState::Validated)
    }

    async fn to_validated(
        &self,
        booking: &Booking,
        protocol_id: &str,
        validated_by: Option<Uuid>,
    ) -> CoreResult<ValidationState> {
        let applied = self
            .store
            .mark_validated(
                booking.id,
                protocol_id,
                validated_by,
                ValidationState::Pending,
                self.clock.now(),
            )
            .await
            .map_err(store_err)?;
        if !applied {
            return self.current_state(booking.id).await;
        }
        info!(
            "Booking {} certified, protocol {}",
            booking.id, protocol_id
        );
        self.account_progress(booking).await?;
        self.notifier
            .send(
                booking.learner_id,
                "lesson_certified",
                json!({ "booking_id": booking.id, "protocol_id": protocol_id }),
            )
            .await;
        Ok(ValidationState::Validated)
    }

    async fn to_manual_review(
        &self,
        booking: &Booking,
        reason: &str,
    ) -> CoreResult<ValidationState> {
        let applied = self
            .store
            .mark_manual_review(booking.id, reason, self.clock.now())
            .await
            .map_err(store_err)?;
        if !applied {
            return self.current_state(booking.id).await;
        }
        warn!(
            "Certification for booking {} routed to manual review: {}",
            booking.id, reason
        );
        self.notifier
            .send(
                booking.instructor_id,
                "certification_needs_review",
                json!({ "booking_id": booking.id, "reason": reason }),
            )
            .await;
        Ok(ValidationState::RequiresManualReview)
    }

    /// Accumulate the certified hours and fire the goal notification exactly
    /// when the running total crosses the configured threshold.
    async fn account_progress(&self, booking: &Booking) -> CoreResult<()> {
        let hours = booking.certified_duration_hours();
        let total = self
            .store
            .add_certified_hours(booking.learner_id, hours)
            .await
            .map_err(store_err)?;
        if total >= self.rules.certified_hours_goal
            && total - hours < self.rules.certified_hours_goal
        {
            info!(
                "Learner {} reached the certified-hours goal ({}h)",
                booking.learner_id, total
            );
            self.notifier
                .send(
                    booking.learner_id,
                    "logbook_goal_reached",
                    json!({ "total_hours": total }),
                )
                .await;
        }
        Ok(())
    }

    async fn current_state(&self, booking_id: Uuid) -> CoreResult<ValidationState> {
        Ok(self
            .store
            .get(booking_id)
            .await
            .map_err(store_err)?
            .map(|t| t.state)
            .unwrap_or(ValidationState::Pending))
    }
}

fn store_err(e: StoreError) -> CoreError {
    match e {
        StoreError::Conflict(msg) => CoreError::Conflict(msg),
        StoreError::NotFound(msg) => CoreError::NotFound(msg),
        StoreError::Backend(msg) => CoreError::Internal(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;
    use tandem_core::authority::CertificationReceipt;
    use tandem_core::clock::SystemClock;
    use tandem_domain::booking::BookingStatus;
    use tandem_domain::memory::MemoryValidationStore;
    use tandem_domain::validation::ValidationTask;

    /// Authority that replays a scripted sequence of outcomes.
    struct ScriptedAuthority {
        outcomes: Mutex<VecDeque<Result<CertificationReceipt, AuthorityError>>>,
        calls: AtomicU32,
        hang: bool,
    }

    impl ScriptedAuthority {
        fn new(outcomes: Vec<Result<CertificationReceipt, AuthorityError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
                hang: false,
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(VecDeque::new()),
                calls: AtomicU32::new(0),
                hang: true,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn ok(protocol: &str) -> Result<CertificationReceipt, AuthorityError> {
            Ok(CertificationReceipt {
                protocol_id: protocol.to_string(),
            })
        }
    }

    #[async_trait]
    impl ValidationAuthority for ScriptedAuthority {
        async fn certify(
            &self,
            _record: &CertificationRecord,
        ) -> Result<CertificationReceipt, AuthorityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Self::ok("fallback"))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(Uuid, String)>>,
    }

    #[async_trait]
    impl NotificationEmitter for RecordingNotifier {
        async fn send(&self, user_id: Uuid, event_type: &str, _payload: Value) {
            self.sent.lock().unwrap().push((user_id, event_type.into()));
        }
    }

    fn rules() -> BusinessRules {
        let mut rules = BusinessRules::default();
        rules.certification.backoff_base_ms = 1;
        rules
    }

    fn completed_booking() -> Booking {
        let now = Utc::now();
        let mut booking = Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            now - chrono::Duration::hours(2),
            2,
            14_000,
            2_000,
            None,
            now - chrono::Duration::days(1),
        );
        booking.status = BookingStatus::Completed;
        booking.completed_at = Some(now);
        booking.actual_duration_hours = Some(2);
        booking
    }

    async fn gateway_with(
        authority: Arc<ScriptedAuthority>,
        rules: BusinessRules,
        booking: &Booking,
    ) -> (ValidationGateway, Arc<MemoryValidationStore>, Arc<RecordingNotifier>) {
        let store = Arc::new(MemoryValidationStore::new());
        store
            .open(&ValidationTask::open(booking.id, Utc::now()))
            .await
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = ValidationGateway::new(
            authority,
            store.clone(),
            notifier.clone(),
            Arc::new(SystemClock),
            rules,
        );
        (gateway, store, notifier)
    }

    #[tokio::test]
    async fn test_success_validates_and_logs_hours() {
        let booking = completed_booking();
        let authority = ScriptedAuthority::new(vec![ScriptedAuthority::ok("PROT-77")]);
        let (gateway, store, _) = gateway_with(authority.clone(), rules(), &booking).await;

        let state = gateway.run_certification(&booking).await.unwrap();
        assert_eq!(state, ValidationState::Validated);
        assert_eq!(authority.calls(), 1);

        let task = store.get(booking.id).await.unwrap().unwrap();
        assert_eq!(task.protocol_id.as_deref(), Some("PROT-77"));
        assert_eq!(store.certified_hours(booking.learner_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_elapsed_deadline_goes_straight_to_review() {
        let booking = completed_booking();
        let mut rules = rules();
        rules.certification.attempt_timeout_secs = 0;
        let authority = ScriptedAuthority::hanging();
        let (gateway, store, _) = gateway_with(authority.clone(), rules, &booking).await;

        let state = gateway.run_certification(&booking).await.unwrap();
        assert_eq!(state, ValidationState::RequiresManualReview);
        // One attempt, no retry after a timeout.
        assert_eq!(authority.calls(), 1);
        let task = store.get(booking.id).await.unwrap().unwrap();
        assert_eq!(task.attempt, 0);
    }

    #[tokio::test]
    async fn test_authority_reported_timeout_no_retry() {
        let booking = completed_booking();
        let authority = ScriptedAuthority::new(vec![Err(AuthorityError::Timeout)]);
        let (gateway, _, _) = gateway_with(authority.clone(), rules(), &booking).await;

        let state = gateway.run_certification(&booking).await.unwrap();
        assert_eq!(state, ValidationState::RequiresManualReview);
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_then_review() {
        let booking = completed_booking();
        let authority = ScriptedAuthority::new(vec![
            Err(AuthorityError::Transient("503".into())),
            Err(AuthorityError::Transient("503".into())),
            Err(AuthorityError::Transient("503".into())),
        ]);
        let (gateway, store, _) = gateway_with(authority.clone(), rules(), &booking).await;

        let state = gateway.run_certification(&booking).await.unwrap();
        assert_eq!(state, ValidationState::RequiresManualReview);
        assert_eq!(authority.calls(), 3);
        let task = store.get(booking.id).await.unwrap().unwrap();
        assert_eq!(task.attempt, 3);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let booking = completed_booking();
        let authority = ScriptedAuthority::new(vec![
            Err(AuthorityError::Transient("connection reset".into())),
            ScriptedAuthority::ok("PROT-2"),
        ]);
        let (gateway, store, _) = gateway_with(authority.clone(), rules(), &booking).await;

        let state = gateway.run_certification(&booking).await.unwrap();
        assert_eq!(state, ValidationState::Validated);
        assert_eq!(authority.calls(), 2);
        let task = store.get(booking.id).await.unwrap().unwrap();
        assert_eq!(task.attempt, 1);
    }

    #[tokio::test]
    async fn test_permanent_error_reviews_immediately() {
        let booking = completed_booking();
        let authority =
            ScriptedAuthority::new(vec![Err(AuthorityError::Permanent("unknown instructor".into()))]);
        let (gateway, store, _) = gateway_with(authority.clone(), rules(), &booking).await;

        let state = gateway.run_certification(&booking).await.unwrap();
        assert_eq!(state, ValidationState::RequiresManualReview);
        assert_eq!(authority.calls(), 1);
        let task = store.get(booking.id).await.unwrap().unwrap();
        assert_eq!(task.failure_reason.as_deref(), Some("unknown instructor"));
    }

    #[tokio::test]
    async fn test_redelivery_leaves_terminal_task_alone() {
        let booking = completed_booking();
        let authority = ScriptedAuthority::new(vec![ScriptedAuthority::ok("PROT-1")]);
        let (gateway, store, _) = gateway_with(authority.clone(), rules(), &booking).await;

        gateway.run_certification(&booking).await.unwrap();
        let state = gateway.run_certification(&booking).await.unwrap();
        assert_eq!(state, ValidationState::Validated);
        // No second authority call, no double-counted hours.
        assert_eq!(authority.calls(), 1);
        assert_eq!(store.certified_hours(booking.learner_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_manual_override_records_authorizer() {
        let booking = completed_booking();
        let authority = ScriptedAuthority::new(vec![Err(AuthorityError::Timeout)]);
        let (gateway, store, _) = gateway_with(authority, rules(), &booking).await;

        gateway.run_certification(&booking).await.unwrap();

        let admin = Uuid::new_v4();
        let state = gateway.override_validated(&booking, admin).await.unwrap();
        assert_eq!(state, ValidationState::Validated);

        let task = store.get(booking.id).await.unwrap().unwrap();
        assert_eq!(task.validated_by, Some(admin));
        assert_eq!(store.certified_hours(booking.learner_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_manual_override_requires_review_state() {
        let booking = completed_booking();
        let authority = ScriptedAuthority::new(vec![]);
        let (gateway, _, _) = gateway_with(authority, rules(), &booking).await;

        let err = gateway
            .override_validated(&booking, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_goal_notification_fires_on_crossing() {
        let mut rules = rules();
        rules.certified_hours_goal = 4;

        let learner = Uuid::new_v4();
        let mut first = completed_booking();
        first.learner_id = learner;
        let mut second = completed_booking();
        second.learner_id = learner;

        let store = Arc::new(MemoryValidationStore::new());
        store
            .open(&ValidationTask::open(first.id, Utc::now()))
            .await
            .unwrap();
        store
            .open(&ValidationTask::open(second.id, Utc::now()))
            .await
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = ValidationGateway::new(
            ScriptedAuthority::new(vec![]),
            store.clone(),
            notifier.clone(),
            Arc::new(SystemClock),
            rules,
        );

        gateway.run_certification(&first).await.unwrap();
        {
            let sent = notifier.sent.lock().unwrap();
            assert!(!sent.iter().any(|(_, t)| t == "logbook_goal_reached"));
        }

        gateway.run_certification(&second).await.unwrap();
        let sent = notifier.sent.lock().unwrap();
        let goal_hits: Vec<_> = sent
            .iter()
            .filter(|(u, t)| *u == learner && t == "logbook_goal_reached")
            .collect();
        assert_eq!(goal_hits.len(), 1);
        assert_eq!(store.certified_hours(learner).await.unwrap(), 4);
    }
}
