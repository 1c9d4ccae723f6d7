use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use tandem_domain::booking::BookingStatus;
use tandem_domain::deadline::DeadlineKind;
use tandem_domain::events::BookingEvent;
use tandem_domain::repository::DeadlineStore;
use tandem_domain::validation::ValidationState;

use crate::state::AppState;

const DUE_BATCH: usize = 50;

/// Due-deadline poller: the Clock collaborator. Fires due records
/// at-least-once; every handler effect carries its own compare-and-set
/// guard, so a crash between effect and `mark_processed` only costs a
/// harmless redelivery.
pub async fn start_deadline_worker(state: AppState, deadlines: Arc<dyn DeadlineStore>) {
    let interval = Duration::from_secs(state.rules.poller_interval_secs);
    info!("Deadline worker started, polling every {:?}", interval);

    loop {
        sleep(interval).await;
        let due = match deadlines.due(Utc::now(), DUE_BATCH).await {
            Ok(due) => due,
            Err(e) => {
                error!("Deadline poll failed: {}", e);
                continue;
            }
        };
        for record in due {
            let outcome = match record.kind {
                DeadlineKind::AcceptanceTimeout => {
                    match state.engine.expire_acceptance(record.subject_id).await {
                        Ok(true) => {
                            state.metrics.transition("acceptance_timeout");
                            Ok(())
                        }
                        Ok(false) => Ok(()), // lost a legitimate race
                        Err(e) => Err(e),
                    }
                }
                DeadlineKind::PaymentRelease => {
                    match state.ledger.release(record.subject_id).await {
                        Ok(true) => {
                            state.metrics.releases.inc();
                            Ok(())
                        }
                        Ok(false) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
            };
            match outcome {
                Ok(()) => {
                    let _ = deadlines
                        .mark_processed(record.subject_id, record.kind)
                        .await;
                }
                Err(e) => {
                    // Left unprocessed; the next poll redelivers.
                    error!(
                        "Deadline {:?} for {} failed, will retry: {}",
                        record.kind, record.subject_id, e
                    );
                }
            }
        }
    }
}

/// Side-effect worker: consumes lifecycle events and runs the collaborator
/// orchestration that must never block a request thread.
pub async fn start_event_worker(state: AppState) {
    let mut rx = state.bus.subscribe();
    info!("Event worker started");

    loop {
        match rx.recv().await {
            Ok(BookingEvent::Completed { booking_id, .. }) => {
                let booking = match state.engine.get(booking_id).await {
                    Ok(b) => b,
                    Err(e) => {
                        error!("Completed event for unknown booking {}: {}", booking_id, e);
                        continue;
                    }
                };
                if let Err(e) = state.ledger.charge_remainder(&booking).await {
                    warn!("Remainder charge for booking {} failed: {}", booking_id, e);
                }
                match state.validation.run_certification(&booking).await {
                    Ok(ValidationState::Validated) => state.metrics.certification("validated"),
                    Ok(ValidationState::RequiresManualReview) => {
                        state.metrics.certification("manual_review")
                    }
                    Ok(ValidationState::Pending) => {}
                    Err(e) => {
                        error!("Certification for booking {} failed: {}", booking_id, e);
                    }
                }
            }
            Ok(BookingEvent::DepositFailed { booking_id, status }) => {
                info!(
                    "Deposit for booking {} resolved {}, cancelling",
                    booking_id, status
                );
                let cancelled = state
                    .engine
                    .system_cancel(
                        booking_id,
                        "deposit payment failed",
                        &[BookingStatus::Requested, BookingStatus::Confirmed],
                    )
                    .await;
                match cancelled {
                    Ok(true) => state.metrics.transition("deposit_failed_cancel"),
                    Ok(false) => {}
                    Err(e) => error!(
                        "Deposit-failure cancel for booking {} failed: {}",
                        booking_id, e
                    ),
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!("Event worker lagged, {} events dropped", missed);
            }
            Err(RecvError::Closed) => {
                info!("Event bus closed, worker stopping");
                break;
            }
        }
    }
}
