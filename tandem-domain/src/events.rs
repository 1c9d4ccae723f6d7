use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tandem_core::money::Cents;
use tandem_core::payment::ChargeStatus;

use crate::booking::ActorRole;

/// Lifecycle events emitted by the engine and consumed by the side-effect
/// worker. Explicit emission, not storage-engine change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    Created {
        booking_id: Uuid,
        learner_id: Uuid,
        instructor_id: Uuid,
    },
    Confirmed {
        booking_id: Uuid,
        learner_id: Uuid,
    },
    Completed {
        booking_id: Uuid,
        learner_id: Uuid,
        instructor_id: Uuid,
        total_cents: Cents,
        remaining_cents: Cents,
    },
    Cancelled {
        booking_id: Uuid,
        by: ActorRole,
        reason: String,
    },
    Rescheduled {
        booking_id: Uuid,
        fee_cents: Cents,
    },
    DepositFailed {
        booking_id: Uuid,
        status: ChargeStatus,
    },
    SettlementReleased {
        booking_id: Uuid,
        instructor_id: Uuid,
        amount_cents: Cents,
    },
}

/// Event publication port. Publication must never fail the originating
/// transition; implementations log and swallow delivery errors.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: BookingEvent);
}

/// Sink that drops events, for tests that don't observe them.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn publish(&self, _event: BookingEvent) {}
}
