use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeadlineKind {
    AcceptanceTimeout,
    PaymentRelease,
}

impl DeadlineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadlineKind::AcceptanceTimeout => "ACCEPTANCE_TIMEOUT",
            DeadlineKind::PaymentRelease => "PAYMENT_RELEASE",
        }
    }
}

/// Persisted marker for a time-triggered transition. The poller delivers due
/// records at-least-once; consumption is idempotent via compare-and-set on
/// `processed`, and every handler effect carries its own status guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineRecord {
    pub subject_id: Uuid,
    pub kind: DeadlineKind,
    pub fires_at: DateTime<Utc>,
    pub processed: bool,
}

impl DeadlineRecord {
    pub fn schedule(subject_id: Uuid, kind: DeadlineKind, fires_at: DateTime<Utc>) -> Self {
        Self {
            subject_id,
            kind,
            fires_at,
            processed: false,
        }
    }
}
