use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationState {
    Pending,
    Validated,
    RequiresManualReview,
}

/// Certification task opened when a booking completes. Terminal states are
/// Validated and RequiresManualReview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationTask {
    pub booking_id: Uuid,
    pub attempt: u32,
    pub state: ValidationState,
    pub protocol_id: Option<String>,
    pub failure_reason: Option<String>,
    pub validated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ValidationTask {
    pub fn open(booking_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            booking_id,
            attempt: 0,
            state: ValidationState::Pending,
            protocol_id: None,
            failure_reason: None,
            validated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.state, ValidationState::Pending)
    }
}
