use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tandem_core::money::Cents;

/// Instructor balance. `available_cents` may go negative under penalties;
/// `penalties_cents` is a monotonic counter kept for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub instructor_id: Uuid,
    pub available_cents: Cents,
    pub penalties_cents: Cents,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn empty(instructor_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            instructor_id,
            available_cents: 0,
            penalties_cents: 0,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Credit,
    Penalty,
    Compensation,
    Payout,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "CREDIT",
            TransactionKind::Penalty => "PENALTY",
            TransactionKind::Compensation => "COMPENSATION",
            TransactionKind::Payout => "PAYOUT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub kind: TransactionKind,
    pub amount_cents: Cents,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn new(
        instructor_id: Uuid,
        booking_id: Option<Uuid>,
        kind: TransactionKind,
        amount_cents: Cents,
        note: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instructor_id,
            booking_id,
            kind,
            amount_cents,
            note: note.into(),
            created_at: now,
        }
    }
}
