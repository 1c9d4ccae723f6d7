use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tandem_core::money::{split_bps, Cents};
use tandem_core::payment::ChargeStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementState {
    Held,
    Released,
    Reversed,
}

/// Escrow record for one completed booking: captured funds split between
/// platform fee and instructor payout, held until `hold_until`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub booking_id: Uuid,
    pub instructor_id: Uuid,
    pub total_cents: Cents,
    pub platform_fee_bps: u32,
    pub platform_fee_cents: Cents,
    pub instructor_cents: Cents,
    pub hold_until: DateTime<Utc>,
    pub state: SettlementState,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl SettlementRecord {
    /// Fee is computed first (round half up); the instructor amount is the
    /// remainder, so the two always sum to the total exactly.
    pub fn open(
        booking_id: Uuid,
        instructor_id: Uuid,
        total_cents: Cents,
        platform_fee_bps: u32,
        hold_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let (platform_fee_cents, instructor_cents) = split_bps(total_cents, platform_fee_bps);
        Self {
            booking_id,
            instructor_id,
            total_cents,
            platform_fee_bps,
            platform_fee_cents,
            instructor_cents,
            hold_until,
            state: SettlementState::Held,
            created_at: now,
            released_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeKind {
    Deposit,
    Remainder,
    RescheduleFee,
}

impl ChargeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeKind::Deposit => "DEPOSIT",
            ChargeKind::Remainder => "REMAINDER",
            ChargeKind::RescheduleFee => "RESCHEDULE_FEE",
        }
    }
}

/// One charge opened against the gateway. `(booking_id, kind, seq)` is the
/// settlement idempotency key; `seq` is the reschedule count at charge time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub intent_id: String,
    pub booking_id: Uuid,
    pub kind: ChargeKind,
    pub seq: i32,
    pub amount_cents: Cents,
    pub method: String,
    pub status: ChargeStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Refund guard: at most one refund is issued per booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRecord {
    pub booking_id: Uuid,
    pub amount_cents: Cents,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_split_round_half_up() {
        let now = Utc::now();
        let record = SettlementRecord::open(
            Uuid::new_v4(),
            Uuid::new_v4(),
            14_000,
            1_500,
            now + chrono::Duration::hours(24),
            now,
        );
        assert_eq!(record.platform_fee_cents, 2_100);
        assert_eq!(record.instructor_cents, 11_900);
        assert_eq!(
            record.platform_fee_cents + record.instructor_cents,
            record.total_cents
        );
    }

    #[test]
    fn test_split_is_exact_for_awkward_totals() {
        let now = Utc::now();
        for total in [1, 3, 99, 12_345, 99_999] {
            let record = SettlementRecord::open(
                Uuid::new_v4(),
                Uuid::new_v4(),
                total,
                1_500,
                now,
                now,
            );
            assert_eq!(
                record.platform_fee_cents + record.instructor_cents,
                total
            );
        }
    }
}
