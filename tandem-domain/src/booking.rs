use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tandem_core::money::{apply_bps, Cents};

use crate::slot::SlotKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Requested,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Requested => "REQUESTED",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Unpaid,
    DepositPaid,
    FullyPaid,
    Refunded,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Unpaid => "UNPAID",
            PaymentState::DepositPaid => "DEPOSIT_PAID",
            PaymentState::FullyPaid => "FULLY_PAID",
            PaymentState::Refunded => "REFUNDED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Learner,
    Instructor,
    Admin,
    System,
}

/// A scheduled paid lesson between a learner and an instructor.
///
/// Status only moves forward; Cancelled is absorbing. The deposit/remainder
/// split always sums to the price exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub instructor_id: Uuid,
    pub scheduled_start: DateTime<Utc>,
    pub duration_hours: i32,
    pub slot_key: SlotKey,
    pub status: BookingStatus,
    pub payment_status: PaymentState,
    pub price_cents: Cents,
    pub deposit_cents: Cents,
    pub remaining_cents: Cents,
    pub reschedule_count: i32,
    /// Hour-package size this lesson was sold under, when part of a package.
    pub package_hours: Option<i32>,
    /// Instructor-reported duration, set at completion.
    pub actual_duration_hours: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
}

impl Booking {
    pub fn new(
        learner_id: Uuid,
        instructor_id: Uuid,
        scheduled_start: DateTime<Utc>,
        duration_hours: i32,
        price_cents: Cents,
        deposit_bps: u32,
        package_hours: Option<i32>,
        now: DateTime<Utc>,
    ) -> Self {
        let deposit_cents = apply_bps(price_cents, deposit_bps);
        Self {
            id: Uuid::new_v4(),
            learner_id,
            instructor_id,
            scheduled_start,
            duration_hours,
            slot_key: SlotKey::new(scheduled_start, duration_hours),
            status: BookingStatus::Requested,
            payment_status: PaymentState::Unpaid,
            price_cents,
            deposit_cents,
            remaining_cents: price_cents - deposit_cents,
            reschedule_count: 0,
            package_hours,
            actual_duration_hours: None,
            created_at: now,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            BookingStatus::Requested | BookingStatus::Confirmed
        )
    }

    /// Hours booked under the fee tier: the package size when the lesson was
    /// sold as a package, else the lesson's own duration.
    pub fn fee_tier_hours(&self) -> i32 {
        self.package_hours.unwrap_or(self.duration_hours)
    }

    /// Duration the authority certifies: the instructor-reported duration,
    /// falling back to the scheduled one.
    pub fn certified_duration_hours(&self) -> i32 {
        self.actual_duration_hours.unwrap_or(self.duration_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_split_sums_to_price() {
        let now = Utc::now();
        for price in [1, 99, 101, 14_000, 33_333] {
            let booking = Booking::new(
                Uuid::new_v4(),
                Uuid::new_v4(),
                now + chrono::Duration::days(2),
                2,
                price,
                2_000,
                None,
                now,
            );
            assert_eq!(booking.deposit_cents + booking.remaining_cents, price);
        }
    }

    #[test]
    fn test_standard_deposit_split() {
        let now = Utc::now();
        let booking = Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            now + chrono::Duration::days(1),
            2,
            14_000,
            2_000,
            None,
            now,
        );
        assert_eq!(booking.deposit_cents, 2_800);
        assert_eq!(booking.remaining_cents, 11_200);
    }
}
