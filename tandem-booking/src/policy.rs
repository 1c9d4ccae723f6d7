use tandem_core::config::BusinessRules;
use tandem_core::money::{apply_bps, Cents};
use tandem_core::{CoreError, CoreResult};
use tandem_domain::booking::ActorRole;

/// What a cancellation costs whom. `refund_bps` applies to the amount the
/// learner actually paid; credit and penalty are instructor wallet moves
/// computed from the booking price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationOutcome {
    pub refund_bps: u32,
    pub instructor_credit_cents: Cents,
    pub instructor_penalty_cents: Cents,
    pub reason: String,
}

/// Pure cancellation policy.
///
/// | actor      | condition      | refund | instructor effect      |
/// |------------|----------------|--------|------------------------|
/// | learner    | < 24h to start | 100%   | none                   |
/// | learner    | >= 24h         | 50%    | credited half the price|
/// | instructor | < 12h to start | 100%   | debited the full price |
/// | instructor | >= 12h         | 100%   | none                   |
pub fn cancellation_policy(
    actor: ActorRole,
    hours_until_start: i64,
    price_cents: Cents,
    rules: &BusinessRules,
) -> CoreResult<CancellationOutcome> {
    match actor {
        ActorRole::Learner => {
            if hours_until_start < rules.learner_late_cancel_hours {
                Ok(CancellationOutcome {
                    refund_bps: 10_000,
                    instructor_credit_cents: 0,
                    instructor_penalty_cents: 0,
                    reason: "learner late cancellation".into(),
                })
            } else {
                Ok(CancellationOutcome {
                    refund_bps: 5_000,
                    instructor_credit_cents: apply_bps(price_cents, 5_000),
                    instructor_penalty_cents: 0,
                    reason: "learner early cancellation".into(),
                })
            }
        }
        ActorRole::Instructor => {
            if hours_until_start < rules.instructor_late_cancel_hours {
                Ok(CancellationOutcome {
                    refund_bps: 10_000,
                    instructor_credit_cents: 0,
                    instructor_penalty_cents: price_cents,
                    reason: "instructor late cancellation".into(),
                })
            } else {
                Ok(CancellationOutcome {
                    refund_bps: 10_000,
                    instructor_credit_cents: 0,
                    instructor_penalty_cents: 0,
                    reason: "instructor cancellation".into(),
                })
            }
        }
        other => Err(CoreError::Validation(format!(
            "{:?} cannot cancel through the policy",
            other
        ))),
    }
}

/// Reschedule fee: free the first time, a flat share of the booking price as
/// it stood entering the call on every later use. Not compounding.
pub fn reschedule_fee(
    prior_reschedules: i32,
    price_cents: Cents,
    rules: &BusinessRules,
) -> Cents {
    if prior_reschedules == 0 {
        0
    } else {
        apply_bps(price_cents, rules.reschedule_fee_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> BusinessRules {
        BusinessRules::default()
    }

    #[test]
    fn test_learner_late_cancel_full_refund() {
        let outcome =
            cancellation_policy(ActorRole::Learner, 10, 14_000, &rules()).unwrap();
        assert_eq!(outcome.refund_bps, 10_000);
        assert_eq!(outcome.instructor_credit_cents, 0);
        assert_eq!(outcome.instructor_penalty_cents, 0);
    }

    #[test]
    fn test_learner_early_cancel_splits_price() {
        let outcome =
            cancellation_policy(ActorRole::Learner, 30, 14_000, &rules()).unwrap();
        assert_eq!(outcome.refund_bps, 5_000);
        assert_eq!(outcome.instructor_credit_cents, 7_000);
        assert_eq!(outcome.instructor_penalty_cents, 0);
    }

    #[test]
    fn test_instructor_late_cancel_pays_full_penalty() {
        let outcome =
            cancellation_policy(ActorRole::Instructor, 5, 14_000, &rules()).unwrap();
        assert_eq!(outcome.refund_bps, 10_000);
        assert_eq!(outcome.instructor_penalty_cents, 14_000);
    }

    #[test]
    fn test_instructor_early_cancel_is_free() {
        let outcome =
            cancellation_policy(ActorRole::Instructor, 12, 14_000, &rules()).unwrap();
        assert_eq!(outcome.refund_bps, 10_000);
        assert_eq!(outcome.instructor_penalty_cents, 0);
    }

    #[test]
    fn test_boundary_is_inclusive_for_early_tier() {
        let at_24 = cancellation_policy(ActorRole::Learner, 24, 14_000, &rules()).unwrap();
        assert_eq!(at_24.refund_bps, 5_000);
        let at_23 = cancellation_policy(ActorRole::Learner, 23, 14_000, &rules()).unwrap();
        assert_eq!(at_23.refund_bps, 10_000);
    }

    #[test]
    fn test_admin_cannot_use_policy() {
        assert!(cancellation_policy(ActorRole::Admin, 10, 14_000, &rules()).is_err());
    }

    #[test]
    fn test_reschedule_fee_first_free_then_flat() {
        let r = rules();
        assert_eq!(reschedule_fee(0, 14_000, &r), 0);
        assert_eq!(reschedule_fee(1, 14_000, &r), 1_400);
        // Not cumulative: the third costs the same as the second.
        assert_eq!(reschedule_fee(2, 14_000, &r), 1_400);
    }
}
