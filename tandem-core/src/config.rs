use serde::Deserialize;

/// Marketplace rules passed explicitly into the engine components.
///
/// Amount rates are integer basis points so cent arithmetic stays exact.
#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_deposit_bps")]
    pub deposit_bps: u32,
    #[serde(default = "default_platform_fee_bps")]
    pub platform_fee_bps: u32,
    #[serde(default = "default_package_fee_bps")]
    pub package_fee_bps: u32,
    #[serde(default = "default_package_hours_threshold")]
    pub package_hours_threshold: i32,
    #[serde(default = "default_acceptance_window_hours")]
    pub acceptance_window_hours: i64,
    #[serde(default = "default_release_hold_hours")]
    pub release_hold_hours: i64,
    #[serde(default = "default_learner_late_cancel_hours")]
    pub learner_late_cancel_hours: i64,
    #[serde(default = "default_instructor_late_cancel_hours")]
    pub instructor_late_cancel_hours: i64,
    #[serde(default = "default_reschedule_fee_bps")]
    pub reschedule_fee_bps: u32,
    #[serde(default = "default_intent_expiry_minutes")]
    pub intent_expiry_minutes: i64,
    #[serde(default = "default_certified_hours_goal")]
    pub certified_hours_goal: i32,
    #[serde(default)]
    pub certification: CertificationRules,
    #[serde(default = "default_poller_interval_secs")]
    pub poller_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CertificationRules {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_deposit_bps() -> u32 { 2_000 }
fn default_platform_fee_bps() -> u32 { 1_500 }
fn default_package_fee_bps() -> u32 { 1_000 }
fn default_package_hours_threshold() -> i32 { 20 }
fn default_acceptance_window_hours() -> i64 { 2 }
fn default_release_hold_hours() -> i64 { 24 }
fn default_learner_late_cancel_hours() -> i64 { 24 }
fn default_instructor_late_cancel_hours() -> i64 { 12 }
fn default_reschedule_fee_bps() -> u32 { 1_000 }
fn default_intent_expiry_minutes() -> i64 { 10 }
fn default_certified_hours_goal() -> i32 { 50 }
fn default_max_attempts() -> u32 { 3 }
fn default_attempt_timeout_secs() -> u64 { 10 }
fn default_backoff_base_ms() -> u64 { 500 }
fn default_poller_interval_secs() -> u64 { 30 }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            deposit_bps: default_deposit_bps(),
            platform_fee_bps: default_platform_fee_bps(),
            package_fee_bps: default_package_fee_bps(),
            package_hours_threshold: default_package_hours_threshold(),
            acceptance_window_hours: default_acceptance_window_hours(),
            release_hold_hours: default_release_hold_hours(),
            learner_late_cancel_hours: default_learner_late_cancel_hours(),
            instructor_late_cancel_hours: default_instructor_late_cancel_hours(),
            reschedule_fee_bps: default_reschedule_fee_bps(),
            intent_expiry_minutes: default_intent_expiry_minutes(),
            certified_hours_goal: default_certified_hours_goal(),
            certification: CertificationRules::default(),
            poller_interval_secs: default_poller_interval_secs(),
        }
    }
}

impl Default for CertificationRules {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}
