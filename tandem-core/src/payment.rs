use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Cents;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl std::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChargeStatus::Pending => "PENDING",
            ChargeStatus::Approved => "APPROVED",
            ChargeStatus::Rejected => "REJECTED",
            ChargeStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// A charge intent opened with the provider. Resolution arrives later,
/// at-least-once, through the payments webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeIntent {
    pub id: String, // Provider's ID (e.g., pi_123)
    pub booking_id: Uuid,
    pub amount_cents: Cents,
    pub method: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway timed out")]
    Timeout,
    #[error("Gateway transient failure: {0}")]
    Transient(String),
    #[error("Gateway rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a charge intent with the provider.
    async fn charge_intent(
        &self,
        booking_id: Uuid,
        amount_cents: Cents,
        method: &str,
    ) -> Result<ChargeIntent, GatewayError>;

    /// Request a refund against a previously approved charge.
    async fn refund(&self, payment_ref: &str, amount_cents: Cents) -> Result<(), GatewayError>;

    /// Pay out from the platform to an instructor's destination account.
    async fn payout(&self, destination: Uuid, amount_cents: Cents) -> Result<(), GatewayError>;
}

/// Gateway stand-in for local runs and tests.
pub struct MockPaymentGateway {
    pub intent_ttl_minutes: i64,
}

impl MockPaymentGateway {
    pub fn new(intent_ttl_minutes: i64) -> Self {
        Self { intent_ttl_minutes }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge_intent(
        &self,
        booking_id: Uuid,
        amount_cents: Cents,
        method: &str,
    ) -> Result<ChargeIntent, GatewayError> {
        let now = Utc::now();
        Ok(ChargeIntent {
            // Encode booking_id in the intent id so the mock can "remember" it
            id: format!("mock_pi_{}_{}", booking_id.simple(), amount_cents),
            booking_id,
            amount_cents,
            method: method.to_string(),
            expires_at: now + Duration::minutes(self.intent_ttl_minutes),
            created_at: now,
        })
    }

    async fn refund(&self, payment_ref: &str, amount_cents: Cents) -> Result<(), GatewayError> {
        if payment_ref == "fail-refund" {
            return Err(GatewayError::Transient("simulated refund failure".into()));
        }
        tracing::info!("Mock refund of {} against {}", amount_cents, payment_ref);
        Ok(())
    }

    async fn payout(&self, destination: Uuid, amount_cents: Cents) -> Result<(), GatewayError> {
        tracing::info!("Mock payout of {} to {}", amount_cents, destination);
        Ok(())
    }
}
