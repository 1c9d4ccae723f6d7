use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lesson data submitted to the transport authority for certification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationRecord {
    pub booking_id: Uuid,
    pub learner_id: Uuid,
    pub instructor_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub duration_hours: i32,
}

/// Positive certification outcome from the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationReceipt {
    pub protocol_id: String,
}

/// The gateway routes on the error class, so the authority port reports
/// typed failures instead of one opaque error.
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("Authority reported a timeout")]
    Timeout,
    #[error("Authority transient failure: {0}")]
    Transient(String),
    #[error("Authority rejected the record: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait ValidationAuthority: Send + Sync {
    /// Certify a completed lesson. Sync-with-timeout from the caller's view;
    /// the gateway wraps each attempt in its own deadline.
    async fn certify(
        &self,
        record: &CertificationRecord,
    ) -> Result<CertificationReceipt, AuthorityError>;
}

/// Authority stand-in for local runs and tests.
pub struct MockValidationAuthority;

#[async_trait]
impl ValidationAuthority for MockValidationAuthority {
    async fn certify(
        &self,
        record: &CertificationRecord,
    ) -> Result<CertificationReceipt, AuthorityError> {
        Ok(CertificationReceipt {
            protocol_id: format!("mock-cert-{}", record.booking_id.simple()),
        })
    }
}
