pub mod clock;
pub mod config;
pub mod money;
pub mod notify;
pub mod payment;
pub mod authority;
pub mod retry;

/// Error taxonomy shared by every engine component.
///
/// Synchronous transitions fail fast on Validation/Conflict/Authorization.
/// Timeout and Transient only ever originate from collaborator calls and are
/// handled by fallback/retry policy, never surfaced as a transition failure.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not authorized: {0}")]
    Authorization(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Collaborator timed out: {0}")]
    ExternalTimeout(String),
    #[error("Collaborator transient failure: {0}")]
    ExternalTransient(String),
    #[error("Fatal inconsistency, manual reconciliation required: {0}")]
    FatalInconsistency(String),
    #[error("Internal service error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
