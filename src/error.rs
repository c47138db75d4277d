use crate::gate::GateError;
use crate::provider::ProviderError;

/// Unified error type for link, reconciliation, and teardown operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The request itself is invalid (duplicate in-flight attempt, malformed
    /// payload). Rejected synchronously; never enters the state machine.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The provider failed. Transient cases were already retried at the
    /// gateway before this surfaces.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Gate(#[from] GateError),

    /// A storage read or write failed.
    #[error("storage failure: {0}")]
    Storage(#[source] anyhow::Error),

    /// A logic or data-consistency bug, e.g. a missing provider account
    /// after a login that claimed success. Never retried.
    #[error("invariant violated: {0}")]
    InternalInvariant(String),
}

impl LinkError {
    pub fn is_bad_request(&self) -> bool {
        matches!(self, LinkError::BadRequest(_))
    }
}

impl From<anyhow::Error> for LinkError {
    fn from(err: anyhow::Error) -> Self {
        LinkError::Storage(err)
    }
}
