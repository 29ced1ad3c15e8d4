use thiserror::Error;

use super::ProberState;

/// Errors that can occur while building or running a prober
#[derive(Error, Debug)]
pub enum ProberError {
    #[error("unsupported prober kind: {0}")]
    UnsupportedProberKind(String),

    #[error("invalid descriptor for prober '{prober}': {reason}")]
    InvalidDescriptor { prober: String, reason: String },

    #[error("invalid prober identity: {0}")]
    InvalidIdentity(String),

    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("probe execution failed: {0}")]
    ProbeExecutionFailed(String),

    #[error("cannot {stage} a prober in state {state}")]
    InvalidState {
        stage: &'static str,
        state: ProberState,
    },
}

impl ProberError {
    /// Whether the failure happened before any connection was acquired
    pub fn is_pre_connect(&self) -> bool {
        matches!(
            self,
            ProberError::UnsupportedProberKind(_)
                | ProberError::InvalidDescriptor { .. }
                | ProberError::InvalidIdentity(_)
                | ProberError::ConnectionFailed { .. }
        )
    }
}
