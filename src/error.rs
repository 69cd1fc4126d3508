use thiserror::Error;

/// Failures the simulation core can report.
///
/// `DataError` and `NotReady` are recoverable: callers fall back to the
/// closed-form models. `InvariantViolation` means the engine produced an
/// impossible state and the current tick must not be trusted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("data error: {0}")]
    DataError(String),

    #[error("{0} is not ready")]
    NotReady(&'static str),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl SimError {
    pub fn data(msg: impl Into<String>) -> Self {
        SimError::DataError(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        SimError::InvariantViolation(msg.into())
    }
}

pub type SimResult<T> = Result<T, SimError>;
