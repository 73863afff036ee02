use crate::cid::CidError;

/// Errors surfaced by the pinning engine on both the client and the
/// server side.
#[derive(thiserror::Error, Debug)]
pub enum PinningError {
    #[error("not found")]
    NotFound,
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("pinning failed: {0}")]
    PinningFailed(String),
    #[error("could not connect to any delegate")]
    ConnectionFailed,
    #[error("operation was cancelled")]
    Cancelled,
    #[error("timed out waiting for the pin to settle")]
    Timeout,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type PinningResult<T> = Result<T, PinningError>;

impl From<CidError> for PinningError {
    fn from(err: CidError) -> Self {
        PinningError::InvalidParameters(format!("invalid cid: {err}"))
    }
}

impl PinningError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PinningError::Cancelled)
    }
}
