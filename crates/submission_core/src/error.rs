use shared::error::{ErrorCode, FailureReport};
pub use shared::error::ValidationError;
use thiserror::Error;

/// Shown for any failure where the relay never produced a usable answer.
pub const TRANSPORT_FALLBACK_MESSAGE: &str =
    "Transmission failed: the relay could not be reached. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("relay transport failure: {0}")]
    Transport(String),
    #[error("relay rejected submission: {0}")]
    Rejected(String),
}

impl RelayError {
    /// Text for the error banner. Transport details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Transport(_) => TRANSPORT_FALLBACK_MESSAGE.to_string(),
            RelayError::Rejected(message) => message.clone(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Transport(_) => ErrorCode::Transport,
            RelayError::Rejected(_) => ErrorCode::Rejected,
        }
    }
}

impl From<&RelayError> for FailureReport {
    fn from(value: &RelayError) -> Self {
        Self::new(value.code(), value.user_message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("invalid form input: {0}")]
    Validation(#[from] ValidationError),
    #[error("a submission is already in flight")]
    InFlight,
    #[error("submission controller has been torn down")]
    Detached,
}

impl From<&SubmitError> for FailureReport {
    fn from(value: &SubmitError) -> Self {
        match value {
            SubmitError::Validation(err) => err.into(),
            SubmitError::InFlight => Self::new(ErrorCode::InFlight, value.to_string()),
            SubmitError::Detached => Self::new(ErrorCode::Detached, value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("form inputs are locked while a submission is in flight")]
    InputLocked,
    #[error("submission controller has been torn down")]
    Detached,
}
