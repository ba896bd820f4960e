use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::FieldName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Transport,
    Rejected,
    InFlight,
    Detached,
}

/// Presentable failure: what went wrong and the text to show for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub code: ErrorCode,
    pub message: String,
}

impl FailureReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    EmptyField(FieldName),
    #[error("email address is not valid")]
    InvalidEmail,
}

impl ValidationError {
    pub fn field(&self) -> FieldName {
        match self {
            ValidationError::EmptyField(field) => *field,
            ValidationError::InvalidEmail => FieldName::Email,
        }
    }
}

impl From<&ValidationError> for FailureReport {
    fn from(value: &ValidationError) -> Self {
        Self::new(ErrorCode::Validation, value.to_string())
    }
}
