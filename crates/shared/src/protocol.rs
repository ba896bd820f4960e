use serde::{Deserialize, Serialize};

use crate::domain::ContactFields;

pub const DEFAULT_RELAY_ENDPOINT: &str = "https://api.web3forms.com/submit";
/// Shown when the relay rejects a submission without saying why.
pub const RELAY_FALLBACK_MESSAGE: &str = "Something went wrong!";

/// JSON body accepted by the form relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub access_key: String,
    pub name: String,
    pub email: String,
    pub message: String,
    pub subject: String,
}

impl RelayRequest {
    pub fn compose(access_key: impl Into<String>, fields: &ContactFields) -> Self {
        Self {
            access_key: access_key.into(),
            name: fields.name.trim().to_string(),
            email: fields.email.trim().to_string(),
            message: fields.message.trim().to_string(),
            subject: fields.subject(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RelayResponse {
    /// The relay's explanation, or the generic fallback when it sent none.
    pub fn rejection_message(&self) -> String {
        self.message
            .as_deref()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .unwrap_or(RELAY_FALLBACK_MESSAGE)
            .to_string()
    }
}
