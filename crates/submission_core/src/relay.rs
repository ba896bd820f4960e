use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::ContactFields,
    protocol::{RelayRequest, RelayResponse},
};
use tracing::{debug, warn};

use crate::error::RelayError;

/// Outbound seam of the controller: delivers one submission to the form
/// relay and reports whether it was accepted.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn deliver(&self, fields: &ContactFields) -> Result<(), RelayError>;
}

pub struct HttpRelay {
    http: Client,
    endpoint: String,
    access_key: String,
}

impl HttpRelay {
    pub fn new(endpoint: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), endpoint, access_key)
    }

    pub fn with_client(
        http: Client,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            access_key: access_key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RelayTransport for HttpRelay {
    async fn deliver(&self, fields: &ContactFields) -> Result<(), RelayError> {
        let request = RelayRequest::compose(self.access_key.as_str(), fields);
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                warn!(endpoint = %self.endpoint, "relay: request failed: {err}");
                RelayError::Transport(err.to_string())
            })?;

        // The relay answers with a JSON verdict even on 4xx, so the body is
        // read before the status is judged.
        let status = response.status();
        let verdict: RelayResponse = response.json().await.map_err(|err| {
            warn!(
                endpoint = %self.endpoint,
                status = status.as_u16(),
                "relay: unreadable response: {err}"
            );
            RelayError::Transport(format!("unreadable relay response (status {status}): {err}"))
        })?;

        if verdict.success && status.is_success() {
            debug!(status = status.as_u16(), "relay: submission accepted");
            Ok(())
        } else {
            let message = verdict.rejection_message();
            warn!(status = status.as_u16(), %message, "relay: submission rejected");
            Err(RelayError::Rejected(message))
        }
    }
}

#[cfg(test)]
#[path = "tests/relay_tests.rs"]
mod tests;
