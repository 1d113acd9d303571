use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Webhook receiving failure summaries of sync runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AlertConfig {
    pub webhook_url: String,
    /// Sent as the `apikey` header when present.
    pub api_key: Option<SerializableSecretString>,
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = self.webhook_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ValidationError::InvalidWebhookUrl(self.webhook_url.clone()));
        }

        Ok(())
    }
}
