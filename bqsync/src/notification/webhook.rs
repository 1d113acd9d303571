//! Webhook alerting.
//!
//! Summaries are posted as JSON together with a fingerprint of the failing entities and errors,
//! so repeated failures of the same kind can be grouped by the receiver.

use std::error::Error;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::notification::AlertSink;

/// Request body posted to the alert webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRequest {
    pub message: String,
    /// Stable hash of the failure lines, independent of run id and timestamp.
    pub fingerprint: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    webhook_url: String,
    api_key: Option<String>,
}

impl WebhookAlertSink {
    pub fn new(webhook_url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            webhook_url,
            api_key,
        }
    }

    async fn send(&self, request: &AlertRequest) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut builder = self
            .client
            .post(&self.webhook_url)
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("apikey", api_key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read body>".to_string());
            error!(%status, %body, "alert webhook request failed");

            return Err(format!("webhook returned status {status}: {body}").into());
        }

        Ok(())
    }
}

impl AlertSink for WebhookAlertSink {
    async fn notify(&self, message: String) {
        let request = AlertRequest {
            fingerprint: compute_alert_fingerprint(&message),
            message,
            source: env!("CARGO_PKG_NAME").to_string(),
        };

        info!(fingerprint = %request.fingerprint, "sending sync failure alert");

        if let Err(err) = self.send(&request).await {
            warn!(
                error = %err,
                fingerprint = %request.fingerprint,
                "failed to send sync failure alert, continuing without it"
            );
        }
    }
}

/// SHA-256 of every line after the header line of a failure summary.
pub fn compute_alert_fingerprint(message: &str) -> String {
    let mut hasher = Sha256::new();
    for line in message.lines().skip(1) {
        hasher.update(line.trim().as_bytes());
        hasher.update(b"\n");
    }

    format!("{:x}", hasher.finalize())
}
