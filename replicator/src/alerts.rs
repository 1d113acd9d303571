use bqsync::notification::{AlertSink, LogAlertSink, WebhookAlertSink};
use config::shared::AlertConfig;
use secrecy::ExposeSecret;
use tracing::info;

/// Alert sink chosen by configuration.
///
/// An enum keeps the orchestrator statically dispatched whichever sink is configured.
#[derive(Debug, Clone)]
pub enum ReplicatorAlertSink {
    Log(LogAlertSink),
    Webhook(WebhookAlertSink),
}

impl ReplicatorAlertSink {
    pub fn from_config(config: Option<&AlertConfig>) -> Self {
        match config {
            Some(config) => {
                info!(webhook_url = %config.webhook_url, "sending failure alerts to webhook");
                let api_key = config
                    .api_key
                    .as_ref()
                    .map(|key| key.expose_secret().to_owned());
                ReplicatorAlertSink::Webhook(WebhookAlertSink::new(
                    config.webhook_url.clone(),
                    api_key,
                ))
            }
            None => {
                info!("no alert webhook configured, failure alerts are only logged");
                ReplicatorAlertSink::Log(LogAlertSink)
            }
        }
    }
}

impl AlertSink for ReplicatorAlertSink {
    async fn notify(&self, message: String) {
        match self {
            ReplicatorAlertSink::Log(sink) => sink.notify(message).await,
            ReplicatorAlertSink::Webhook(sink) => sink.notify(message).await,
        }
    }
}
