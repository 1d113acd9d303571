use tracing::error;

use crate::notification::AlertSink;

/// Alert sink writing summaries to the error log, used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    async fn notify(&self, message: String) {
        error!(alert = %message, "sync run reported failures");
    }
}
