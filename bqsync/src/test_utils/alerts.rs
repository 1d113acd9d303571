use std::sync::Arc;

use tokio::sync::Mutex;

use crate::notification::AlertSink;

/// Alert sink keeping every message it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlertSink {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }
}

impl AlertSink for RecordingAlertSink {
    async fn notify(&self, message: String) {
        self.messages.lock().await.push(message);
    }
}
