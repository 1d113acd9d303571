use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Which entities a full sync covers and how many run at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Allowlist of entity names. Empty means every registered entity.
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default = "default_max_concurrent_entities")]
    pub max_concurrent_entities: usize,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_entities == 0 {
            return Err(ValidationError::MaxConcurrentEntitiesZero);
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            max_concurrent_entities: default_max_concurrent_entities(),
        }
    }
}

fn default_max_concurrent_entities() -> usize {
    1
}
