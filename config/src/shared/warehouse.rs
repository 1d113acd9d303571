use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Destination warehouse selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseConfig {
    /// Keeps tables in process memory. Intended for local runs and tests.
    Memory,
    BigQuery {
        project_id: String,
        dataset_id: String,
        /// Service account key JSON.
        service_account_key: SerializableSecretString,
    },
}

impl WarehouseConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let WarehouseConfig::BigQuery {
            project_id,
            dataset_id,
            ..
        } = self
        {
            if project_id.trim().is_empty() {
                return Err(ValidationError::EmptyBigQueryField("project_id"));
            }
            if dataset_id.trim().is_empty() {
                return Err(ValidationError::EmptyBigQueryField("dataset_id"));
            }
        }

        Ok(())
    }
}
