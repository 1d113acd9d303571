use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{
    AlertConfig, PgConnectionConfig, RetryConfig, ScheduleConfig, SyncConfig, ValidationError,
    WarehouseConfig,
};

/// Complete configuration of the replicator service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplicatorConfig {
    pub source: PgConnectionConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub alerts: Option<AlertConfig>,
}

impl ReplicatorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.warehouse.validate()?;
        self.schedule.validate()?;
        self.retry.validate()?;
        self.sync.validate()?;
        if let Some(alerts) = &self.alerts {
            alerts.validate()?;
        }

        Ok(())
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["sync.entities"];
}
