use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Longest accepted incremental interval, one week.
pub const MAX_INCREMENTAL_INTERVAL_MINS: u64 = 7 * 24 * 60;

/// Timer cadences driving the full sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScheduleConfig {
    #[serde(default = "default_incremental_interval_mins")]
    pub incremental_interval_mins: u64,
    /// Wall-clock time of the daily run, in the zone given by `utc_offset_secs`. `None`
    /// disables the daily run.
    #[serde(default = "default_daily_sync_at")]
    pub daily_sync_at: Option<NaiveTime>,
    #[serde(default = "default_utc_offset_secs")]
    pub utc_offset_secs: i32,
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.incremental_interval_mins == 0 {
            return Err(ValidationError::IncrementalIntervalZero);
        }
        if self.incremental_interval_mins > MAX_INCREMENTAL_INTERVAL_MINS {
            return Err(ValidationError::IncrementalIntervalTooLarge {
                value: self.incremental_interval_mins,
                max: MAX_INCREMENTAL_INTERVAL_MINS,
            });
        }
        self.utc_offset()?;

        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ValidationError> {
        FixedOffset::east_opt(self.utc_offset_secs)
            .ok_or(ValidationError::InvalidUtcOffset(self.utc_offset_secs))
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            incremental_interval_mins: default_incremental_interval_mins(),
            daily_sync_at: default_daily_sync_at(),
            utc_offset_secs: default_utc_offset_secs(),
        }
    }
}

fn default_incremental_interval_mins() -> u64 {
    15
}

fn default_daily_sync_at() -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(23, 55, 0)
}

/// +05:30
fn default_utc_offset_secs() -> i32 {
    5 * 3600 + 30 * 60
}
