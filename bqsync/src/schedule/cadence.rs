use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};
use config::shared::ScheduleConfig;
use serde::Serialize;

/// A timer on which the full sync runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
    Every { minutes: u64 },
    /// Wall-clock time of day in a fixed UTC offset.
    DailyAt { time: NaiveTime, utc_offset_secs: i32 },
}

impl Cadence {
    /// Cadences configured by `config`, incremental first.
    pub fn from_config(config: &ScheduleConfig) -> Vec<Cadence> {
        let mut cadences = vec![Cadence::Every {
            minutes: config.incremental_interval_mins,
        }];
        if let Some(time) = config.daily_sync_at {
            cadences.push(Cadence::DailyAt {
                time,
                utc_offset_secs: config.utc_offset_secs,
            });
        }

        cadences
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Every { minutes } => write!(f, "every {minutes} minutes"),
            Cadence::DailyAt {
                time,
                utc_offset_secs,
            } => match FixedOffset::east_opt(*utc_offset_secs) {
                Some(offset) => write!(f, "daily at {} {offset}", time.format("%H:%M")),
                None => write!(f, "daily at {} ({utc_offset_secs}s)", time.format("%H:%M")),
            },
        }
    }
}

/// First instant strictly after `now` whose wall-clock time in `offset` is `at`.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local_now = now.with_timezone(&offset).naive_local();
    let mut candidate = local_now.date().and_time(at);
    if candidate <= local_now {
        candidate += TimeDelta::days(1);
    }

    // Fixed offsets have no gaps or folds, the local time maps to one instant.
    now + (candidate - local_now)
}
