use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use config::shared::{ScheduleConfig, ValidationError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{error, info};

use crate::error::{ErrorKind, SyncResult};
use crate::notification::AlertSink;
use crate::schedule::{Cadence, ScheduleBinding, next_daily_run};
use crate::source::ChangeExtractor;
use crate::store::CursorStore;
use crate::sync_error;
use crate::warehouse::WarehouseClient;

struct DailyTimer {
    at: NaiveTime,
    offset: FixedOffset,
    deadline: DateTime<Utc>,
}

impl DailyTimer {
    fn new(at: NaiveTime, offset: FixedOffset) -> Self {
        Self {
            at,
            offset,
            deadline: next_daily_run(Utc::now(), at, offset),
        }
    }

    fn remaining(&self) -> Duration {
        (self.deadline - Utc::now()).to_std().unwrap_or_default()
    }

    /// Moves the deadline to the next day, measured from the deadline that just fired.
    fn advance(&mut self) {
        self.deadline = next_daily_run(self.deadline, self.at, self.offset);
    }

    fn cadence(&self) -> Cadence {
        Cadence::DailyAt {
            time: self.at,
            utc_offset_secs: self.offset.local_minus_utc(),
        }
    }
}

/// Drives the configured cadences until `shutdown` fires.
///
/// The incremental timer first fires one interval after start. Every run is spawned so the loop
/// keeps ticking while a run is in flight; overlapping ticks are skipped by the binding. Runs
/// still in flight at shutdown are awaited before returning.
pub async fn run_schedule<C, E, W, A>(
    binding: Arc<ScheduleBinding<C, E, W, A>>,
    schedule: &ScheduleConfig,
    mut shutdown: watch::Receiver<()>,
) -> SyncResult<()>
where
    C: CursorStore + Send + Sync + 'static,
    E: ChangeExtractor + Send + Sync + 'static,
    W: WarehouseClient + Send + Sync + 'static,
    A: AlertSink + Send + Sync + 'static,
{
    let invalid = |err: ValidationError| {
        sync_error!(
            ErrorKind::ConfigError,
            "Invalid schedule configuration",
            err.to_string(),
            source: err
        )
    };
    schedule.validate().map_err(invalid)?;
    let offset = schedule.utc_offset().map_err(invalid)?;

    let incremental = Cadence::Every {
        minutes: schedule.incremental_interval_mins,
    };
    let period = Duration::from_secs(schedule.incremental_interval_mins * 60);
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut daily = schedule
        .daily_sync_at
        .map(|at| DailyTimer::new(at, offset));

    info!(
        cadences = ?Cadence::from_config(schedule),
        next_daily_run = ?daily.as_ref().map(|timer| timer.deadline),
        "starting sync schedule"
    );

    let mut runs = JoinSet::new();
    loop {
        let daily_remaining = daily
            .as_ref()
            .map(DailyTimer::remaining)
            .unwrap_or_default();

        tokio::select! {
            _ = shutdown.changed() => {
                info!("shutdown requested, stopping sync schedule");
                break;
            }
            _ = interval.tick() => {
                spawn_run(&mut runs, &binding, incremental);
            }
            _ = sleep(daily_remaining), if daily.is_some() => {
                if let Some(timer) = daily.as_mut() {
                    spawn_run(&mut runs, &binding, timer.cadence());
                    timer.advance();
                    info!(next_daily_run = %timer.deadline, "scheduled next daily sync");
                }
            }
            Some(result) = runs.join_next(), if !runs.is_empty() => {
                if let Err(err) = result {
                    error!(error = %err, "scheduled sync task failed");
                }
            }
        }
    }

    while let Some(result) = runs.join_next().await {
        if let Err(err) = result {
            error!(error = %err, "scheduled sync task failed during shutdown");
        }
    }
    info!("sync schedule stopped");

    Ok(())
}

fn spawn_run<C, E, W, A>(
    runs: &mut JoinSet<()>,
    binding: &Arc<ScheduleBinding<C, E, W, A>>,
    cadence: Cadence,
) where
    C: CursorStore + Send + Sync + 'static,
    E: ChangeExtractor + Send + Sync + 'static,
    W: WarehouseClient + Send + Sync + 'static,
    A: AlertSink + Send + Sync + 'static,
{
    let binding = binding.clone();
    runs.spawn(async move {
        binding.run_scheduled(cadence).await;
    });
}
