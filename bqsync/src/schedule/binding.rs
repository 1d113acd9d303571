use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{ErrorKind, SyncResult};
use crate::notification::AlertSink;
use crate::schedule::Cadence;
use crate::schema::EntityListing;
use crate::source::ChangeExtractor;
use crate::store::{CursorStore, SyncCursor};
use crate::sync::{SyncOrchestrator, SyncRunReport};
use crate::sync_error;
use crate::warehouse::WarehouseClient;

/// Releases the in-flight flag when dropped, including on unwinding.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Snapshot returned by [`ScheduleBinding::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub in_flight: bool,
    pub last_report: Option<SyncRunReport>,
    pub cadences: Vec<Cadence>,
}

/// Single entry point to the orchestrator for both timers and operators.
///
/// At most one run, full or selective, is in flight at any time. A timer tick that finds a run
/// in flight is skipped, a manual trigger gets [`ErrorKind::SyncAlreadyRunning`].
#[derive(Debug)]
pub struct ScheduleBinding<C, E, W, A> {
    orchestrator: SyncOrchestrator<C, E, W, A>,
    cadences: Vec<Cadence>,
    in_flight: AtomicBool,
    last_report: RwLock<Option<SyncRunReport>>,
}

impl<C, E, W, A> ScheduleBinding<C, E, W, A>
where
    C: CursorStore + Sync,
    E: ChangeExtractor + Sync,
    W: WarehouseClient + Sync,
    A: AlertSink + Sync,
{
    pub fn new(orchestrator: SyncOrchestrator<C, E, W, A>, cadences: Vec<Cadence>) -> Self {
        Self {
            orchestrator,
            cadences,
            in_flight: AtomicBool::new(false),
            last_report: RwLock::new(None),
        }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator<C, E, W, A> {
        &self.orchestrator
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn last_report(&self) -> Option<SyncRunReport> {
        self.last_report.read().await.clone()
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            in_flight: self.is_in_flight(),
            last_report: self.last_report().await,
            cadences: self.cadences.clone(),
        }
    }

    /// Runs a full sync for a timer tick, or skips it when a run is already in flight.
    pub async fn run_scheduled(&self, cadence: Cadence) -> Option<SyncRunReport> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            warn!(%cadence, "previous sync still in flight, skipping scheduled run");
            return None;
        };

        info!(%cadence, "starting scheduled sync");
        let report = self.orchestrator.run_full_sync().await;
        self.store_report(&report).await;

        Some(report)
    }

    /// Runs a full sync now and returns its report.
    pub async fn trigger_full_sync(&self) -> SyncResult<SyncRunReport> {
        let _guard = self.acquire_for_manual_run()?;

        info!("starting manually triggered full sync");
        let report = self.orchestrator.run_full_sync().await;
        self.store_report(&report).await;

        Ok(report)
    }

    /// Runs a sync of `entity_names` now and returns its report.
    ///
    /// Unknown names are rejected before the in-flight check, so a bad request is reported as
    /// such even while another run is going on.
    pub async fn trigger_selective_sync<S: AsRef<str>>(
        &self,
        entity_names: &[S],
    ) -> SyncResult<SyncRunReport> {
        self.orchestrator.registry().resolve(entity_names)?;
        let _guard = self.acquire_for_manual_run()?;

        info!(
            entities = entity_names.len(),
            "starting manually triggered selective sync"
        );
        let report = self.orchestrator.run_selective_sync(entity_names).await?;
        self.store_report(&report).await;

        Ok(report)
    }

    pub fn list_entities(&self) -> EntityListing {
        self.orchestrator.registry().listing()
    }

    /// Every stored cursor, for entities that have synced at least once.
    pub async fn cursors(&self) -> SyncResult<Vec<SyncCursor>> {
        self.orchestrator.cursor_store().load_cursors().await
    }

    pub async fn cursor(&self, entity_name: &str) -> SyncResult<Option<SyncCursor>> {
        self.orchestrator.registry().schema_for(entity_name)?;
        self.orchestrator.cursor_store().load_cursor(entity_name).await
    }

    /// Forgets the cursor of `entity_name` so its next sync re-sends every row.
    ///
    /// Refused while a run is in flight, since the run would advance the cursor again.
    pub async fn reset_cursor(&self, entity_name: &str) -> SyncResult<()> {
        self.orchestrator.registry().schema_for(entity_name)?;
        let _guard = self.acquire_for_manual_run()?;

        self.orchestrator
            .cursor_store()
            .reset_cursor(entity_name)
            .await?;
        warn!(entity = entity_name, "cursor reset, entity will be fully re-synced");

        Ok(())
    }

    fn acquire_for_manual_run(&self) -> SyncResult<InFlightGuard<'_>> {
        InFlightGuard::acquire(&self.in_flight).ok_or_else(|| {
            sync_error!(
                ErrorKind::SyncAlreadyRunning,
                "A sync is already in flight"
            )
        })
    }

    async fn store_report(&self, report: &SyncRunReport) {
        *self.last_report.write().await = Some(report.clone());
    }
}
