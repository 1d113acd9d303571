use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, stream};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::SyncResult;
use crate::notification::AlertSink;
use crate::schema::{EntityDescriptor, SchemaRegistry};
use crate::source::ChangeExtractor;
use crate::store::CursorStore;
use crate::sync::{EntityPhase, EntityReport, EntityStatus, SyncMode, SyncRunReport};
use crate::types::max_row_id;
use crate::warehouse::{WarehouseClient, WarehouseWriter};

/// Current phase of one entity, logged on every transition.
struct PhaseTracker<'a> {
    run_id: Uuid,
    entity: &'a str,
    phase: EntityPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(run_id: Uuid, entity: &'a str) -> Self {
        Self {
            run_id,
            entity,
            phase: EntityPhase::Pending,
        }
    }

    fn enter(&mut self, next: EntityPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid phase transition {} -> {next}",
            self.phase
        );
        debug!(
            run_id = %self.run_id,
            entity = self.entity,
            from = %self.phase,
            to = %next,
            "entity phase transition"
        );
        self.phase = next;
    }
}

/// Runs extract, write and cursor advance for every selected entity.
///
/// The orchestrator holds no per-run state, so concurrent calls never share anything but the
/// collaborators. Preventing two runs over the same entities is the caller's job, see
/// [`crate::schedule::ScheduleBinding`].
#[derive(Debug)]
pub struct SyncOrchestrator<C, E, W, A> {
    registry: Arc<SchemaRegistry>,
    cursor_store: C,
    extractor: E,
    writer: WarehouseWriter<W>,
    alert_sink: A,
    max_concurrent_entities: usize,
}

impl<C, E, W, A> SyncOrchestrator<C, E, W, A>
where
    C: CursorStore + Sync,
    E: ChangeExtractor + Sync,
    W: WarehouseClient + Sync,
    A: AlertSink + Sync,
{
    pub fn new(
        registry: Arc<SchemaRegistry>,
        cursor_store: C,
        extractor: E,
        writer: WarehouseWriter<W>,
        alert_sink: A,
    ) -> Self {
        Self {
            registry,
            cursor_store,
            extractor,
            writer,
            alert_sink,
            max_concurrent_entities: 1,
        }
    }

    /// Number of entities processed at the same time, at least one.
    pub fn with_max_concurrent_entities(mut self, max_concurrent_entities: usize) -> Self {
        self.max_concurrent_entities = max_concurrent_entities.max(1);
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn cursor_store(&self) -> &C {
        &self.cursor_store
    }

    /// Syncs every registered entity.
    pub async fn run_full_sync(&self) -> SyncRunReport {
        let entities = self.registry.descriptors().to_vec();
        self.run(SyncMode::Full, entities).await
    }

    /// Syncs only `entity_names`.
    ///
    /// Every name is checked against the registry before anything is read or written, so an
    /// unknown name fails the whole call with [`crate::error::ErrorKind::UnknownEntity`] and zero I/O.
    /// Registered entities outside the selection are reported as skipped.
    pub async fn run_selective_sync<S: AsRef<str>>(
        &self,
        entity_names: &[S],
    ) -> SyncResult<SyncRunReport> {
        let entities = self.registry.resolve(entity_names)?;
        Ok(self.run(SyncMode::Selective, entities).await)
    }

    async fn run(&self, mode: SyncMode, entities: Vec<Arc<EntityDescriptor>>) -> SyncRunReport {
        let run_id = Uuid::new_v4();
        let mut report = SyncRunReport::new(run_id, mode, Utc::now());

        info!(
            %run_id,
            %mode,
            entities = entities.len(),
            max_concurrent_entities = self.max_concurrent_entities,
            "starting sync run"
        );

        let tasks: Vec<_> = entities
            .iter()
            .map(|entity| self.sync_entity(run_id, entity))
            .collect();
        let results: Vec<(String, EntityReport)> = stream::iter(tasks)
            .buffered(self.max_concurrent_entities)
            .collect()
            .await;
        report.entities.extend(results);

        if mode == SyncMode::Selective {
            for name in self.registry.entity_names() {
                report
                    .entities
                    .entry(name)
                    .or_insert_with(EntityReport::skipped);
            }
        }
        report.finished_at = Utc::now();

        info!(
            %run_id,
            %mode,
            rows = report.total_rows(),
            failed = report.count(EntityStatus::Failed),
            duration_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "sync run finished"
        );

        if let Some(summary) = report.failure_summary() {
            self.alert_sink.notify(summary).await;
        }

        report
    }

    async fn sync_entity(&self, run_id: Uuid, entity: &EntityDescriptor) -> (String, EntityReport) {
        let mut tracker = PhaseTracker::new(run_id, &entity.name);

        let report = match self.sync_entity_steps(entity, &mut tracker).await {
            Ok(rows) => {
                tracker.enter(EntityPhase::Succeeded);
                EntityReport::success(rows as u64)
            }
            Err(err) => {
                tracker.enter(EntityPhase::Failed);
                error!(
                    %run_id,
                    entity = %entity.name,
                    kind = ?err.kind(),
                    error = %err,
                    "entity sync failed"
                );
                EntityReport::failed(err.summary())
            }
        };

        (entity.name.clone(), report)
    }

    /// Read cursor, extract, write, advance cursor. Each step observes the previous one.
    async fn sync_entity_steps(
        &self,
        entity: &EntityDescriptor,
        tracker: &mut PhaseTracker<'_>,
    ) -> SyncResult<usize> {
        let since_row_id = self.cursor_store.get_cursor(&entity.name).await?;

        tracker.enter(EntityPhase::Extracting);
        let rows = self.extractor.extract(entity, since_row_id).await?;

        let Some(last_row_id) = max_row_id(&rows) else {
            tracker.enter(EntityPhase::Empty);
            debug!(entity = %entity.name, since_row_id, "no new rows");
            return Ok(0);
        };

        tracker.enter(EntityPhase::Writing);
        let written = self.writer.write(entity, &rows).await?;

        self.cursor_store
            .advance_cursor(&entity.name, last_row_id, Utc::now())
            .await?;

        info!(
            entity = %entity.name,
            rows = rows.len(),
            written,
            cursor = last_row_id,
            "entity synced"
        );

        Ok(rows.len())
    }
}
