use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::schedule::{Cadence, ScheduleBinding};
use crate::schema::{ColumnSchema, EntityDescriptor, SchemaRegistry, WarehouseType};
use crate::source::MemorySource;
use crate::store::MemoryCursorStore;
use crate::sync::SyncOrchestrator;
use crate::test_utils::alerts::RecordingAlertSink;
use crate::test_utils::cursor_store::FaultyCursorStore;
use crate::test_utils::warehouse::FaultyWarehouse;
use crate::types::{Cell, SyncRow};
use crate::warehouse::{MemoryWarehouse, RetryPolicy, WarehouseWriter};

pub const ACCOUNTS: &str = "accounts";
pub const EVENTS: &str = "events";
pub const PROJECTS: &str = "projects";

/// Updatable entity keyed on `id`.
pub fn accounts_descriptor() -> EntityDescriptor {
    EntityDescriptor::new(
        ACCOUNTS,
        vec![
            ColumnSchema::required("id", WarehouseType::Int64),
            ColumnSchema::nullable("email", WarehouseType::String),
            ColumnSchema::nullable("created_at", WarehouseType::Timestamp),
        ],
    )
    .with_primary_key(["id"])
}

/// Append-only entity.
pub fn events_descriptor() -> EntityDescriptor {
    EntityDescriptor::new(
        EVENTS,
        vec![
            ColumnSchema::required("id", WarehouseType::Int64),
            ColumnSchema::nullable("payload", WarehouseType::Json),
        ],
    )
}

/// Updatable entity processed after the other two.
pub fn projects_descriptor() -> EntityDescriptor {
    EntityDescriptor::new(
        PROJECTS,
        vec![
            ColumnSchema::required("id", WarehouseType::Int64),
            ColumnSchema::nullable("title", WarehouseType::String),
        ],
    )
    .with_primary_key(["id"])
}

/// Registry of `accounts`, `events` and `projects`, in that order.
pub fn test_registry() -> SchemaRegistry {
    SchemaRegistry::new(vec![
        accounts_descriptor(),
        events_descriptor(),
        projects_descriptor(),
    ])
    .unwrap_or_else(|err| panic!("test registry is invalid: {err}"))
}

pub fn test_timestamp(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0)
        .single()
        .unwrap_or_default()
}

/// `created_at` is stored as text, the way SQLite-born tables hold timestamps.
pub fn account_row(id: i64, email: &str) -> SyncRow {
    SyncRow::new(
        id,
        vec![
            Cell::I64(id),
            Cell::from(email),
            Cell::from("2024-05-01 09:30:00"),
        ],
    )
}

pub fn event_row(id: i64, kind: &str) -> SyncRow {
    SyncRow::new(
        id,
        vec![Cell::I64(id), Cell::Json(serde_json::json!({ "kind": kind }))],
    )
}

pub fn project_row(id: i64, title: &str) -> SyncRow {
    SyncRow::new(id, vec![Cell::I64(id), Cell::from(title)])
}

/// Retries quickly enough for tests.
pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
}

pub type TestOrchestrator = SyncOrchestrator<
    FaultyCursorStore<MemoryCursorStore>,
    MemorySource,
    FaultyWarehouse<MemoryWarehouse>,
    RecordingAlertSink,
>;

pub type TestBinding = ScheduleBinding<
    FaultyCursorStore<MemoryCursorStore>,
    MemorySource,
    FaultyWarehouse<MemoryWarehouse>,
    RecordingAlertSink,
>;

/// In-memory collaborators sharing state with every orchestrator built from them.
#[derive(Debug, Clone)]
pub struct TestHarness {
    pub registry: Arc<SchemaRegistry>,
    pub source: MemorySource,
    pub cursor_store: FaultyCursorStore<MemoryCursorStore>,
    pub warehouse: FaultyWarehouse<MemoryWarehouse>,
    pub alerts: RecordingAlertSink,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_registry(test_registry())
    }

    pub fn with_registry(registry: SchemaRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            source: MemorySource::new(),
            cursor_store: FaultyCursorStore::wrap(MemoryCursorStore::new()),
            warehouse: FaultyWarehouse::wrap(MemoryWarehouse::new()),
            alerts: RecordingAlertSink::new(),
        }
    }

    pub fn orchestrator(&self) -> TestOrchestrator {
        SyncOrchestrator::new(
            self.registry.clone(),
            self.cursor_store.clone(),
            self.source.clone(),
            WarehouseWriter::new(self.warehouse.clone(), test_retry_policy()),
            self.alerts.clone(),
        )
    }

    pub fn binding(&self) -> Arc<TestBinding> {
        let cadences = vec![Cadence::Every { minutes: 15 }];
        Arc::new(ScheduleBinding::new(self.orchestrator(), cadences))
    }

    /// The memory warehouse behind the fault injector.
    pub fn tables(&self) -> &MemoryWarehouse {
        self.warehouse.inner()
    }

    pub fn cursors(&self) -> &MemoryCursorStore {
        self.cursor_store.inner()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
