use bqsync::error::ErrorKind;
use bqsync::schema::{ColumnSchema, SchemaRegistry, WarehouseType};
use bqsync::store::CursorStore;
use bqsync::sync::EntityStatus;
use bqsync::test_utils::fixtures::{
    ACCOUNTS, EVENTS, PROJECTS, TestHarness, account_row, accounts_descriptor, event_row,
    events_descriptor, project_row, projects_descriptor,
};
use bqsync::test_utils::warehouse::{TableMatch, WarehouseOp};
use bqsync::types::{Cell, SyncRow};
use bqsync::warehouse::is_staging_table;
use chrono::{TimeZone, Utc};
use telemetry::tracing::init_test_tracing;

async fn seed(harness: &TestHarness) {
    harness
        .source
        .insert_rows(
            ACCOUNTS,
            vec![
                account_row(1, "ada@example.com"),
                account_row(2, "grace@example.com"),
                account_row(3, "linus@example.com"),
            ],
        )
        .await;
    harness
        .source
        .insert_rows(EVENTS, vec![event_row(10, "login"), event_row(11, "logout")])
        .await;
}

#[tokio::test]
async fn full_sync_writes_rows_and_advances_cursors_to_the_batch_maximum() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;

    let report = harness.orchestrator().run_full_sync().await;

    assert_eq!(report.entity(ACCOUNTS).unwrap().rows_synced, 3);
    assert_eq!(report.entity(EVENTS).unwrap().rows_synced, 2);
    assert_eq!(report.entity(PROJECTS).unwrap().rows_synced, 0);
    assert_eq!(report.count(EntityStatus::Success), 3);

    assert_eq!(harness.cursors().get_cursor(ACCOUNTS).await.unwrap(), 3);
    assert_eq!(harness.cursors().get_cursor(EVENTS).await.unwrap(), 11);
    assert_eq!(harness.cursors().cursor_history(ACCOUNTS).await, vec![3]);

    // Text timestamps come out as UTC instants.
    let row = harness
        .tables()
        .find_row(ACCOUNTS, "id", &Cell::I64(2))
        .await
        .unwrap();
    assert_eq!(
        row.values[2],
        Cell::TimestampTz(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap())
    );
    assert!(harness.alerts.messages().await.is_empty());
}

#[tokio::test]
async fn empty_batches_never_reach_the_warehouse() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    let orchestrator = harness.orchestrator();

    orchestrator.run_full_sync().await;
    let calls_after_first_run = harness.warehouse.calls().await.len();

    let report = orchestrator.run_full_sync().await;

    assert_eq!(report.total_rows(), 0);
    assert_eq!(report.count(EntityStatus::Success), 3);
    assert_eq!(harness.warehouse.calls().await.len(), calls_after_first_run);
    assert!(!harness.tables().table_exists(PROJECTS).await);
    assert_eq!(harness.cursors().cursor_history(ACCOUNTS).await, vec![3]);
    assert_eq!(harness.source.extract_calls(PROJECTS).await, 2);
}

#[tokio::test]
async fn only_rows_beyond_the_cursor_are_sent() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    let orchestrator = harness.orchestrator();
    orchestrator.run_full_sync().await;

    harness
        .source
        .insert_rows(EVENTS, vec![event_row(12, "login")])
        .await;
    let report = orchestrator.run_full_sync().await;

    assert_eq!(report.entity(EVENTS).unwrap().rows_synced, 1);
    assert_eq!(report.entity(ACCOUNTS).unwrap().rows_synced, 0);
    assert_eq!(harness.tables().table_rows(EVENTS).await.unwrap().len(), 3);
    assert_eq!(harness.cursors().get_cursor(EVENTS).await.unwrap(), 12);
}

#[tokio::test]
async fn resending_after_a_reset_merges_updatable_and_duplicates_append_only() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    let orchestrator = harness.orchestrator();
    orchestrator.run_full_sync().await;

    harness
        .source
        .upsert_row(ACCOUNTS, account_row(2, "grace@navy.mil"))
        .await;
    harness.cursors().reset_cursor(ACCOUNTS).await.unwrap();
    harness.cursors().reset_cursor(EVENTS).await.unwrap();
    orchestrator.run_full_sync().await;

    let accounts = harness.tables().table_rows(ACCOUNTS).await.unwrap();
    assert_eq!(accounts.len(), 3);
    let grace = harness
        .tables()
        .find_row(ACCOUNTS, "id", &Cell::I64(2))
        .await
        .unwrap();
    assert_eq!(grace.values[1], Cell::from("grace@navy.mil"));

    assert_eq!(harness.tables().table_rows(EVENTS).await.unwrap().len(), 4);
}

#[tokio::test]
async fn a_failing_entity_does_not_affect_the_others() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    harness
        .source
        .insert_rows(PROJECTS, vec![project_row(5, "warehouse")])
        .await;
    harness
        .warehouse
        .fail_always(
            WarehouseOp::AppendRows,
            TableMatch::staging_of(EVENTS),
            ErrorKind::DestinationQueryFailed,
        )
        .await;

    let report = harness.orchestrator().run_full_sync().await;

    let events = report.entity(EVENTS).unwrap();
    assert_eq!(events.status, EntityStatus::Failed);
    assert_eq!(events.rows_synced, 0);
    assert!(events.error_detail.as_deref().unwrap().contains("entity `events`"));

    assert_eq!(report.entity(ACCOUNTS).unwrap().status, EntityStatus::Success);
    assert_eq!(report.entity(PROJECTS).unwrap().status, EntityStatus::Success);
    assert_eq!(harness.cursors().get_cursor(ACCOUNTS).await.unwrap(), 3);
    assert_eq!(harness.cursors().get_cursor(PROJECTS).await.unwrap(), 5);
    assert!(harness.cursors().load_cursor(EVENTS).await.unwrap().is_none());

    let alerts = harness.alerts.messages().await;
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("- events: Failed to write rows to the warehouse"));
    assert!(!alerts[0].contains("- accounts"));
}

#[tokio::test]
async fn failed_merge_still_drops_the_staging_table() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    harness
        .warehouse
        .fail_always(
            WarehouseOp::Merge,
            TableMatch::exact(ACCOUNTS),
            ErrorKind::DestinationQueryFailed,
        )
        .await;

    let report = harness.orchestrator().run_full_sync().await;

    assert_eq!(report.entity(ACCOUNTS).unwrap().status, EntityStatus::Failed);
    let dropped = harness
        .warehouse
        .calls()
        .await
        .into_iter()
        .filter(|call| call.op == WarehouseOp::DropTable && call.table.starts_with(ACCOUNTS))
        .count();
    assert_eq!(dropped, 1);
    let tables = harness.tables().table_names().await;
    assert!(!tables.iter().any(|table| is_staging_table(table)));
    assert!(harness.tables().table_rows(ACCOUNTS).await.unwrap().is_empty());
    assert_eq!(harness.cursors().get_cursor(ACCOUNTS).await.unwrap(), 0);
}

#[tokio::test]
async fn transient_write_errors_are_retried() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    harness
        .warehouse
        .fail(
            WarehouseOp::AppendRows,
            TableMatch::staging_of(EVENTS),
            ErrorKind::DestinationThrottled,
            2,
        )
        .await;

    let report = harness.orchestrator().run_full_sync().await;

    assert_eq!(report.entity(EVENTS).unwrap().status, EntityStatus::Success);
    let event_appends = harness
        .warehouse
        .calls()
        .await
        .into_iter()
        .filter(|call| call.op == WarehouseOp::AppendRows && call.table.starts_with(EVENTS))
        .count();
    assert_eq!(event_appends, 3);
    assert_eq!(harness.tables().table_rows(EVENTS).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failed_append_only_write_is_resent_without_duplicates() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    harness
        .warehouse
        .fail(
            WarehouseOp::InsertFrom,
            TableMatch::exact(EVENTS),
            ErrorKind::DestinationQueryFailed,
            1,
        )
        .await;
    let orchestrator = harness.orchestrator();

    let first = orchestrator.run_full_sync().await;

    assert_eq!(first.entity(EVENTS).unwrap().status, EntityStatus::Failed);
    assert!(harness.tables().table_rows(EVENTS).await.unwrap().is_empty());
    assert_eq!(harness.cursors().get_cursor(EVENTS).await.unwrap(), 0);

    let second = orchestrator.run_full_sync().await;

    assert_eq!(second.entity(EVENTS).unwrap().rows_synced, 2);
    let ids: Vec<_> = harness
        .tables()
        .table_rows(EVENTS)
        .await
        .unwrap()
        .iter()
        .map(|row| row.id)
        .collect();
    assert_eq!(ids, vec![10, 11]);
    assert_eq!(harness.cursors().get_cursor(EVENTS).await.unwrap(), 11);
}

#[tokio::test]
async fn exhausted_retries_fail_the_entity() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    harness
        .warehouse
        .fail_always(
            WarehouseOp::AppendRows,
            TableMatch::staging_of(ACCOUNTS),
            ErrorKind::DestinationIoError,
        )
        .await;

    let report = harness.orchestrator().run_full_sync().await;

    let accounts = report.entity(ACCOUNTS).unwrap();
    assert_eq!(accounts.status, EntityStatus::Failed);
    assert!(
        accounts
            .error_detail
            .as_deref()
            .unwrap()
            .contains("Injected warehouse failure")
    );
    let staged_appends = harness
        .warehouse
        .calls()
        .await
        .into_iter()
        .filter(|call| call.op == WarehouseOp::AppendRows && call.table.starts_with(ACCOUNTS))
        .count();
    assert_eq!(staged_appends, 3);
    assert!(
        !harness
            .tables()
            .table_names()
            .await
            .iter()
            .any(|table| is_staging_table(table))
    );
}

#[tokio::test]
async fn permanent_write_errors_are_not_retried() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    harness
        .warehouse
        .fail(
            WarehouseOp::CreateTable,
            TableMatch::exact(EVENTS),
            ErrorKind::AuthenticationError,
            1,
        )
        .await;

    let report = harness.orchestrator().run_full_sync().await;

    assert_eq!(report.entity(EVENTS).unwrap().status, EntityStatus::Failed);
    let creates = harness
        .warehouse
        .calls()
        .await
        .into_iter()
        .filter(|call| call.op == WarehouseOp::CreateTable && call.table == EVENTS)
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn cursor_failure_after_write_fails_the_entity_and_resends_next_run() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    harness.cursor_store.fail_advance(ACCOUNTS, 1).await;
    let orchestrator = harness.orchestrator();

    let first = orchestrator.run_full_sync().await;

    let accounts = first.entity(ACCOUNTS).unwrap();
    assert_eq!(accounts.status, EntityStatus::Failed);
    assert!(
        accounts
            .error_detail
            .as_deref()
            .unwrap()
            .starts_with("Injected cursor store failure")
    );
    assert_eq!(harness.tables().table_rows(ACCOUNTS).await.unwrap().len(), 3);
    assert_eq!(harness.cursors().get_cursor(ACCOUNTS).await.unwrap(), 0);

    let second = orchestrator.run_full_sync().await;

    assert_eq!(second.entity(ACCOUNTS).unwrap().rows_synced, 3);
    assert_eq!(harness.tables().table_rows(ACCOUNTS).await.unwrap().len(), 3);
    assert_eq!(harness.cursors().get_cursor(ACCOUNTS).await.unwrap(), 3);
}

#[tokio::test]
async fn extraction_failures_leave_the_cursor_untouched() {
    init_test_tracing();

    let harness = TestHarness::new();
    harness
        .source
        .insert_rows(
            ACCOUNTS,
            vec![SyncRow::new(
                1,
                vec![Cell::Null, Cell::from("nobody"), Cell::Null],
            )],
        )
        .await;

    let report = harness.orchestrator().run_full_sync().await;

    let accounts = report.entity(ACCOUNTS).unwrap();
    assert_eq!(accounts.status, EntityStatus::Failed);
    assert!(
        accounts
            .error_detail
            .as_deref()
            .unwrap()
            .starts_with("Failed to extract changed rows")
    );
    assert!(!harness.tables().table_exists(ACCOUNTS).await);
    assert_eq!(harness.cursor_store.advance_calls(ACCOUNTS).await, 0);
}

#[tokio::test]
async fn selective_sync_with_an_unknown_entity_does_no_io() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;

    let err = harness
        .orchestrator()
        .run_selective_sync(&[ACCOUNTS, "not_a_real_table"])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnknownEntity);
    assert_eq!(err.detail(), Some("not_a_real_table"));
    assert!(harness.warehouse.calls().await.is_empty());
    assert_eq!(harness.cursor_store.total_calls().await, 0);
    assert_eq!(harness.source.extract_calls(ACCOUNTS).await, 0);
    assert!(harness.alerts.messages().await.is_empty());
}

#[tokio::test]
async fn selective_sync_skips_unselected_entities() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;

    let report = harness
        .orchestrator()
        .run_selective_sync(&[EVENTS])
        .await
        .unwrap();

    assert_eq!(report.entity(EVENTS).unwrap().status, EntityStatus::Success);
    assert_eq!(report.entity(ACCOUNTS).unwrap().status, EntityStatus::Skipped);
    assert_eq!(report.entity(PROJECTS).unwrap().status, EntityStatus::Skipped);
    assert_eq!(harness.source.extract_calls(ACCOUNTS).await, 0);
    assert!(!harness.tables().table_exists(ACCOUNTS).await);
}

#[tokio::test]
async fn concurrent_entities_produce_the_same_outcome() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    harness
        .source
        .insert_rows(PROJECTS, vec![project_row(1, "a"), project_row(2, "b")])
        .await;

    let report = harness
        .orchestrator()
        .with_max_concurrent_entities(3)
        .run_full_sync()
        .await;

    assert_eq!(report.total_rows(), 7);
    assert_eq!(report.count(EntityStatus::Success), 3);
    assert_eq!(harness.cursors().get_cursor(PROJECTS).await.unwrap(), 2);
}

#[tokio::test]
async fn new_descriptor_columns_are_added_to_existing_tables() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    harness.orchestrator().run_full_sync().await;

    let mut accounts = accounts_descriptor();
    accounts
        .schema
        .push(ColumnSchema::nullable("plan", WarehouseType::String));
    let registry =
        SchemaRegistry::new(vec![accounts, events_descriptor(), projects_descriptor()]).unwrap();
    let evolved = TestHarness {
        registry: registry.into(),
        ..harness.clone()
    };
    evolved
        .source
        .insert_rows(
            ACCOUNTS,
            vec![SyncRow::new(
                4,
                vec![
                    Cell::I64(4),
                    Cell::from("ken@example.com"),
                    Cell::from("2024-05-02T08:00:00Z"),
                    Cell::from("pro"),
                ],
            )],
        )
        .await;

    let report = evolved.orchestrator().run_full_sync().await;

    assert_eq!(report.entity(ACCOUNTS).unwrap().rows_synced, 1);
    let schema = harness.tables().table_schema(ACCOUNTS).await.unwrap();
    assert_eq!(schema.len(), 4);
    let ada = harness
        .tables()
        .find_row(ACCOUNTS, "id", &Cell::I64(1))
        .await
        .unwrap();
    assert_eq!(ada.values[3], Cell::Null);
    let ken = harness
        .tables()
        .find_row(ACCOUNTS, "plan", &Cell::from("pro"))
        .await
        .unwrap();
    assert_eq!(ken.id, 4);
}
