use std::sync::Arc;

use bqsync::error::ErrorKind;
use bqsync::migrations::apply_migrations;
use bqsync::schema::{ColumnSchema, EntityDescriptor, SchemaRegistry, WarehouseType};
use bqsync::source::{ChangeExtractor, PostgresChangeExtractor};
use bqsync::store::{CursorStore, PostgresCursorStore};
use bqsync::sync::{EntityStatus, SyncOrchestrator};
use bqsync::test_utils::alerts::RecordingAlertSink;
use bqsync::test_utils::database::{spawn_test_database, spawn_test_database_with_migrations};
use bqsync::test_utils::fixtures::{
    ACCOUNTS, EVENTS, accounts_descriptor, events_descriptor, test_retry_policy, test_timestamp,
};
use bqsync::types::Cell;
use bqsync::warehouse::{MemoryWarehouse, WarehouseWriter};
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;
use telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn cursor_store_never_moves_a_cursor_backwards() {
    init_test_tracing();
    let Some(database) = spawn_test_database_with_migrations().await else {
        return;
    };
    // Applying the migrations again is a no-op.
    apply_migrations(&database.config).await.unwrap();
    let store = PostgresCursorStore::new(database.pool.clone());

    assert_eq!(store.get_cursor(ACCOUNTS).await.unwrap(), 0);
    assert!(store.load_cursor(ACCOUNTS).await.unwrap().is_none());

    store.advance_cursor(ACCOUNTS, 5, test_timestamp(9)).await.unwrap();
    store.advance_cursor(ACCOUNTS, 3, test_timestamp(10)).await.unwrap();
    store.advance_cursor(EVENTS, 7, test_timestamp(11)).await.unwrap();

    let cursor = store.load_cursor(ACCOUNTS).await.unwrap().unwrap();
    assert_eq!(cursor.last_synced_row_id, 5);
    assert_eq!(cursor.last_synced_at, test_timestamp(10));

    let cursors: Vec<_> = store
        .load_cursors()
        .await
        .unwrap()
        .into_iter()
        .map(|cursor| (cursor.entity_name, cursor.last_synced_row_id))
        .collect();
    assert_eq!(
        cursors,
        vec![(ACCOUNTS.to_string(), 5), (EVENTS.to_string(), 7)]
    );

    store.reset_cursor(ACCOUNTS).await.unwrap();
    assert_eq!(store.get_cursor(ACCOUNTS).await.unwrap(), 0);
    assert_eq!(store.get_cursor(EVENTS).await.unwrap(), 7);

    database.drop_database().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn extractor_reads_rows_beyond_the_cursor_in_identifier_order() {
    init_test_tracing();
    let Some(database) = spawn_test_database().await else {
        return;
    };
    database
        .execute(
            r#"
            create table accounts (id bigint primary key, email text, created_at timestamp);
            insert into accounts values
                (3, 'linus@example.com', '2024-05-01 09:30:00'),
                (1, 'ada@example.com', '2024-05-01 08:00:00'),
                (2, null, null);
            "#,
        )
        .await;
    let extractor = PostgresChangeExtractor::new(database.pool.clone());

    let rows = extractor.extract(&accounts_descriptor(), 1).await.unwrap();

    let ids: Vec<_> = rows.iter().map(|row| row.id).collect();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(rows[0].values, vec![Cell::I64(2), Cell::Null, Cell::Null]);
    // `timestamp` columns carry no zone and are read as UTC.
    assert_eq!(
        rows[1].values,
        vec![
            Cell::I64(3),
            Cell::from("linus@example.com"),
            Cell::TimestampTz(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()),
        ]
    );
    assert!(
        extractor
            .extract(&accounts_descriptor(), 3)
            .await
            .unwrap()
            .is_empty()
    );

    database.drop_database().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn extractor_maps_postgres_types_onto_cells() {
    init_test_tracing();
    let Some(database) = spawn_test_database().await else {
        return;
    };
    database
        .execute(
            r#"
            create table readings (
                id integer primary key,
                flag boolean,
                small smallint,
                ratio real,
                score double precision,
                code varchar(8),
                letter char(3),
                payload jsonb,
                seen_at timestamptz,
                day date,
                day_start date
            );
            insert into readings values (
                1, true, 7, 0.5, 2.25, 'abc', 'xy', '{"kind": "login"}',
                '2024-05-01 15:00:00+05:30', '2024-02-29', '2024-02-29'
            );
            "#,
        )
        .await;
    let descriptor = EntityDescriptor::new(
        "readings",
        vec![
            ColumnSchema::required("id", WarehouseType::Int64),
            ColumnSchema::nullable("flag", WarehouseType::Bool),
            ColumnSchema::nullable("small", WarehouseType::Int64),
            ColumnSchema::nullable("ratio", WarehouseType::Float64),
            ColumnSchema::nullable("score", WarehouseType::Float64),
            ColumnSchema::nullable("code", WarehouseType::String),
            ColumnSchema::nullable("letter", WarehouseType::String),
            ColumnSchema::nullable("payload", WarehouseType::Json),
            ColumnSchema::nullable("seen_at", WarehouseType::Timestamp),
            ColumnSchema::nullable("day", WarehouseType::Date),
            ColumnSchema::nullable("day_start", WarehouseType::Timestamp),
        ],
    );
    let extractor = PostgresChangeExtractor::new(database.pool.clone());

    let rows = extractor.extract(&descriptor, 0).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].values,
        vec![
            Cell::I64(1),
            Cell::Bool(true),
            Cell::I64(7),
            Cell::F64(0.5),
            Cell::F64(2.25),
            Cell::from("abc"),
            // `char(n)` is blank padded.
            Cell::from("xy "),
            Cell::Json(json!({"kind": "login"})),
            Cell::TimestampTz(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()),
            Cell::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
            Cell::TimestampTz(Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()),
        ]
    );

    database.drop_database().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn extractor_rejects_unsupported_column_types() {
    init_test_tracing();
    let Some(database) = spawn_test_database().await else {
        return;
    };
    database
        .execute(
            r#"
            create table tokens (id bigint primary key, token uuid);
            insert into tokens values (1, '4f6c3c1e-2a51-4a38-9b4e-0b1d2f3a4c5d');
            "#,
        )
        .await;
    let descriptor = EntityDescriptor::new(
        "tokens",
        vec![
            ColumnSchema::required("id", WarehouseType::Int64),
            ColumnSchema::nullable("token", WarehouseType::String),
        ],
    );
    let extractor = PostgresChangeExtractor::new(database.pool.clone());

    let err = extractor.extract(&descriptor, 0).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExtractFailed);
    assert!(err.detail().unwrap().contains("UUID"));

    database.drop_database().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn full_sync_from_postgres_advances_persistent_cursors() {
    init_test_tracing();
    let Some(database) = spawn_test_database_with_migrations().await else {
        return;
    };
    database
        .execute(
            r#"
            create table accounts (id bigint primary key, email text, created_at timestamp);
            create table events (id bigint primary key, payload jsonb);
            insert into accounts values (1, 'ada@example.com', now()), (2, 'grace@example.com', now());
            insert into events values (1, '{"kind": "login"}');
            "#,
        )
        .await;
    let registry = SchemaRegistry::new(vec![accounts_descriptor(), events_descriptor()]).unwrap();
    let warehouse = MemoryWarehouse::new();
    let orchestrator = SyncOrchestrator::new(
        Arc::new(registry),
        PostgresCursorStore::new(database.pool.clone()),
        PostgresChangeExtractor::new(database.pool.clone()),
        WarehouseWriter::new(warehouse.clone(), test_retry_policy()),
        RecordingAlertSink::new(),
    );

    let first = orchestrator.run_full_sync().await;

    assert_eq!(first.count(EntityStatus::Success), 2);
    assert_eq!(first.total_rows(), 3);
    let store = orchestrator.cursor_store();
    assert_eq!(store.get_cursor(ACCOUNTS).await.unwrap(), 2);
    assert_eq!(store.get_cursor(EVENTS).await.unwrap(), 1);

    database
        .execute(r#"insert into events values (2, '{"kind": "logout"}');"#)
        .await;
    let second = orchestrator.run_full_sync().await;

    assert_eq!(second.entity(EVENTS).unwrap().rows_synced, 1);
    assert_eq!(second.entity(ACCOUNTS).unwrap().rows_synced, 0);
    assert_eq!(warehouse.table_rows(EVENTS).await.unwrap().len(), 2);
    assert_eq!(warehouse.table_rows(ACCOUNTS).await.unwrap().len(), 2);
    assert_eq!(store.get_cursor(EVENTS).await.unwrap(), 2);

    database.drop_database().await;
}
