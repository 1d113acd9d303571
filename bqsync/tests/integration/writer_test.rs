use bqsync::error::ErrorKind;
use bqsync::test_utils::fixtures::{
    ACCOUNTS, EVENTS, account_row, accounts_descriptor, event_row, events_descriptor,
    test_retry_policy,
};
use bqsync::test_utils::warehouse::{FaultyWarehouse, TableMatch, WarehouseOp};
use bqsync::types::Cell;
use bqsync::warehouse::{MemoryWarehouse, WarehouseWriter, is_staging_table};
use telemetry::tracing::init_test_tracing;

fn writer() -> WarehouseWriter<FaultyWarehouse<MemoryWarehouse>> {
    WarehouseWriter::new(
        FaultyWarehouse::wrap(MemoryWarehouse::new()),
        test_retry_policy(),
    )
}

#[tokio::test]
async fn updatable_entities_go_through_a_staging_table() {
    init_test_tracing();

    let writer = writer();

    let written = writer
        .write(&accounts_descriptor(), &[account_row(1, "ada@example.com")])
        .await
        .unwrap();

    assert_eq!(written, 1);
    let ops: Vec<_> = writer
        .client()
        .calls()
        .await
        .into_iter()
        .map(|call| (call.op, is_staging_table(&call.table)))
        .collect();
    assert_eq!(
        ops,
        vec![
            (WarehouseOp::CreateTable, false),
            (WarehouseOp::CreateTable, true),
            (WarehouseOp::AppendRows, true),
            (WarehouseOp::CountDistinct, true),
            (WarehouseOp::Merge, false),
            (WarehouseOp::DropTable, true),
        ]
    );
}

#[tokio::test]
async fn append_only_entities_are_staged_then_inserted_in_one_statement() {
    init_test_tracing();

    let writer = writer();

    writer
        .write(&events_descriptor(), &[event_row(1, "login"), event_row(2, "logout")])
        .await
        .unwrap();

    let ops: Vec<_> = writer
        .client()
        .calls()
        .await
        .into_iter()
        .map(|call| (call.op, is_staging_table(&call.table)))
        .collect();
    assert_eq!(
        ops,
        vec![
            (WarehouseOp::CreateTable, false),
            (WarehouseOp::CreateTable, true),
            (WarehouseOp::AppendRows, true),
            (WarehouseOp::CountDistinct, true),
            (WarehouseOp::InsertFrom, false),
            (WarehouseOp::DropTable, true),
        ]
    );
    let memory = writer.client().inner();
    assert_eq!(memory.table_rows(EVENTS).await.unwrap().len(), 2);
    assert_eq!(memory.table_names().await, vec![EVENTS.to_string()]);
}

#[tokio::test]
async fn failed_append_only_write_leaves_the_destination_without_new_rows() {
    init_test_tracing();

    let writer = writer();
    let batch = [event_row(1, "login"), event_row(2, "logout")];

    writer
        .client()
        .fail(
            WarehouseOp::AppendRows,
            TableMatch::staging_of(EVENTS),
            ErrorKind::DestinationQueryFailed,
            1,
        )
        .await;
    let err = writer.write(&events_descriptor(), &batch).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteFailed);

    writer
        .client()
        .fail(
            WarehouseOp::InsertFrom,
            TableMatch::exact(EVENTS),
            ErrorKind::DestinationQueryFailed,
            1,
        )
        .await;
    let err = writer.write(&events_descriptor(), &batch).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteFailed);

    let memory = writer.client().inner();
    assert!(memory.table_rows(EVENTS).await.unwrap().is_empty());
    assert_eq!(memory.table_names().await, vec![EVENTS.to_string()]);

    // Replaying the batch once the warehouse recovers lands every row exactly once.
    writer.write(&events_descriptor(), &batch).await.unwrap();
    assert_eq!(memory.table_rows(EVENTS).await.unwrap().len(), 2);
}

#[tokio::test]
async fn destination_statement_waits_until_staged_rows_are_readable() {
    init_test_tracing();

    let writer = writer();
    writer.client().hide_appended_rows(2).await;

    writer
        .write(&accounts_descriptor(), &[account_row(1, "ada@example.com")])
        .await
        .unwrap();

    assert_eq!(writer.client().call_count(WarehouseOp::CountDistinct).await, 3);
    assert_eq!(writer.client().call_count(WarehouseOp::Merge).await, 1);
    assert_eq!(
        writer.client().inner().table_rows(ACCOUNTS).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn staged_rows_that_never_become_readable_fail_without_touching_the_destination() {
    init_test_tracing();

    let writer = writer();
    writer.client().hide_appended_rows(usize::MAX).await;

    let err = writer
        .write(&accounts_descriptor(), &[account_row(1, "ada@example.com")])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WriteFailed);
    assert!(err.detail().unwrap().contains("0 of 1 rows visible"));
    assert_eq!(writer.client().call_count(WarehouseOp::Merge).await, 0);
    let memory = writer.client().inner();
    assert!(memory.table_rows(ACCOUNTS).await.unwrap().is_empty());
    assert_eq!(memory.table_names().await, vec![ACCOUNTS.to_string()]);
}

#[tokio::test]
async fn overlapping_merge_batches_keep_one_row_per_key_with_latest_values() {
    init_test_tracing();

    let writer = writer();
    let descriptor = accounts_descriptor();

    writer
        .write(
            &descriptor,
            &[account_row(1, "ada@example.com"), account_row(2, "grace@example.com")],
        )
        .await
        .unwrap();
    writer
        .write(
            &descriptor,
            &[account_row(2, "grace@navy.mil"), account_row(3, "linus@example.com")],
        )
        .await
        .unwrap();

    let memory = writer.client().inner();
    assert_eq!(memory.table_rows(ACCOUNTS).await.unwrap().len(), 3);
    let grace = memory
        .find_row(ACCOUNTS, "id", &Cell::I64(2))
        .await
        .unwrap();
    assert_eq!(grace.values[1], Cell::from("grace@navy.mil"));
}

#[tokio::test]
async fn write_failures_name_the_entity_and_keep_the_cause() {
    init_test_tracing();

    let writer = writer();
    writer
        .client()
        .fail_always(
            WarehouseOp::Merge,
            TableMatch::exact(ACCOUNTS),
            ErrorKind::DestinationQueryFailed,
        )
        .await;

    let err = writer
        .write(&accounts_descriptor(), &[account_row(1, "ada@example.com")])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WriteFailed);
    assert!(err.detail().unwrap().starts_with("entity `accounts`"));
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn failing_cleanup_after_a_failed_merge_reports_both_errors() {
    init_test_tracing();

    let writer = writer();
    writer
        .client()
        .fail_always(
            WarehouseOp::Merge,
            TableMatch::exact(ACCOUNTS),
            ErrorKind::DestinationQueryFailed,
        )
        .await;
    writer
        .client()
        .fail_always(
            WarehouseOp::DropTable,
            TableMatch::staging_of(ACCOUNTS),
            ErrorKind::AuthenticationError,
        )
        .await;

    let err = writer
        .write(&accounts_descriptor(), &[account_row(1, "ada@example.com")])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WriteFailed);
    let detail = err.detail().unwrap();
    assert!(detail.contains("Injected warehouse failure: accounts;"));
    assert!(detail.contains("accounts_staging_"));
}

#[tokio::test]
async fn failing_cleanup_after_a_successful_merge_keeps_the_write() {
    init_test_tracing();

    let writer = writer();
    writer
        .client()
        .fail_always(
            WarehouseOp::DropTable,
            TableMatch::staging_of(ACCOUNTS),
            ErrorKind::AuthenticationError,
        )
        .await;

    let written = writer
        .write(&accounts_descriptor(), &[account_row(1, "ada@example.com")])
        .await
        .unwrap();

    assert_eq!(written, 1);
    assert_eq!(
        writer
            .client()
            .inner()
            .table_rows(ACCOUNTS)
            .await
            .unwrap()
            .len(),
        1
    );
}
