use std::time::Duration;

use bqsync::error::ErrorKind;
use bqsync::schedule::{Cadence, run_schedule};
use bqsync::store::CursorStore;
use bqsync::sync::EntityStatus;
use bqsync::test_utils::fixtures::{ACCOUNTS, EVENTS, TestHarness, account_row, event_row};
use bqsync::test_utils::warehouse::{TableMatch, WarehouseOp};
use config::shared::ScheduleConfig;
use telemetry::tracing::init_test_tracing;
use tokio::sync::watch;

async fn seed(harness: &TestHarness) {
    harness
        .source
        .insert_rows(
            ACCOUNTS,
            vec![account_row(1, "ada@example.com"), account_row(2, "grace@example.com")],
        )
        .await;
    harness
        .source
        .insert_rows(EVENTS, vec![event_row(1, "login")])
        .await;
}

#[tokio::test]
async fn only_one_run_is_in_flight_at_a_time() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    let gate = harness
        .warehouse
        .gate(WarehouseOp::AppendRows, TableMatch::Any)
        .await;
    let binding = harness.binding();

    let first = tokio::spawn({
        let binding = binding.clone();
        async move { binding.trigger_full_sync().await }
    });
    gate.entered().await;
    assert!(binding.is_in_flight());

    let err = binding.trigger_full_sync().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyncAlreadyRunning);

    let err = binding.trigger_selective_sync(&[EVENTS]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyncAlreadyRunning);

    let err = binding
        .trigger_selective_sync(&["not_a_real_table"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownEntity);

    let skipped = binding
        .run_scheduled(Cadence::Every { minutes: 15 })
        .await;
    assert!(skipped.is_none());

    let err = binding.reset_cursor(ACCOUNTS).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyncAlreadyRunning);

    gate.release();
    let report = first.await.unwrap().unwrap();

    assert_eq!(report.count(EntityStatus::Success), 3);
    assert!(!binding.is_in_flight());
    // Exactly one writer touched the destination.
    assert_eq!(
        harness.tables().table_rows(ACCOUNTS).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn status_exposes_last_report_and_cadences() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    let binding = harness.binding();

    let before = binding.status().await;
    assert!(!before.in_flight);
    assert!(before.last_report.is_none());
    assert_eq!(before.cadences, vec![Cadence::Every { minutes: 15 }]);

    let report = binding.trigger_selective_sync(&[EVENTS]).await.unwrap();
    let after = binding.status().await;

    assert_eq!(after.last_report, Some(report));
    let json = serde_json::to_value(&after).unwrap();
    assert_eq!(json["cadences"][0]["kind"], "every");
    assert_eq!(json["last_report"]["entities"]["events"]["status"], "success");
    assert_eq!(json["last_report"]["entities"]["accounts"]["status"], "skipped");
}

#[tokio::test]
async fn entities_and_cursors_are_listed() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    let binding = harness.binding();

    let listing = binding.list_entities();
    assert_eq!(listing.tables, vec!["accounts", "events", "projects"]);
    assert_eq!(listing.total_count, 3);

    binding.trigger_full_sync().await.unwrap();

    let cursors = binding.cursors().await.unwrap();
    let positions: Vec<_> = cursors
        .iter()
        .map(|cursor| (cursor.entity_name.as_str(), cursor.last_synced_row_id))
        .collect();
    assert_eq!(positions, vec![("accounts", 2), ("events", 1)]);
    assert!(binding.cursor("projects").await.unwrap().is_none());
    assert_eq!(
        binding.cursor("nope").await.unwrap_err().kind(),
        ErrorKind::UnknownEntity
    );
}

#[tokio::test]
async fn reset_cursor_resends_the_entity() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    let binding = harness.binding();
    binding.trigger_full_sync().await.unwrap();

    assert_eq!(
        binding.reset_cursor("nope").await.unwrap_err().kind(),
        ErrorKind::UnknownEntity
    );
    binding.reset_cursor(EVENTS).await.unwrap();
    assert_eq!(harness.cursors().get_cursor(EVENTS).await.unwrap(), 0);

    let report = binding.trigger_full_sync().await.unwrap();

    assert_eq!(report.entity(EVENTS).unwrap().rows_synced, 1);
    assert_eq!(report.entity(ACCOUNTS).unwrap().rows_synced, 0);
    assert_eq!(harness.tables().table_rows(EVENTS).await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn schedule_runs_full_sync_every_interval_until_shutdown() {
    init_test_tracing();

    let harness = TestHarness::new();
    seed(&harness).await;
    let binding = harness.binding();
    let schedule = ScheduleConfig {
        incremental_interval_mins: 15,
        daily_sync_at: None,
        ..ScheduleConfig::default()
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let runner = tokio::spawn({
        let binding = binding.clone();
        async move { run_schedule(binding, &schedule, shutdown_rx).await }
    });

    tokio::time::sleep(Duration::from_secs(14 * 60)).await;
    assert!(binding.last_report().await.is_none());

    tokio::time::sleep(Duration::from_secs(2 * 60)).await;
    let first = binding.last_report().await.unwrap();
    assert_eq!(first.total_rows(), 3);

    harness
        .source
        .insert_rows(EVENTS, vec![event_row(2, "logout")])
        .await;
    tokio::time::sleep(Duration::from_secs(15 * 60)).await;
    let second = binding.last_report().await.unwrap();
    assert_ne!(second.run_id, first.run_id);
    assert_eq!(second.total_rows(), 1);

    shutdown_tx.send(()).unwrap();
    runner.await.unwrap().unwrap();
    assert_eq!(harness.cursors().get_cursor(EVENTS).await.unwrap(), 2);
}

#[tokio::test]
async fn schedule_rejects_invalid_offsets() {
    init_test_tracing();

    let harness = TestHarness::new();
    let schedule = ScheduleConfig {
        utc_offset_secs: 48 * 3600,
        ..ScheduleConfig::default()
    };
    let (_shutdown_tx, shutdown_rx) = watch::channel(());

    let err = run_schedule(harness.binding(), &schedule, shutdown_rx)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test]
async fn schedule_rejects_intervals_too_long_to_represent() {
    init_test_tracing();

    let harness = TestHarness::new();
    let schedule = ScheduleConfig {
        incremental_interval_mins: u64::MAX / 30,
        ..ScheduleConfig::default()
    };
    let (_shutdown_tx, shutdown_rx) = watch::channel(());

    let err = run_schedule(harness.binding(), &schedule, shutdown_rx)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert!(err.detail().unwrap().contains("cannot exceed"));
}
