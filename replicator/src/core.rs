use std::sync::{Arc, Once};

use bqsync::migrations::apply_migrations;
use bqsync::notification::AlertSink;
use bqsync::schedule::{Cadence, ScheduleBinding, run_schedule};
use bqsync::schema::SchemaRegistry;
use bqsync::source::{ChangeExtractor, PostgresChangeExtractor};
use bqsync::store::{CursorStore, MemoryCursorStore, PostgresCursorStore, create_database_pool};
use bqsync::sync::SyncOrchestrator;
use bqsync::warehouse::bigquery::BigQueryClient;
use bqsync::warehouse::{MemoryWarehouse, RetryPolicy, WarehouseClient, WarehouseWriter};
use config::shared::{ReplicatorConfig, WarehouseConfig};
use secrecy::ExposeSecret;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::alerts::ReplicatorAlertSink;
use crate::error::ReplicatorResult;

/// Connections shared by the change extractor and the cursor store.
///
/// Entities run at most `max_concurrent_entities` at a time and hold one connection each.
const MIN_POOL_CONNECTIONS: u32 = 2;

static INIT_CRYPTO: Once = Once::new();

fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            warn!("a rustls crypto provider was already installed");
        }
    });
}

/// Wires the configured collaborators together and runs the schedule until shutdown.
pub async fn start_replicator_with_config(config: ReplicatorConfig) -> ReplicatorResult<()> {
    info!(
        source_host = %config.source.host,
        source_database = %config.source.name,
        "starting replicator"
    );

    let registry = SchemaRegistry::builtin()?.restricted_to(config.sync.entities.as_slice())?;
    let registry = Arc::new(registry);
    info!(entities = ?registry.entity_names(), "entities registered for sync");

    let max_connections = u32::try_from(config.sync.max_concurrent_entities)
        .unwrap_or(u32::MAX)
        .max(MIN_POOL_CONNECTIONS);
    let pool = create_database_pool(&config.source, max_connections);
    let extractor = PostgresChangeExtractor::new(pool.clone());
    let retry = RetryPolicy::from(&config.retry);
    let alert_sink = ReplicatorAlertSink::from_config(config.alerts.as_ref());

    match &config.warehouse {
        WarehouseConfig::Memory => {
            // Tables vanish with the process, so cursors must as well.
            let cursor_store = MemoryCursorStore::new();
            let writer = WarehouseWriter::new(MemoryWarehouse::new(), retry);

            run_until_shutdown(&config, registry, cursor_store, extractor, writer, alert_sink)
                .await
        }
        WarehouseConfig::BigQuery {
            project_id,
            dataset_id,
            service_account_key,
        } => {
            apply_migrations(&config.source).await?;
            let cursor_store = PostgresCursorStore::new(pool);

            install_crypto_provider();
            let client = BigQueryClient::new_with_key(
                project_id.clone(),
                dataset_id.clone(),
                service_account_key.expose_secret(),
            )
            .await?;
            let writer = WarehouseWriter::new(client, retry);

            run_until_shutdown(&config, registry, cursor_store, extractor, writer, alert_sink)
                .await
        }
    }
}

async fn run_until_shutdown<C, E, W, A>(
    config: &ReplicatorConfig,
    registry: Arc<SchemaRegistry>,
    cursor_store: C,
    extractor: E,
    writer: WarehouseWriter<W>,
    alert_sink: A,
) -> ReplicatorResult<()>
where
    C: CursorStore + Send + Sync + 'static,
    E: ChangeExtractor + Send + Sync + 'static,
    W: WarehouseClient + Send + Sync + 'static,
    A: AlertSink + Send + Sync + 'static,
{
    let orchestrator = SyncOrchestrator::new(registry, cursor_store, extractor, writer, alert_sink)
        .with_max_concurrent_entities(config.sync.max_concurrent_entities);
    let cadences = Cadence::from_config(&config.schedule);
    let binding = Arc::new(ScheduleBinding::new(orchestrator, cadences));

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let signal_handle = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        if shutdown_tx.send(()).is_err() {
            warn!("sync schedule already stopped");
        }
    });

    let result = run_schedule(binding, &config.schedule, shutdown_rx).await;

    // The schedule can stop on its own only on error, leaving the signal task waiting.
    signal_handle.abort();
    let _ = signal_handle.await;

    result?;
    info!("replicator stopped");

    Ok(())
}

/// Resolves on SIGTERM or ctrl-c. Runs in flight are drained by the schedule afterwards.
async fn wait_for_shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!(error = %err, "failed to register sigterm handler, only ctrl-c stops the replicator");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("sigint (ctrl-c) received, shutting down");
        }
        _ = sigterm.recv() => {
            info!("sigterm received, shutting down");
        }
    }
}
