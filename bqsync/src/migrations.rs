use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::error::SyncResult;

const NUM_POOL_CONNECTIONS: u32 = 1;

/// Creates the `bqsync` schema and the cursor table in the operational database.
///
/// The migration ledger of `sqlx` is kept inside the `bqsync` schema so it never mixes with the
/// application's own migrations in `public`.
pub async fn apply_migrations(connection_config: &PgConnectionConfig) -> SyncResult<()> {
    let pool = PgPoolOptions::new()
        .max_connections(NUM_POOL_CONNECTIONS)
        .min_connections(NUM_POOL_CONNECTIONS)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists bqsync;").await?;
                conn.execute("set search_path = 'bqsync';").await?;
                Ok(())
            })
        })
        .connect_with(connection_config.with_db())
        .await?;

    info!("applying sync cursor migrations");

    sqlx::migrate!("./migrations").run(&pool).await?;
    pool.close().await;

    info!("sync cursor migrations applied");

    Ok(())
}
