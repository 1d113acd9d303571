use std::time::Duration;

use chrono::{DateTime, Utc};
use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::store::{CursorStore, SyncCursor};
use crate::sync_error;

/// Idle connections are closed after this long. The engine is idle most of every interval.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a lazily connected pool to the operational database.
///
/// No connection is opened until the first query, so a process can start while the database is
/// briefly unavailable.
pub fn create_database_pool(config: &PgConnectionConfig, max_connections: u32) -> PgPool {
    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(max_connections)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(config.with_db())
}

#[derive(Debug, FromRow)]
struct CursorRow {
    entity_name: String,
    last_synced_row_id: i64,
    last_synced_at: DateTime<Utc>,
}

impl From<CursorRow> for SyncCursor {
    fn from(row: CursorRow) -> Self {
        SyncCursor {
            entity_name: row.entity_name,
            last_synced_row_id: row.last_synced_row_id,
            last_synced_at: row.last_synced_at,
        }
    }
}

/// Cursor store backed by the `bqsync.sync_cursors` table of the operational database.
///
/// Every operation is a single statement, so concurrent runs for the same entity are serialized
/// by Postgres row locking. The upsert keeps the greater of the stored and proposed positions.
#[derive(Debug, Clone)]
pub struct PostgresCursorStore {
    pool: PgPool,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn cursor_error(description: &'static str, entity_name: &str, err: sqlx::Error) -> SyncError {
    sync_error!(
        ErrorKind::CursorStoreFailed,
        description,
        format!("entity `{entity_name}`: {err}"),
        source: err
    )
}

impl CursorStore for PostgresCursorStore {
    async fn get_cursor(&self, entity_name: &str) -> SyncResult<i64> {
        let row_id: Option<i64> = sqlx::query_scalar(
            r#"
            select last_synced_row_id
            from bqsync.sync_cursors
            where entity_name = $1
            "#,
        )
        .bind(entity_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| cursor_error("Failed to read sync cursor", entity_name, err))?;

        Ok(row_id.unwrap_or(0))
    }

    async fn load_cursor(&self, entity_name: &str) -> SyncResult<Option<SyncCursor>> {
        let row = sqlx::query_as::<_, CursorRow>(
            r#"
            select entity_name, last_synced_row_id, last_synced_at
            from bqsync.sync_cursors
            where entity_name = $1
            "#,
        )
        .bind(entity_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| cursor_error("Failed to read sync cursor", entity_name, err))?;

        Ok(row.map(Into::into))
    }

    async fn load_cursors(&self) -> SyncResult<Vec<SyncCursor>> {
        let rows = sqlx::query_as::<_, CursorRow>(
            r#"
            select entity_name, last_synced_row_id, last_synced_at
            from bqsync.sync_cursors
            order by entity_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| cursor_error("Failed to read sync cursors", "*", err))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn advance_cursor(
        &self,
        entity_name: &str,
        row_id: i64,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        sqlx::query(
            r#"
            insert into bqsync.sync_cursors (entity_name, last_synced_row_id, last_synced_at)
            values ($1, $2, $3)
            on conflict (entity_name) do update set
                last_synced_row_id = greatest(sync_cursors.last_synced_row_id, excluded.last_synced_row_id),
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(entity_name)
        .bind(row_id)
        .bind(synced_at)
        .execute(&self.pool)
        .await
        .map_err(|err| cursor_error("Failed to advance sync cursor", entity_name, err))?;

        debug!(entity = %entity_name, row_id, "advanced sync cursor");

        Ok(())
    }

    async fn reset_cursor(&self, entity_name: &str) -> SyncResult<()> {
        let result = sqlx::query(
            r#"
            delete from bqsync.sync_cursors
            where entity_name = $1
            "#,
        )
        .bind(entity_name)
        .execute(&self.pool)
        .await
        .map_err(|err| cursor_error("Failed to reset sync cursor", entity_name, err))?;

        info!(
            entity = %entity_name,
            removed = result.rows_affected(),
            "reset sync cursor"
        );

        Ok(())
    }
}
