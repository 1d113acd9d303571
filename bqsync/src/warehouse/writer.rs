use std::collections::HashSet;

use tracing::{info, warn};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::schema::EntityDescriptor;
use crate::sync_error;
use crate::types::SyncRow;
use crate::warehouse::{RetryPolicy, WarehouseClient, staging_table_name};

/// Lands extracted batches in the warehouse.
///
/// Every batch is first loaded into a fresh staging table. Once all of its rows are readable
/// there, a single statement applies them to the destination: a merge on the primary key for
/// updatable entities, a plain insert for append-only ones. A failure at any point before that
/// statement leaves the destination untouched.
#[derive(Debug, Clone)]
pub struct WarehouseWriter<W> {
    client: W,
    retry: RetryPolicy,
}

impl<W> WarehouseWriter<W>
where
    W: WarehouseClient + Sync,
{
    pub fn new(client: W, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn client(&self) -> &W {
        &self.client
    }

    /// Writes `rows` of `entity`, returning how many rows were written.
    ///
    /// An empty batch returns `0` without contacting the warehouse. Any failure, including
    /// exhausted retries, is reported as [`ErrorKind::WriteFailed`].
    pub async fn write(&self, entity: &EntityDescriptor, rows: &[SyncRow]) -> SyncResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        self.write_through_staging(entity, rows)
            .await
            .map_err(|err| write_error(entity, err))
    }

    async fn ensure_table(&self, table: &str, entity: &EntityDescriptor) -> SyncResult<()> {
        let created = self
            .retry
            .run("create table", table, || {
                self.client
                    .create_table_if_absent(table, &entity.schema, &entity.primary_key_columns)
            })
            .await?;

        if created {
            info!(entity = %entity.name, table, "created warehouse table");
        }

        Ok(())
    }

    async fn write_through_staging(
        &self,
        entity: &EntityDescriptor,
        rows: &[SyncRow],
    ) -> SyncResult<usize> {
        self.ensure_table(&entity.name, entity).await?;

        let staging = staging_table_name(&entity.name);
        let applied = self.stage_and_apply(&staging, entity, rows).await;
        let dropped = self
            .retry
            .run("drop table", &staging, || self.client.drop_table(&staging))
            .await;

        match (applied, dropped) {
            (Ok(written), Ok(())) => {
                info!(
                    entity = %entity.name,
                    rows = written,
                    merged = entity.supports_update,
                    "wrote rows"
                );
                Ok(written)
            }
            (Ok(written), Err(err)) => {
                // The destination statement is durable, only the staging table leaks.
                warn!(
                    entity = %entity.name,
                    staging = %staging,
                    error = %err,
                    "failed to drop staging table after write"
                );
                Ok(written)
            }
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(drop_err)) => {
                warn!(
                    entity = %entity.name,
                    staging = %staging,
                    error = %drop_err,
                    "failed to drop staging table after failed write"
                );
                Err(SyncError::from(vec![err, drop_err]))
            }
        }
    }

    async fn stage_and_apply(
        &self,
        staging: &str,
        entity: &EntityDescriptor,
        rows: &[SyncRow],
    ) -> SyncResult<usize> {
        self.ensure_table(staging, entity).await?;
        self.retry
            .run("append rows", staging, || {
                self.client.append_rows(staging, &entity.schema, rows)
            })
            .await?;

        let expected = rows.iter().map(|row| row.id).collect::<HashSet<_>>().len();
        self.await_staged_rows(staging, entity, expected).await?;

        if entity.supports_update {
            self.retry
                .run("merge", &entity.name, || {
                    self.client.merge(
                        &entity.name,
                        staging,
                        &entity.schema,
                        &entity.primary_key_columns,
                    )
                })
                .await?;
        } else {
            self.retry
                .run("insert from staging", &entity.name, || {
                    self.client.insert_from(
                        &entity.name,
                        staging,
                        &entity.schema,
                        &entity.identifier_column,
                    )
                })
                .await?;
        }

        Ok(expected)
    }

    /// Waits until `expected` distinct rows are readable in `staging`.
    ///
    /// Rows streamed into a new table can lag behind the insert response, so the destination
    /// statement is only issued once the whole batch is visible.
    async fn await_staged_rows(
        &self,
        staging: &str,
        entity: &EntityDescriptor,
        expected: usize,
    ) -> SyncResult<()> {
        self.retry
            .run("count staged rows", staging, || async move {
                let visible = self
                    .client
                    .count_distinct(staging, &entity.identifier_column)
                    .await?;
                if visible < expected {
                    return Err(sync_error!(
                        ErrorKind::DestinationIoError,
                        "Staged rows are not readable yet",
                        format!("{staging}: {visible} of {expected} rows visible")
                    ));
                }

                Ok(())
            })
            .await
    }
}

fn write_error(entity: &EntityDescriptor, err: SyncError) -> SyncError {
    sync_error!(
        ErrorKind::WriteFailed,
        "Failed to write rows to the warehouse",
        format!("entity `{}`: {}", entity.name, err.summary()),
        source: err
    )
}
