use std::future::Future;

use crate::error::SyncResult;
use crate::schema::ColumnSchema;
use crate::types::SyncRow;

/// Infix separating the entity name from the unique suffix of a staging table.
pub const STAGING_TABLE_INFIX: &str = "_staging_";

/// Name of a fresh staging table for `entity_name`, unique per call.
pub fn staging_table_name(entity_name: &str) -> String {
    format!(
        "{entity_name}{STAGING_TABLE_INFIX}{}",
        uuid::Uuid::new_v4().simple()
    )
}

pub fn is_staging_table(table_name: &str) -> bool {
    table_name.contains(STAGING_TABLE_INFIX)
}

/// Primitive operations the [`crate::warehouse::WarehouseWriter`] composes.
///
/// Each operation is a single attempt: retries and error wrapping happen in the writer. Errors
/// of kind [`crate::error::ErrorKind::DestinationIoError`] or
/// [`crate::error::ErrorKind::DestinationThrottled`] are retried, anything else is final.
pub trait WarehouseClient {
    /// Creates `table` with `schema`, or adds the columns of `schema` it is missing.
    ///
    /// Existing columns are never dropped or retyped. Returns whether the table was created.
    fn create_table_if_absent(
        &self,
        table: &str,
        schema: &[ColumnSchema],
        primary_key: &[String],
    ) -> impl Future<Output = SyncResult<bool>> + Send;

    /// Appends `rows`, laid out as `schema`, to an existing table.
    ///
    /// The rows may become readable by [`WarehouseClient::count_distinct`] only some time after
    /// the call returns.
    fn append_rows(
        &self,
        table: &str,
        schema: &[ColumnSchema],
        rows: &[SyncRow],
    ) -> impl Future<Output = SyncResult<usize>> + Send;

    /// Upserts every row of `staging` into `destination`, matching on `match_columns`.
    ///
    /// Matched rows get every column of `schema` overwritten, unmatched rows are inserted.
    fn merge(
        &self,
        destination: &str,
        staging: &str,
        schema: &[ColumnSchema],
        match_columns: &[String],
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Copies every row of `staging` into `destination` in one atomic statement.
    ///
    /// Staging rows sharing a `dedupe_column` value are copied once.
    fn insert_from(
        &self,
        destination: &str,
        staging: &str,
        schema: &[ColumnSchema],
        dedupe_column: &str,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Number of distinct values of `column` currently readable in `table`.
    fn count_distinct(
        &self,
        table: &str,
        column: &str,
    ) -> impl Future<Output = SyncResult<usize>> + Send;

    /// Drops `table`. Dropping a missing table succeeds.
    fn drop_table(&self, table: &str) -> impl Future<Output = SyncResult<()>> + Send;
}
