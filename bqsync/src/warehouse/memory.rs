use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::schema::ColumnSchema;
use crate::types::{Cell, SyncRow};
use crate::warehouse::WarehouseClient;

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: Vec<ColumnSchema>,
    primary_key: Vec<String>,
    rows: Vec<SyncRow>,
}

impl MemoryTable {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|column| column.name == name)
    }

    /// Lays out `row` of `schema` along this table's columns.
    fn project(&self, schema: &[ColumnSchema], row: &SyncRow) -> SyncResult<SyncRow> {
        let mut values = vec![Cell::Null; self.schema.len()];
        for (column, value) in schema.iter().zip(&row.values) {
            let Some(index) = self.column_index(&column.name) else {
                bail!(
                    ErrorKind::DestinationQueryFailed,
                    "Row has a column missing from the table",
                    &column.name
                );
            };
            values[index] = value.clone();
        }

        Ok(SyncRow::new(row.id, values))
    }

    fn key_of(&self, row: &SyncRow, columns: &[usize]) -> Vec<Cell> {
        columns.iter().map(|index| row.values[*index].clone()).collect()
    }
}

/// First row of every distinct value at `index`, in table order.
fn distinct_rows(rows: &[SyncRow], index: usize) -> Vec<&SyncRow> {
    let mut distinct: Vec<&SyncRow> = Vec::new();
    for row in rows {
        if !distinct.iter().any(|kept| kept.values[index] == row.values[index]) {
            distinct.push(row);
        }
    }

    distinct
}

/// In-process warehouse keeping tables in a map.
///
/// Follows the same table semantics as the real warehouse, including additive schema evolution
/// and merge by key, which makes it the backend for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    tables: Arc<Mutex<BTreeMap<String, MemoryTable>>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every existing table, sorted.
    pub async fn table_names(&self) -> Vec<String> {
        let tables = self.tables.lock().await;
        tables.keys().cloned().collect()
    }

    pub async fn table_exists(&self, table: &str) -> bool {
        let tables = self.tables.lock().await;
        tables.contains_key(table)
    }

    /// Rows of `table` in insertion order, `None` when the table does not exist.
    pub async fn table_rows(&self, table: &str) -> Option<Vec<SyncRow>> {
        let tables = self.tables.lock().await;
        tables.get(table).map(|table| table.rows.clone())
    }

    pub async fn table_schema(&self, table: &str) -> Option<Vec<ColumnSchema>> {
        let tables = self.tables.lock().await;
        tables.get(table).map(|table| table.schema.clone())
    }

    /// Looks up the row of `table` whose `column` holds `value`.
    pub async fn find_row(&self, table: &str, column: &str, value: &Cell) -> Option<SyncRow> {
        let tables = self.tables.lock().await;
        let table = tables.get(table)?;
        let index = table.column_index(column)?;
        table
            .rows
            .iter()
            .find(|row| &row.values[index] == value)
            .cloned()
    }
}

impl WarehouseClient for MemoryWarehouse {
    async fn create_table_if_absent(
        &self,
        table: &str,
        schema: &[ColumnSchema],
        primary_key: &[String],
    ) -> SyncResult<bool> {
        let mut tables = self.tables.lock().await;

        let Some(existing) = tables.get_mut(table) else {
            tables.insert(
                table.to_string(),
                MemoryTable {
                    schema: schema.to_vec(),
                    primary_key: primary_key.to_vec(),
                    rows: Vec::new(),
                },
            );
            debug!(table, "created memory table");

            return Ok(true);
        };

        for column in schema {
            if existing.column_index(&column.name).is_none() {
                // Added columns are nullable for rows written before them.
                let mut added = column.clone();
                added.nullable = true;
                existing.schema.push(added);
                for row in &mut existing.rows {
                    row.values.push(Cell::Null);
                }
                debug!(table, column = %column.name, "added column to memory table");
            }
        }

        Ok(false)
    }

    async fn append_rows(
        &self,
        table: &str,
        schema: &[ColumnSchema],
        rows: &[SyncRow],
    ) -> SyncResult<usize> {
        let mut tables = self.tables.lock().await;
        let Some(existing) = tables.get_mut(table) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Table does not exist",
                table
            );
        };

        let projected = rows
            .iter()
            .map(|row| existing.project(schema, row))
            .collect::<SyncResult<Vec<_>>>()?;
        existing.rows.extend(projected);

        Ok(rows.len())
    }

    async fn merge(
        &self,
        destination: &str,
        staging: &str,
        schema: &[ColumnSchema],
        match_columns: &[String],
    ) -> SyncResult<()> {
        let mut tables = self.tables.lock().await;
        let Some(staging_table) = tables.get(staging).cloned() else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Staging table does not exist",
                staging
            );
        };
        let Some(target) = tables.get_mut(destination) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Table does not exist",
                destination
            );
        };

        let mut target_keys = Vec::with_capacity(match_columns.len());
        let mut staging_keys = Vec::with_capacity(match_columns.len());
        for column in match_columns {
            match (target.column_index(column), staging_table.column_index(column)) {
                (Some(target_index), Some(staging_index)) => {
                    target_keys.push(target_index);
                    staging_keys.push(staging_index);
                }
                _ => bail!(
                    ErrorKind::DestinationQueryFailed,
                    "Merge column is missing",
                    column
                ),
            }
        }

        let updated_columns: Vec<usize> = schema
            .iter()
            .filter_map(|column| target.column_index(&column.name))
            .collect();

        for staged in &staging_table.rows {
            let key = staging_table.key_of(staged, &staging_keys);
            let projected = target.project(&staging_table.schema, staged)?;

            let position = target
                .rows
                .iter()
                .position(|row| target.key_of(row, &target_keys) == key);
            match position {
                Some(position) => {
                    // Only columns of `schema` are overwritten on match.
                    let existing = &mut target.rows[position];
                    for index in &updated_columns {
                        existing.values[*index] = projected.values[*index].clone();
                    }
                    existing.id = projected.id;
                }
                None => target.rows.push(projected),
            }
        }

        debug!(
            destination,
            staging,
            keys = ?target.primary_key,
            "merged staging table"
        );

        Ok(())
    }

    async fn insert_from(
        &self,
        destination: &str,
        staging: &str,
        schema: &[ColumnSchema],
        dedupe_column: &str,
    ) -> SyncResult<()> {
        let mut tables = self.tables.lock().await;
        let Some(staging_table) = tables.get(staging).cloned() else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Staging table does not exist",
                staging
            );
        };
        let Some(target) = tables.get_mut(destination) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Table does not exist",
                destination
            );
        };
        let Some(dedupe_index) = staging_table.column_index(dedupe_column) else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Dedupe column is missing",
                dedupe_column
            );
        };

        // Projection happens before anything is pushed so a bad row leaves the target as is.
        let projected = distinct_rows(&staging_table.rows, dedupe_index)
            .into_iter()
            .map(|row| target.project(&staging_table.schema, row))
            .collect::<SyncResult<Vec<_>>>()?;
        let inserted = projected.len();
        target.rows.extend(projected);

        debug!(
            destination,
            staging,
            columns = schema.len(),
            inserted,
            "inserted staging rows"
        );

        Ok(())
    }

    async fn count_distinct(&self, table: &str, column: &str) -> SyncResult<usize> {
        let tables = self.tables.lock().await;
        let Some(existing) = tables.get(table) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Table does not exist",
                table
            );
        };
        let Some(index) = existing.column_index(column) else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Counted column is missing",
                column
            );
        };

        Ok(distinct_rows(&existing.rows, index).len())
    }

    async fn drop_table(&self, table: &str) -> SyncResult<()> {
        let mut tables = self.tables.lock().await;
        tables.remove(table);

        Ok(())
    }
}
