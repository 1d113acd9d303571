use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::SyncResult;
use crate::schema::EntityDescriptor;
use crate::source::normalize::normalize_cell;
use crate::source::{ChangeExtractor, extract_error};
use crate::types::SyncRow;

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, Vec<SyncRow>>,
    extract_calls: HashMap<String, usize>,
}

/// Source tables held in memory, keyed by entity name.
///
/// Rows go through the same normalization as rows read from Postgres.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_rows(&self, entity_name: &str, rows: Vec<SyncRow>) {
        let mut inner = self.inner.lock().await;
        inner
            .tables
            .entry(entity_name.to_string())
            .or_default()
            .extend(rows);
    }

    /// Replaces the row with the same identifier, or inserts it.
    pub async fn upsert_row(&self, entity_name: &str, row: SyncRow) {
        let mut inner = self.inner.lock().await;
        let table = inner.tables.entry(entity_name.to_string()).or_default();
        match table.iter_mut().find(|existing| existing.id == row.id) {
            Some(existing) => *existing = row,
            None => table.push(row),
        }
    }

    /// Number of [`ChangeExtractor::extract`] calls made for `entity_name`.
    pub async fn extract_calls(&self, entity_name: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.extract_calls.get(entity_name).copied().unwrap_or(0)
    }
}

impl ChangeExtractor for MemorySource {
    async fn extract(&self, entity: &EntityDescriptor, since_row_id: i64) -> SyncResult<Vec<SyncRow>> {
        let mut rows: Vec<SyncRow> = {
            let mut inner = self.inner.lock().await;
            *inner.extract_calls.entry(entity.name.clone()).or_default() += 1;
            inner
                .tables
                .get(&entity.name)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| row.id > since_row_id)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        rows.sort_by_key(|row| row.id);

        let normalize = |row: SyncRow| -> SyncResult<SyncRow> {
            let values = entity
                .schema
                .iter()
                .zip(row.values)
                .map(|(column, cell)| normalize_cell(column, cell))
                .collect::<SyncResult<Vec<_>>>()?;
            Ok(SyncRow::new(row.id, values))
        };

        rows.into_iter()
            .map(normalize)
            .collect::<SyncResult<Vec<_>>>()
            .map_err(|err| extract_error(entity, err))
    }
}
