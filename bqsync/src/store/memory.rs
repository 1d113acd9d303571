use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::SyncResult;
use crate::store::{CursorStore, SyncCursor};

#[derive(Debug, Default)]
struct Inner {
    cursors: BTreeMap<String, SyncCursor>,
    /// Every position each cursor was advanced to, in call order.
    history: HashMap<String, Vec<i64>>,
}

/// Cursor store kept in process memory.
///
/// Cursors are lost on restart, so every restart re-sends all entities. Used with the memory
/// warehouse and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positions passed to [`CursorStore::advance_cursor`] for `entity_name`.
    pub async fn cursor_history(&self, entity_name: &str) -> Vec<i64> {
        let inner = self.inner.lock().await;
        inner.history.get(entity_name).cloned().unwrap_or_default()
    }
}

impl CursorStore for MemoryCursorStore {
    async fn get_cursor(&self, entity_name: &str) -> SyncResult<i64> {
        let inner = self.inner.lock().await;

        Ok(inner
            .cursors
            .get(entity_name)
            .map(|cursor| cursor.last_synced_row_id)
            .unwrap_or(0))
    }

    async fn load_cursor(&self, entity_name: &str) -> SyncResult<Option<SyncCursor>> {
        let inner = self.inner.lock().await;

        Ok(inner.cursors.get(entity_name).cloned())
    }

    async fn load_cursors(&self) -> SyncResult<Vec<SyncCursor>> {
        let inner = self.inner.lock().await;

        Ok(inner.cursors.values().cloned().collect())
    }

    async fn advance_cursor(
        &self,
        entity_name: &str,
        row_id: i64,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        let cursor = inner
            .cursors
            .entry(entity_name.to_string())
            .or_insert_with(|| SyncCursor {
                entity_name: entity_name.to_string(),
                last_synced_row_id: 0,
                last_synced_at: synced_at,
            });
        cursor.last_synced_row_id = cursor.last_synced_row_id.max(row_id);
        cursor.last_synced_at = synced_at;

        inner
            .history
            .entry(entity_name.to_string())
            .or_default()
            .push(row_id);

        Ok(())
    }

    async fn reset_cursor(&self, entity_name: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.cursors.remove(entity_name);

        Ok(())
    }
}
