use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{ErrorKind, SyncResult};
use crate::store::{CursorStore, SyncCursor};
use crate::sync_error;

#[derive(Debug, Default)]
struct Inner {
    /// Remaining failures of `advance_cursor`, per entity.
    advance_failures: HashMap<String, usize>,
    get_calls: HashMap<String, usize>,
    advance_calls: HashMap<String, usize>,
}

/// Cursor store wrapper that counts calls and fails advances on demand.
#[derive(Debug, Clone)]
pub struct FaultyCursorStore<S> {
    wrapped: S,
    inner: Arc<Mutex<Inner>>,
}

impl<S> FaultyCursorStore<S> {
    pub fn wrap(wrapped: S) -> Self {
        Self {
            wrapped,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn inner(&self) -> &S {
        &self.wrapped
    }

    /// Makes the next `times` advances of `entity_name` fail.
    pub async fn fail_advance(&self, entity_name: &str, times: usize) {
        let mut inner = self.inner.lock().await;
        inner
            .advance_failures
            .insert(entity_name.to_string(), times);
    }

    pub async fn get_calls(&self, entity_name: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.get_calls.get(entity_name).copied().unwrap_or(0)
    }

    pub async fn advance_calls(&self, entity_name: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.advance_calls.get(entity_name).copied().unwrap_or(0)
    }

    /// Total number of calls of any kind, across entities.
    pub async fn total_calls(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.get_calls.values().sum::<usize>() + inner.advance_calls.values().sum::<usize>()
    }
}

impl<S> CursorStore for FaultyCursorStore<S>
where
    S: CursorStore + Send + Sync,
{
    async fn get_cursor(&self, entity_name: &str) -> SyncResult<i64> {
        {
            let mut inner = self.inner.lock().await;
            *inner.get_calls.entry(entity_name.to_string()).or_default() += 1;
        }

        self.wrapped.get_cursor(entity_name).await
    }

    async fn load_cursor(&self, entity_name: &str) -> SyncResult<Option<SyncCursor>> {
        self.wrapped.load_cursor(entity_name).await
    }

    async fn load_cursors(&self) -> SyncResult<Vec<SyncCursor>> {
        self.wrapped.load_cursors().await
    }

    async fn advance_cursor(
        &self,
        entity_name: &str,
        row_id: i64,
        synced_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        let should_fail = {
            let mut inner = self.inner.lock().await;
            *inner
                .advance_calls
                .entry(entity_name.to_string())
                .or_default() += 1;

            match inner.advance_failures.get_mut(entity_name) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        if should_fail {
            return Err(sync_error!(
                ErrorKind::CursorStoreFailed,
                "Injected cursor store failure",
                entity_name
            ));
        }

        self.wrapped
            .advance_cursor(entity_name, row_id, synced_at)
            .await
    }

    async fn reset_cursor(&self, entity_name: &str) -> SyncResult<()> {
        self.wrapped.reset_cursor(entity_name).await
    }
}
