use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SyncResult;

/// Bookmark of how far an entity has been mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncCursor {
    pub entity_name: String,
    pub last_synced_row_id: i64,
    pub last_synced_at: DateTime<Utc>,
}

/// Storage of [`SyncCursor`]s keyed by entity name.
///
/// A missing cursor means the entity has never been synced and reads as position `0`.
/// Implementations must make [`CursorStore::advance_cursor`] an atomic upsert that never moves
/// a cursor backwards.
pub trait CursorStore {
    /// Returns the last synced identifier, `0` when no cursor exists.
    fn get_cursor(&self, entity_name: &str) -> impl Future<Output = SyncResult<i64>> + Send;

    fn load_cursor(
        &self,
        entity_name: &str,
    ) -> impl Future<Output = SyncResult<Option<SyncCursor>>> + Send;

    /// Returns every stored cursor ordered by entity name.
    fn load_cursors(&self) -> impl Future<Output = SyncResult<Vec<SyncCursor>>> + Send;

    /// Moves the cursor of `entity_name` to `row_id`.
    ///
    /// Must only be called once the rows up to `row_id` are durably written to the warehouse.
    fn advance_cursor(
        &self,
        entity_name: &str,
        row_id: i64,
        synced_at: DateTime<Utc>,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Forgets the cursor so the next run re-sends the whole entity.
    ///
    /// Operator recovery action, never called by the sync itself.
    fn reset_cursor(&self, entity_name: &str) -> impl Future<Output = SyncResult<()>> + Send;
}
