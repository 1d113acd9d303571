use std::future::Future;

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::schema::EntityDescriptor;
use crate::sync_error;
use crate::types::SyncRow;

/// Reads rows added to an entity since a cursor position.
///
/// Implementations never write to the source and never lock rows.
pub trait ChangeExtractor {
    /// Returns every row whose identifier is strictly greater than `since_row_id`, ascending by
    /// identifier, with temporal columns normalized.
    ///
    /// No new rows is an empty vector, not an error. Failures are reported with
    /// [`ErrorKind::ExtractFailed`].
    fn extract(
        &self,
        entity: &EntityDescriptor,
        since_row_id: i64,
    ) -> impl Future<Output = SyncResult<Vec<SyncRow>>> + Send;
}

pub(crate) fn extract_error(entity: &EntityDescriptor, err: SyncError) -> SyncError {
    if err.kind() == ErrorKind::ExtractFailed {
        return err;
    }

    sync_error!(
        ErrorKind::ExtractFailed,
        "Failed to extract changed rows",
        format!("entity `{}`: {}", entity.name, err.summary()),
        source: err
    )
}

/// Checks that `rows` are strictly ascending and all beyond `since_row_id`.
pub(crate) fn check_row_order(
    entity: &EntityDescriptor,
    since_row_id: i64,
    rows: &[SyncRow],
) -> SyncResult<()> {
    let mut previous = since_row_id;
    for row in rows {
        if row.id <= previous {
            return Err(sync_error!(
                ErrorKind::ExtractFailed,
                "Source returned rows out of identifier order",
                format!(
                    "entity `{}`: row {} follows {} (cursor {since_row_id})",
                    entity.name, row.id, previous
                )
            ));
        }
        previous = row.id;
    }

    Ok(())
}
