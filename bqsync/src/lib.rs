//! Incremental mirroring of an operational Postgres database into BigQuery.
//!
//! Every registered entity keeps a cursor, the highest row identifier already written to the
//! warehouse. A sync extracts the rows beyond the cursor, writes them (append for event-like
//! entities, staged merge for updatable ones) and only then advances the cursor, so a failure
//! leads to re-delivery and never to data loss.
//!
//! The [`sync::SyncOrchestrator`] runs one pass over the entities, isolating failures per entity.
//! The [`schedule::ScheduleBinding`] guards it against overlapping runs and is driven by
//! [`schedule::run_schedule`] or by operator triggers.

mod macros;

pub mod error;
pub mod migrations;
pub mod notification;
pub mod schedule;
pub mod schema;
pub mod source;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod warehouse;
