//! Warehouse sync service binary.
//!
//! Loads configuration, initializes tracing and runs the sync schedule until SIGTERM or ctrl-c.

use telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_replicator_config;
use crate::core::start_replicator_with_config;
use crate::error::{ReplicatorError, ReplicatorResult};

mod alerts;
mod config;
mod core;
mod error;

fn main() -> ReplicatorResult<()> {
    let replicator_config = load_replicator_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(ReplicatorError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            if let Err(err) = start_replicator_with_config(replicator_config).await {
                error!(error = %err, category = err.category(), "replicator failed");
                return Err(err);
            }

            Ok(())
        })
}
