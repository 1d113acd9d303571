mod alerts;
mod base;
mod connection;
mod replicator;
mod retry;
mod schedule;
mod sync;
mod warehouse;

pub use alerts::*;
pub use base::*;
pub use connection::*;
pub use replicator::*;
pub use retry::*;
pub use schedule::*;
pub use sync::*;
pub use warehouse::*;
