//! Writing extracted batches into the analytical warehouse.

mod base;
#[cfg(feature = "bigquery")]
pub mod bigquery;
mod memory;
mod retry;
mod writer;

pub use base::*;
pub use memory::*;
pub use retry::*;
pub use writer::*;
