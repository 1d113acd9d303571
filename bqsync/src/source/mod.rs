//! Reading changed rows from the operational database.

mod base;
mod memory;
pub mod normalize;
mod postgres;

pub use base::*;
pub use memory::*;
pub use postgres::*;
