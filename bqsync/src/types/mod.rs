//! Row values moving from the source database to the warehouse.

mod cell;
mod row;

pub use cell::*;
pub use row::*;
