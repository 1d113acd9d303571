//! Delivery of sync failure summaries.

mod base;
mod log;
mod webhook;

pub use base::*;
pub use log::*;
pub use webhook::*;
