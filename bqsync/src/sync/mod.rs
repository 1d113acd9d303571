//! Per-run orchestration of extract, write and cursor advance.

mod orchestrator;
mod report;

pub use orchestrator::*;
pub use report::*;
