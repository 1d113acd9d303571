//! Timer cadences, the in-flight guard and the control surface around the orchestrator.

mod binding;
mod cadence;
mod runner;

pub use binding::*;
pub use cadence::*;
pub use runner::*;
