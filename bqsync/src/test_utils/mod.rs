//! Fault-injecting wrappers, fixtures and throwaway databases for exercising the engine.

pub mod alerts;
pub mod cursor_store;
pub mod database;
pub mod fixtures;
pub mod warehouse;
