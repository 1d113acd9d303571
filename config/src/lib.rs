//! Configuration for the warehouse sync services.
//!
//! Holds the typed configuration tree, the runtime [`environment::Environment`] and the layered
//! loader that merges configuration files with `APP_` environment variable overrides.

pub mod environment;
pub mod load;
mod secret;
pub mod shared;

pub use secret::SerializableSecretString;
