//! Entity descriptors and the registry resolving entity names to them.

mod descriptor;
mod entities;
mod registry;

pub use descriptor::*;
pub use entities::builtin_entities;
pub use registry::*;
