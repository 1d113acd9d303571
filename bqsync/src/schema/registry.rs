use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{ErrorKind, SyncResult};
use crate::schema::{EntityDescriptor, builtin_entities};
use crate::{bail, sync_error};

/// Names of the registered entities, in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityListing {
    pub tables: Vec<String>,
    pub total_count: usize,
}

/// Immutable lookup table from entity name to [`EntityDescriptor`].
///
/// Populated once at startup. Iteration follows registration order, which is also the order
/// entities are processed in a full sync.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    descriptors: Vec<Arc<EntityDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl SchemaRegistry {
    /// Validates every descriptor and rejects duplicate names.
    pub fn new(descriptors: Vec<EntityDescriptor>) -> SyncResult<Self> {
        let mut by_name = HashMap::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            descriptor.validate()?;
            if by_name.insert(descriptor.name.clone(), index).is_some() {
                bail!(
                    ErrorKind::ConfigError,
                    "Entity is registered more than once",
                    &descriptor.name
                );
            }
        }

        Ok(Self {
            descriptors: descriptors.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }

    /// Registry of the entities shipped with the engine.
    pub fn builtin() -> SyncResult<Self> {
        Self::new(builtin_entities())
    }

    /// Keeps only `names`, preserving registration order. An empty allowlist keeps everything.
    pub fn restricted_to<S: AsRef<str>>(self, names: &[S]) -> SyncResult<Self> {
        if names.is_empty() {
            return Ok(self);
        }

        let selected = self.resolve(names)?;
        let descriptors = self
            .descriptors
            .iter()
            .filter(|descriptor| selected.iter().any(|s| s.name == descriptor.name))
            .map(|descriptor| descriptor.as_ref().clone())
            .collect();

        Self::new(descriptors)
    }

    /// Looks up a single entity.
    pub fn schema_for(&self, name: &str) -> SyncResult<Arc<EntityDescriptor>> {
        self.by_name
            .get(name)
            .map(|index| self.descriptors[*index].clone())
            .ok_or_else(|| {
                sync_error!(
                    ErrorKind::UnknownEntity,
                    "Entity is not registered",
                    name
                )
            })
    }

    /// Resolves every name or none.
    ///
    /// The error lists all unknown names so a caller can fix the request in one go. Duplicates
    /// in `names` are collapsed.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> SyncResult<Vec<Arc<EntityDescriptor>>> {
        let unknown: Vec<&str> = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| !self.by_name.contains_key(*name))
            .collect();
        if !unknown.is_empty() {
            bail!(
                ErrorKind::UnknownEntity,
                "Entity is not registered",
                unknown.join(", ")
            );
        }

        let mut resolved: Vec<Arc<EntityDescriptor>> = Vec::with_capacity(names.len());
        for name in names {
            let descriptor = self.schema_for(name.as_ref())?;
            if !resolved.iter().any(|d| d.name == descriptor.name) {
                resolved.push(descriptor);
            }
        }

        Ok(resolved)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn descriptors(&self) -> &[Arc<EntityDescriptor>] {
        &self.descriptors
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }

    pub fn listing(&self) -> EntityListing {
        let tables = self.entity_names();
        EntityListing {
            total_count: tables.len(),
            tables,
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
