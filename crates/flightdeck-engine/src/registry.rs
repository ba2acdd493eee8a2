//! Immutable registries built once at startup.
//!
//! Items are collected through a [`RegistryBuilder`], which rejects
//! duplicate ids, and then frozen into a [`Registry`] that is shared
//! read-only.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistryError;

/// Items that can be stored in a registry.
pub trait Registerable: Send + Sync {
    /// Unique identifier for this item.
    fn registry_id(&self) -> &str;
}

/// Collects items before freezing them into a [`Registry`].
pub struct RegistryBuilder<T: ?Sized + Registerable> {
    items: HashMap<String, Arc<T>>,
}

impl<T: ?Sized + Registerable> RegistryBuilder<T> {
    pub fn new() -> Self {
        Self { items: HashMap::new() }
    }

    /// Register an item.
    ///
    /// Returns an error if an item with the same id is already registered.
    pub fn register(&mut self, item: Arc<T>) -> Result<&mut Self, RegistryError> {
        let id = item.registry_id().to_string();

        if self.items.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        self.items.insert(id, item);
        Ok(self)
    }

    /// Builder-style register.
    pub fn with(mut self, item: Arc<T>) -> Result<Self, RegistryError> {
        self.register(item)?;
        Ok(self)
    }

    pub fn build(self) -> Registry<T> {
        Registry {
            items: Arc::new(self.items),
        }
    }
}

impl<T: ?Sized + Registerable> Default for RegistryBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen id → item mapping. Cheap to clone.
pub struct Registry<T: ?Sized + Registerable> {
    items: Arc<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized + Registerable> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T: ?Sized + Registerable> Registry<T> {
    pub fn builder() -> RegistryBuilder<T> {
        RegistryBuilder::new()
    }

    /// Get an item by id.
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.items.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// All registered ids, sorted.
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.items.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
