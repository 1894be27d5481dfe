use crate::error::{AppError, Result};
use crate::kv::KeyValueStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of key-value stores addressed by name.
#[derive(Clone, Default)]
pub struct KeyValueService {
    stores: Arc<RwLock<HashMap<String, Arc<dyn KeyValueStore>>>>,
}

impl KeyValueService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `store` under its own name, replacing any previous registration.
    pub fn register(&self, store: Arc<dyn KeyValueStore>) {
        let name = store.name().to_string();
        let mut stores = self.stores.write().unwrap_or_else(|e| e.into_inner());
        if stores.insert(name.clone(), store).is_some() {
            tracing::warn!(store = %name, "Replaced existing key-value store registration");
        } else {
            tracing::debug!(store = %name, "Registered key-value store");
        }
    }

    /// Looks up the store registered under `name`.
    pub fn store(&self, name: &str) -> Result<Arc<dyn KeyValueStore>> {
        let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
        stores
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::StoreNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = stores.keys().cloned().collect();
        names.sort();
        names
    }
}
