use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::instance::{Instance, InstanceStatus};

/// Best-effort in-memory cache of instance metadata.
///
/// Lost on restart and never consulted to decide whether an external footprint
/// exists; the orchestrator refreshes it from the reconciled state.
#[derive(Default)]
pub struct InstanceRegistry {
    storage: RwLock<HashMap<String, Instance>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, instance: Instance) {
        self.storage
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance.name.clone(), instance);
    }

    /// Update the status of a cached entry. Returns false when nothing is cached.
    pub fn set_status(&self, name: &str, status: InstanceStatus) -> bool {
        let mut storage = self.storage.write().unwrap_or_else(PoisonError::into_inner);
        match storage.get_mut(name) {
            Some(instance) => {
                instance.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, name: &str) -> Option<Instance> {
        self.storage
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Instance> {
        self.storage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
