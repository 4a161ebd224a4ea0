use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use canopy_api::ComponentAddress;

/// # Service Registry
///
/// Maps symbolic service names to the components providing them. A name
/// may be provided by several components; lookups prefer the most recent
/// registration.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: RwLock<HashMap<String, Vec<ComponentAddress>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address` as a provider of `service`.
    pub fn register(&self, service: &str, address: ComponentAddress) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let providers = entries.entry(service.to_string()).or_default();
        providers.retain(|existing| existing != &address);
        providers.push(address);
    }

    /// Removes one provider.
    ///
    /// # Returns
    /// `true` if it was registered.
    pub fn unregister(&self, service: &str, address: &ComponentAddress) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(providers) = entries.get_mut(service) else {
            return false;
        };
        let before = providers.len();
        providers.retain(|existing| existing != address);
        let removed = providers.len() != before;
        if providers.is_empty() {
            entries.remove(service);
        }
        removed
    }

    /// Removes every provider living under `root_id`.
    pub fn unregister_root(&self, root_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, providers| {
            providers.retain(|address| address.root_id() != root_id);
            !providers.is_empty()
        });
    }

    pub fn locate(&self, service: &str) -> Option<ComponentAddress> {
        self.locate_excluding(service, &[])
    }

    /// Resolves `service`, skipping providers inside any excluded subtree.
    pub fn locate_excluding(&self, service: &str, excluded: &[ComponentAddress]) -> Option<ComponentAddress> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(service)?.iter().rev().find(|address| {
            !excluded
                .iter()
                .any(|subtree| subtree.is_ancestor_of(address))
        })
        .cloned()
    }

    /// Names of all registered services, sorted.
    pub fn services(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }
}
