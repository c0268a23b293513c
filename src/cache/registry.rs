use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::family::FamilyDescriptor;
use super::keys::{KeyPattern, ResourceKey};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Family descriptors plus an index of the keys currently held per family.
///
/// The store keeps the live-key index current; callers use it to turn a
/// [`KeyPattern`] into the concrete keys it covers.
pub struct KeyRegistry {
    families: RwLock<HashMap<String, Arc<FamilyDescriptor>>>,
    live: RwLock<HashMap<String, HashSet<ResourceKey>>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self {
            families: RwLock::new(HashMap::new()),
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Build a registry holding the given descriptors.
    pub fn with_families(families: impl IntoIterator<Item = FamilyDescriptor>) -> Self {
        let registry = Self::new();
        for family in families {
            registry.register_family(family);
        }
        registry
    }

    pub fn register_family(&self, family: FamilyDescriptor) {
        let mut families = rw_write(&self.families, SOURCE, "register_family");
        families.insert(family.name().to_string(), Arc::new(family));
    }

    pub fn family(&self, name: &str) -> Option<Arc<FamilyDescriptor>> {
        let families = rw_read(&self.families, SOURCE, "family");
        families.get(name).cloned()
    }

    pub fn family_names(&self) -> Vec<String> {
        let families = rw_read(&self.families, SOURCE, "family_names");
        let mut names: Vec<String> = families.keys().cloned().collect();
        names.sort();
        names
    }

    /// Patterns covering every key of a family.
    pub fn family_of(&self, name: &str) -> Vec<KeyPattern> {
        match self.family(name) {
            Some(family) => family.patterns(),
            None => vec![KeyPattern::family(name)],
        }
    }

    pub fn track(&self, key: &ResourceKey) {
        let mut live = rw_write(&self.live, SOURCE, "track");
        live.entry(key.family().to_string())
            .or_default()
            .insert(key.clone());
    }

    pub fn untrack(&self, key: &ResourceKey) {
        let mut live = rw_write(&self.live, SOURCE, "untrack");
        if let Some(keys) = live.get_mut(key.family()) {
            keys.remove(key);
            if keys.is_empty() {
                live.remove(key.family());
            }
        }
    }

    /// Live keys matched by a pattern, in canonical order.
    pub fn keys_matching(&self, pattern: &KeyPattern) -> Vec<ResourceKey> {
        let live = rw_read(&self.live, SOURCE, "keys_matching");
        let mut keys: Vec<ResourceKey> = live
            .get(pattern.family_name())
            .map(|keys| keys.iter().filter(|key| pattern.matches(key)).cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn clear_keys(&self) {
        let mut live = rw_write(&self.live, SOURCE, "clear_keys");
        live.clear();
    }

    pub fn family_count(&self) -> usize {
        rw_read(&self.families, SOURCE, "family_count").len()
    }

    pub fn live_key_count(&self) -> usize {
        let live = rw_read(&self.live, SOURCE, "live_key_count");
        live.values().map(HashSet::len).sum()
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
