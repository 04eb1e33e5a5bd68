//! Lazily populated per-service registries.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Name-keyed map of shared instances, created on first use.
///
/// Lookups take the read lock; a miss takes the write lock and checks
/// again before inserting, so each key gets exactly one instance.
pub struct Registry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .read()
            .expect("registry lock")
            .get(name)
            .cloned()
    }

    /// Return the instance for `name`, building it with `create` if absent.
    pub fn get_or_create(&self, name: &str, create: impl FnOnce() -> T) -> Arc<T> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut entries = self.entries.write().expect("registry lock");
        entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(create()))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn creates_once_per_name() {
        let registry: Registry<String> = Registry::new();
        let a = registry.get_or_create("api", || "first".into());
        let b = registry.get_or_create("api", || "second".into());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b, "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_name_is_none() {
        let registry: Registry<u32> = Registry::new();
        assert!(registry.get("nope").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_creation_yields_one_instance() {
        let registry = Arc::new(Registry::<usize>::new());
        let created = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let created = Arc::clone(&created);
                std::thread::spawn(move || {
                    registry.get_or_create("db", || created.fetch_add(1, Ordering::SeqCst))
                })
            })
            .collect();

        let first = registry.get_or_create("db", || usize::MAX);
        for h in handles {
            assert!(Arc::ptr_eq(&h.join().unwrap(), &first));
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }
}
