//! Write-once name registry
//!
//! Readers go through an `ArcSwap` pointer and never block. Writers are
//! serialized by a mutex and publish a fresh map per registration, so an
//! execution that already loaded the map keeps a consistent view.

use crate::error::ConfigurationError;
use arc_swap::ArcSwap;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

/// Name-keyed registry that rejects duplicate registrations.
pub struct Registry<T: ?Sized> {
    /// What the registry holds, used in error messages ("closure", "flow")
    kind: &'static str,
    entries: ArcSwap<HashMap<String, Arc<T>>>,
    writer: Mutex<()>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: ArcSwap::new(Arc::new(HashMap::new())),
            writer: Mutex::new(()),
        }
    }

    /// Register an entry under `name`, failing if the name is taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        entry: Arc<T>,
    ) -> Result<(), ConfigurationError> {
        let name = name.into();
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.entries.load();
        if current.contains_key(&name) {
            return Err(ConfigurationError::DuplicateName {
                kind: self.kind,
                name,
            });
        }

        let mut next = (**current).clone();
        next.insert(name, entry);
        self.entries.store(Arc::new(next));
        Ok(())
    }

    /// Lock-free lookup
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.load().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.load().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Drop every entry. Only used to isolate tests.
    pub(crate) fn clear(&self) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.entries.store(Arc::new(HashMap::new()));
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry: Registry<String> = Registry::new("thing");
        registry.register("a", Arc::new("first".to_string())).unwrap();
        registry.register("b", Arc::new("second".to_string())).unwrap();

        assert_eq!(registry.get("a").unwrap().as_str(), "first");
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_rejected_and_original_kept() {
        let registry: Registry<String> = Registry::new("thing");
        registry.register("a", Arc::new("first".to_string())).unwrap();
        let err = registry.register("a", Arc::new("other".to_string())).unwrap_err();

        assert!(matches!(err, ConfigurationError::DuplicateName { kind: "thing", .. }));
        assert_eq!(registry.get("a").unwrap().as_str(), "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_loaded_view_survives_later_registration() {
        let registry: Registry<u32> = Registry::new("number");
        registry.register("one", Arc::new(1)).unwrap();
        let before = registry.entries.load_full();
        registry.register("two", Arc::new(2)).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_duplicate_registration_only_one_wins() {
        let registry: Arc<Registry<usize>> = Arc::new(Registry::new("number"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register("shared", Arc::new(i)).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
    }
}
