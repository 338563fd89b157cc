//! Module-like namespaces.
//!
//! Modules are mutated directly rather than through the type/descriptor
//! protocol, so caches key on a per-namespace generation counter that is
//! bumped on every insertion, overwrite and deletion.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::value::Value;

/// A named namespace with a generation counter.
#[derive(Debug, Clone)]
pub struct ModuleNamespace {
    name: Arc<str>,
    dict: FxHashMap<Arc<str>, Value>,
    generation: u64,
}

impl ModuleNamespace {
    /// Create an empty namespace
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        ModuleNamespace {
            name: name.into(),
            dict: FxHashMap::default(),
            generation: 0,
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live generation counter
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Look up a key
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.dict.get(name)
    }

    /// Insert or overwrite a key
    pub fn set(&mut self, name: &str, value: Value) {
        self.dict.insert(Arc::from(name), value);
        self.generation += 1;
    }

    /// Remove a key, returning its value
    pub fn delete(&mut self, name: &str) -> Option<Value> {
        let removed = self.dict.remove(name);
        if removed.is_some() {
            self.generation += 1;
        }
        removed
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.dict.len()
    }

    /// True when the namespace is empty
    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }
}
