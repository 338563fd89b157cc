//! Shared (split) key layouts.
//!
//! Instances of a split-layout type share one ordered key list; each
//! instance only stores a value array indexed by the key's slot. This is
//! the layout the attribute caches optimize for: once a key's slot is known,
//! a load is a single array read guarded by a layout-identity compare.
//!
//! # Example
//!
//! ```
//! use core_types::LayoutId;
//! use object_model::SharedKeys;
//!
//! let mut keys = SharedKeys::new(LayoutId::from_raw(0));
//! assert_eq!(keys.add_key("x"), Some(0));
//! assert_eq!(keys.add_key("y"), Some(1));
//! assert_eq!(keys.add_key("x"), Some(0));
//! assert_eq!(keys.index_of("y"), Some(1));
//! ```

use std::sync::Arc;

use core_types::LayoutId;
use rustc_hash::FxHashMap;

/// Maximum number of keys a shared layout may hold before instances
/// diverge to combined storage.
pub const MAX_SHARED_KEYS: usize = 30;

/// An append-only, ordered key → slot map shared by all instances of a type.
///
/// Keys are never removed or reordered, so `len()` doubles as the layout's
/// generation: an unchanged length proves no key was added.
#[derive(Debug, Clone)]
pub struct SharedKeys {
    id: LayoutId,
    keys: Vec<Arc<str>>,
    index: FxHashMap<Arc<str>, usize>,
}

impl SharedKeys {
    /// Create an empty layout with the given identity
    pub fn new(id: LayoutId) -> Self {
        SharedKeys {
            id,
            keys: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Layout identity
    #[inline]
    pub fn id(&self) -> LayoutId {
        self.id
    }

    /// Number of keys (the layout generation)
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no key has been added yet
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// True when no more keys can be appended
    #[inline]
    pub fn is_full(&self) -> bool {
        self.keys.len() >= MAX_SHARED_KEYS
    }

    /// Slot index of a key
    #[inline]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Slot for `name`, appending it when absent.
    ///
    /// Returns `None` when the key is absent and the layout is full.
    pub fn add_key(&mut self, name: &str) -> Option<usize> {
        if let Some(slot) = self.index_of(name) {
            return Some(slot);
        }
        if self.is_full() {
            return None;
        }
        let slot = self.keys.len();
        let key: Arc<str> = Arc::from(name);
        self.keys.push(key.clone());
        self.index.insert(key, slot);
        Some(slot)
    }

    /// Keys in slot order
    pub fn keys(&self) -> impl Iterator<Item = &Arc<str>> {
        self.keys.iter()
    }
}
