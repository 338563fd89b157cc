//! Type-change interest registry.
//!
//! Maps each type to the set of sites holding entries keyed by it. A type
//! change detaches the whole set under the lock and notifies the members
//! after releasing it, so a notified site may register again (or unwatch
//! other types) without deadlocking.

use core_types::{CacheId, TypeId};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

/// Which sites to tell when a type changes
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    interest: Mutex<FxHashMap<TypeId, FxHashSet<CacheId>>>,
}

impl WatcherRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest of `site` in `ty`; false if already registered
    pub fn watch(&self, ty: TypeId, site: CacheId) -> bool {
        self.interest.lock().entry(ty).or_default().insert(site)
    }

    /// Drop interest of `site` in `ty`; false if it was not registered
    pub fn unwatch(&self, ty: TypeId, site: CacheId) -> bool {
        self.interest
            .lock()
            .get_mut(&ty)
            .map(|set| set.remove(&site))
            .unwrap_or(false)
    }

    /// True when `site` is registered for `ty`
    pub fn is_watching(&self, ty: TypeId, site: CacheId) -> bool {
        self.interest
            .lock()
            .get(&ty)
            .is_some_and(|set| set.contains(&site))
    }

    /// Sites registered for `ty`, sorted
    pub fn watchers_of(&self, ty: TypeId) -> Vec<CacheId> {
        let mut sites: Vec<CacheId> = self
            .interest
            .lock()
            .get(&ty)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        sites.sort_unstable();
        sites
    }

    /// Take the interest set of `ty`, leaving it empty
    pub fn detach(&self, ty: TypeId) -> Vec<CacheId> {
        let mut guard = self.interest.lock();
        match guard.get_mut(&ty) {
            Some(set) => set.drain().collect(),
            None => Vec::new(),
        }
    }

    /// Detach the interest set of `ty` and call `notify` once per member.
    ///
    /// The lock is released before the first call. Returns the number of
    /// sites notified.
    pub fn type_changed<F>(&self, ty: TypeId, mut notify: F) -> usize
    where
        F: FnMut(CacheId),
    {
        let sites = self.detach(ty);
        trace!(ty = %ty, sites = sites.len(), "notifying watchers");
        for site in &sites {
            notify(*site);
        }
        sites.len()
    }

    /// Number of types with a (possibly empty) interest set
    pub fn tracked_types(&self) -> usize {
        self.interest.lock().len()
    }
}
