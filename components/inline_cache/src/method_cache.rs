//! Instance method cache.
//!
//! Caches the unbound function found on the receiver type's MRO so a call
//! site can pass the receiver as the first argument without allocating a
//! bound method. Only plain functions are cached; anything else resolves
//! through the slow path every time.

use std::sync::Arc;

use arrayvec::ArrayVec;
use core_types::{CacheId, InstanceId, TypeId, VersionTag};
use object_model::{BoundSelf, Function, ObjectSpace, Value};
use tracing::debug;

use crate::attr_cache::{FillOutcome, MAX_CACHE_ENTRIES};
use crate::stats::{MissReason, MissReporter};
use crate::strategy::{instance_shadow, Probe, ShadowGuard};
use crate::watchers::WatcherRegistry;

/// One (type, version, function) record
#[derive(Debug, Clone)]
pub struct MethodEntry {
    /// Receiver type the entry applies to
    pub type_id: TypeId,
    /// Version token the entry was filled under
    pub version: VersionTag,
    /// The function found on the MRO
    pub function: Arc<Function>,
    /// Proof that instance dicts cannot shadow the name
    pub shadow_guard: Option<ShadowGuard>,
}

/// Per-site cache for instance method lookups
#[derive(Clone)]
pub struct MethodCache {
    id: CacheId,
    name: Arc<str>,
    capacity: usize,
    entries: ArrayVec<MethodEntry, MAX_CACHE_ENTRIES>,
    reporter: Option<Arc<dyn MissReporter>>,
}

impl std::fmt::Debug for MethodCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodCache")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("entries", &self.entries)
            .finish()
    }
}

impl MethodCache {
    /// Create an empty cache; `capacity` is clamped to `1..=MAX_CACHE_ENTRIES`
    pub fn new(
        id: CacheId,
        name: impl Into<Arc<str>>,
        capacity: usize,
        reporter: Option<Arc<dyn MissReporter>>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            capacity: capacity.clamp(1, MAX_CACHE_ENTRIES),
            entries: ArrayVec::new(),
            reporter,
        }
    }

    /// Site handle
    pub fn id(&self) -> CacheId {
        self.id
    }

    /// Method name the site looks up
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries in use
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entry is in use
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in fill order
    pub fn entries(&self) -> &[MethodEntry] {
        &self.entries
    }

    /// Types this site holds entries for
    pub fn watched_types(&self) -> Vec<TypeId> {
        self.entries.iter().map(|e| e.type_id).collect()
    }

    pub(crate) fn reporter(&self) -> Option<&Arc<dyn MissReporter>> {
        self.reporter.as_ref()
    }

    /// Resolve `receiver.name` for a call from a valid entry.
    ///
    /// A value in the instance dict shadows the cached function and is
    /// returned ready to call.
    pub fn lookup(
        &self,
        space: &ObjectSpace,
        receiver: &Value,
        obj: InstanceId,
        ty: TypeId,
    ) -> Probe<(Value, BoundSelf)> {
        let Some(entry) = self.entries.iter().find(|e| e.type_id == ty) else {
            return Probe::Miss(MissReason::NoEntry);
        };
        let current = space.version_of(ty);
        if !current.is_valid() || entry.version != current {
            return Probe::Miss(MissReason::StaleVersion);
        }
        match instance_shadow(space, obj, &self.name, entry.shadow_guard.as_ref()) {
            Some(shadow) => Probe::Hit((shadow, BoundSelf::NoSelf)),
            None => Probe::Hit((
                Value::Function(entry.function.clone()),
                BoundSelf::Receiver(receiver.clone()),
            )),
        }
    }

    /// Record the method found for `ty` after a successful slow-path lookup
    pub fn fill(&mut self, space: &ObjectSpace, watchers: &WatcherRegistry, ty: TypeId) -> FillOutcome {
        if !space.ensure_version_token(ty) {
            return FillOutcome::Rejected(MissReason::Uncacheable);
        }
        let version = space.version_of(ty);
        if !version.is_valid() {
            return FillOutcome::Rejected(MissReason::Uncacheable);
        }
        let Some(Value::Function(function)) = space.find_in_mro(ty, &self.name) else {
            return FillOutcome::Rejected(MissReason::NotCacheable);
        };
        let entry = MethodEntry {
            type_id: ty,
            version,
            function: function.clone(),
            shadow_guard: ShadowGuard::capture(space, ty, &self.name),
        };

        if let Some(existing) = self.entries.iter_mut().find(|e| e.type_id == ty) {
            if existing.version == version {
                return FillOutcome::AlreadyCached;
            }
            *existing = entry;
        } else {
            if self.entries.len() >= self.capacity {
                return FillOutcome::Rejected(MissReason::CapacityExhausted);
            }
            self.entries.push(entry);
        }
        watchers.watch(ty, self.id);
        debug!(site = %self.id, name = %self.name, ty = %ty, "method entry filled");
        FillOutcome::Filled
    }

    /// Drop every entry keyed by `ty`; returns how many were dropped
    pub fn type_changed(&mut self, ty: TypeId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.type_id != ty);
        before - self.entries.len()
    }
}
