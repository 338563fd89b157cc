//! Instance attribute cache.
//!
//! A site holds up to `capacity` entries keyed by receiver type. Each entry
//! is valid only while the type's version token still equals the one it was
//! filled under; the strategy it carries says where the attribute lives.

use std::sync::Arc;

use arrayvec::ArrayVec;
use core_types::{CacheId, TypeId, VersionTag};
use object_model::ObjectSpace;
use tracing::debug;

use crate::stats::{MissReason, MissReporter};
use crate::strategy::{AttrStrategy, Probe};
use crate::watchers::WatcherRegistry;

/// Hard upper bound on entries per site
pub const MAX_CACHE_ENTRIES: usize = 4;

/// Result of trying to record a slow-path resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// A new entry was committed
    Filled,
    /// An equivalent entry already existed; nothing changed
    AlreadyCached,
    /// Nothing could be recorded
    Rejected(MissReason),
}

/// One (type, version, strategy) record
#[derive(Debug, Clone)]
pub struct AttrEntry {
    /// Receiver type the entry applies to
    pub type_id: TypeId,
    /// Version token the entry was filled under
    pub version: VersionTag,
    /// Where the attribute lives
    pub strategy: AttrStrategy,
}

/// Per-site cache for instance attribute loads and stores
#[derive(Clone)]
pub struct AttrCache {
    id: CacheId,
    name: Arc<str>,
    capacity: usize,
    entries: ArrayVec<AttrEntry, MAX_CACHE_ENTRIES>,
    reporter: Option<Arc<dyn MissReporter>>,
}

impl std::fmt::Debug for AttrCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttrCache")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("entries", &self.entries)
            .finish()
    }
}

impl AttrCache {
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

    /// Attribute name the site looks up
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
    pub fn entries(&self) -> &[AttrEntry] {
        &self.entries
    }

    /// Entry for a receiver type, valid or not
    pub fn entry_for(&self, ty: TypeId) -> Option<&AttrEntry> {
        self.entries.iter().find(|e| e.type_id == ty)
    }

    /// Types this site holds entries for
    pub fn watched_types(&self) -> Vec<TypeId> {
        self.entries.iter().map(|e| e.type_id).collect()
    }

    pub(crate) fn reporter(&self) -> Option<&Arc<dyn MissReporter>> {
        self.reporter.as_ref()
    }

    /// Find a valid entry for `ty` and return a copy of its strategy.
    ///
    /// A lazily resolved split slot is filled in on the entry if the key
    /// has since been added to the layout.
    pub fn probe(&mut self, space: &ObjectSpace, ty: TypeId) -> Probe<AttrStrategy> {
        let Some(entry) = self.entries.iter_mut().find(|e| e.type_id == ty) else {
            return Probe::Miss(MissReason::NoEntry);
        };
        let current = space.version_of(ty);
        if !current.is_valid() || entry.version != current {
            return Probe::Miss(MissReason::StaleVersion);
        }
        if !entry.strategy.resolve_slot(space, &self.name) {
            return Probe::Miss(MissReason::ValueAbsent);
        }
        Probe::Hit(entry.strategy.clone())
    }

    /// Record the strategy for `ty` after a successful slow-path resolution.
    ///
    /// The strategy is derived from the current state of the type, not from
    /// whatever the slow path observed, so a fill that follows re-entrant
    /// mutation records what is true now.
    pub fn fill(&mut self, space: &ObjectSpace, watchers: &WatcherRegistry, ty: TypeId) -> FillOutcome {
        if !space.ensure_version_token(ty) {
            return FillOutcome::Rejected(MissReason::Uncacheable);
        }
        let version = space.version_of(ty);
        if !version.is_valid() {
            return FillOutcome::Rejected(MissReason::Uncacheable);
        }
        let strategy = AttrStrategy::resolve(space, ty, &self.name);
        let entry = AttrEntry {
            type_id: ty,
            version,
            strategy,
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
        debug!(site = %self.id, name = %self.name, ty = %ty, "attribute entry filled");
        FillOutcome::Filled
    }

    /// Drop every entry keyed by `ty`; returns how many were dropped
    pub fn type_changed(&mut self, ty: TypeId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.type_id != ty);
        before - self.entries.len()
    }
}
