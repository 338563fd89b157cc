//! Caches for attribute and method lookups on type objects.
//!
//! A lookup on a type consults its metaclass as well as its own MRO, so an
//! entry is keyed by both and checks both version tokens. Each site keeps a
//! single entry; a fill for a different receiver replaces it.

use std::sync::Arc;

use core_types::{CacheId, TypeId, VersionTag};
use object_model::{BoundSelf, ObjectSpace, Value};
use tracing::debug;

use crate::attr_cache::FillOutcome;
use crate::stats::{MissReason, MissReporter};
use crate::strategy::Probe;
use crate::watchers::WatcherRegistry;

/// A cached lookup on one type object
#[derive(Debug, Clone, PartialEq)]
pub struct TypeEntry {
    /// The receiver type object
    pub receiver: TypeId,
    /// Receiver version at fill time
    pub version: VersionTag,
    /// Metaclass of the receiver
    pub metaclass: TypeId,
    /// Metaclass version at fill time
    pub meta_version: VersionTag,
    /// The resolved value
    pub value: Value,
    /// Pass the receiver as the first argument (method sites only)
    pub binds_receiver: bool,
}

impl TypeEntry {
    fn is_current(&self, space: &ObjectSpace) -> bool {
        let version = space.version_of(self.receiver);
        let meta_version = space.version_of(self.metaclass);
        version.is_valid()
            && meta_version.is_valid()
            && version == self.version
            && meta_version == self.meta_version
    }

    fn watched_types(&self) -> Vec<TypeId> {
        if self.receiver == self.metaclass {
            vec![self.receiver]
        } else {
            vec![self.receiver, self.metaclass]
        }
    }
}

#[derive(Clone)]
struct TypeSlot {
    id: CacheId,
    name: Arc<str>,
    entry: Option<TypeEntry>,
    reporter: Option<Arc<dyn MissReporter>>,
}

impl TypeSlot {
    fn new(id: CacheId, name: Arc<str>, reporter: Option<Arc<dyn MissReporter>>) -> Self {
        Self {
            id,
            name,
            entry: None,
            reporter,
        }
    }

    fn lookup(&self, space: &ObjectSpace, ty: TypeId) -> Probe<&TypeEntry> {
        match &self.entry {
            Some(entry) if entry.receiver == ty => {
                if entry.is_current(space) {
                    Probe::Hit(entry)
                } else {
                    Probe::Miss(MissReason::StaleVersion)
                }
            }
            _ => Probe::Miss(MissReason::NoEntry),
        }
    }

    /// Tag both types and return (version, metaclass, meta version, meta attr)
    fn prepare<'s>(
        &self,
        space: &'s ObjectSpace,
        ty: TypeId,
    ) -> Result<(VersionTag, TypeId, VersionTag, Option<&'s Value>), MissReason> {
        let meta = match space.type_object(ty) {
            Some(t) if t.is_alive() => t.metaclass(),
            _ => return Err(MissReason::Uncacheable),
        };
        if !space.ensure_version_token(ty) || !space.ensure_version_token(meta) {
            return Err(MissReason::Uncacheable);
        }
        let meta_attr = space.find_in_mro(meta, &self.name);
        if meta_attr.is_some_and(Value::is_data_descriptor) {
            return Err(MissReason::NotCacheable);
        }
        Ok((space.version_of(ty), meta, space.version_of(meta), meta_attr))
    }

    fn commit(&mut self, watchers: &WatcherRegistry, entry: TypeEntry) -> FillOutcome {
        if self.entry.as_ref() == Some(&entry) {
            return FillOutcome::AlreadyCached;
        }
        if let Some(old) = self.entry.take() {
            for ty in old.watched_types() {
                if ty != entry.receiver && ty != entry.metaclass {
                    watchers.unwatch(ty, self.id);
                }
            }
        }
        for ty in entry.watched_types() {
            watchers.watch(ty, self.id);
        }
        debug!(site = %self.id, name = %self.name, ty = %entry.receiver, "type entry filled");
        self.entry = Some(entry);
        FillOutcome::Filled
    }

    /// Drop the entry if it depends on `ty`, unwatching the other type it
    /// held interest in
    fn type_changed(&mut self, ty: TypeId, watchers: &WatcherRegistry) -> usize {
        match &self.entry {
            Some(entry) if entry.receiver == ty || entry.metaclass == ty => {
                for other in entry.watched_types() {
                    if other != ty {
                        watchers.unwatch(other, self.id);
                    }
                }
                self.entry = None;
                1
            }
            _ => 0,
        }
    }

    fn watched_types(&self) -> Vec<TypeId> {
        self.entry.as_ref().map(TypeEntry::watched_types).unwrap_or_default()
    }
}

macro_rules! type_site_accessors {
    ($ty:ident) => {
        impl $ty {
            /// Site handle
            pub fn id(&self) -> CacheId {
                self.slot.id
            }

            /// Name the site looks up
            pub fn name(&self) -> &str {
                &self.slot.name
            }

            pub(crate) fn name_arc(&self) -> &Arc<str> {
                &self.slot.name
            }

            /// The current entry, valid or not
            pub fn entry(&self) -> Option<&TypeEntry> {
                self.slot.entry.as_ref()
            }

            /// Types the entry depends on
            pub fn watched_types(&self) -> Vec<TypeId> {
                self.slot.watched_types()
            }

            /// Drop the entry if it depends on `ty`
            pub fn type_changed(&mut self, ty: TypeId, watchers: &WatcherRegistry) -> usize {
                self.slot.type_changed(ty, watchers)
            }

            pub(crate) fn reporter(&self) -> Option<&Arc<dyn MissReporter>> {
                self.slot.reporter.as_ref()
            }
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("id", &self.slot.id)
                    .field("name", &self.slot.name)
                    .field("entry", &self.slot.entry)
                    .finish()
            }
        }
    };
}

/// Per-site cache for `Type.name` loads
#[derive(Clone)]
pub struct TypeAttrCache {
    slot: TypeSlot,
}

type_site_accessors!(TypeAttrCache);

impl TypeAttrCache {
    /// Create an empty cache
    pub fn new(id: CacheId, name: impl Into<Arc<str>>, reporter: Option<Arc<dyn MissReporter>>) -> Self {
        Self {
            slot: TypeSlot::new(id, name.into(), reporter),
        }
    }

    /// Value of `ty.name` from a valid entry
    pub fn lookup(&self, space: &ObjectSpace, ty: TypeId) -> Probe<Value> {
        match self.slot.lookup(space, ty) {
            Probe::Hit(entry) => Probe::Hit(entry.value.clone()),
            Probe::Miss(reason) => Probe::Miss(reason),
        }
    }

    /// Record the value of `ty.name` after a successful slow-path load.
    ///
    /// Only values that need no descriptor call are recorded: plain
    /// attributes of the type's MRO, or plain values and functions of the
    /// metaclass when the MRO lacks the name.
    pub fn fill(&mut self, space: &ObjectSpace, watchers: &WatcherRegistry, ty: TypeId) -> FillOutcome {
        let (version, metaclass, meta_version, meta_attr) = match self.slot.prepare(space, ty) {
            Ok(prepared) => prepared,
            Err(reason) => return FillOutcome::Rejected(reason),
        };
        let value = match space.find_in_mro(ty, &self.slot.name) {
            Some(Value::Descriptor(_)) => return FillOutcome::Rejected(MissReason::NotCacheable),
            Some(value) => value.clone(),
            None => match meta_attr {
                Some(Value::Function(func)) => Value::bound(func.clone(), Value::Type(ty)),
                Some(Value::Descriptor(_)) | None => {
                    return FillOutcome::Rejected(MissReason::NotCacheable)
                }
                Some(value) => value.clone(),
            },
        };
        self.slot.commit(
            watchers,
            TypeEntry {
                receiver: ty,
                version,
                metaclass,
                meta_version,
                value,
                binds_receiver: false,
            },
        )
    }
}

/// Per-site cache for `Type.name(...)` calls
#[derive(Clone)]
pub struct TypeMethodCache {
    slot: TypeSlot,
}

type_site_accessors!(TypeMethodCache);

impl TypeMethodCache {
    /// Create an empty cache
    pub fn new(id: CacheId, name: impl Into<Arc<str>>, reporter: Option<Arc<dyn MissReporter>>) -> Self {
        Self {
            slot: TypeSlot::new(id, name.into(), reporter),
        }
    }

    /// Callable and self for `ty.name(...)` from a valid entry
    pub fn lookup(&self, space: &ObjectSpace, ty: TypeId) -> Probe<(Value, BoundSelf)> {
        match self.slot.lookup(space, ty) {
            Probe::Hit(entry) => {
                let bound = if entry.binds_receiver {
                    BoundSelf::Receiver(Value::Type(ty))
                } else {
                    BoundSelf::NoSelf
                };
                Probe::Hit((entry.value.clone(), bound))
            }
            Probe::Miss(reason) => Probe::Miss(reason),
        }
    }

    /// Record the callable for `ty.name(...)` after a successful slow-path
    /// lookup.
    ///
    /// Functions on the type's MRO are called without a receiver; functions
    /// found only on the metaclass receive the type object as self.
    pub fn fill(&mut self, space: &ObjectSpace, watchers: &WatcherRegistry, ty: TypeId) -> FillOutcome {
        let (version, metaclass, meta_version, meta_attr) = match self.slot.prepare(space, ty) {
            Ok(prepared) => prepared,
            Err(reason) => return FillOutcome::Rejected(reason),
        };
        let (value, binds_receiver) = match space.find_in_mro(ty, &self.slot.name) {
            Some(Value::Descriptor(_)) => return FillOutcome::Rejected(MissReason::NotCacheable),
            Some(value) => (value.clone(), false),
            None => match meta_attr {
                Some(Value::Function(func)) => (Value::Function(func.clone()), true),
                _ => return FillOutcome::Rejected(MissReason::NotCacheable),
            },
        };
        self.slot.commit(
            watchers,
            TypeEntry {
                receiver: ty,
                version,
                metaclass,
                meta_version,
                value,
                binds_receiver,
            },
        )
    }
}
