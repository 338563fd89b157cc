//! Module global cache.
//!
//! Module namespaces carry a generation counter bumped on every write, so
//! entries validate against the counter instead of subscribing to changes.

use std::sync::Arc;

use core_types::{CacheId, ModuleId};
use object_model::{ObjectSpace, Value};
use tracing::debug;

use crate::attr_cache::FillOutcome;
use crate::stats::{MissReason, MissReporter};
use crate::strategy::Probe;

/// A cached module global
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleEntry {
    /// Namespace the value was read from
    pub module: ModuleId,
    /// Namespace generation at fill time
    pub generation: u64,
    /// The value
    pub value: Value,
}

/// Per-site cache for `module.name` loads and calls
#[derive(Clone)]
pub struct ModuleCache {
    id: CacheId,
    name: Arc<str>,
    entry: Option<ModuleEntry>,
    reporter: Option<Arc<dyn MissReporter>>,
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("entry", &self.entry)
            .finish()
    }
}

impl ModuleCache {
    /// Create an empty cache
    pub fn new(id: CacheId, name: impl Into<Arc<str>>, reporter: Option<Arc<dyn MissReporter>>) -> Self {
        Self {
            id,
            name: name.into(),
            entry: None,
            reporter,
        }
    }

    /// Site handle
    pub fn id(&self) -> CacheId {
        self.id
    }

    /// Global name the site looks up
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// The current entry, valid or not
    pub fn entry(&self) -> Option<&ModuleEntry> {
        self.entry.as_ref()
    }

    pub(crate) fn reporter(&self) -> Option<&Arc<dyn MissReporter>> {
        self.reporter.as_ref()
    }

    /// Value of `module.name` if the namespace is unchanged since the fill
    pub fn lookup(&self, space: &ObjectSpace, module: ModuleId) -> Probe<Value> {
        match &self.entry {
            Some(entry) if entry.module == module => match space.module(module) {
                Ok(ns) if ns.generation() == entry.generation => Probe::Hit(entry.value.clone()),
                _ => Probe::Miss(MissReason::GenerationMismatch),
            },
            _ => Probe::Miss(MissReason::NoEntry),
        }
    }

    /// Record the current value of `module.name`
    pub fn fill(&mut self, space: &ObjectSpace, module: ModuleId) -> FillOutcome {
        let Ok(ns) = space.module(module) else {
            return FillOutcome::Rejected(MissReason::NotCacheable);
        };
        let Some(value) = ns.get(&self.name) else {
            return FillOutcome::Rejected(MissReason::NotCacheable);
        };
        let entry = ModuleEntry {
            module,
            generation: ns.generation(),
            value: value.clone(),
        };
        if self.entry.as_ref() == Some(&entry) {
            return FillOutcome::AlreadyCached;
        }
        debug!(site = %self.id, name = %self.name, module = %module, "module entry filled");
        self.entry = Some(entry);
        FillOutcome::Filled
    }
}
