//! Call-site cache storage.

use std::sync::Arc;

use core_types::{CacheId, ModuleId, TypeId};
use object_model::ObjectSpace;
use tracing::trace;

use crate::attr_cache::{AttrCache, FillOutcome};
use crate::method_cache::MethodCache;
use crate::module_cache::ModuleCache;
use crate::stats::{CacheEvent, MissReason, MissReporter, SiteKind};
use crate::type_cache::{TypeAttrCache, TypeMethodCache};
use crate::watchers::WatcherRegistry;

/// What a fill records a resolution for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillTarget {
    /// Instances of a type
    Instances(TypeId),
    /// A type object itself
    TypeObject(TypeId),
    /// A module namespace
    Module(ModuleId),
}

/// The cache owned by one call site
#[derive(Debug, Clone)]
pub enum SiteCache {
    /// `obj.name` loads and stores
    Attr(AttrCache),
    /// `obj.name(...)` calls
    Method(MethodCache),
    /// `Type.name` loads
    TypeAttr(TypeAttrCache),
    /// `Type.name(...)` calls
    TypeMethod(TypeMethodCache),
    /// `module.name` loads
    ModuleAttr(ModuleCache),
    /// `module.name(...)` calls
    ModuleMethod(ModuleCache),
}

impl SiteCache {
    /// Operation family of the site
    pub fn kind(&self) -> SiteKind {
        match self {
            SiteCache::Attr(_) => SiteKind::Attr,
            SiteCache::Method(_) => SiteKind::Method,
            SiteCache::TypeAttr(_) => SiteKind::TypeAttr,
            SiteCache::TypeMethod(_) => SiteKind::TypeMethod,
            SiteCache::ModuleAttr(_) => SiteKind::ModuleAttr,
            SiteCache::ModuleMethod(_) => SiteKind::ModuleMethod,
        }
    }

    /// Site handle
    pub fn id(&self) -> CacheId {
        match self {
            SiteCache::Attr(c) => c.id(),
            SiteCache::Method(c) => c.id(),
            SiteCache::TypeAttr(c) => c.id(),
            SiteCache::TypeMethod(c) => c.id(),
            SiteCache::ModuleAttr(c) | SiteCache::ModuleMethod(c) => c.id(),
        }
    }

    /// Name the site looks up
    pub fn name(&self) -> &str {
        self.name_arc()
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        match self {
            SiteCache::Attr(c) => c.name_arc(),
            SiteCache::Method(c) => c.name_arc(),
            SiteCache::TypeAttr(c) => c.name_arc(),
            SiteCache::TypeMethod(c) => c.name_arc(),
            SiteCache::ModuleAttr(c) | SiteCache::ModuleMethod(c) => c.name_arc(),
        }
    }

    fn reporter(&self) -> Option<&Arc<dyn MissReporter>> {
        match self {
            SiteCache::Attr(c) => c.reporter(),
            SiteCache::Method(c) => c.reporter(),
            SiteCache::TypeAttr(c) => c.reporter(),
            SiteCache::TypeMethod(c) => c.reporter(),
            SiteCache::ModuleAttr(c) | SiteCache::ModuleMethod(c) => c.reporter(),
        }
    }

    /// Types the site has registered interest in
    pub fn watched_types(&self) -> Vec<TypeId> {
        match self {
            SiteCache::Attr(c) => c.watched_types(),
            SiteCache::Method(c) => c.watched_types(),
            SiteCache::TypeAttr(c) => c.watched_types(),
            SiteCache::TypeMethod(c) => c.watched_types(),
            SiteCache::ModuleAttr(_) | SiteCache::ModuleMethod(_) => Vec::new(),
        }
    }

    /// Drop entries that depend on `ty`; returns how many were dropped
    pub fn type_changed(&mut self, ty: TypeId, watchers: &WatcherRegistry) -> usize {
        match self {
            SiteCache::Attr(c) => c.type_changed(ty),
            SiteCache::Method(c) => c.type_changed(ty),
            SiteCache::TypeAttr(c) => c.type_changed(ty, watchers),
            SiteCache::TypeMethod(c) => c.type_changed(ty, watchers),
            SiteCache::ModuleAttr(_) | SiteCache::ModuleMethod(_) => 0,
        }
    }

    /// Record a resolution for `target`, if the site kind accepts it
    pub fn fill(&mut self, space: &ObjectSpace, watchers: &WatcherRegistry, target: FillTarget) -> FillOutcome {
        match (self, target) {
            (SiteCache::Attr(c), FillTarget::Instances(ty)) => c.fill(space, watchers, ty),
            (SiteCache::Method(c), FillTarget::Instances(ty)) => c.fill(space, watchers, ty),
            (SiteCache::TypeAttr(c), FillTarget::TypeObject(ty)) => c.fill(space, watchers, ty),
            (SiteCache::TypeMethod(c), FillTarget::TypeObject(ty)) => c.fill(space, watchers, ty),
            (SiteCache::ModuleAttr(c) | SiteCache::ModuleMethod(c), FillTarget::Module(m)) => {
                c.fill(space, m)
            }
            _ => FillOutcome::Rejected(MissReason::UnsupportedReceiver),
        }
    }

    /// Forward an event to the site's reporter, if any
    pub fn report(&self, event: CacheEvent) {
        if let CacheEvent::Miss(reason) = event {
            trace!(site = %self.id(), name = %self.name(), ?reason, "cache miss");
        }
        if let Some(reporter) = self.reporter() {
            reporter.report(self.id(), self.kind(), event);
        }
    }

    /// Report the outcome of a fill
    pub(crate) fn report_fill(&self, outcome: FillOutcome) {
        match outcome {
            FillOutcome::Filled => self.report(CacheEvent::Fill),
            FillOutcome::AlreadyCached => {}
            FillOutcome::Rejected(reason) => self.report(CacheEvent::FillRejected(reason)),
        }
    }

    /// The attribute cache, for `Attr` sites
    pub fn as_attr(&self) -> Option<&AttrCache> {
        match self {
            SiteCache::Attr(c) => Some(c),
            _ => None,
        }
    }

    /// The method cache, for `Method` sites
    pub fn as_method(&self) -> Option<&MethodCache> {
        match self {
            SiteCache::Method(c) => Some(c),
            _ => None,
        }
    }

    /// The type attribute cache, for `TypeAttr` sites
    pub fn as_type_attr(&self) -> Option<&TypeAttrCache> {
        match self {
            SiteCache::TypeAttr(c) => Some(c),
            _ => None,
        }
    }

    /// The type method cache, for `TypeMethod` sites
    pub fn as_type_method(&self) -> Option<&TypeMethodCache> {
        match self {
            SiteCache::TypeMethod(c) => Some(c),
            _ => None,
        }
    }

    /// The module cache, for module sites
    pub fn as_module(&self) -> Option<&ModuleCache> {
        match self {
            SiteCache::ModuleAttr(c) | SiteCache::ModuleMethod(c) => Some(c),
            _ => None,
        }
    }
}
