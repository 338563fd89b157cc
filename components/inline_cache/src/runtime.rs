//! Cache runtime.
//!
//! Owns the object space, every call-site cache and the watcher registry,
//! and implements the cached entry points. Each entry point tries the
//! site's cache first and falls back to the generic resolution in
//! `object_model`; a successful fallback then fills the site from the
//! current state of the receiver's type.
//!
//! Type mutations made through the space are queued there and propagated
//! to watching sites before the next lookup or fill.

use std::sync::Arc;

use core_types::{AttrError, AttrResult, CacheId, InstanceId, ModuleId, TypeId};
use object_model::{
    generic_get_method, generic_getattr, generic_setattr, AttributeHost, BoundSelf, ObjectSpace, Value,
};
use tracing::debug;

use crate::attr_cache::{AttrCache, FillOutcome};
use crate::config::CacheConfig;
use crate::method_cache::MethodCache;
use crate::module_cache::ModuleCache;
use crate::site::{FillTarget, SiteCache};
use crate::stats::{CacheEvent, CacheStats, MissReason, MissReporter, SiteKind};
use crate::strategy::Probe;
use crate::type_cache::{TypeAttrCache, TypeMethodCache};
use crate::watchers::WatcherRegistry;

/// Object space plus call-site caches
pub struct Runtime {
    space: ObjectSpace,
    sites: Vec<Option<SiteCache>>,
    watchers: WatcherRegistry,
    config: CacheConfig,
    stats: Arc<CacheStats>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("sites", &self.sites.iter().flatten().count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Create a runtime over a fresh object space with default config
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a runtime over a fresh object space
    pub fn with_config(config: CacheConfig) -> Self {
        Self::with_space(ObjectSpace::new(), config)
    }

    /// Create a runtime over an existing object space
    pub fn with_space(space: ObjectSpace, config: CacheConfig) -> Self {
        Self {
            space,
            sites: Vec::new(),
            watchers: WatcherRegistry::new(),
            config,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// The object space
    pub fn space(&self) -> &ObjectSpace {
        &self.space
    }

    /// Mutable object space; type changes are propagated lazily
    pub fn space_mut(&mut self) -> &mut ObjectSpace {
        &mut self.space
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Counters shared by sites created while `collect_stats` is set
    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }

    /// The watcher registry
    pub fn watchers(&self) -> &WatcherRegistry {
        &self.watchers
    }

    // ------------------------------------------------------------------
    // Sites
    // ------------------------------------------------------------------

    fn default_reporter(&self) -> Option<Arc<dyn MissReporter>> {
        if self.config.collect_stats {
            let stats: Arc<dyn MissReporter> = self.stats.clone();
            Some(stats)
        } else {
            None
        }
    }

    fn install(&mut self, make: impl FnOnce(CacheId) -> SiteCache) -> CacheId {
        let id = CacheId::from_raw(self.sites.len() as u32);
        let cache = make(id);
        debug!(site = %id, kind = ?cache.kind(), name = cache.name(), "site created");
        self.sites.push(Some(cache));
        id
    }

    /// New `obj.name` site
    pub fn new_attr_site(&mut self, name: &str) -> CacheId {
        self.new_attr_site_with_reporter(name, self.default_reporter())
    }

    /// New `obj.name` site reporting to `reporter`
    pub fn new_attr_site_with_reporter(
        &mut self,
        name: &str,
        reporter: Option<Arc<dyn MissReporter>>,
    ) -> CacheId {
        let capacity = self.config.attr_capacity();
        self.install(|id| SiteCache::Attr(AttrCache::new(id, name, capacity, reporter)))
    }

    /// New `obj.name(...)` site
    pub fn new_method_site(&mut self, name: &str) -> CacheId {
        self.new_method_site_with_reporter(name, self.default_reporter())
    }

    /// New `obj.name(...)` site reporting to `reporter`
    pub fn new_method_site_with_reporter(
        &mut self,
        name: &str,
        reporter: Option<Arc<dyn MissReporter>>,
    ) -> CacheId {
        let capacity = self.config.method_capacity();
        self.install(|id| SiteCache::Method(MethodCache::new(id, name, capacity, reporter)))
    }

    /// New `Type.name` site
    pub fn new_type_attr_site(&mut self, name: &str) -> CacheId {
        self.new_type_attr_site_with_reporter(name, self.default_reporter())
    }

    /// New `Type.name` site reporting to `reporter`
    pub fn new_type_attr_site_with_reporter(
        &mut self,
        name: &str,
        reporter: Option<Arc<dyn MissReporter>>,
    ) -> CacheId {
        self.install(|id| SiteCache::TypeAttr(TypeAttrCache::new(id, name, reporter)))
    }

    /// New `Type.name(...)` site
    pub fn new_type_method_site(&mut self, name: &str) -> CacheId {
        self.new_type_method_site_with_reporter(name, self.default_reporter())
    }

    /// New `Type.name(...)` site reporting to `reporter`
    pub fn new_type_method_site_with_reporter(
        &mut self,
        name: &str,
        reporter: Option<Arc<dyn MissReporter>>,
    ) -> CacheId {
        self.install(|id| SiteCache::TypeMethod(TypeMethodCache::new(id, name, reporter)))
    }

    /// New `module.name` site
    pub fn new_module_attr_site(&mut self, name: &str) -> CacheId {
        self.new_module_attr_site_with_reporter(name, self.default_reporter())
    }

    /// New `module.name` site reporting to `reporter`
    pub fn new_module_attr_site_with_reporter(
        &mut self,
        name: &str,
        reporter: Option<Arc<dyn MissReporter>>,
    ) -> CacheId {
        self.install(|id| SiteCache::ModuleAttr(ModuleCache::new(id, name, reporter)))
    }

    /// New `module.name(...)` site
    pub fn new_module_method_site(&mut self, name: &str) -> CacheId {
        self.new_module_method_site_with_reporter(name, self.default_reporter())
    }

    /// New `module.name(...)` site reporting to `reporter`
    pub fn new_module_method_site_with_reporter(
        &mut self,
        name: &str,
        reporter: Option<Arc<dyn MissReporter>>,
    ) -> CacheId {
        self.install(|id| SiteCache::ModuleMethod(ModuleCache::new(id, name, reporter)))
    }

    /// Discard a site and its registrations; false if it did not exist
    pub fn remove_site(&mut self, site: CacheId) -> bool {
        let Some(cache) = self.take_site(site) else {
            return false;
        };
        for ty in cache.watched_types() {
            self.watchers.unwatch(ty, site);
        }
        debug!(site = %site, "site removed");
        true
    }

    /// Inspect a site
    pub fn site(&self, site: CacheId) -> Option<&SiteCache> {
        self.sites.get(site.index()).and_then(Option::as_ref)
    }

    /// Number of live sites
    pub fn site_count(&self) -> usize {
        self.sites.iter().flatten().count()
    }

    pub(crate) fn take_site(&mut self, site: CacheId) -> Option<SiteCache> {
        self.sites.get_mut(site.index()).and_then(Option::take)
    }

    pub(crate) fn restore_site(&mut self, cache: SiteCache) {
        let index = cache.id().index();
        if let Some(slot) = self.sites.get_mut(index) {
            *slot = Some(cache);
        }
    }

    /// Shared state needed to fill detached sites
    pub(crate) fn fill_context(&self) -> (&ObjectSpace, &WatcherRegistry) {
        (&self.space, &self.watchers)
    }

    fn header(&self, site: CacheId) -> AttrResult<(SiteKind, Arc<str>)> {
        self.site(site)
            .map(|c| (c.kind(), c.name_arc().clone()))
            .ok_or(AttrError::UnknownSite(site))
    }

    fn report(&self, site: CacheId, event: CacheEvent) {
        if let Some(cache) = self.site(site) {
            cache.report(event);
        }
    }

    fn fill_site(&mut self, site: CacheId, target: FillTarget) -> FillOutcome {
        self.flush_type_changes();
        let Some(cache) = self.sites.get_mut(site.index()).and_then(Option::as_mut) else {
            return FillOutcome::Rejected(MissReason::NoEntry);
        };
        let outcome = cache.fill(&self.space, &self.watchers, target);
        cache.report_fill(outcome);
        outcome
    }

    fn fill_instances(&mut self, site: CacheId, obj: InstanceId) {
        // The slow path may have run user code that retyped the receiver
        if let Ok(ty) = self.space.instance_type(obj) {
            self.fill_site(site, FillTarget::Instances(ty));
        }
    }

    // ------------------------------------------------------------------
    // Type changes
    // ------------------------------------------------------------------

    /// Propagate queued type changes to watching sites.
    ///
    /// Returns the number of entries dropped.
    pub fn flush_type_changes(&mut self) -> usize {
        if !self.space.has_pending_changes() {
            return 0;
        }
        let changed = self.space.take_pending_changes();
        let sites = &mut self.sites;
        let watchers = &self.watchers;
        let mut dropped = 0;
        for ty in &changed {
            watchers.type_changed(*ty, |site| {
                if let Some(cache) = sites.get_mut(site.index()).and_then(Option::as_mut) {
                    let n = cache.type_changed(*ty, watchers);
                    if n > 0 {
                        cache.report(CacheEvent::Invalidated);
                    }
                    dropped += n;
                }
            });
        }
        debug!(types = changed.len(), dropped, "type changes propagated");
        dropped
    }

    /// Record a completed mutation of `ty` made outside the space's own
    /// mutators, and propagate it immediately
    pub fn notify_type_changed(&mut self, ty: TypeId) {
        self.space.type_modified(ty);
        self.flush_type_changes();
    }

    /// Run a batch of type mutations and propagate them
    pub fn mutate_types<R>(&mut self, f: impl FnOnce(&mut ObjectSpace) -> R) -> R {
        let result = f(&mut self.space);
        self.flush_type_changes();
        result
    }

    /// Assign a version token to `ty` if it has none; false if it cannot
    /// be cached
    pub fn ensure_version_token(&self, ty: TypeId) -> bool {
        self.space.ensure_version_token(ty)
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Load `receiver.name` through `site`
    pub fn resolve_attribute(&mut self, site: CacheId, receiver: &Value) -> AttrResult<Value> {
        self.flush_type_changes();
        let (kind, name) = self.header(site)?;
        match (kind, receiver) {
            (SiteKind::Attr, Value::Object(obj)) => self.load_instance_attr(site, &name, receiver, *obj),
            (SiteKind::TypeAttr, Value::Type(ty)) => self.load_type_attr(site, &name, receiver, *ty),
            (SiteKind::ModuleAttr, Value::Module(module)) => {
                self.load_module_attr(site, &name, receiver, *module)
            }
            _ => {
                self.report(site, CacheEvent::Miss(MissReason::UnsupportedReceiver));
                generic_getattr(self, receiver, &name)
            }
        }
    }

    /// Store `receiver.name = value` through `site`
    pub fn assign_attribute(&mut self, site: CacheId, receiver: &Value, value: Value) -> AttrResult<()> {
        self.flush_type_changes();
        let (kind, name) = self.header(site)?;
        let obj = match (kind, receiver) {
            (SiteKind::Attr, Value::Object(obj)) => *obj,
            _ => {
                self.report(site, CacheEvent::Miss(MissReason::UnsupportedReceiver));
                return generic_setattr(self, receiver, &name, value);
            }
        };

        let ty = self.space.instance_type(obj)?;
        let probe = match self.sites.get_mut(site.index()).and_then(Option::as_mut) {
            Some(SiteCache::Attr(cache)) => cache.probe(&self.space, ty),
            _ => Probe::Miss(MissReason::NoEntry),
        };
        let reason = match probe {
            Probe::Hit(strategy) => match strategy.store(self, receiver, obj, &name, &value)? {
                Probe::Hit(()) => {
                    self.report(site, CacheEvent::Hit);
                    return Ok(());
                }
                Probe::Miss(reason) => reason,
            },
            Probe::Miss(reason) => reason,
        };
        self.report(site, CacheEvent::Miss(reason));

        generic_setattr(self, receiver, &name, value)?;
        self.fill_instances(site, obj);
        Ok(())
    }

    /// Resolve `receiver.name` for an immediate call through `site`.
    ///
    /// Returns the callable and, for method-like functions, the receiver
    /// to pass as the first argument.
    pub fn resolve_bound_method(&mut self, site: CacheId, receiver: &Value) -> AttrResult<(Value, BoundSelf)> {
        self.flush_type_changes();
        let (kind, name) = self.header(site)?;
        let (probe, target) = match (kind, receiver) {
            (SiteKind::Method, Value::Object(obj)) => {
                let ty = self.space.instance_type(*obj)?;
                let probe = match self.site(site) {
                    Some(SiteCache::Method(cache)) => cache.lookup(&self.space, receiver, *obj, ty),
                    _ => Probe::Miss(MissReason::NoEntry),
                };
                (probe, None)
            }
            (SiteKind::TypeMethod, Value::Type(ty)) => {
                let probe = match self.site(site) {
                    Some(SiteCache::TypeMethod(cache)) => cache.lookup(&self.space, *ty),
                    _ => Probe::Miss(MissReason::NoEntry),
                };
                (probe, Some(FillTarget::TypeObject(*ty)))
            }
            (SiteKind::ModuleMethod, Value::Module(module)) => {
                let probe = match self.site(site) {
                    Some(SiteCache::ModuleMethod(cache)) => match cache.lookup(&self.space, *module) {
                        Probe::Hit(value) => Probe::Hit((value, BoundSelf::NoSelf)),
                        Probe::Miss(reason) => Probe::Miss(reason),
                    },
                    _ => Probe::Miss(MissReason::NoEntry),
                };
                (probe, Some(FillTarget::Module(*module)))
            }
            _ => {
                self.report(site, CacheEvent::Miss(MissReason::UnsupportedReceiver));
                return generic_get_method(self, receiver, &name);
            }
        };

        match probe {
            Probe::Hit(resolved) => {
                self.report(site, CacheEvent::Hit);
                return Ok(resolved);
            }
            Probe::Miss(reason) => self.report(site, CacheEvent::Miss(reason)),
        }

        let resolved = generic_get_method(self, receiver, &name)?;
        match (target, receiver) {
            (Some(target), _) => {
                self.fill_site(site, target);
            }
            (None, Value::Object(obj)) => self.fill_instances(site, *obj),
            (None, _) => {}
        }
        Ok(resolved)
    }

    fn load_instance_attr(
        &mut self,
        site: CacheId,
        name: &str,
        receiver: &Value,
        obj: InstanceId,
    ) -> AttrResult<Value> {
        let ty = self.space.instance_type(obj)?;
        let probe = match self.sites.get_mut(site.index()).and_then(Option::as_mut) {
            Some(SiteCache::Attr(cache)) => cache.probe(&self.space, ty),
            _ => Probe::Miss(MissReason::NoEntry),
        };
        let reason = match probe {
            Probe::Hit(strategy) => match strategy.load(self, receiver, obj, ty, name)? {
                Probe::Hit(value) => {
                    self.report(site, CacheEvent::Hit);
                    return Ok(value);
                }
                Probe::Miss(reason) => reason,
            },
            Probe::Miss(reason) => reason,
        };
        self.report(site, CacheEvent::Miss(reason));

        let value = generic_getattr(self, receiver, name)?;
        self.fill_instances(site, obj);
        Ok(value)
    }

    fn load_type_attr(&mut self, site: CacheId, name: &str, receiver: &Value, ty: TypeId) -> AttrResult<Value> {
        let probe = match self.site(site) {
            Some(SiteCache::TypeAttr(cache)) => cache.lookup(&self.space, ty),
            _ => Probe::Miss(MissReason::NoEntry),
        };
        match probe {
            Probe::Hit(value) => {
                self.report(site, CacheEvent::Hit);
                return Ok(value);
            }
            Probe::Miss(reason) => self.report(site, CacheEvent::Miss(reason)),
        }

        let value = generic_getattr(self, receiver, name)?;
        self.fill_site(site, FillTarget::TypeObject(ty));
        Ok(value)
    }

    fn load_module_attr(
        &mut self,
        site: CacheId,
        name: &str,
        receiver: &Value,
        module: ModuleId,
    ) -> AttrResult<Value> {
        let probe = match self.site(site) {
            Some(SiteCache::ModuleAttr(cache)) => cache.lookup(&self.space, module),
            _ => Probe::Miss(MissReason::NoEntry),
        };
        match probe {
            Probe::Hit(value) => {
                self.report(site, CacheEvent::Hit);
                return Ok(value);
            }
            Probe::Miss(reason) => self.report(site, CacheEvent::Miss(reason)),
        }

        let value = generic_getattr(self, receiver, name)?;
        self.fill_site(site, FillTarget::Module(module));
        Ok(value)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeHost for Runtime {
    fn space(&self) -> &ObjectSpace {
        &self.space
    }

    fn space_mut(&mut self) -> &mut ObjectSpace {
        &mut self.space
    }

    fn load_via_site(&mut self, site: CacheId, receiver: &Value) -> Option<AttrResult<Value>> {
        Some(self.resolve_attribute(site, receiver))
    }
}
