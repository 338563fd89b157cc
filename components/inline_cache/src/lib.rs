//! Per-call-site attribute caches for a dynamic object model
//!
//! This crate provides:
//! - Instance attribute caches keyed by (type, version token) with one
//!   storage strategy per entry
//! - Instance method caches that avoid bound-method allocation
//! - Single-entry caches for loads and calls on type objects and modules
//! - A watcher registry that drops entries as soon as their type changes
//! - Pluggable miss reporting and a parallel prefill for compile-time
//!   warmup
//!
//! Every cached operation produces exactly what the generic resolution in
//! `object_model` would produce for the same state; a cache only decides
//! how fast the answer arrives.
//!
//! # Example
//!
//! ```
//! use inline_cache::Runtime;
//! use object_model::{TypeSpec, Value};
//!
//! let mut rt = Runtime::new();
//! let point = rt.space_mut().define_type(TypeSpec::new("Point")).unwrap();
//! let p = rt.space_mut().new_instance(point).unwrap();
//!
//! let store_x = rt.new_attr_site("x");
//! let load_x = rt.new_attr_site("x");
//! rt.assign_attribute(store_x, &p, Value::Int(3)).unwrap();
//!
//! // First load misses and fills, the second is served from the cache
//! assert_eq!(rt.resolve_attribute(load_x, &p), Ok(Value::Int(3)));
//! assert_eq!(rt.resolve_attribute(load_x, &p), Ok(Value::Int(3)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attr_cache;
pub mod config;
pub mod method_cache;
pub mod module_cache;
pub mod runtime;
pub mod site;
pub mod stats;
pub mod strategy;
pub mod type_cache;
pub mod warmup;
pub mod watchers;

// Re-export main types at crate root
pub use attr_cache::{AttrCache, AttrEntry, FillOutcome, MAX_CACHE_ENTRIES};
pub use config::{CacheConfig, ConfigError};
pub use method_cache::{MethodCache, MethodEntry};
pub use module_cache::{ModuleCache, ModuleEntry};
pub use runtime::Runtime;
pub use site::{FillTarget, SiteCache};
pub use stats::{CacheEvent, CacheStats, MissReason, MissReporter, SiteKind, StatsSnapshot};
pub use strategy::{AttrStrategy, Probe, ShadowGuard};
pub use type_cache::{TypeAttrCache, TypeEntry, TypeMethodCache};
pub use warmup::{prefill_parallel, WarmupJob, WarmupReport};
pub use watchers::WatcherRegistry;
