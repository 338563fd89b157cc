//! Unit tests for inline cache components

use std::sync::Arc;

use core_types::{AttrError, CacheId};
use inline_cache::{
    AttrStrategy, CacheConfig, CacheEvent, CacheStats, MissReason, MissReporter, Runtime,
    SiteCache, SiteKind,
};
use object_model::{BoundSelf, Descriptor, FieldKind, Function, StorageKind, TypeSpec, Value};
use parking_lot::Mutex;

/// Reporter that keeps every event in order
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(CacheId, SiteKind, CacheEvent)>>,
}

impl Recorder {
    fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().iter().map(|(_, _, e)| *e).collect()
    }
}

impl MissReporter for Recorder {
    fn report(&self, site: CacheId, kind: SiteKind, event: CacheEvent) {
        self.events.lock().push((site, kind, event));
    }
}

fn stats_runtime() -> Runtime {
    Runtime::with_config(CacheConfig {
        collect_stats: true,
        ..CacheConfig::default()
    })
}

// ============================================================================
// Instance attribute sites
// ============================================================================

#[test]
fn test_first_load_misses_second_hits() {
    let mut rt = stats_runtime();
    let t = rt.space_mut().define_type(TypeSpec::new("T")).unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let store = rt.new_attr_site("x");
    let load = rt.new_attr_site("x");
    rt.assign_attribute(store, &obj, Value::Int(1)).unwrap();

    assert_eq!(rt.resolve_attribute(load, &obj), Ok(Value::Int(1)));
    assert_eq!(rt.resolve_attribute(load, &obj), Ok(Value::Int(1)));

    let snap = rt.stats().snapshot();
    assert_eq!(snap.hits, 1);
    assert_eq!(snap.misses_for(MissReason::NoEntry), 2);
    assert_eq!(snap.fills, 2);
}

#[test]
fn test_missing_attribute_is_not_cached() {
    let mut rt = Runtime::new();
    let t = rt.space_mut().define_type(TypeSpec::new("T")).unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let site = rt.new_attr_site("nope");

    assert_eq!(
        rt.resolve_attribute(site, &obj),
        Err(AttrError::no_attribute("T", "nope"))
    );
    assert!(rt.site(site).and_then(SiteCache::as_attr).unwrap().is_empty());
}

#[test]
fn test_store_through_cached_split_slot() {
    let mut rt = Runtime::new();
    let t = rt.space_mut().define_type(TypeSpec::new("T")).unwrap();
    let a = rt.space_mut().new_instance(t).unwrap();
    let b = rt.space_mut().new_instance(t).unwrap();
    let site = rt.new_attr_site("x");

    rt.assign_attribute(site, &a, Value::Int(1)).unwrap();
    // b has no dict yet; the cached strategy materializes one on the shared layout
    rt.assign_attribute(site, &b, Value::Int(2)).unwrap();

    let load = rt.new_attr_site("x");
    assert_eq!(rt.resolve_attribute(load, &a), Ok(Value::Int(1)));
    assert_eq!(rt.resolve_attribute(load, &b), Ok(Value::Int(2)));
}

#[test]
fn test_combined_storage_strategy() {
    let mut rt = Runtime::new();
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").storage(StorageKind::Combined))
        .unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let site = rt.new_attr_site("x");
    rt.assign_attribute(site, &obj, Value::Int(9)).unwrap();

    let entry = rt.site(site).and_then(SiteCache::as_attr).unwrap().entry_for(t).unwrap();
    assert!(matches!(entry.strategy, AttrStrategy::Combined));
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(9)));
}

#[test]
fn test_member_field_through_cache() {
    let mut rt = Runtime::new();
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").field("n", FieldKind::Float, false))
        .unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let site = rt.new_attr_site("n");

    assert!(rt.resolve_attribute(site, &obj).unwrap_err().is_missing_attribute());
    rt.assign_attribute(site, &obj, Value::Int(2)).unwrap();
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Float(2.0)));
    // Typed store errors pass through untouched
    assert!(matches!(
        rt.assign_attribute(site, &obj, Value::str("x")),
        Err(AttrError::TypeError(_))
    ));
}

#[test]
fn test_read_only_member_rejects_cached_store() {
    let mut rt = stats_runtime();
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").field("ro", FieldKind::Int, true))
        .unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let Value::Object(id) = obj else { unreachable!() };
    rt.space_mut().init_field(id, "ro", Value::Int(5)).unwrap();
    let site = rt.new_attr_site("ro");

    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(5)));
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(5)));
    assert_eq!(rt.stats().snapshot().hits, 1);
    assert!(matches!(
        rt.site(site).and_then(SiteCache::as_attr).unwrap().entry_for(t).unwrap().strategy,
        AttrStrategy::Member(_)
    ));

    let cached = rt.assign_attribute(site, &obj, Value::Int(6));
    assert!(matches!(cached, Err(AttrError::ReadOnly { .. })));
    let generic = object_model::generic_setattr(rt.space_mut(), &obj, "ro", Value::Int(6));
    assert_eq!(cached, generic);
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(5)));
}

#[test]
fn test_descriptor_error_is_transparent() {
    let mut rt = Runtime::new();
    let prop = Descriptor::property(
        "p",
        |_, _, _| Err(AttrError::Raised("boom".into())),
        |_, _, _| Err(AttrError::Raised("no writes".into())),
    );
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").attr("p", Value::Descriptor(prop)))
        .unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let site = rt.new_attr_site("p");

    for _ in 0..2 {
        assert_eq!(rt.resolve_attribute(site, &obj), Err(AttrError::Raised("boom".into())));
    }
    assert_eq!(
        rt.assign_attribute(site, &obj, Value::Int(1)),
        Err(AttrError::Raised("no writes".into()))
    );
}

#[test]
fn test_capacity_two_with_three_types() {
    let mut rt = Runtime::with_config(CacheConfig {
        attr_entries: 2,
        collect_stats: true,
        ..CacheConfig::default()
    });
    let types: Vec<_> = (0..3)
        .map(|i| {
            rt.space_mut()
                .define_type(TypeSpec::new(format!("T{i}")).attr("x", Value::Int(i)))
                .unwrap()
        })
        .collect();
    let objs: Vec<_> = types
        .iter()
        .map(|t| rt.space_mut().new_instance(*t).unwrap())
        .collect();
    let site = rt.new_attr_site("x");

    for _ in 0..3 {
        for (i, obj) in objs.iter().enumerate() {
            assert_eq!(rt.resolve_attribute(site, obj), Ok(Value::Int(i as i64)));
        }
    }
    let cache = rt.site(site).and_then(SiteCache::as_attr).unwrap();
    assert_eq!(cache.len(), 2);
    assert!(cache.entry_for(types[2]).is_none());
    assert_eq!(rt.stats().snapshot().rejected_for(MissReason::CapacityExhausted), 3);
}

// ============================================================================
// Reporting
// ============================================================================

#[test]
fn test_injected_reporter_sees_events_in_order() {
    let mut rt = Runtime::new();
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").attr("x", Value::Int(1)))
        .unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let recorder = Arc::new(Recorder::default());
    let site = rt.new_attr_site_with_reporter("x", Some(recorder.clone()));

    rt.resolve_attribute(site, &obj).unwrap();
    rt.resolve_attribute(site, &obj).unwrap();
    rt.space_mut().set_type_attr(t, "x", Value::Int(2)).unwrap();
    rt.resolve_attribute(site, &obj).unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            CacheEvent::Miss(MissReason::NoEntry),
            CacheEvent::Fill,
            CacheEvent::Hit,
            CacheEvent::Invalidated,
            CacheEvent::Miss(MissReason::NoEntry),
            CacheEvent::Fill,
        ]
    );
}

#[test]
fn test_sites_without_reporter_are_silent() {
    let mut rt = Runtime::new();
    let t = rt.space_mut().define_type(TypeSpec::new("T")).unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let site = rt.new_attr_site("x");
    rt.assign_attribute(site, &obj, Value::Int(1)).unwrap();
    assert_eq!(rt.stats().snapshot(), CacheStats::new().snapshot());
}

#[test]
fn test_unsupported_receiver_uses_slow_path() {
    let mut rt = stats_runtime();
    let site = rt.new_attr_site("x");
    assert_eq!(
        rt.resolve_attribute(site, &Value::Int(3)),
        Err(AttrError::no_attribute("int", "x"))
    );
    assert_eq!(rt.stats().snapshot().misses_for(MissReason::UnsupportedReceiver), 1);
}

// ============================================================================
// Method sites
// ============================================================================

#[test]
fn test_method_site_returns_receiver() {
    let mut rt = stats_runtime();
    let f = Function::new("f");
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").attr("f", Value::Function(f.clone())))
        .unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let site = rt.new_method_site("f");

    for _ in 0..2 {
        assert_eq!(
            rt.resolve_bound_method(site, &obj),
            Ok((Value::Function(f.clone()), BoundSelf::Receiver(obj.clone())))
        );
    }
    assert_eq!(rt.stats().snapshot().hits, 1);
}

#[test]
fn test_method_site_non_function_falls_back() {
    let mut rt = Runtime::new();
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").attr("f", Value::Int(5)))
        .unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let site = rt.new_method_site("f");
    assert_eq!(rt.resolve_bound_method(site, &obj), Ok((Value::Int(5), BoundSelf::NoSelf)));
    assert!(rt.site(site).and_then(SiteCache::as_method).unwrap().is_empty());
}

#[test]
fn test_method_shadowed_after_fill() {
    let mut rt = Runtime::new();
    let f = Function::new("f");
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").attr("f", Value::Function(f)))
        .unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let call = rt.new_method_site("f");
    let store = rt.new_attr_site("f");
    rt.resolve_bound_method(call, &obj).unwrap();

    rt.assign_attribute(store, &obj, Value::str("shadow")).unwrap();
    assert_eq!(
        rt.resolve_bound_method(call, &obj),
        Ok((Value::str("shadow"), BoundSelf::NoSelf))
    );
}

// ============================================================================
// Type and module sites
// ============================================================================

#[test]
fn test_type_attr_site() {
    let mut rt = stats_runtime();
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").attr("x", Value::Int(1)))
        .unwrap();
    let site = rt.new_type_attr_site("x");
    let receiver = Value::Type(t);

    assert_eq!(rt.resolve_attribute(site, &receiver), Ok(Value::Int(1)));
    assert_eq!(rt.resolve_attribute(site, &receiver), Ok(Value::Int(1)));
    rt.space_mut().set_type_attr(t, "x", Value::Int(2)).unwrap();
    assert_eq!(rt.resolve_attribute(site, &receiver), Ok(Value::Int(2)));
    assert_eq!(rt.stats().snapshot().hits, 1);
}

#[test]
fn test_type_method_site_through_metaclass() {
    let mut rt = Runtime::new();
    let create = Function::new("create");
    let meta = {
        let space = rt.space_mut();
        let type_type = space.type_type();
        space
            .define_type(
                TypeSpec::new("Meta")
                    .base(type_type)
                    .attr("create", Value::Function(create.clone())),
            )
            .unwrap()
    };
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").metaclass(meta))
        .unwrap();
    let site = rt.new_type_method_site("create");
    let receiver = Value::Type(t);

    for _ in 0..2 {
        assert_eq!(
            rt.resolve_bound_method(site, &receiver),
            Ok((Value::Function(create.clone()), BoundSelf::Receiver(receiver.clone())))
        );
    }
    assert!(rt.site(site).and_then(SiteCache::as_type_method).unwrap().entry().is_some());
}

#[test]
fn test_module_attr_site() {
    let mut rt = Runtime::new();
    let module = rt.space_mut().new_module("m");
    let Value::Module(id) = module else {
        panic!("expected a module");
    };
    rt.space_mut().module_set(id, "g", Value::Int(1)).unwrap();
    let site = rt.new_module_attr_site("g");

    assert_eq!(rt.resolve_attribute(site, &module), Ok(Value::Int(1)));
    rt.space_mut().module_set(id, "g", Value::Int(2)).unwrap();
    assert_eq!(rt.resolve_attribute(site, &module), Ok(Value::Int(2)));
    rt.space_mut().module_delete(id, "g").unwrap();
    assert_eq!(
        rt.resolve_attribute(site, &module),
        Err(AttrError::no_module_attribute("m", "g"))
    );
}

// ============================================================================
// Re-entrancy
// ============================================================================

#[test]
fn test_getter_reenters_same_site() {
    let mut rt = Runtime::new();
    let base = rt.space_mut().define_type(TypeSpec::new("Base")).unwrap();
    let site = rt.new_attr_site("v");

    // The getter loads `v` through the very site being filled, on an
    // instance of a second type whose `v` is a plain class variable.
    let other = rt
        .space_mut()
        .define_type(TypeSpec::new("Other").attr("v", Value::Int(10)))
        .unwrap();
    let other_obj = rt.space_mut().new_instance(other).unwrap();
    let inner = other_obj.clone();
    let getter = Descriptor::getter_only("v", move |host, _, _| {
        match host.load_via_site(site, &inner) {
            Some(Ok(Value::Int(n))) => Ok(Value::Int(n + 1)),
            Some(Ok(other)) => Ok(other),
            Some(Err(e)) => Err(e),
            None => Ok(Value::None),
        }
    });
    rt.space_mut()
        .set_type_attr(base, "v", Value::Descriptor(getter))
        .unwrap();
    let obj = rt.space_mut().new_instance(base).unwrap();

    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(11)));
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(11)));
    let cache = rt.site(site).and_then(SiteCache::as_attr).unwrap();
    assert_eq!(cache.len(), 2);
    assert!(cache.entry_for(base).is_some());
    assert!(cache.entry_for(other).is_some());
}

#[test]
fn test_setter_mutating_type_mid_store() {
    let mut rt = Runtime::new();
    let t = rt.space_mut().define_type(TypeSpec::new("T")).unwrap();
    // The setter replaces itself with a plain class variable
    let prop = Descriptor::property(
        "x",
        |_, _, _| Ok(Value::str("getter")),
        move |host, _, value| host.space_mut().set_type_attr(t, "x", value),
    );
    rt.space_mut().set_type_attr(t, "x", Value::Descriptor(prop)).unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let site = rt.new_attr_site("x");

    rt.assign_attribute(site, &obj, Value::Int(4)).unwrap();
    // The fill after the store saw the replaced namespace
    let entry = rt.site(site).and_then(SiteCache::as_attr).unwrap().entry_for(t).unwrap();
    assert!(matches!(entry.strategy, AttrStrategy::DescriptorOrClassVar { .. }));
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(4)));
}

// ============================================================================
// Site lifecycle
// ============================================================================

#[test]
fn test_removed_site_is_unknown() {
    let mut rt = Runtime::new();
    let site = rt.new_attr_site("x");
    assert!(rt.remove_site(site));
    assert_eq!(
        rt.resolve_attribute(site, &Value::None),
        Err(AttrError::UnknownSite(site))
    );
    // Handles are never reused
    assert_ne!(rt.new_attr_site("x"), site);
}

#[test]
fn test_uncacheable_type_always_misses() {
    let mut rt = Runtime::new();
    let t = rt.space_mut().define_type(TypeSpec::new("T").uncacheable()).unwrap();
    let obj = rt.space_mut().new_instance(t).unwrap();
    let site = rt.new_attr_site("x");
    rt.assign_attribute(site, &obj, Value::Int(1)).unwrap();
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(1)));
    assert!(rt.site(site).and_then(SiteCache::as_attr).unwrap().is_empty());
    assert!(!rt.ensure_version_token(t));
}

// ============================================================================
// Capacity and subscription bookkeeping
// ============================================================================

mod bookkeeping {
    use inline_cache::{AttrCache, WatcherRegistry, MAX_CACHE_ENTRIES};
    use object_model::ObjectSpace;
    use proptest::prelude::*;

    use super::*;

    proptest! {
        /// Entries never exceed capacity and the registry holds exactly the
        /// (type, site) pairs the entries depend on
        #[test]
        fn entries_and_watchers_stay_in_step(
            capacity in 1..=MAX_CACHE_ENTRIES,
            steps in prop::collection::vec((0..6usize, any::<bool>()), 1..40),
        ) {
            let mut space = ObjectSpace::new();
            let types: Vec<_> = (0..6)
                .map(|i| space.define_type(TypeSpec::new(format!("T{i}"))).unwrap())
                .collect();
            let watchers = WatcherRegistry::new();
            let site = CacheId::from_raw(0);
            let mut cache = AttrCache::new(site, "x", capacity, None);

            for (index, mutate) in steps {
                let ty = types[index];
                if mutate {
                    space.set_type_attr(ty, "unrelated", Value::None).unwrap();
                    for changed in space.take_pending_changes() {
                        watchers.type_changed(changed, |_| {
                            cache.type_changed(changed);
                        });
                    }
                } else {
                    cache.fill(&space, &watchers, ty);
                }

                prop_assert!(cache.len() <= capacity);
                for t in &types {
                    prop_assert_eq!(
                        watchers.is_watching(*t, site),
                        cache.entry_for(*t).is_some()
                    );
                }
            }
        }
    }
}
