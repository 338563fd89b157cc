//! Invalidation across component boundaries
//!
//! Every mutation the object model can make must either clear the entries
//! that depend on it or leave the cache unable to serve a stale answer.

use std::sync::Arc;

use core_types::AttrError;
use inline_cache::{AttrStrategy, CacheConfig, CacheStats, MissReason, Runtime, SiteCache};
use integration_tests::{instance_id, Hierarchy};
use object_model::{BoundSelf, Descriptor, Function, StorageKind, TypeSpec, Value};

fn setup() -> (Runtime, Hierarchy, Arc<CacheStats>) {
    let mut rt = Runtime::with_config(CacheConfig {
        collect_stats: true,
        ..CacheConfig::default()
    });
    let h = Hierarchy::define(rt.space_mut());
    let stats = rt.stats();
    (rt, h, stats)
}

fn attr_entries(rt: &Runtime, site: core_types::CacheId) -> usize {
    rt.site(site).and_then(SiteCache::as_attr).map_or(0, |c| c.len())
}

#[test]
fn test_base_mutation_clears_subclass_entries() {
    let (mut rt, h, _) = setup();
    rt.space_mut().set_type_attr(h.base, "c", Value::Int(1)).unwrap();
    let left = rt.space_mut().new_instance(h.left).unwrap();
    let right = rt.space_mut().new_instance(h.right).unwrap();
    let site = rt.new_attr_site("c");

    assert_eq!(rt.resolve_attribute(site, &left), Ok(Value::Int(1)));
    assert_eq!(rt.resolve_attribute(site, &right), Ok(Value::Int(1)));
    assert_eq!(attr_entries(&rt, site), 2);
    assert!(rt.watchers().is_watching(h.left, site));
    assert!(rt.watchers().is_watching(h.right, site));

    rt.mutate_types(|space| space.set_type_attr(h.base, "c", Value::Int(2)))
        .unwrap();
    assert_eq!(attr_entries(&rt, site), 0);
    assert!(rt.watchers().watchers_of(h.left).is_empty());
    assert!(rt.watchers().watchers_of(h.right).is_empty());

    assert_eq!(rt.resolve_attribute(site, &left), Ok(Value::Int(2)));
    assert_eq!(rt.resolve_attribute(site, &right), Ok(Value::Int(2)));
}

#[test]
fn test_unflushed_mutation_is_seen_by_next_lookup() {
    let (mut rt, h, stats) = setup();
    rt.space_mut().set_type_attr(h.base, "c", Value::Int(1)).unwrap();
    let obj = rt.space_mut().new_instance(h.left).unwrap();
    let site = rt.new_attr_site("c");
    rt.resolve_attribute(site, &obj).unwrap();

    // Mutate through the space directly; nothing propagates it yet
    rt.space_mut().set_type_attr(h.left, "c", Value::Int(5)).unwrap();
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(5)));
    assert_eq!(stats.snapshot().invalidations, 1);
}

#[test]
fn test_sibling_mutation_leaves_other_branch_alone() {
    let (mut rt, h, _) = setup();
    rt.space_mut().set_type_attr(h.base, "c", Value::Int(1)).unwrap();
    let left = rt.space_mut().new_instance(h.left).unwrap();
    let right = rt.space_mut().new_instance(h.right).unwrap();
    let site = rt.new_attr_site("c");
    rt.resolve_attribute(site, &left).unwrap();
    rt.resolve_attribute(site, &right).unwrap();

    rt.mutate_types(|space| space.set_type_attr(h.left, "c", Value::Int(7)))
        .unwrap();
    let cache = rt.site(site).and_then(SiteCache::as_attr).unwrap();
    assert!(cache.entry_for(h.left).is_none());
    assert!(cache.entry_for(h.right).is_some());
    assert_eq!(rt.resolve_attribute(site, &left), Ok(Value::Int(7)));
    assert_eq!(rt.resolve_attribute(site, &right), Ok(Value::Int(1)));
}

#[test]
fn test_rebasing_changes_resolution() {
    let (mut rt, h, _) = setup();
    rt.space_mut().set_type_attr(h.base, "c", Value::str("base")).unwrap();
    let other = rt
        .space_mut()
        .define_type(TypeSpec::new("Other").attr("c", Value::str("other")))
        .unwrap();
    let obj = rt.space_mut().new_instance(h.left).unwrap();
    let site = rt.new_attr_site("c");
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::str("base")));

    rt.mutate_types(|space| space.set_bases(h.left, &[other])).unwrap();
    assert_eq!(attr_entries(&rt, site), 0);
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::str("other")));
}

#[test]
fn test_storage_switch_keeps_existing_values_visible() {
    let (mut rt, h, _) = setup();
    let old = rt.space_mut().new_instance(h.base).unwrap();
    let site = rt.new_attr_site("x");
    rt.assign_attribute(site, &old, Value::Int(1)).unwrap();
    assert_eq!(rt.resolve_attribute(site, &old), Ok(Value::Int(1)));

    rt.mutate_types(|space| space.set_storage_kind(h.base, StorageKind::Combined))
        .unwrap();
    assert_eq!(attr_entries(&rt, site), 0);

    let new = rt.space_mut().new_instance(h.base).unwrap();
    rt.assign_attribute(site, &new, Value::Int(2)).unwrap();
    assert_eq!(rt.resolve_attribute(site, &new), Ok(Value::Int(2)));
    assert_eq!(rt.resolve_attribute(site, &old), Ok(Value::Int(1)));
    assert!(matches!(
        rt.site(site).and_then(SiteCache::as_attr).unwrap().entry_for(h.base).unwrap().strategy,
        AttrStrategy::Combined
    ));
}

#[test]
fn test_destroyed_type_drops_every_subscription() {
    let (mut rt, h, _) = setup();
    rt.space_mut().set_type_attr(h.flat, "c", Value::Int(1)).unwrap();
    let obj = rt.space_mut().new_instance(h.flat).unwrap();
    let attr = rt.new_attr_site("c");
    let method = rt.new_method_site("c");
    rt.resolve_attribute(attr, &obj).unwrap();
    rt.resolve_bound_method(method, &obj).unwrap();

    rt.mutate_types(|space| space.destroy_type(h.flat)).unwrap();
    assert!(rt.watchers().watchers_of(h.flat).is_empty());
    assert_eq!(rt.resolve_attribute(attr, &obj), Err(AttrError::DeadType(h.flat)));
    assert_eq!(attr_entries(&rt, attr), 0);
    assert!(!rt.ensure_version_token(h.flat));
}

#[test]
fn test_uncacheable_after_fill() {
    let (mut rt, h, stats) = setup();
    rt.space_mut().set_type_attr(h.flat, "c", Value::Int(1)).unwrap();
    let obj = rt.space_mut().new_instance(h.flat).unwrap();
    let site = rt.new_attr_site("c");
    rt.resolve_attribute(site, &obj).unwrap();

    rt.mutate_types(|space| space.mark_uncacheable(h.flat)).unwrap();
    stats.reset();
    for _ in 0..3 {
        assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(1)));
    }
    let snap = stats.snapshot();
    assert_eq!(snap.hits, 0);
    assert_eq!(snap.total_misses(), 3);
    assert_eq!(snap.rejected_for(MissReason::Uncacheable), 3);
    assert_eq!(attr_entries(&rt, site), 0);
}

#[test]
fn test_retyped_instance_uses_new_type() {
    let (mut rt, h, _) = setup();
    rt.space_mut().set_type_attr(h.left, "c", Value::str("left")).unwrap();
    rt.space_mut().set_type_attr(h.right, "c", Value::str("right")).unwrap();
    let obj = rt.space_mut().new_instance(h.left).unwrap();
    let site = rt.new_attr_site("c");
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::str("left")));

    rt.space_mut().set_instance_type(instance_id(&obj), h.right).unwrap();
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::str("right")));
    let cache = rt.site(site).and_then(SiteCache::as_attr).unwrap();
    assert!(cache.entry_for(h.left).is_some());
    assert!(cache.entry_for(h.right).is_some());
}

#[test]
fn test_diverged_dict_misses_split_entry() {
    let (mut rt, h, stats) = setup();
    let obj = rt.space_mut().new_instance(h.base).unwrap();
    let site = rt.new_attr_site("x");
    rt.assign_attribute(site, &obj, Value::Int(1)).unwrap();
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(1)));

    rt.space_mut().diverge_dict(instance_id(&obj)).unwrap();
    stats.reset();
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(1)));
    assert_eq!(stats.snapshot().misses_for(MissReason::LayoutMismatch), 1);

    rt.assign_attribute(site, &obj, Value::Int(2)).unwrap();
    assert_eq!(rt.resolve_attribute(site, &obj), Ok(Value::Int(2)));
}

#[test]
fn test_shadowing_class_function_after_fill() {
    let (mut rt, h, _) = setup();
    let f = Function::new("f");
    rt.space_mut()
        .set_type_attr(h.base, "f", Value::Function(f.clone()))
        .unwrap();
    let obj = rt.space_mut().new_instance(h.base).unwrap();
    let method = rt.new_method_site("f");
    let attr = rt.new_attr_site("f");
    assert_eq!(
        rt.resolve_bound_method(method, &obj),
        Ok((Value::Function(f.clone()), BoundSelf::Receiver(obj.clone())))
    );
    assert_eq!(rt.resolve_attribute(attr, &obj), Ok(Value::bound(f, obj.clone())));

    // Instance writes do not touch the type, so the guard must catch them
    rt.space_mut().dict_set(instance_id(&obj), "f", Value::Int(3)).unwrap();
    assert_eq!(
        rt.resolve_bound_method(method, &obj),
        Ok((Value::Int(3), BoundSelf::NoSelf))
    );
    assert_eq!(rt.resolve_attribute(attr, &obj), Ok(Value::Int(3)));
}

#[test]
fn test_metaclass_change_clears_type_sites() {
    let (mut rt, _, _) = setup();
    let meta_type = rt.space().type_type();
    let meta = rt
        .space_mut()
        .define_type(TypeSpec::new("Meta").base(meta_type))
        .unwrap();
    let t = rt
        .space_mut()
        .define_type(TypeSpec::new("T").metaclass(meta))
        .unwrap();
    rt.space_mut().set_type_attr(meta, "tag", Value::str("meta")).unwrap();
    let site = rt.new_type_attr_site("tag");
    assert_eq!(rt.resolve_attribute(site, &Value::Type(t)), Ok(Value::str("meta")));
    assert!(rt.watchers().is_watching(meta, site));
    assert!(rt.watchers().is_watching(t, site));

    let prop = Descriptor::getter_only("tag", |_, _, _| Ok(Value::str("computed")));
    rt.mutate_types(|space| space.set_type_attr(meta, "tag", Value::Descriptor(prop)))
        .unwrap();
    assert!(rt.site(site).and_then(SiteCache::as_type_attr).unwrap().entry().is_none());
    assert!(!rt.watchers().is_watching(t, site));
    assert_eq!(rt.resolve_attribute(site, &Value::Type(t)), Ok(Value::str("computed")));
}
