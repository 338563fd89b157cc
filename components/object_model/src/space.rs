//! The object space: arenas for types, layouts, instances and modules.
//!
//! All objects are addressed by stable indices. Nothing is ever freed from
//! an arena; destroyed types stay behind as tombstones so stale handles can
//! be detected rather than dangling.
//!
//! Version tokens are assigned lazily through [`ObjectSpace::ensure_version_token`],
//! which only needs `&self`: compile-time workers sharing the space can tag
//! types concurrently while the borrow keeps namespaces frozen. Every
//! namespace mutation needs `&mut self`, resets the tokens of the type and
//! its transitive subclasses, and records them in the pending change log.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use core_types::{AttrError, AttrResult, InstanceId, LayoutId, ModuleId, TypeId, VersionTag};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::debug;

use crate::descriptor::MemberDescriptor;
use crate::layout::SharedKeys;
use crate::module::ModuleNamespace;
use crate::mro::c3_linearize;
use crate::object::{Instance, InstanceDict};
use crate::types::{StorageKind, StorageLayout, TypeObject, TypeSpec};
use crate::value::Value;

/// Arena-backed object space.
#[derive(Debug)]
pub struct ObjectSpace {
    types: Vec<TypeObject>,
    layouts: Vec<SharedKeys>,
    instances: Vec<Instance>,
    modules: Vec<ModuleNamespace>,
    /// Next version token to hand out; zero is never handed out
    next_version: AtomicU32,
    /// Types mutated since the log was last drained
    pending_changes: Vec<TypeId>,
    object_type: TypeId,
    type_type: TypeId,
}

impl ObjectSpace {
    /// Create a space holding only the `object` and `type` root types
    pub fn new() -> Self {
        let object_type = TypeId::from_raw(0);
        let type_type = TypeId::from_raw(1);

        let root = |name: &str, bases: &[TypeId], mro: Vec<TypeId>| TypeObject {
            name: Arc::from(name),
            bases: SmallVec::from_slice(bases),
            mro,
            metaclass: type_type,
            dict: FxHashMap::default(),
            subclasses: Vec::new(),
            storage: StorageLayout::Combined,
            version: AtomicU32::new(0),
            cacheable: true,
            alive: true,
            field_count: 0,
        };

        let mut object = root("object", &[], vec![object_type]);
        object.subclasses.push(type_type);
        let meta = root("type", &[object_type], vec![type_type, object_type]);

        ObjectSpace {
            types: vec![object, meta],
            layouts: Vec::new(),
            instances: Vec::new(),
            modules: Vec::new(),
            next_version: AtomicU32::new(1),
            pending_changes: Vec::new(),
            object_type,
            type_type,
        }
    }

    /// The root `object` type
    pub fn object_type(&self) -> TypeId {
        self.object_type
    }

    /// The root metaclass `type`
    pub fn type_type(&self) -> TypeId {
        self.type_type
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    /// Create a type from a `TypeSpec`
    pub fn define_type(&mut self, spec: TypeSpec) -> AttrResult<TypeId> {
        let id = TypeId::from_raw(self.types.len() as u32);
        let bases: Vec<TypeId> = if spec.bases.is_empty() {
            vec![self.object_type]
        } else {
            spec.bases.clone()
        };
        for &base in &bases {
            self.live_type(base)?;
        }
        let metaclass = match spec.metaclass {
            Some(meta) => {
                self.live_type(meta)?;
                meta
            }
            None => self.live_type(bases[0])?.metaclass,
        };

        let mro = c3_linearize(id, &spec.name, &bases, |b| self.types[b.index()].mro.clone())?;

        let mut field_count = bases
            .iter()
            .map(|b| self.types[b.index()].field_count)
            .max()
            .unwrap_or(0);
        let mut dict: FxHashMap<Arc<str>, Value> = FxHashMap::default();
        for field in &spec.fields {
            let member = MemberDescriptor::new(field.name.clone(), field_count, field.kind, field.readonly);
            dict.insert(field.name.clone(), Value::Member(member));
            field_count += 1;
        }
        for (name, value) in spec.attrs {
            dict.insert(name, value);
        }

        let storage = match spec.storage {
            StorageKind::Split => StorageLayout::Split(self.new_layout()),
            StorageKind::Combined => StorageLayout::Combined,
        };

        for &base in &bases {
            self.types[base.index()].subclasses.push(id);
        }
        self.types.push(TypeObject {
            name: spec.name,
            bases: SmallVec::from_vec(bases),
            mro,
            metaclass,
            dict,
            subclasses: Vec::new(),
            storage,
            version: AtomicU32::new(0),
            cacheable: spec.cacheable,
            alive: true,
            field_count,
        });
        debug!(ty = %id, "defined type");
        Ok(id)
    }

    /// Any type, including destroyed ones
    pub fn type_object(&self, id: TypeId) -> Option<&TypeObject> {
        self.types.get(id.index())
    }

    /// A live type
    pub fn live_type(&self, id: TypeId) -> AttrResult<&TypeObject> {
        match self.types.get(id.index()) {
            Some(ty) if ty.alive => Ok(ty),
            Some(_) => Err(AttrError::DeadType(id)),
            None => Err(AttrError::InvalidHandle(id.to_string())),
        }
    }

    fn live_type_mut(&mut self, id: TypeId) -> AttrResult<&mut TypeObject> {
        match self.types.get_mut(id.index()) {
            Some(ty) if ty.alive => Ok(ty),
            Some(_) => Err(AttrError::DeadType(id)),
            None => Err(AttrError::InvalidHandle(id.to_string())),
        }
    }

    /// Type name, or a placeholder for unknown handles
    pub fn type_name(&self, id: TypeId) -> &str {
        self.types.get(id.index()).map(|t| t.name()).unwrap_or("<unknown>")
    }

    /// Walk the MRO of `ty` for a class-level attribute
    pub fn find_in_mro(&self, ty: TypeId, name: &str) -> Option<&Value> {
        let ty = self.types.get(ty.index())?;
        ty.mro
            .iter()
            .find_map(|t| self.types.get(t.index()).and_then(|t| t.dict.get(name)))
    }

    /// Owned copy of [`ObjectSpace::find_in_mro`]
    pub fn lookup_in_mro(&self, ty: TypeId, name: &str) -> Option<Value> {
        self.find_in_mro(ty, name).cloned()
    }

    /// True when `ty` has `base` in its MRO
    pub fn is_subtype(&self, ty: TypeId, base: TypeId) -> bool {
        self.types
            .get(ty.index())
            .map(|t| t.mro.contains(&base))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Version tokens and the change log
    // ------------------------------------------------------------------

    /// Current version token of a type (invalid for unknown handles)
    #[inline]
    pub fn version_of(&self, ty: TypeId) -> VersionTag {
        self.types
            .get(ty.index())
            .map(TypeObject::version)
            .unwrap_or(VersionTag::INVALID)
    }

    /// Lazily assign a version token.
    ///
    /// Returns false when the type is permanently ineligible: destroyed,
    /// declared uncacheable, or the token counter is exhausted.
    pub fn ensure_version_token(&self, ty: TypeId) -> bool {
        let Some(obj) = self.types.get(ty.index()) else {
            return false;
        };
        if !obj.alive || !obj.cacheable {
            return false;
        }
        if obj.version.load(Ordering::Acquire) != 0 {
            return true;
        }
        let Ok(tag) = self
            .next_version
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_add(1))
        else {
            return false;
        };
        // A concurrent tagger may have won; either token is valid.
        let _ = obj
            .version
            .compare_exchange(0, tag, Ordering::AcqRel, Ordering::Acquire);
        true
    }

    /// Record a completed mutation of `ty`.
    ///
    /// Resets the version token of `ty` and every transitive subclass and
    /// appends them to the pending change log.
    pub fn type_modified(&mut self, ty: TypeId) {
        if ty.index() >= self.types.len() {
            return;
        }
        let mut seen: FxHashSet<TypeId> = FxHashSet::default();
        let mut stack = vec![ty];
        while let Some(t) = stack.pop() {
            if !seen.insert(t) {
                continue;
            }
            let obj = &mut self.types[t.index()];
            obj.invalidate_version();
            stack.extend(obj.subclasses.iter().copied());
            if !self.pending_changes.contains(&t) {
                self.pending_changes.push(t);
            }
        }
        debug!(ty = %ty, affected = seen.len(), "type modified");
    }

    /// True when mutations are waiting to be propagated
    #[inline]
    pub fn has_pending_changes(&self) -> bool {
        !self.pending_changes.is_empty()
    }

    /// Drain the change log (each type at most once, in mutation order)
    pub fn take_pending_changes(&mut self) -> Vec<TypeId> {
        std::mem::take(&mut self.pending_changes)
    }

    // ------------------------------------------------------------------
    // Type mutation
    // ------------------------------------------------------------------

    /// Add or override a class-level attribute
    pub fn set_type_attr(&mut self, ty: TypeId, name: &str, value: Value) -> AttrResult<()> {
        self.live_type_mut(ty)?.dict.insert(Arc::from(name), value);
        self.type_modified(ty);
        Ok(())
    }

    /// Remove a class-level attribute defined directly on `ty`
    pub fn delete_type_attr(&mut self, ty: TypeId, name: &str) -> AttrResult<()> {
        let obj = self.live_type_mut(ty)?;
        if obj.dict.remove(name).is_none() {
            return Err(AttrError::no_attribute(obj.name.to_string(), name));
        }
        self.type_modified(ty);
        Ok(())
    }

    /// Relink the bases of `ty`, recomputing the MRO of it and its subclasses
    pub fn set_bases(&mut self, ty: TypeId, bases: &[TypeId]) -> AttrResult<()> {
        let bases: Vec<TypeId> = if bases.is_empty() {
            vec![self.object_type]
        } else {
            bases.to_vec()
        };
        for &base in &bases {
            if self.live_type(base)?.mro.contains(&ty) {
                return Err(AttrError::MroConflict(self.type_name(ty).to_string()));
            }
        }
        self.live_type(ty)?;

        // Stage every recomputed MRO before committing any of them.
        let mut staged: FxHashMap<TypeId, Vec<TypeId>> = FxHashMap::default();
        let order = self.descendants_in_order(ty);
        for &t in &order {
            let own_bases: Vec<TypeId> = if t == ty {
                bases.clone()
            } else {
                self.types[t.index()].bases.to_vec()
            };
            let mro = c3_linearize(t, &self.types[t.index()].name, &own_bases, |b| {
                staged
                    .get(&b)
                    .cloned()
                    .unwrap_or_else(|| self.types[b.index()].mro.clone())
            })?;
            staged.insert(t, mro);
        }

        let old_bases = std::mem::take(&mut self.types[ty.index()].bases);
        for base in old_bases {
            self.types[base.index()].subclasses.retain(|s| *s != ty);
        }
        for &base in &bases {
            self.types[base.index()].subclasses.push(ty);
        }
        self.types[ty.index()].bases = SmallVec::from_vec(bases);
        for (t, mro) in staged {
            self.types[t.index()].mro = mro;
        }
        self.type_modified(ty);
        Ok(())
    }

    /// `ty` followed by its transitive subclasses, each after all of its bases
    fn descendants_in_order(&self, ty: TypeId) -> Vec<TypeId> {
        let mut members: FxHashSet<TypeId> = FxHashSet::default();
        let mut stack = vec![ty];
        while let Some(t) = stack.pop() {
            if members.insert(t) {
                stack.extend(self.types[t.index()].subclasses.iter().copied());
            }
        }

        let mut order = Vec::with_capacity(members.len());
        let mut placed: FxHashSet<TypeId> = FxHashSet::default();
        while order.len() < members.len() {
            let before = order.len();
            let mut ready: Vec<TypeId> = members
                .iter()
                .copied()
                .filter(|t| !placed.contains(t))
                .filter(|&t| {
                    t == ty
                        || self.types[t.index()]
                            .bases
                            .iter()
                            .all(|b| !members.contains(b) || placed.contains(b))
                })
                .collect();
            ready.sort();
            for t in ready {
                placed.insert(t);
                order.push(t);
            }
            if order.len() == before {
                break;
            }
        }
        order
    }

    /// Switch the storage layout given to new instance dicts
    pub fn set_storage_kind(&mut self, ty: TypeId, kind: StorageKind) -> AttrResult<()> {
        self.live_type(ty)?;
        let storage = match kind {
            StorageKind::Split => StorageLayout::Split(self.new_layout()),
            StorageKind::Combined => StorageLayout::Combined,
        };
        self.types[ty.index()].storage = storage;
        self.type_modified(ty);
        Ok(())
    }

    /// Make a type permanently ineligible for caching
    pub fn mark_uncacheable(&mut self, ty: TypeId) -> AttrResult<()> {
        self.live_type_mut(ty)?.cacheable = false;
        self.type_modified(ty);
        Ok(())
    }

    /// Destroy a type, leaving a tombstone behind
    pub fn destroy_type(&mut self, ty: TypeId) -> AttrResult<()> {
        let obj = self.live_type_mut(ty)?;
        obj.alive = false;
        obj.dict.clear();
        let bases = obj.bases.clone();
        for base in bases {
            self.types[base.index()].subclasses.retain(|s| *s != ty);
        }
        self.type_modified(ty);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Layouts
    // ------------------------------------------------------------------

    fn new_layout(&mut self) -> LayoutId {
        let id = LayoutId::from_raw(self.layouts.len() as u32);
        self.layouts.push(SharedKeys::new(id));
        id
    }

    /// A shared key layout
    #[inline]
    pub fn layout(&self, id: LayoutId) -> Option<&SharedKeys> {
        self.layouts.get(id.index())
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// Allocate an instance of `ty`
    pub fn new_instance(&mut self, ty: TypeId) -> AttrResult<Value> {
        let field_count = self.live_type(ty)?.field_count;
        let id = InstanceId::from_raw(self.instances.len() as u32);
        self.instances.push(Instance::new(ty, field_count));
        Ok(Value::Object(id))
    }

    /// An instance
    #[inline]
    pub fn instance(&self, id: InstanceId) -> AttrResult<&Instance> {
        self.instances
            .get(id.index())
            .ok_or_else(|| AttrError::InvalidHandle(id.to_string()))
    }

    fn instance_mut(&mut self, id: InstanceId) -> AttrResult<&mut Instance> {
        self.instances
            .get_mut(id.index())
            .ok_or_else(|| AttrError::InvalidHandle(id.to_string()))
    }

    /// Current type of an instance
    #[inline]
    pub fn instance_type(&self, id: InstanceId) -> AttrResult<TypeId> {
        Ok(self.instance(id)?.type_id)
    }

    /// Re-type an instance (`__class__` assignment)
    pub fn set_instance_type(&mut self, id: InstanceId, ty: TypeId) -> AttrResult<()> {
        let field_count = self.live_type(ty)?.field_count;
        let inst = self.instance_mut(id)?;
        inst.type_id = ty;
        if inst.fields.len() < field_count {
            inst.fields.resize(field_count, None);
        }
        Ok(())
    }

    /// Initialize a native field, bypassing the read-only flag
    pub fn init_field(&mut self, id: InstanceId, name: &str, value: Value) -> AttrResult<()> {
        let ty = self.instance_type(id)?;
        match self.lookup_in_mro(ty, name) {
            Some(Value::Member(member)) => {
                member.store_unchecked(&mut self.instance_mut(id)?.fields, value)
            }
            _ => Err(AttrError::no_attribute(self.type_name(ty).to_string(), name)),
        }
    }

    /// Read a native field
    #[inline]
    pub fn load_field(&self, id: InstanceId, member: &MemberDescriptor) -> Option<Value> {
        self.instances.get(id.index()).and_then(|i| member.load(&i.fields))
    }

    /// Write a native field
    pub fn store_field(&mut self, id: InstanceId, member: &MemberDescriptor, value: Value) -> AttrResult<()> {
        member.store(&mut self.instance_mut(id)?.fields, value)
    }

    /// Look up a key in the instance dict
    pub fn dict_get(&self, id: InstanceId, name: &str) -> Option<Value> {
        match self.instances.get(id.index())?.dict.as_ref()? {
            InstanceDict::Split { layout, values } => {
                let slot = self.layouts.get(layout.index())?.index_of(name)?;
                values.get(slot).cloned().flatten()
            }
            InstanceDict::Combined(map) => map.get(name).cloned(),
        }
    }

    /// Value at a split slot, if the instance dict follows `layout`
    #[inline]
    pub fn split_slot(&self, id: InstanceId, layout: LayoutId, slot: usize) -> Option<Value> {
        let dict = self.instances.get(id.index())?.dict.as_ref()?;
        if dict.layout() != Some(layout) {
            return None;
        }
        dict.slot(slot).cloned()
    }

    /// Write a split slot; false unless the dict follows `layout` and the
    /// slot already exists in it
    pub fn store_split_slot(&mut self, id: InstanceId, layout: LayoutId, slot: usize, value: Value) -> bool {
        let known = self
            .layouts
            .get(layout.index())
            .map(|l| slot < l.len())
            .unwrap_or(false);
        if !known {
            return false;
        }
        let Some(inst) = self.instances.get_mut(id.index()) else {
            return false;
        };
        match inst.dict.as_mut() {
            Some(InstanceDict::Split { layout: own, values }) if *own == layout => {
                if values.len() <= slot {
                    values.resize(slot + 1, None);
                }
                values[slot] = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Create the instance dict if absent, following the type's layout
    pub fn materialize_dict(&mut self, id: InstanceId) -> AttrResult<()> {
        let ty = self.instance_type(id)?;
        if self.instance(id)?.dict.is_some() {
            return Ok(());
        }
        let dict = match self.live_type(ty)?.storage {
            StorageLayout::Split(layout) => InstanceDict::Split {
                layout,
                values: Vec::new(),
            },
            StorageLayout::Combined => InstanceDict::Combined(FxHashMap::default()),
        };
        self.instance_mut(id)?.dict = Some(dict);
        Ok(())
    }

    /// Insert or overwrite a key in the instance dict.
    ///
    /// Split dicts append unknown keys to the shared layout; when the layout
    /// is full the dict diverges into a combined map.
    pub fn dict_set(&mut self, id: InstanceId, name: &str, value: Value) -> AttrResult<()> {
        self.materialize_dict(id)?;
        let layout_id = self.instance(id)?.layout();

        if let Some(layout_id) = layout_id {
            let slot = self
                .layouts
                .get_mut(layout_id.index())
                .and_then(|l| l.add_key(name));
            match slot {
                Some(slot) => {
                    self.store_split_slot(id, layout_id, slot, value);
                    return Ok(());
                }
                None => self.diverge_dict(id)?,
            }
        }

        if let Some(InstanceDict::Combined(map)) = self.instance_mut(id)?.dict.as_mut() {
            map.insert(Arc::from(name), value);
        }
        Ok(())
    }

    /// Remove a key from the instance dict
    pub fn dict_delete(&mut self, id: InstanceId, name: &str) -> AttrResult<()> {
        let ty = self.instance_type(id)?;
        let slot = self
            .instance(id)?
            .layout()
            .and_then(|l| self.layouts.get(l.index()))
            .and_then(|l| l.index_of(name));
        let removed = match self.instance_mut(id)?.dict.as_mut() {
            Some(InstanceDict::Split { values, .. }) => match slot {
                Some(slot) => values.get_mut(slot).and_then(Option::take).is_some(),
                None => false,
            },
            Some(InstanceDict::Combined(map)) => map.remove(name).is_some(),
            None => false,
        };
        if removed {
            Ok(())
        } else {
            Err(AttrError::no_attribute(self.type_name(ty).to_string(), name))
        }
    }

    /// Convert a split instance dict into a combined map
    pub fn diverge_dict(&mut self, id: InstanceId) -> AttrResult<()> {
        let Some(InstanceDict::Split { layout, values }) = self.instance(id)?.dict.clone() else {
            return Ok(());
        };
        let mut map: FxHashMap<Arc<str>, Value> = FxHashMap::default();
        if let Some(keys) = self.layouts.get(layout.index()) {
            for (key, value) in keys.keys().zip(values) {
                if let Some(value) = value {
                    map.insert(key.clone(), value);
                }
            }
        }
        self.instance_mut(id)?.dict = Some(InstanceDict::Combined(map));
        debug!(instance = %id, layout = %layout, "instance dict diverged from shared layout");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    /// Create an empty module namespace
    pub fn new_module(&mut self, name: &str) -> Value {
        let id = ModuleId::from_raw(self.modules.len() as u32);
        self.modules.push(ModuleNamespace::new(name));
        Value::Module(id)
    }

    /// A module namespace
    #[inline]
    pub fn module(&self, id: ModuleId) -> AttrResult<&ModuleNamespace> {
        self.modules
            .get(id.index())
            .ok_or_else(|| AttrError::InvalidHandle(id.to_string()))
    }

    /// Insert or overwrite a module key
    pub fn module_set(&mut self, id: ModuleId, name: &str, value: Value) -> AttrResult<()> {
        self.modules
            .get_mut(id.index())
            .ok_or_else(|| AttrError::InvalidHandle(id.to_string()))?
            .set(name, value);
        Ok(())
    }

    /// Remove a module key
    pub fn module_delete(&mut self, id: ModuleId, name: &str) -> AttrResult<()> {
        let module = self
            .modules
            .get_mut(id.index())
            .ok_or_else(|| AttrError::InvalidHandle(id.to_string()))?;
        match module.delete(name) {
            Some(_) => Ok(()),
            None => Err(AttrError::no_module_attribute(module.name(), name)),
        }
    }
}

impl Default for ObjectSpace {
    fn default() -> Self {
        Self::new()
    }
}
