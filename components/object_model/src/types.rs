//! Type objects.
//!
//! A type is a mutable namespace of class-level attributes plus its bases,
//! linearized MRO, metaclass, instance storage layout and version token.
//! Types are created from a [`TypeSpec`] and mutated only through
//! [`ObjectSpace`](crate::ObjectSpace), which keeps version tokens and the
//! change log in sync with every mutation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use core_types::{LayoutId, TypeId, VersionTag};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::descriptor::FieldKind;
use crate::value::Value;

/// Requested instance storage for a new type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Instances share one key layout and store only value arrays
    Split,
    /// Every instance owns an independent map
    Combined,
}

/// The storage layout a type currently assigns to new instance dicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLayout {
    /// Shared key layout with the given identity
    Split(LayoutId),
    /// Independent per-instance maps
    Combined,
}

impl StorageLayout {
    /// Identity of the shared layout, if split
    #[inline]
    pub fn shared_layout(self) -> Option<LayoutId> {
        match self {
            StorageLayout::Split(id) => Some(id),
            StorageLayout::Combined => None,
        }
    }
}

/// A native field declared by a type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name
    pub name: Arc<str>,
    /// Primitive kind
    pub kind: FieldKind,
    /// Whether assignment is rejected
    pub readonly: bool,
}

/// Builder describing a type to create.
///
/// # Example
///
/// ```
/// use object_model::{ObjectSpace, StorageKind, TypeSpec, Value};
///
/// let mut space = ObjectSpace::new();
/// let point = space
///     .define_type(TypeSpec::new("Point").attr("dims", Value::Int(2)))
///     .unwrap();
/// assert_eq!(space.lookup_in_mro(point, "dims"), Some(Value::Int(2)));
/// ```
#[derive(Debug, Clone)]
pub struct TypeSpec {
    pub(crate) name: Arc<str>,
    pub(crate) bases: Vec<TypeId>,
    pub(crate) metaclass: Option<TypeId>,
    pub(crate) storage: StorageKind,
    pub(crate) cacheable: bool,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) attrs: Vec<(Arc<str>, Value)>,
}

impl TypeSpec {
    /// A split-layout, cacheable type deriving from `object`
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        TypeSpec {
            name: name.into(),
            bases: Vec::new(),
            metaclass: None,
            storage: StorageKind::Split,
            cacheable: true,
            fields: Vec::new(),
            attrs: Vec::new(),
        }
    }

    /// Add a base class (in declaration order)
    pub fn base(mut self, base: TypeId) -> Self {
        self.bases.push(base);
        self
    }

    /// Use a custom metaclass
    pub fn metaclass(mut self, meta: TypeId) -> Self {
        self.metaclass = Some(meta);
        self
    }

    /// Choose the instance storage kind
    pub fn storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    /// Mark instances as not of a uniform, introspectable shape
    pub fn uncacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Declare a native field (exposed through a member descriptor)
    pub fn field(mut self, name: impl Into<Arc<str>>, kind: FieldKind, readonly: bool) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
            readonly,
        });
        self
    }

    /// Add a class-level attribute
    pub fn attr(mut self, name: impl Into<Arc<str>>, value: Value) -> Self {
        self.attrs.push((name.into(), value));
        self
    }
}

/// A type object living in the object space.
#[derive(Debug)]
pub struct TypeObject {
    pub(crate) name: Arc<str>,
    pub(crate) bases: SmallVec<[TypeId; 2]>,
    pub(crate) mro: Vec<TypeId>,
    pub(crate) metaclass: TypeId,
    pub(crate) dict: FxHashMap<Arc<str>, Value>,
    pub(crate) subclasses: Vec<TypeId>,
    pub(crate) storage: StorageLayout,
    pub(crate) version: AtomicU32,
    pub(crate) cacheable: bool,
    pub(crate) alive: bool,
    pub(crate) field_count: usize,
}

impl TypeObject {
    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct bases
    pub fn bases(&self) -> &[TypeId] {
        &self.bases
    }

    /// Method resolution order, starting with the type itself
    pub fn mro(&self) -> &[TypeId] {
        &self.mro
    }

    /// Metaclass
    pub fn metaclass(&self) -> TypeId {
        self.metaclass
    }

    /// Direct subclasses
    pub fn subclasses(&self) -> &[TypeId] {
        &self.subclasses
    }

    /// Storage layout for new instance dicts
    pub fn storage(&self) -> StorageLayout {
        self.storage
    }

    /// Attribute defined directly on this type
    pub fn own_attr(&self, name: &str) -> Option<&Value> {
        self.dict.get(name)
    }

    /// Names defined directly on this type
    pub fn own_attr_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.dict.keys()
    }

    /// Current version token
    #[inline]
    pub fn version(&self) -> VersionTag {
        VersionTag::from_raw(self.version.load(Ordering::Acquire))
    }

    /// Whether the type may ever receive a version token
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// False once the type has been destroyed
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Number of native fields instances carry
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    pub(crate) fn invalidate_version(&mut self) {
        *self.version.get_mut() = 0;
    }
}
