//! Object Model - types, instances, namespaces and generic attribute resolution
//!
//! This component provides:
//! - An arena of mutable type objects with lazily assigned version tokens
//! - Shared (split) key layouts and per-instance attribute storage
//! - Native field (member) descriptors and user-level descriptors
//! - Module-like namespaces with a generation counter
//! - The generic, uncached attribute resolution algorithm ("slow path")
//!
//! Every mutation of a type's namespace resets the version token of the
//! type and of all its subclasses and records the change in a pending log,
//! which the cache engine drains to notify subscribed caches.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod descriptor;
pub mod layout;
pub mod module;
pub mod mro;
pub mod object;
pub mod resolve;
pub mod space;
pub mod types;
pub mod value;

// Re-export main types
pub use descriptor::{Descriptor, FieldKind, Getter, MemberDescriptor, Setter};
pub use layout::{SharedKeys, MAX_SHARED_KEYS};
pub use module::ModuleNamespace;
pub use object::{Instance, InstanceDict};
pub use resolve::{
    generic_get_method, generic_getattr, generic_setattr, AttributeHost, BoundSelf,
};
pub use space::ObjectSpace;
pub use types::{FieldDef, StorageKind, StorageLayout, TypeObject, TypeSpec};
pub use value::{BoundMethod, Function, Value};
