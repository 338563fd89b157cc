//! Instance representation
//!
//! An instance is a type handle plus an optional attribute dict and a
//! native field array for member descriptors.

use std::sync::Arc;

use core_types::{LayoutId, TypeId};
use rustc_hash::FxHashMap;

use crate::value::Value;

/// Per-instance attribute storage.
#[derive(Debug, Clone)]
pub enum InstanceDict {
    /// Values indexed by the slots of a shared key layout
    Split {
        /// Identity of the shared layout the values follow
        layout: LayoutId,
        /// Slot values; `None` marks an absent key
        values: Vec<Option<Value>>,
    },
    /// An independent name → value map
    Combined(FxHashMap<Arc<str>, Value>),
}

impl InstanceDict {
    /// Identity of the shared layout, for split dicts
    #[inline]
    pub fn layout(&self) -> Option<LayoutId> {
        match self {
            InstanceDict::Split { layout, .. } => Some(*layout),
            InstanceDict::Combined(_) => None,
        }
    }

    /// Value stored at a split slot
    #[inline]
    pub fn slot(&self, slot: usize) -> Option<&Value> {
        match self {
            InstanceDict::Split { values, .. } => values.get(slot).and_then(Option::as_ref),
            InstanceDict::Combined(_) => None,
        }
    }
}

/// An object whose attributes are resolved through its type.
#[derive(Debug, Clone)]
pub struct Instance {
    pub(crate) type_id: TypeId,
    pub(crate) dict: Option<InstanceDict>,
    pub(crate) fields: Vec<Option<Value>>,
}

impl Instance {
    pub(crate) fn new(type_id: TypeId, field_count: usize) -> Self {
        Instance {
            type_id,
            dict: None,
            fields: vec![None; field_count],
        }
    }

    /// Current type of the instance
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The attribute dict, if materialized
    #[inline]
    pub fn dict(&self) -> Option<&InstanceDict> {
        self.dict.as_ref()
    }

    /// Shared layout identity of a split dict
    #[inline]
    pub fn layout(&self) -> Option<LayoutId> {
        self.dict.as_ref().and_then(InstanceDict::layout)
    }

    /// Native field array
    #[inline]
    pub fn fields(&self) -> &[Option<Value>] {
        &self.fields
    }
}
