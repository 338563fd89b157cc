//! Class-level descriptors.
//!
//! A [`Descriptor`] is a user-level object with an optional getter hook and
//! an optional setter hook. It is a *data* descriptor when it has a setter:
//! data descriptors take precedence over instance attributes, non-data
//! descriptors are shadowed by them.
//!
//! A [`MemberDescriptor`] describes a fixed native field on instances. It is
//! always a data descriptor and never runs user code.

use std::fmt;
use std::sync::Arc;

use core_types::{AttrError, AttrResult, TypeId};

use crate::resolve::AttributeHost;
use crate::value::Value;

/// Getter hook: `(host, instance or None for class access, owner type)`
pub type Getter =
    Arc<dyn Fn(&mut dyn AttributeHost, Option<&Value>, TypeId) -> AttrResult<Value> + Send + Sync>;

/// Setter hook: `(host, instance, new value)`
pub type Setter = Arc<dyn Fn(&mut dyn AttributeHost, &Value, Value) -> AttrResult<()> + Send + Sync>;

/// A user-level descriptor.
pub struct Descriptor {
    name: Arc<str>,
    getter: Option<Getter>,
    setter: Option<Setter>,
}

impl Descriptor {
    /// Create a descriptor from optional hooks
    pub fn new(name: impl Into<Arc<str>>, getter: Option<Getter>, setter: Option<Setter>) -> Arc<Self> {
        Arc::new(Descriptor {
            name: name.into(),
            getter,
            setter,
        })
    }

    /// A data descriptor with both hooks (a property)
    pub fn property<G, S>(name: impl Into<Arc<str>>, get: G, set: S) -> Arc<Self>
    where
        G: Fn(&mut dyn AttributeHost, Option<&Value>, TypeId) -> AttrResult<Value> + Send + Sync + 'static,
        S: Fn(&mut dyn AttributeHost, &Value, Value) -> AttrResult<()> + Send + Sync + 'static,
    {
        Self::new(name, Some(Arc::new(get)), Some(Arc::new(set)))
    }

    /// A non-data descriptor exposing only a getter
    pub fn getter_only<G>(name: impl Into<Arc<str>>, get: G) -> Arc<Self>
    where
        G: Fn(&mut dyn AttributeHost, Option<&Value>, TypeId) -> AttrResult<Value> + Send + Sync + 'static,
    {
        Self::new(name, Some(Arc::new(get)), None)
    }

    /// Descriptor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the descriptor intercepts assignment
    #[inline]
    pub fn is_data(&self) -> bool {
        self.setter.is_some()
    }

    /// Invoke the getter, or `None` when there is no getter hook
    pub fn get(
        &self,
        host: &mut dyn AttributeHost,
        instance: Option<&Value>,
        owner: TypeId,
    ) -> Option<AttrResult<Value>> {
        self.getter.as_ref().map(|get| get(host, instance, owner))
    }

    /// Invoke the setter
    ///
    /// Only reachable for data descriptors; a missing setter reports the
    /// attribute as read-only.
    pub fn set(&self, host: &mut dyn AttributeHost, instance: &Value, value: Value) -> AttrResult<()> {
        match &self.setter {
            Some(set) => set(host, instance, value),
            None => Err(AttrError::ReadOnly {
                attr: self.name.to_string(),
            }),
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("getter", &self.getter.is_some())
            .field("setter", &self.setter.is_some())
            .finish()
    }
}

/// Primitive kind of a native field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Any value
    Object,
    /// Integers only
    Int,
    /// Floats; integers are widened
    Float,
    /// Booleans only
    Bool,
}

impl FieldKind {
    fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (FieldKind::Object, v) => Some(v),
            (FieldKind::Int, v @ Value::Int(_)) => Some(v),
            (FieldKind::Float, v @ Value::Float(_)) => Some(v),
            (FieldKind::Float, Value::Int(i)) => Some(Value::Float(i as f64)),
            (FieldKind::Bool, v @ Value::Bool(_)) => Some(v),
            _ => None,
        }
    }
}

/// A native field on instances: a fixed offset plus a primitive kind.
#[derive(Debug)]
pub struct MemberDescriptor {
    name: Arc<str>,
    offset: usize,
    kind: FieldKind,
    readonly: bool,
}

impl MemberDescriptor {
    /// Create a member descriptor
    pub fn new(name: impl Into<Arc<str>>, offset: usize, kind: FieldKind, readonly: bool) -> Arc<Self> {
        Arc::new(MemberDescriptor {
            name: name.into(),
            offset,
            kind,
            readonly,
        })
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset into the instance's field array
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Primitive kind
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// True for fields that reject assignment
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Read the field; `None` when unset
    #[inline]
    pub fn load(&self, fields: &[Option<Value>]) -> Option<Value> {
        fields.get(self.offset).cloned().flatten()
    }

    /// Write the field, honoring read-only and kind restrictions
    pub fn store(&self, fields: &mut Vec<Option<Value>>, value: Value) -> AttrResult<()> {
        if self.readonly {
            return Err(AttrError::ReadOnly {
                attr: self.name.to_string(),
            });
        }
        self.store_unchecked(fields, value)
    }

    /// Write the field ignoring the read-only flag (native initialization)
    pub fn store_unchecked(&self, fields: &mut Vec<Option<Value>>, value: Value) -> AttrResult<()> {
        let kind_name = value.kind_name();
        let value = self.kind.coerce(value).ok_or_else(|| {
            AttrError::TypeError(format!(
                "field '{}' expects {:?}, got {}",
                self.name, self.kind, kind_name
            ))
        })?;
        if fields.len() <= self.offset {
            fields.resize(self.offset + 1, None);
        }
        fields[self.offset] = Some(value);
        Ok(())
    }
}
