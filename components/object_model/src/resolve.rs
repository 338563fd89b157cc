//! Generic ("slow path") attribute resolution.
//!
//! This is the reference algorithm every cached lookup must agree with.
//!
//! Instance loads:
//! 1. a data descriptor found along the type's MRO wins;
//! 2. otherwise a key in the instance dict;
//! 3. otherwise a non-data descriptor, function (bound to the instance) or
//!    plain class variable from the MRO;
//! 4. otherwise the attribute is missing.
//!
//! Type loads consult the metaclass first for data descriptors, then the
//! type's own MRO, then the remaining metaclass attributes. Module loads
//! read the namespace directly.

use core_types::{AttrError, AttrResult, CacheId, InstanceId, ModuleId, TypeId};

use crate::space::ObjectSpace;
use crate::value::Value;

/// Access to the object space for descriptors and the slow path.
///
/// Descriptor hooks receive the host rather than the space so that a
/// runtime can let user-level code re-enter its call-site caches.
pub trait AttributeHost {
    /// Shared view of the object space
    fn space(&self) -> &ObjectSpace;

    /// Mutable view of the object space
    fn space_mut(&mut self) -> &mut ObjectSpace;

    /// Run a load through a call-site cache, if the host has any
    fn load_via_site(&mut self, _site: CacheId, _receiver: &Value) -> Option<AttrResult<Value>> {
        None
    }
}

impl AttributeHost for ObjectSpace {
    fn space(&self) -> &ObjectSpace {
        self
    }

    fn space_mut(&mut self) -> &mut ObjectSpace {
        self
    }
}

/// The "self" half of a method resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundSelf {
    /// The callable is already bound (or needs no receiver)
    NoSelf,
    /// Pass this receiver as the first argument
    Receiver(Value),
}

/// Load `receiver.name`
pub fn generic_getattr(host: &mut dyn AttributeHost, receiver: &Value, name: &str) -> AttrResult<Value> {
    match receiver {
        Value::Object(id) => instance_getattr(host, receiver, *id, name),
        Value::Type(ty) => type_getattr(host, receiver, *ty, name),
        Value::Module(id) => module_getattr(host.space(), *id, name),
        other => Err(AttrError::no_attribute(other.kind_name(), name)),
    }
}

/// Store `receiver.name = value`
pub fn generic_setattr(
    host: &mut dyn AttributeHost,
    receiver: &Value,
    name: &str,
    value: Value,
) -> AttrResult<()> {
    match receiver {
        Value::Object(id) => {
            let ty = host.space().instance_type(*id)?;
            host.space().live_type(ty)?;
            match host.space().lookup_in_mro(ty, name) {
                Some(Value::Descriptor(d)) if d.is_data() => d.set(host, receiver, value),
                Some(Value::Member(member)) => host.space_mut().store_field(*id, &member, value),
                _ => host.space_mut().dict_set(*id, name, value),
            }
        }
        Value::Type(ty) => host.space_mut().set_type_attr(*ty, name, value),
        Value::Module(id) => host.space_mut().module_set(*id, name, value),
        other => Err(AttrError::no_attribute(other.kind_name(), name)),
    }
}

/// Resolve `receiver.name` for an immediate call.
///
/// Method-like functions are returned unbound together with the receiver
/// to pass as the first argument; everything else is returned ready to
/// call with [`BoundSelf::NoSelf`].
pub fn generic_get_method(
    host: &mut dyn AttributeHost,
    receiver: &Value,
    name: &str,
) -> AttrResult<(Value, BoundSelf)> {
    match receiver {
        Value::Object(id) => {
            let ty = host.space().instance_type(*id)?;
            host.space().live_type(ty)?;
            if let Some(Value::Function(func)) = host.space().lookup_in_mro(ty, name) {
                return Ok(match host.space().dict_get(*id, name) {
                    Some(shadow) => (shadow, BoundSelf::NoSelf),
                    None => (Value::Function(func), BoundSelf::Receiver(receiver.clone())),
                });
            }
        }
        Value::Type(ty) => {
            let space = host.space();
            let meta = space.live_type(*ty)?.metaclass();
            let meta_attr = space.lookup_in_mro(meta, name);
            let meta_is_data = meta_attr.as_ref().is_some_and(Value::is_data_descriptor);
            if !meta_is_data {
                match space.lookup_in_mro(*ty, name) {
                    Some(Value::Function(func)) => {
                        return Ok((Value::Function(func), BoundSelf::NoSelf));
                    }
                    None => {
                        if let Some(Value::Function(func)) = meta_attr {
                            return Ok((Value::Function(func), BoundSelf::Receiver(receiver.clone())));
                        }
                    }
                    Some(_) => {}
                }
            }
        }
        _ => {}
    }
    Ok((generic_getattr(host, receiver, name)?, BoundSelf::NoSelf))
}

fn instance_getattr(
    host: &mut dyn AttributeHost,
    receiver: &Value,
    id: InstanceId,
    name: &str,
) -> AttrResult<Value> {
    let ty = host.space().instance_type(id)?;
    host.space().live_type(ty)?;
    let class_attr = host.space().lookup_in_mro(ty, name);

    match &class_attr {
        Some(Value::Descriptor(d)) if d.is_data() => {
            if let Some(result) = d.get(host, Some(receiver), ty) {
                return result;
            }
        }
        Some(Value::Member(member)) => {
            return host
                .space()
                .load_field(id, member)
                .ok_or_else(|| AttrError::no_attribute(host.space().type_name(ty).to_string(), name));
        }
        _ => {}
    }

    if let Some(value) = host.space().dict_get(id, name) {
        return Ok(value);
    }

    match class_attr {
        Some(Value::Descriptor(d)) => match d.get(host, Some(receiver), ty) {
            Some(result) => result,
            None => Ok(Value::Descriptor(d)),
        },
        Some(Value::Function(func)) => Ok(Value::bound(func, receiver.clone())),
        Some(value) => Ok(value),
        None => Err(AttrError::no_attribute(host.space().type_name(ty).to_string(), name)),
    }
}

fn type_getattr(host: &mut dyn AttributeHost, receiver: &Value, ty: TypeId, name: &str) -> AttrResult<Value> {
    let meta = host.space().live_type(ty)?.metaclass();
    let meta_attr = host.space().lookup_in_mro(meta, name);

    if let Some(Value::Descriptor(d)) = &meta_attr {
        if d.is_data() {
            if let Some(result) = d.get(host, Some(receiver), meta) {
                return result;
            }
        }
    }

    if let Some(attr) = host.space().lookup_in_mro(ty, name) {
        return match attr {
            Value::Descriptor(d) => match d.get(host, None, ty) {
                Some(result) => result,
                None => Ok(Value::Descriptor(d)),
            },
            other => Ok(other),
        };
    }

    match meta_attr {
        Some(Value::Descriptor(d)) => match d.get(host, Some(receiver), meta) {
            Some(result) => result,
            None => Ok(Value::Descriptor(d)),
        },
        Some(Value::Function(func)) => Ok(Value::bound(func, receiver.clone())),
        Some(value) => Ok(value),
        None => Err(AttrError::no_attribute(
            format!("type object '{}'", host.space().type_name(ty)),
            name,
        )),
    }
}

fn module_getattr(space: &ObjectSpace, id: ModuleId, name: &str) -> AttrResult<Value> {
    let module = space.module(id)?;
    module
        .get(name)
        .cloned()
        .ok_or_else(|| AttrError::no_module_attribute(module.name(), name))
}
