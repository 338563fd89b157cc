//! Attribute storage strategies.
//!
//! A strategy records *where* an attribute lives for instances of one type
//! at one version: a split dict slot, a combined dict, a data descriptor, a
//! native field, or a class-level value that an instance dict may shadow.
//! Executing a strategy never resolves names through the MRO; it either
//! produces the same result the slow path would, or reports a miss.

use std::sync::Arc;

use core_types::{AttrResult, InstanceId, LayoutId, TypeId};
use object_model::{AttributeHost, Descriptor, MemberDescriptor, ObjectSpace, StorageLayout, Value};

use crate::stats::MissReason;

/// Outcome of consulting a cache or executing a strategy
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// The fast path produced a result
    Hit(T),
    /// Fall back to the slow path
    Miss(MissReason),
}

impl<T> Probe<T> {
    /// True for [`Probe::Hit`]
    pub fn is_hit(&self) -> bool {
        matches!(self, Probe::Hit(_))
    }

    /// The hit value, if any
    pub fn hit(self) -> Option<T> {
        match self {
            Probe::Hit(value) => Some(value),
            Probe::Miss(_) => None,
        }
    }

    /// The miss reason, if any
    pub fn miss_reason(&self) -> Option<MissReason> {
        match self {
            Probe::Hit(_) => None,
            Probe::Miss(reason) => Some(*reason),
        }
    }
}

/// Proof that instance dicts of a split layout lack a name.
///
/// Captured when the name is absent from the shared layout. Layouts only
/// grow, so while the layout still has the captured length the name cannot
/// be in any dict that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowGuard {
    layout: LayoutId,
    generation: usize,
}

impl ShadowGuard {
    /// Capture a guard for `name` on instances of `ty`, if one can be proven
    pub fn capture(space: &ObjectSpace, ty: TypeId, name: &str) -> Option<Self> {
        let layout_id = space.type_object(ty)?.storage().shared_layout()?;
        let layout = space.layout(layout_id)?;
        if layout.index_of(name).is_some() {
            return None;
        }
        Some(Self {
            layout: layout_id,
            generation: layout.len(),
        })
    }

    /// Layout the guard was captured against
    pub fn layout(&self) -> LayoutId {
        self.layout
    }

    /// Key count of the layout at capture time
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// True when the instance's dict provably lacks the guarded name
    pub fn proves_absent(&self, space: &ObjectSpace, obj: InstanceId) -> bool {
        let Ok(inst) = space.instance(obj) else {
            return false;
        };
        match inst.dict() {
            None => true,
            Some(dict) => {
                dict.layout() == Some(self.layout)
                    && space
                        .layout(self.layout)
                        .is_some_and(|l| l.len() == self.generation)
            }
        }
    }
}

/// Instance dict value for `name`, skipping the probe when `guard` proves
/// there is none
pub(crate) fn instance_shadow(
    space: &ObjectSpace,
    obj: InstanceId,
    name: &str,
    guard: Option<&ShadowGuard>,
) -> Option<Value> {
    if guard.is_some_and(|g| g.proves_absent(space, obj)) {
        return None;
    }
    space.dict_get(obj, name)
}

/// Where an instance attribute lives
#[derive(Debug, Clone)]
pub enum AttrStrategy {
    /// A slot of the type's shared key layout; the slot index is resolved
    /// lazily once some instance has added the key
    Split {
        /// Shared layout identity
        layout: LayoutId,
        /// Slot index, once known
        slot: Option<usize>,
    },
    /// A per-instance hash map
    Combined,
    /// A data descriptor found on the MRO
    DataDescriptor(Arc<Descriptor>),
    /// A native field at a fixed offset
    Member(Arc<MemberDescriptor>),
    /// A non-data descriptor, function or plain class variable that an
    /// instance dict entry may shadow
    DescriptorOrClassVar {
        /// The class-level value
        value: Value,
        /// Proof of no shadowing, when available
        shadow_guard: Option<ShadowGuard>,
    },
}

impl AttrStrategy {
    /// Derive the strategy for `name` on instances of `ty` from the
    /// current state of the type
    pub fn resolve(space: &ObjectSpace, ty: TypeId, name: &str) -> AttrStrategy {
        match space.find_in_mro(ty, name) {
            Some(Value::Descriptor(d)) if d.is_data() => AttrStrategy::DataDescriptor(d.clone()),
            Some(Value::Member(member)) => AttrStrategy::Member(member.clone()),
            Some(value) => AttrStrategy::DescriptorOrClassVar {
                value: value.clone(),
                shadow_guard: ShadowGuard::capture(space, ty, name),
            },
            None => match space.type_object(ty).map(|t| t.storage()) {
                Some(StorageLayout::Split(layout)) => AttrStrategy::Split {
                    layout,
                    slot: space.layout(layout).and_then(|l| l.index_of(name)),
                },
                _ => AttrStrategy::Combined,
            },
        }
    }

    /// Short name for logging
    pub fn kind_name(&self) -> &'static str {
        match self {
            AttrStrategy::Split { .. } => "split",
            AttrStrategy::Combined => "combined",
            AttrStrategy::DataDescriptor(_) => "data-descriptor",
            AttrStrategy::Member(_) => "member",
            AttrStrategy::DescriptorOrClassVar { .. } => "descriptor-or-class-var",
        }
    }

    /// Fill in a lazily resolved split slot; true if the slot is now known
    pub(crate) fn resolve_slot(&mut self, space: &ObjectSpace, name: &str) -> bool {
        match self {
            AttrStrategy::Split { layout, slot } => {
                if slot.is_none() {
                    *slot = space.layout(*layout).and_then(|l| l.index_of(name));
                }
                slot.is_some()
            }
            _ => true,
        }
    }

    /// Execute a load
    pub fn load(
        &self,
        host: &mut dyn AttributeHost,
        receiver: &Value,
        obj: InstanceId,
        ty: TypeId,
        name: &str,
    ) -> AttrResult<Probe<Value>> {
        match self {
            AttrStrategy::Split { layout, slot } => {
                let Some(slot) = slot else {
                    return Ok(Probe::Miss(MissReason::ValueAbsent));
                };
                let space = host.space();
                // No dict yet means nothing was ever stored, not a diverged layout
                let Some(dict) = space.instance(obj)?.dict() else {
                    return Ok(Probe::Miss(MissReason::ValueAbsent));
                };
                if dict.layout() != Some(*layout) {
                    return Ok(Probe::Miss(MissReason::LayoutMismatch));
                }
                Ok(match space.split_slot(obj, *layout, *slot) {
                    Some(value) => Probe::Hit(value),
                    None => Probe::Miss(MissReason::ValueAbsent),
                })
            }
            AttrStrategy::Combined => Ok(match host.space().dict_get(obj, name) {
                Some(value) => Probe::Hit(value),
                None => Probe::Miss(MissReason::ValueAbsent),
            }),
            AttrStrategy::DataDescriptor(d) => match d.get(host, Some(receiver), ty) {
                Some(result) => result.map(Probe::Hit),
                None => Ok(Probe::Miss(MissReason::NotCacheable)),
            },
            AttrStrategy::Member(member) => Ok(match host.space().load_field(obj, member) {
                Some(value) => Probe::Hit(value),
                None => Probe::Miss(MissReason::ValueAbsent),
            }),
            AttrStrategy::DescriptorOrClassVar { value, shadow_guard } => {
                if let Some(shadow) = instance_shadow(host.space(), obj, name, shadow_guard.as_ref()) {
                    return Ok(Probe::Hit(shadow));
                }
                match value {
                    Value::Descriptor(d) => Ok(Probe::Hit(match d.get(host, Some(receiver), ty) {
                        Some(result) => result?,
                        None => Value::Descriptor(d.clone()),
                    })),
                    Value::Function(func) => Ok(Probe::Hit(Value::bound(func.clone(), receiver.clone()))),
                    other => Ok(Probe::Hit(other.clone())),
                }
            }
        }
    }

    /// Execute a store
    pub fn store(
        &self,
        host: &mut dyn AttributeHost,
        receiver: &Value,
        obj: InstanceId,
        name: &str,
        value: &Value,
    ) -> AttrResult<Probe<()>> {
        match self {
            AttrStrategy::Split { layout, slot } => {
                let Some(slot) = slot else {
                    return Ok(Probe::Miss(MissReason::ValueAbsent));
                };
                let space = host.space_mut();
                space.materialize_dict(obj)?;
                Ok(if space.store_split_slot(obj, *layout, *slot, value.clone()) {
                    Probe::Hit(())
                } else {
                    Probe::Miss(MissReason::LayoutMismatch)
                })
            }
            AttrStrategy::Combined | AttrStrategy::DescriptorOrClassVar { .. } => {
                host.space_mut().dict_set(obj, name, value.clone())?;
                Ok(Probe::Hit(()))
            }
            AttrStrategy::DataDescriptor(d) => {
                d.set(host, receiver, value.clone())?;
                Ok(Probe::Hit(()))
            }
            AttrStrategy::Member(member) => {
                host.space_mut().store_field(obj, member, value.clone())?;
                Ok(Probe::Hit(()))
            }
        }
    }
}
