//! Runtime values seen by attribute resolution.

use std::fmt;
use std::sync::Arc;

use core_types::{InstanceId, ModuleId, TypeId};

use crate::descriptor::{Descriptor, MemberDescriptor};

/// An identity-only callable.
///
/// Functions found on a type are method-like: loading them through an
/// instance binds the instance as the first argument.
#[derive(Debug)]
pub struct Function {
    /// Function name
    pub name: Arc<str>,
}

impl Function {
    /// Create a new function object
    pub fn new(name: impl Into<Arc<str>>) -> Arc<Self> {
        Arc::new(Function { name: name.into() })
    }
}

/// A function bound to its receiver.
#[derive(Debug)]
pub struct BoundMethod {
    /// The underlying function
    pub function: Arc<Function>,
    /// The bound receiver
    pub receiver: Value,
}

/// A value flowing through attribute loads and stores.
///
/// Reference-like variants compare by identity, scalars by value.
#[derive(Debug, Clone)]
pub enum Value {
    /// The none value
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// String
    Str(Arc<str>),
    /// Instance handle
    Object(InstanceId),
    /// Type object handle
    Type(TypeId),
    /// Module namespace handle
    Module(ModuleId),
    /// Plain function
    Function(Arc<Function>),
    /// Function bound to a receiver
    BoundMethod(Arc<BoundMethod>),
    /// User-level descriptor
    Descriptor(Arc<Descriptor>),
    /// Native field descriptor
    Member(Arc<MemberDescriptor>),
}

impl Value {
    /// Convenience constructor for string values
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Bind a function to a receiver
    pub fn bound(function: Arc<Function>, receiver: Value) -> Self {
        Value::BoundMethod(Arc::new(BoundMethod { function, receiver }))
    }

    /// True for descriptors that intercept assignment
    pub fn is_data_descriptor(&self) -> bool {
        match self {
            Value::Descriptor(d) => d.is_data(),
            Value::Member(_) => true,
            _ => false,
        }
    }

    /// Name of the builtin kind for values that are not instances
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Object(_) => "object",
            Value::Type(_) => "type",
            Value::Module(_) => "module",
            Value::Function(_) => "function",
            Value::BoundMethod(_) => "method",
            Value::Descriptor(_) => "getset_descriptor",
            Value::Member(_) => "member_descriptor",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => {
                Arc::ptr_eq(&a.function, &b.function) && a.receiver == b.receiver
            }
            (Value::Descriptor(a), Value::Descriptor(b)) => Arc::ptr_eq(a, b),
            (Value::Member(a), Value::Member(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "'{}'", s),
            Value::Object(id) => write!(f, "<{}>", id),
            Value::Type(id) => write!(f, "<{}>", id),
            Value::Module(id) => write!(f, "<{}>", id),
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::BoundMethod(m) => write!(f, "<bound method {}>", m.function.name),
            Value::Descriptor(d) => write!(f, "<descriptor '{}'>", d.name()),
            Value::Member(m) => write!(f, "<member '{}'>", m.name()),
        }
    }
}
