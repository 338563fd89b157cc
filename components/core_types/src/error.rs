//! Attribute resolution error types.
//!
//! Every domain error is produced by the generic resolution path or by
//! user-level descriptor code. The cache layer only ever forwards these.

use thiserror::Error;

use crate::{CacheId, TypeId};

/// An error raised while resolving or assigning an attribute.
///
/// # Examples
///
/// ```
/// use core_types::AttrError;
///
/// let err = AttrError::no_module_attribute("math", "tau2");
/// assert_eq!(err.to_string(), "module 'math' has no attribute 'tau2'");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttrError {
    /// The attribute does not exist on the receiver
    #[error("'{type_name}' object has no attribute '{attr}'")]
    NoAttribute {
        /// Name of the receiver's type
        type_name: String,
        /// Requested attribute name
        attr: String,
    },
    /// The attribute does not exist in a module namespace
    #[error("module '{module}' has no attribute '{attr}'")]
    NoModuleAttribute {
        /// Module name
        module: String,
        /// Requested attribute name
        attr: String,
    },
    /// Assignment to a read-only native field
    #[error("readonly attribute '{attr}'")]
    ReadOnly {
        /// Attribute name
        attr: String,
    },
    /// A value of the wrong kind was supplied
    #[error("TypeError: {0}")]
    TypeError(String),
    /// Raised by user-level descriptor code
    #[error("{0}")]
    Raised(String),
    /// The type has been destroyed
    #[error("type {0} has been destroyed")]
    DeadType(TypeId),
    /// A handle that does not name a live object
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    /// Bases cannot be linearized into a consistent MRO
    #[error("cannot create a consistent method resolution order for {0}")]
    MroConflict(String),
    /// The call site was never created or has been removed
    #[error("unknown cache site {0}")]
    UnknownSite(CacheId),
}

impl AttrError {
    /// Build a [`AttrError::NoAttribute`] error
    pub fn no_attribute(type_name: impl Into<String>, attr: impl Into<String>) -> Self {
        AttrError::NoAttribute {
            type_name: type_name.into(),
            attr: attr.into(),
        }
    }

    /// Build a [`AttrError::NoModuleAttribute`] error
    pub fn no_module_attribute(module: impl Into<String>, attr: impl Into<String>) -> Self {
        AttrError::NoModuleAttribute {
            module: module.into(),
            attr: attr.into(),
        }
    }

    /// True for the "attribute is missing" family of errors
    pub fn is_missing_attribute(&self) -> bool {
        matches!(
            self,
            AttrError::NoAttribute { .. } | AttrError::NoModuleAttribute { .. }
        )
    }
}

/// Result type for attribute operations
pub type AttrResult<T> = Result<T, AttrError>;
