//! Core handle types and error handling shared by the attribute cache engine.
//!
//! This crate provides the foundational types every other component speaks:
//! arena handles for types, instances, modules, shared key layouts and cache
//! sites, the version-token representation, and the attribute error taxonomy.
//!
//! # Overview
//!
//! - [`TypeId`], [`InstanceId`], [`ModuleId`], [`LayoutId`], [`CacheId`] - Stable arena handles
//! - [`VersionTag`] - Opaque type-mutation token (zero means invalid)
//! - [`AttrError`] - Attribute resolution failures
//! - [`AttrResult`] - Result alias used across the workspace
//!
//! # Examples
//!
//! ```
//! use core_types::{AttrError, TypeId, VersionTag};
//!
//! let tag = VersionTag::INVALID;
//! assert!(!tag.is_valid());
//!
//! let err = AttrError::no_attribute("Point", "z");
//! assert_eq!(err.to_string(), "'Point' object has no attribute 'z'");
//! assert_eq!(TypeId::from_raw(3).index(), 3);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod ids;

pub use error::{AttrError, AttrResult};
pub use ids::{CacheId, InstanceId, LayoutId, ModuleId, TypeId, VersionTag};
