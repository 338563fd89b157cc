//! Stable arena handles.
//!
//! Types, instances, modules, shared key layouts and cache sites all live in
//! arenas and are referred to by index, never by pointer. Handles are plain
//! `Copy` values so they can be stored in caches and registries without
//! lifetime coupling to the objects they name.

use std::fmt;

macro_rules! arena_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Wrap a raw arena index
            #[inline]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            /// The raw index value
            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// The index as a `usize` for arena access
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

arena_handle!(
    /// Handle of a type object in the object space
    TypeId,
    "type"
);
arena_handle!(
    /// Handle of an instance in the object space
    InstanceId,
    "instance"
);
arena_handle!(
    /// Handle of a module-like namespace
    ModuleId,
    "module"
);
arena_handle!(
    /// Identity of a shared (split) key layout
    LayoutId,
    "layout"
);
arena_handle!(
    /// Handle of a call-site cache
    CacheId,
    "site"
);

/// A type's mutation-version token.
///
/// Zero is the invalid token: the type has never been tagged, or its
/// namespace changed since it was last tagged. Valid tokens are handed out
/// from a monotonically increasing counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionTag(u32);

impl VersionTag {
    /// The invalid token
    pub const INVALID: VersionTag = VersionTag(0);

    /// Wrap a raw token value
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw token value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// True unless this is [`VersionTag::INVALID`]
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}
