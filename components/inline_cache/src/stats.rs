//! Cache event reporting.
//!
//! Each site may carry a [`MissReporter`]; the runtime reports every hit,
//! miss, fill and invalidation through it. [`CacheStats`] is the stock
//! reporter and simply counts events.

use std::sync::atomic::{AtomicU64, Ordering};

use core_types::CacheId;
use serde::{Deserialize, Serialize};

/// Which operation family a site serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteKind {
    /// Instance attribute load/store
    Attr,
    /// Instance method lookup
    Method,
    /// Attribute load on a type object
    TypeAttr,
    /// Method lookup on a type object
    TypeMethod,
    /// Module global load
    ModuleAttr,
    /// Module function lookup
    ModuleMethod,
}

/// Why a lookup missed or a fill was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissReason {
    /// No entry for the receiver's type or namespace
    NoEntry,
    /// The entry's version token no longer matches
    StaleVersion,
    /// The instance dict does not follow the cached shared layout
    LayoutMismatch,
    /// The strategy applies but the value is not present
    ValueAbsent,
    /// The receiver kind does not match the site kind
    UnsupportedReceiver,
    /// No version token could be assigned
    Uncacheable,
    /// All entries are in use by other types
    CapacityExhausted,
    /// The module namespace changed since the entry was filled
    GenerationMismatch,
    /// The resolution cannot be expressed as a cache entry
    NotCacheable,
}

impl MissReason {
    /// Number of distinct reasons
    pub const COUNT: usize = 9;

    /// Every reason, in declaration order
    pub const ALL: [MissReason; Self::COUNT] = [
        MissReason::NoEntry,
        MissReason::StaleVersion,
        MissReason::LayoutMismatch,
        MissReason::ValueAbsent,
        MissReason::UnsupportedReceiver,
        MissReason::Uncacheable,
        MissReason::CapacityExhausted,
        MissReason::GenerationMismatch,
        MissReason::NotCacheable,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Something that happened at a site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// Served from an entry
    Hit,
    /// Fell back to the slow path
    Miss(MissReason),
    /// A new entry was committed
    Fill,
    /// The slow path result could not be cached
    FillRejected(MissReason),
    /// Entries were dropped by a type change
    Invalidated,
}

/// Receives cache events from the sites it was injected into.
pub trait MissReporter: Send + Sync {
    /// Record one event
    fn report(&self, site: CacheId, kind: SiteKind, event: CacheEvent);
}

/// Lock-free event counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: [AtomicU64; MissReason::COUNT],
    fills: AtomicU64,
    rejected: [AtomicU64; MissReason::COUNT],
    invalidations: AtomicU64,
}

impl CacheStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            hits: load(&self.hits),
            misses: self.misses.iter().map(load).collect(),
            fills: load(&self.fills),
            rejected: self.rejected.iter().map(load).collect(),
            invalidations: load(&self.invalidations),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.fills.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        for c in self.misses.iter().chain(self.rejected.iter()) {
            c.store(0, Ordering::Relaxed);
        }
    }
}

impl MissReporter for CacheStats {
    fn report(&self, _site: CacheId, _kind: SiteKind, event: CacheEvent) {
        let counter = match event {
            CacheEvent::Hit => &self.hits,
            CacheEvent::Miss(reason) => &self.misses[reason.index()],
            CacheEvent::Fill => &self.fills,
            CacheEvent::FillRejected(reason) => &self.rejected[reason.index()],
            CacheEvent::Invalidated => &self.invalidations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Lookups served from an entry
    pub hits: u64,
    /// Misses per [`MissReason`], in [`MissReason::ALL`] order
    pub misses: Vec<u64>,
    /// Entries committed
    pub fills: u64,
    /// Refused fills per [`MissReason`]
    pub rejected: Vec<u64>,
    /// Invalidation events
    pub invalidations: u64,
}

impl StatsSnapshot {
    /// Total misses across all reasons
    pub fn total_misses(&self) -> u64 {
        self.misses.iter().sum()
    }

    /// Misses for one reason
    pub fn misses_for(&self, reason: MissReason) -> u64 {
        self.misses.get(reason.index()).copied().unwrap_or(0)
    }

    /// Refused fills for one reason
    pub fn rejected_for(&self, reason: MissReason) -> u64 {
        self.rejected.get(reason.index()).copied().unwrap_or(0)
    }

    /// Serialize for dumping
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
