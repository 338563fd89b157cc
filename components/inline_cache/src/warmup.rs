//! Parallel cache prefill.
//!
//! A compiler may know, before running a code object, which receiver types
//! its sites will see. Prefill detaches those sites from the runtime, fills
//! them on a pool of scoped worker threads sharing the object space
//! read-only, and reinstalls them. Version tokens are assigned with atomic
//! compare-and-swap and the watcher registry is internally locked, so
//! workers need no other coordination.

use core_types::CacheId;
use crossbeam::deque::{Injector, Steal};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::attr_cache::FillOutcome;
use crate::runtime::Runtime;
use crate::site::{FillTarget, SiteCache};

/// One fill request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupJob {
    /// Site to fill
    pub site: CacheId,
    /// What to record a resolution for
    pub target: FillTarget,
}

/// Tally of a prefill run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupReport {
    /// New entries committed
    pub filled: usize,
    /// Requests already satisfied by an entry
    pub already_cached: usize,
    /// Requests that could not be cached
    pub rejected: usize,
    /// Requests naming a site that does not exist
    pub unknown_sites: usize,
}

impl WarmupReport {
    fn record(&mut self, outcome: FillOutcome) {
        match outcome {
            FillOutcome::Filled => self.filled += 1,
            FillOutcome::AlreadyCached => self.already_cached += 1,
            FillOutcome::Rejected(_) => self.rejected += 1,
        }
    }
}

/// Fill many sites in parallel.
///
/// Jobs for the same site run on one worker, in the order given. Pending
/// type changes are propagated first.
pub fn prefill_parallel(runtime: &mut Runtime, jobs: &[WarmupJob]) -> WarmupReport {
    runtime.flush_type_changes();
    let mut report = WarmupReport::default();

    let mut grouped: FxHashMap<CacheId, Vec<FillTarget>> = FxHashMap::default();
    let mut order = Vec::new();
    for job in jobs {
        grouped
            .entry(job.site)
            .or_insert_with(|| {
                order.push(job.site);
                Vec::new()
            })
            .push(job.target);
    }

    let injector: Injector<(SiteCache, Vec<FillTarget>)> = Injector::new();
    for site in order {
        let targets = grouped.remove(&site).unwrap_or_default();
        match runtime.take_site(site) {
            Some(cache) => injector.push((cache, targets)),
            None => report.unknown_sites += targets.len(),
        }
    }

    let workers = runtime.config().workers();
    let (sender, receiver) = crossbeam::channel::unbounded::<(SiteCache, Vec<FillOutcome>)>();
    let (space, watchers) = runtime.fill_context();
    let scoped = crossbeam::thread::scope(|scope| {
        for _ in 0..workers {
            let sender = sender.clone();
            let injector = &injector;
            scope.spawn(move |_| loop {
                match injector.steal() {
                    Steal::Success((mut cache, targets)) => {
                        let outcomes = targets
                            .into_iter()
                            .map(|target| cache.fill(space, watchers, target))
                            .collect();
                        if sender.send((cache, outcomes)).is_err() {
                            return;
                        }
                    }
                    Steal::Empty => return,
                    Steal::Retry => continue,
                }
            });
        }
    });
    drop(sender);
    if scoped.is_err() {
        warn!("prefill worker panicked; its sites were dropped");
    }

    for (cache, outcomes) in receiver.iter() {
        for outcome in outcomes {
            cache.report_fill(outcome);
            report.record(outcome);
        }
        runtime.restore_site(cache);
    }
    debug!(?report, workers, "prefill finished");
    report
}
