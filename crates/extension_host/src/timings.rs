//! Handler timing probes.
//!
//! When timings are enabled, every registered handler is wrapped in a named
//! [`TimingProbe`] that records call counts and durations. All probes share a
//! parent probe so the total cost of extension handlers can be read in one place.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the probe every handler probe reports into.
pub const PARENT_PROBE: &str = "** Extensions";

/// Snapshot of one probe.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeStats {
    pub name: String,
    pub count: u64,
    pub total_time_ns: u64,
    pub max_time_ns: u64,
    pub average_time_ns: u64,
}

/// A named timer accumulating over many calls.
#[derive(Debug)]
pub struct TimingProbe {
    name: String,
    parent: Option<Arc<TimingProbe>>,
    count: AtomicU64,
    total_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl TimingProbe {
    fn new(name: String, parent: Option<Arc<TimingProbe>>) -> Self {
        Self {
            name,
            parent,
            count: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            max_ns: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts timing; the elapsed time is recorded when the guard drops.
    pub fn start(self: &Arc<Self>) -> TimingGuard {
        TimingGuard {
            probe: Arc::clone(self),
            started: Instant::now(),
        }
    }

    #[inline]
    pub fn record(&self, elapsed: Duration) {
        let ns = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.record(elapsed);
        }
    }

    pub fn stats(&self) -> ProbeStats {
        let count = self.count.load(Ordering::Relaxed);
        let total_time_ns = self.total_ns.load(Ordering::Relaxed);
        ProbeStats {
            name: self.name.clone(),
            count,
            total_time_ns,
            max_time_ns: self.max_ns.load(Ordering::Relaxed),
            average_time_ns: if count > 0 { total_time_ns / count } else { 0 },
        }
    }
}

/// Records into its probe on drop.
pub struct TimingGuard {
    probe: Arc<TimingProbe>,
    started: Instant,
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        self.probe.record(self.started.elapsed());
    }
}

/// Owner of all probes created for handler registrations.
#[derive(Debug)]
pub struct Timings {
    parent: Arc<TimingProbe>,
    probes: RwLock<Vec<Arc<TimingProbe>>>,
}

impl Timings {
    pub fn new() -> Self {
        Self {
            parent: Arc::new(TimingProbe::new(PARENT_PROBE.to_string(), None)),
            probes: RwLock::new(Vec::new()),
        }
    }

    /// Creates a probe reporting into the shared parent.
    pub fn probe(&self, name: impl Into<String>) -> Arc<TimingProbe> {
        let probe = Arc::new(TimingProbe::new(name.into(), Some(Arc::clone(&self.parent))));
        self.probes.write().push(Arc::clone(&probe));
        probe
    }

    pub fn parent(&self) -> ProbeStats {
        self.parent.stats()
    }

    pub fn stats(&self) -> Vec<ProbeStats> {
        self.probes.read().iter().map(|probe| probe.stats()).collect()
    }

    /// Drops probes whose names start with `prefix`, used when an extension disables.
    pub fn remove_with_prefix(&self, prefix: &str) {
        self.probes.write().retain(|probe| !probe.name.starts_with(prefix));
    }

    /// Human-readable summary, slowest handlers first.
    pub fn report(&self) -> String {
        let parent = self.parent();
        let mut probes = self.stats();
        probes.sort_by(|a, b| b.total_time_ns.cmp(&a.total_time_ns));

        let lines = probes
            .iter()
            .take(10)
            .map(|stats| {
                format!(
                    "  {}: {} calls, {}μs avg, {}μs max",
                    stats.name,
                    stats.count,
                    stats.average_time_ns / 1000,
                    stats.max_time_ns / 1000
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Extension Timings Report\n\
            ========================\n\
            {}: {} calls, {}μs total\n\
            \n\
            Top handlers by total time:\n\
            {}",
            parent.name,
            parent.count,
            parent.total_time_ns / 1000,
            lines
        )
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::new()
    }
}
