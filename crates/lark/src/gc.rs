//! Garbage-collection accounting: byte/object counters, the collection
//! threshold, and the heap-limit ceiling.
//!
//! The collector itself is two-tier. Reference counts (maintained by the
//! arena in `heap.rs`) reclaim acyclic garbage immediately; the mark-sweep
//! pass in [`crate::heap::Heap::collect_garbage`] reclaims cycles. This
//! module owns the *policy*: when a pass should run, how many bytes the heap
//! may hold, and the statistics exposed to the host.
//!
//! The ceiling follows the original engine's Node-like behavior: 2 GiB by
//! default, 4 GiB on hosts with at least 16 GiB of memory. An allocation
//! that would cross the ceiling first forces a collection; if the ceiling is
//! still exceeded the allocation fails with a fatal, script-uncatchable
//! heap-out-of-memory error.

use std::time::Duration;

/// Bytes allocated between automatic cycle-collection passes.
pub const DEFAULT_GC_THRESHOLD: usize = 1024 * 1024;

/// Baseline heap ceiling: 2 GiB.
pub const DEFAULT_HEAP_LIMIT: usize = 2 * 1024 * 1024 * 1024;

/// Extended heap ceiling for large hosts: 4 GiB.
pub const EXTENDED_HEAP_LIMIT: usize = 4 * 1024 * 1024 * 1024;

/// System-memory threshold above which the extended ceiling applies.
pub const EXTENDED_LIMIT_THRESHOLD: u64 = 16 * 1024 * 1024 * 1024;

/// Fixed per-object bookkeeping cost added to every allocation estimate.
pub const ALLOC_BASE_COST: usize = 32;

/// Garbage-collection statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct GcStats {
    /// Total bytes ever allocated.
    pub total_allocated: usize,
    /// Total bytes ever freed.
    pub total_freed: usize,
    /// Bytes currently in use.
    pub currently_allocated: usize,
    /// Peak bytes ever in use.
    pub peak_allocated: usize,
    /// Heap objects currently live.
    pub object_count: usize,
    /// Peak live object count.
    pub peak_object_count: usize,
    /// Mark-sweep passes run.
    pub collections: usize,
    /// Objects reclaimed by mark-sweep that reference counting could not
    /// free (members of, or held by, unreachable cycles).
    pub cycles_detected: usize,
    /// Allocations that hit the heap-limit ceiling.
    pub heap_limit_hits: usize,
    /// Cumulative mark-sweep pause time.
    #[serde(skip)]
    pub total_pause: Duration,
    /// Pause time of the most recent pass.
    #[serde(skip)]
    pub last_pause: Duration,
}

/// An allocation that would cross the heap-limit ceiling.
///
/// Surfaced by the arena; the interpreter responds by forcing a collection
/// and retrying once before giving up with a fatal error.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeapLimitBreach {
    pub current: usize,
    pub limit: usize,
    pub requested: usize,
}

/// Allocation policy and counters for one heap.
#[derive(Debug)]
pub(crate) struct GcController {
    stats: GcStats,
    threshold: usize,
    bytes_since_collect: usize,
    heap_limit: usize,
    auto_collect: bool,
    /// Set while a pass runs so auto-collection cannot re-enter.
    collecting: bool,
}

impl GcController {
    pub fn new() -> Self {
        Self {
            stats: GcStats::default(),
            threshold: DEFAULT_GC_THRESHOLD,
            bytes_since_collect: 0,
            heap_limit: default_heap_limit(),
            auto_collect: true,
            collecting: false,
        }
    }

    /// Checks the ceiling and records an allocation of `bytes`.
    pub fn on_allocate(&mut self, bytes: usize) -> Result<(), HeapLimitBreach> {
        if self.stats.currently_allocated.saturating_add(bytes) > self.heap_limit {
            self.stats.heap_limit_hits += 1;
            return Err(HeapLimitBreach {
                current: self.stats.currently_allocated,
                limit: self.heap_limit,
                requested: bytes,
            });
        }
        self.stats.total_allocated += bytes;
        self.stats.currently_allocated += bytes;
        self.stats.peak_allocated = self.stats.peak_allocated.max(self.stats.currently_allocated);
        self.stats.object_count += 1;
        self.stats.peak_object_count = self.stats.peak_object_count.max(self.stats.object_count);
        self.bytes_since_collect += bytes;
        Ok(())
    }

    /// Records a freed object of `bytes`.
    pub fn on_free(&mut self, bytes: usize) {
        self.stats.total_freed += bytes;
        self.stats.currently_allocated = self.stats.currently_allocated.saturating_sub(bytes);
        self.stats.object_count = self.stats.object_count.saturating_sub(1);
    }

    /// Whether an automatic pass is due: the allocation threshold was
    /// crossed, or usage is approaching the ceiling.
    pub fn should_collect(&self) -> bool {
        if !self.auto_collect || self.collecting {
            return false;
        }
        self.bytes_since_collect >= self.threshold
            || self.stats.currently_allocated >= self.heap_limit - self.heap_limit / 8
    }

    /// Marks a pass as started, disabling re-entry. Returns false if a pass
    /// is already running.
    pub fn begin_collect(&mut self) -> bool {
        if self.collecting {
            return false;
        }
        self.collecting = true;
        true
    }

    /// Records the results of a finished pass.
    pub fn end_collect(&mut self, cycles: usize, pause: Duration) {
        self.collecting = false;
        self.bytes_since_collect = 0;
        self.stats.collections += 1;
        self.stats.cycles_detected += cycles;
        self.stats.total_pause += pause;
        self.stats.last_pause = pause;
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        let live = self.stats.currently_allocated;
        let objects = self.stats.object_count;
        self.stats = GcStats {
            currently_allocated: live,
            peak_allocated: live,
            object_count: objects,
            peak_object_count: objects,
            ..GcStats::default()
        };
    }

    pub fn set_threshold(&mut self, bytes: usize) {
        self.threshold = bytes.max(1);
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn set_heap_limit(&mut self, bytes: usize) {
        self.heap_limit = bytes;
    }

    pub fn heap_limit(&self) -> usize {
        self.heap_limit
    }

    pub fn set_auto_collect(&mut self, enabled: bool) {
        self.auto_collect = enabled;
    }

    pub fn auto_collect(&self) -> bool {
        self.auto_collect
    }
}

/// Selects the default ceiling from host system memory.
#[must_use]
pub fn default_heap_limit() -> usize {
    if system_memory() >= EXTENDED_LIMIT_THRESHOLD {
        EXTENDED_HEAP_LIMIT
    } else {
        DEFAULT_HEAP_LIMIT
    }
}

/// Total system memory in bytes, or 0 when it cannot be determined.
#[must_use]
pub fn system_memory() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            for line in meminfo.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    let kib: u64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    return kib * 1024;
                }
            }
        }
        0
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_accounting_tracks_peak() {
        let mut gc = GcController::new();
        gc.on_allocate(100).unwrap();
        gc.on_allocate(50).unwrap();
        gc.on_free(100);
        let stats = gc.stats();
        assert_eq!(stats.currently_allocated, 50);
        assert_eq!(stats.peak_allocated, 150);
        assert_eq!(stats.object_count, 1);
        assert_eq!(stats.total_freed, 100);
    }

    #[test]
    fn ceiling_breach_is_reported_not_recorded() {
        let mut gc = GcController::new();
        gc.set_heap_limit(64);
        let err = gc.on_allocate(100).unwrap_err();
        assert_eq!(err.limit, 64);
        assert_eq!(err.requested, 100);
        assert_eq!(gc.stats().heap_limit_hits, 1);
        assert_eq!(gc.stats().currently_allocated, 0);
    }

    #[test]
    fn threshold_gates_auto_collection() {
        let mut gc = GcController::new();
        gc.set_threshold(64);
        assert!(!gc.should_collect());
        gc.on_allocate(80).unwrap();
        assert!(gc.should_collect());
        assert!(gc.begin_collect());
        // Re-entry is refused while a pass runs.
        assert!(!gc.begin_collect());
        gc.end_collect(0, Duration::ZERO);
        assert!(!gc.should_collect());
    }
}
