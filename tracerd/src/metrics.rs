use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

const EVENT_TYPE_SLOTS: usize = 16;

/// Process-wide counters for the telemetry pipeline (SPEC_FULL.md §7/§9).
/// Updated from the hot drain path, so every field is atomic.
pub struct Metrics {
    pub events_delivered_total: AtomicU64,
    pub events_filtered_total: AtomicU64,
    pub dropped_events_total: AtomicU64,
    pub start_time: SystemTime,
    events_this_sec: AtomicU64,
    events_per_sec: AtomicU64,
    events_reaped_total: AtomicU64,
    events_abandoned_total: AtomicU64,
    ordering_violations_total: AtomicU64,
    arena_lookup_failures_total: AtomicU64,
    descriptor_bounds_violations_total: AtomicU64,
    unknown_event_type_total: AtomicU64,
    drops_by_type: [AtomicU64; EVENT_TYPE_SLOTS],
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_delivered_total: AtomicU64::new(0),
            events_filtered_total: AtomicU64::new(0),
            dropped_events_total: AtomicU64::new(0),
            start_time: SystemTime::now(),
            events_this_sec: AtomicU64::new(0),
            events_per_sec: AtomicU64::new(0),
            events_reaped_total: AtomicU64::new(0),
            events_abandoned_total: AtomicU64::new(0),
            ordering_violations_total: AtomicU64::new(0),
            arena_lookup_failures_total: AtomicU64::new(0),
            descriptor_bounds_violations_total: AtomicU64::new(0),
            unknown_event_type_total: AtomicU64::new(0),
            drops_by_type: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Record a header the reassembler received off the ring. Returns true
    /// if it should continue on to payload resolution and the callback,
    /// false if it should be sampled out under `cap` (SPEC_FULL.md §7
    /// "recoverable conditions, never fatal").
    pub fn record_event(&self, cap: u64, event_type: u32) -> bool {
        const SAMPLE_N: u64 = 10;
        let count = self.events_this_sec.fetch_add(1, Ordering::Relaxed) + 1;
        if cap > 0 && count > cap {
            if event_type > 2 {
                self.record_drop(event_type);
                return false;
            }
            if count % SAMPLE_N != 0 {
                self.record_drop(event_type);
                return false;
            }
        }
        self.events_delivered_total.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn inc_filtered(&self) {
        self.events_filtered_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reaped(&self) {
        self.events_reaped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_abandoned(&self) {
        self.events_abandoned_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ordering_violation(&self) {
        self.ordering_violations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_arena_lookup_failure(&self) {
        self.arena_lookup_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_descriptor_bounds_violation(&self) {
        self.descriptor_bounds_violations_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unknown_event_type(&self) {
        self.unknown_event_type_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Called roughly once a second to refresh the events-per-second gauge.
    pub fn rollup(&self) {
        let per_sec = self.events_this_sec.swap(0, Ordering::Relaxed);
        self.events_per_sec.store(per_sec, Ordering::Relaxed);
    }

    pub fn events_per_sec(&self) -> u64 {
        self.events_per_sec.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events_total.load(Ordering::Relaxed)
    }

    pub fn ordering_violations(&self) -> u64 {
        self.ordering_violations_total.load(Ordering::Relaxed)
    }

    pub fn drops_by_type(&self) -> Vec<(u32, u64)> {
        (0..self.drops_by_type.len())
            .map(|idx| (idx as u32, self.drops_by_type[idx].load(Ordering::Relaxed)))
            .collect()
    }

    fn record_drop(&self, event_type: u32) {
        let idx = Self::event_index(event_type);
        self.drops_by_type[idx].fetch_add(1, Ordering::Relaxed);
        self.dropped_events_total.fetch_add(1, Ordering::Relaxed);
    }

    fn event_index(event_type: u32) -> usize {
        let max = EVENT_TYPE_SLOTS as u32 - 1;
        std::cmp::min(event_type, max) as usize
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_events_trigger_sampling() {
        let m = Metrics::new();
        let cap = 5;
        let mut processed = 0;
        for _ in 0..100 {
            if m.record_event(cap, 3) {
                processed += 1;
            }
        }
        assert!(m.dropped_events() > 0);
        assert!(processed < 100);
    }

    #[test]
    fn low_priority_events_are_sampled_not_starved() {
        let m = Metrics::new();
        for _ in 0..30 {
            m.record_event(5, 1);
        }
        let kept = m
            .drops_by_type()
            .iter()
            .find(|(t, _)| *t == 1)
            .map(|(_, d)| *d)
            .unwrap_or(0);
        assert!(kept > 0);
    }

    #[test]
    fn rollup_resets_per_second_counter() {
        let m = Metrics::new();
        m.record_event(0, 0);
        m.record_event(0, 0);
        m.rollup();
        assert_eq!(m.events_per_sec(), 2);
        m.rollup();
        assert_eq!(m.events_per_sec(), 0);
    }
}
