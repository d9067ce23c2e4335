use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

/// Broker-level counters (spec §4.G). Independent from the per-registry
/// metrics exposed by `memprof-registry::Registry::metrics()` — these
/// track the connection/command layer, not allocation state.
pub struct Metrics {
    pub start_time: SystemTime,
    connections_total: AtomicU64,
    connections_active: AtomicUsize,
    subscribes_total: AtomicU64,
    unsubscribes_total: AtomicU64,
    publishes_total: AtomicU64,
    publishes_unrouted_total: AtomicU64,
    receives_total: AtomicU64,
    receives_empty_total: AtomicU64,
    protocol_errors_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: SystemTime::now(),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicUsize::new(0),
            subscribes_total: AtomicU64::new(0),
            unsubscribes_total: AtomicU64::new(0),
            publishes_total: AtomicU64::new(0),
            publishes_unrouted_total: AtomicU64::new(0),
            receives_total: AtomicU64::new(0),
            receives_empty_total: AtomicU64::new(0),
            protocol_errors_total: AtomicU64::new(0),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }

    pub fn inc_connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connections_active(&self) -> usize {
        self.connections_active.load(Ordering::Relaxed)
    }

    pub fn connections_total(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    pub fn inc_subscribe(&self) {
        self.subscribes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unsubscribe(&self) {
        self.unsubscribes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_publish(&self, had_subscribers: bool) {
        self.publishes_total.fetch_add(1, Ordering::Relaxed);
        if !had_subscribers {
            self.publishes_unrouted_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_receive(&self, queue_was_empty: bool) {
        self.receives_total.fetch_add(1, Ordering::Relaxed);
        if queue_was_empty {
            self.receives_empty_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_protocol_error(&self) {
        self.protocol_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_errors_total(&self) -> u64 {
        self.protocol_errors_total.load(Ordering::Relaxed)
    }

    pub fn publishes_total(&self) -> u64 {
        self.publishes_total.load(Ordering::Relaxed)
    }

    pub fn publishes_unrouted_total(&self) -> u64 {
        self.publishes_unrouted_total.load(Ordering::Relaxed)
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
    fn connection_lifecycle_tracks_active_count() {
        let m = Metrics::new();
        m.inc_connection_opened();
        m.inc_connection_opened();
        assert_eq!(m.connections_active(), 2);
        assert_eq!(m.connections_total(), 2);
        m.inc_connection_closed();
        assert_eq!(m.connections_active(), 1);
    }

    #[test]
    fn publish_without_subscribers_is_counted_as_unrouted() {
        let m = Metrics::new();
        m.inc_publish(true);
        m.inc_publish(false);
        assert_eq!(m.publishes_total(), 2);
        assert_eq!(m.publishes_unrouted_total(), 1);
    }
}
