//! Periodic Snapshot Builder (spec §4.F): every period `P`, pulls an
//! aggregate view off the `Registry`, derives alloc/free rates from the
//! previous tick, and hands the encoded line to the `Sender`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use memprof_common::schema::{GeneralStats, HistogramBinEntry, LeakEntry, PerFileEntry, Snapshot};
use memprof_registry::Registry;

use crate::sender::Sender;

struct RateState {
    prev_tick: Instant,
    prev_total_allocs: u64,
    prev_total_frees: u64,
}

impl RateState {
    fn new(now: Instant) -> Self {
        Self { prev_tick: now, prev_total_allocs: 0, prev_total_frees: 0 }
    }

    /// Backward-difference rate over the interval since the last tick.
    /// Negative deltas (which cannot occur with monotonic counters, but
    /// would signal a counter reset) are clamped to zero.
    fn tick(&mut self, total_allocs: u64, total_frees: u64, now: Instant) -> (f64, f64) {
        let dt = now.duration_since(self.prev_tick).as_secs_f64();
        let (alloc_rate, free_rate) = if dt <= 0.0 {
            (0.0, 0.0)
        } else {
            let d_allocs = total_allocs.saturating_sub(self.prev_total_allocs) as f64;
            let d_frees = total_frees.saturating_sub(self.prev_total_frees) as f64;
            ((d_allocs / dt).max(0.0), (d_frees / dt).max(0.0))
        };
        self.prev_tick = now;
        self.prev_total_allocs = total_allocs;
        self.prev_total_frees = total_frees;
        (alloc_rate, free_rate)
    }
}

fn build_snapshot(registry: &Registry, start: Instant, rates: &mut RateState) -> Snapshot {
    let now = Instant::now();
    let metrics = registry.metrics();
    let total_frees = metrics.total_allocs.saturating_sub(metrics.active_allocs);
    let (alloc_rate, free_rate) = rates.tick(metrics.total_allocs, total_frees, now);
    let kpis = registry.leak_kpis();

    let general = GeneralStats {
        uptime_ms: start.elapsed().as_millis() as u64,
        heap_current: metrics.current_bytes,
        heap_peak: metrics.peak_bytes,
        active_allocs: metrics.active_allocs,
        alloc_rate,
        free_rate,
        total_allocs: metrics.total_allocs,
        leak_bytes: kpis.total_leak_bytes,
        leak_rate: kpis.leak_rate,
        largest_size: kpis.largest.as_ref().map_or(0, |b| b.size),
        largest_file: kpis.largest.as_ref().and_then(|b| b.file.clone()).unwrap_or_default(),
        top_file: kpis.top_file_by_leaks.as_ref().map_or_else(String::new, |f| f.file.clone()),
        top_file_count: kpis.top_file_by_leaks.as_ref().map_or(0, |f| f.count),
        top_file_bytes: kpis.top_file_by_leaks.as_ref().map_or(0, |f| f.bytes),
    };

    let per_file = registry
        .file_stats()
        .into_iter()
        .map(|(file, stats)| PerFileEntry {
            file,
            total_bytes: stats.alloc_bytes,
            allocs: stats.alloc_count,
            frees: stats.alloc_count.saturating_sub(stats.live_count),
            net_bytes: stats.live_bytes,
        })
        .collect();

    let bins = registry
        .histogram()
        .into_iter()
        .map(|b| HistogramBinEntry { lo: b.lo, hi: b.hi, bytes: b.bytes, allocations: b.allocations })
        .collect();

    let threshold_ns = registry.leak_threshold_ms() * 1_000_000;
    let now_ns = memprof_common::clock::now_ns();
    let leaks = registry
        .blocks()
        .into_iter()
        .map(|(ptr, info)| {
            let is_leak = now_ns > info.timestamp_ns && now_ns - info.timestamp_ns > threshold_ns;
            LeakEntry {
                ptr,
                size: info.size,
                file: info.file.clone().unwrap_or_default(),
                line: info.line,
                ty: info.ty.clone().unwrap_or_default(),
                ts_ns: info.timestamp_ns,
                is_leak,
            }
        })
        .collect();

    let timeline = registry
        .timeline()
        .into_iter()
        .map(|p| (p.t_ns / 1_000_000, p.current_bytes))
        .collect();

    Snapshot { general, per_file, bins, leaks, timeline }
}

/// Owns the background thread that drives [`build_snapshot`] on a fixed
/// period and hands each line to the `Sender`.
pub struct SnapshotBuilder {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotBuilder {
    pub fn start(registry: Arc<Registry>, sender: Arc<Sender>, period: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let handle = std::thread::Builder::new()
            .name("memprof-snapshot".into())
            .spawn(move || {
                let start = Instant::now();
                let mut rates = RateState::new(start);
                while running_thread.load(Ordering::Relaxed) {
                    std::thread::sleep(period);
                    if !running_thread.load(Ordering::Relaxed) {
                        break;
                    }
                    let snapshot = build_snapshot(&registry, start, &mut rates);
                    match snapshot.to_line() {
                        Ok(line) => sender.send_line(line.as_bytes()),
                        Err(err) => log::warn!("memprof snapshot: failed to encode: {err}"),
                    }
                }
            })
            .expect("spawning the snapshot builder thread");
        Self { running, handle: Some(handle) }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
