//! The Registry/Aggregator (spec §4.E) — the authoritative live-block
//! state machine shared, unchanged, by the in-process runtime (§4.D/F/C)
//! and the viewer-side Consumer Aggregator (§4.H).

use memprof_common::{
    clock::now_ns, default_histogram_ladder, AllocInfo, Event, EventKind, FileStats,
    HistogramBin, LargestBlock, LeakKpis, RegistryMetrics, TimelinePoint, TopFileByLeaks,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Bucket used for allocations whose call site carried no file metadata.
/// Every allocation must land in exactly one per-file bucket so that
/// invariant I3 (`sum(per_file[f].live_bytes) == current_bytes`) holds
/// regardless of whether lexical capture or the TLS context channel was
/// used (spec §4.D).
pub const UNKNOWN_FILE: &str = "<unknown>";

type Sink = Arc<dyn Fn(&Event) + Send + Sync>;

struct Inner {
    live: HashMap<u64, AllocInfo>,
    per_file: HashMap<String, FileStats>,
    timeline: VecDeque<TimelinePoint>,
    timeline_capacity: usize,
}

/// The live-block registry and metrics aggregator.
///
/// `live`, `per_file`, and `timeline` are guarded by a single mutex so that
/// each `on_alloc`/`on_free` call is one short critical section (spec
/// §4.E, §5 "Suspension/blocking points"). The scalar counters are
/// separate atomics so read-only callers (`metrics()`) never contend with
/// the map mutation; per spec's counter-ordering rule, a reader observing
/// only the atomics may transiently see `current_bytes` inconsistent with
/// `Σ live.size` — consistency is only guaranteed for readers that also
/// take the registry lock.
pub struct Registry {
    inner: Mutex<Inner>,
    current_bytes: AtomicU64,
    peak_bytes: AtomicU64,
    active_allocs: AtomicU64,
    total_allocs: AtomicU64,
    serial_counter: AtomicU64,
    leak_threshold_ns: AtomicU64,
    sink: RwLock<Option<Sink>>,
    histogram_ladder: Vec<(u64, u64)>,
}

impl Registry {
    pub fn new(timeline_capacity: usize, leak_threshold_ms: u64) -> Self {
        Self::with_histogram_ladder(timeline_capacity, leak_threshold_ms, default_histogram_ladder())
    }

    /// Same as [`Registry::new`] but with a caller-supplied size-histogram
    /// ladder instead of the default power-of-two one (config override).
    pub fn with_histogram_ladder(
        timeline_capacity: usize,
        leak_threshold_ms: u64,
        histogram_ladder: Vec<(u64, u64)>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                live: HashMap::new(),
                per_file: HashMap::new(),
                timeline: VecDeque::with_capacity(timeline_capacity),
                timeline_capacity,
            }),
            current_bytes: AtomicU64::new(0),
            peak_bytes: AtomicU64::new(0),
            active_allocs: AtomicU64::new(0),
            total_allocs: AtomicU64::new(0),
            serial_counter: AtomicU64::new(0),
            leak_threshold_ns: AtomicU64::new(leak_threshold_ms.saturating_mul(1_000_000)),
            sink: RwLock::new(None),
            histogram_ladder,
        }
    }

    fn file_key(file: &Option<String>) -> String {
        file.clone().unwrap_or_else(|| UNKNOWN_FILE.to_string())
    }

    fn bump_peak(&self, observed_current: u64) {
        let mut old_peak = self.peak_bytes.load(Ordering::Relaxed);
        while observed_current > old_peak {
            match self.peak_bytes.compare_exchange_weak(
                old_peak,
                observed_current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => old_peak = actual,
            }
        }
    }

    fn leak_bytes_locked(live: &HashMap<u64, AllocInfo>, threshold_ns: u64, now: u64) -> u64 {
        live.values()
            .filter(|info| is_leak(now, threshold_ns, info.timestamp_ns))
            .map(|info| info.size)
            .sum()
    }

    fn push_timeline(inner: &mut Inner, point: TimelinePoint) {
        if inner.timeline.len() >= inner.timeline_capacity {
            inner.timeline.pop_front();
        }
        inner.timeline.push_back(point);
    }

    fn fire_sink(&self, ev: &Event) {
        if let Ok(guard) = self.sink.read() {
            if let Some(sink) = guard.as_ref() {
                sink(ev);
            }
        }
    }

    /// Install the single event sink, called synchronously after the
    /// registry lock is released for each `on_alloc`/`on_free`.
    pub fn set_sink<F>(&self, f: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.sink.write() {
            *guard = Some(Arc::new(f));
        }
    }

    pub fn clear_sink(&self) {
        if let Ok(mut guard) = self.sink.write() {
            *guard = None;
        }
    }

    pub fn set_leak_threshold(&self, ms: u64) {
        self.leak_threshold_ns.store(ms.saturating_mul(1_000_000), Ordering::Relaxed);
    }

    pub fn leak_threshold_ms(&self) -> u64 {
        self.leak_threshold_ns.load(Ordering::Relaxed) / 1_000_000
    }

    /// Record an allocation. Zero-byte requests are rounded up to 1 byte
    /// (spec §4.D); this matches the stored size used for Free pairing.
    pub fn on_alloc(&self, ev: Event) {
        debug_assert_eq!(ev.kind, EventKind::Alloc);
        let size = ev.size.max(1);
        let serial_id = self.serial_counter.fetch_add(1, Ordering::Relaxed) + 1;

        let now;
        let leak_bytes;
        {
            let mut inner = self.inner.lock().unwrap();

            // Counters are bumped before the live-map insert is committed
            // (spec §4.E "Counter ordering").
            self.total_allocs.fetch_add(1, Ordering::Relaxed);
            self.active_allocs.fetch_add(1, Ordering::Relaxed);
            let new_current = self.current_bytes.fetch_add(size, Ordering::Relaxed) + size;
            self.bump_peak(new_current);

            let info = AllocInfo {
                size,
                file: ev.file.clone(),
                line: ev.line,
                ty: ev.ty.clone(),
                timestamp_ns: ev.timestamp_ns,
                is_array: ev.is_array,
                thread_id: ev.thread_id,
                serial_id,
            };
            inner.live.insert(ev.ptr, info);

            let key = Self::file_key(&ev.file);
            let stats = inner.per_file.entry(key).or_default();
            stats.alloc_count += 1;
            stats.alloc_bytes += size;
            stats.live_count += 1;
            stats.live_bytes += size;

            now = now_ns();
            let threshold = self.leak_threshold_ns.load(Ordering::Relaxed);
            leak_bytes = Self::leak_bytes_locked(&inner.live, threshold, now);
            Self::push_timeline(&mut inner, TimelinePoint { t_ns: now, current_bytes: new_current, leak_bytes });
        }

        self.fire_sink(&ev);
    }

    /// Remove a block on Free. `hinted_size` is informational only — the
    /// stored (rounded) size is what's subtracted, to keep invariant I1
    /// exact even when the caller's size hint disagrees (SPEC_FULL §4).
    /// An orphan free (unknown address) is a no-op on every counter.
    pub fn on_free(&self, ptr: u64, hinted_size: Option<u64>) {
        let _ = hinted_size;
        let now;
        let leak_bytes;
        let removed_size;
        {
            let mut inner = self.inner.lock().unwrap();
            let removed = inner.live.remove(&ptr);

            removed_size = match &removed {
                Some(info) => {
                    let key = Self::file_key(&info.file);
                    if let Some(stats) = inner.per_file.get_mut(&key) {
                        stats.live_count = stats.live_count.saturating_sub(1);
                        stats.live_bytes = stats.live_bytes.saturating_sub(info.size);
                    }
                    // Counters are decremented strictly after the live-map
                    // removal is committed (spec §4.E "Counter ordering").
                    self.active_allocs.fetch_sub(1, Ordering::Relaxed);
                    self.current_bytes.fetch_sub(info.size, Ordering::Relaxed);
                    Some(info.size)
                }
                None => {
                    log::debug!("memprof registry: free of untracked address 0x{ptr:x}, ignoring");
                    None
                }
            };

            now = now_ns();
            let threshold = self.leak_threshold_ns.load(Ordering::Relaxed);
            leak_bytes = Self::leak_bytes_locked(&inner.live, threshold, now);
            let current = self.current_bytes.load(Ordering::Relaxed);
            Self::push_timeline(&mut inner, TimelinePoint { t_ns: now, current_bytes: current, leak_bytes });
        }

        let ev = Event::free(ptr, now, memprof_common::clock::thread_id());
        let ev = match removed_size {
            Some(size) => Event { size, ..ev },
            None => ev,
        };
        self.fire_sink(&ev);
    }

    pub fn metrics(&self) -> RegistryMetrics {
        let inner = self.inner.lock().unwrap();
        let threshold = self.leak_threshold_ns.load(Ordering::Relaxed);
        let leak_bytes = Self::leak_bytes_locked(&inner.live, threshold, now_ns());
        RegistryMetrics {
            current_bytes: self.current_bytes.load(Ordering::Relaxed),
            peak_bytes: self.peak_bytes.load(Ordering::Relaxed),
            active_allocs: self.active_allocs.load(Ordering::Relaxed),
            total_allocs: self.total_allocs.load(Ordering::Relaxed),
            leak_bytes,
        }
    }

    pub fn timeline(&self) -> Vec<TimelinePoint> {
        self.inner.lock().unwrap().timeline.iter().copied().collect()
    }

    pub fn blocks(&self) -> Vec<(u64, AllocInfo)> {
        self.inner
            .lock()
            .unwrap()
            .live
            .iter()
            .map(|(ptr, info)| (*ptr, info.clone()))
            .collect()
    }

    pub fn file_stats(&self) -> Vec<(String, FileStats)> {
        self.inner
            .lock()
            .unwrap()
            .per_file
            .iter()
            .map(|(file, stats)| (file.clone(), *stats))
            .collect()
    }

    pub fn histogram(&self) -> Vec<HistogramBin> {
        let inner = self.inner.lock().unwrap();
        let mut bins: Vec<HistogramBin> = self
            .histogram_ladder
            .iter()
            .map(|&(lo, hi)| HistogramBin { lo, hi, bytes: 0, allocations: 0 })
            .collect();
        for info in inner.live.values() {
            if let Some(bin) = bins.iter_mut().find(|b| info.size >= b.lo && info.size < b.hi) {
                bin.bytes += info.size;
                bin.allocations += 1;
            } else if let Some(last) = bins.last_mut() {
                // A size at or beyond the catch-all's upper bound still
                // belongs somewhere observable rather than being dropped.
                last.bytes += info.size;
                last.allocations += 1;
            }
        }
        bins
    }

    pub fn leak_kpis(&self) -> LeakKpis {
        let inner = self.inner.lock().unwrap();
        let now = now_ns();
        let threshold = self.leak_threshold_ns.load(Ordering::Relaxed);

        let mut total_leak_bytes = 0u64;
        let mut leak_count = 0u64;
        let mut largest: Option<(u64, &AllocInfo)> = None;
        let mut per_file_leaks: HashMap<String, (u64, u64)> = HashMap::new();

        for (ptr, info) in inner.live.iter() {
            if !is_leak(now, threshold, info.timestamp_ns) {
                continue;
            }
            total_leak_bytes += info.size;
            leak_count += 1;

            let key = Self::file_key(&info.file);
            let entry = per_file_leaks.entry(key).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += info.size;

            let is_better = match largest {
                None => true,
                Some((_, cur)) => {
                    info.size > cur.size || (info.size == cur.size && info.timestamp_ns < cur.timestamp_ns)
                }
            };
            if is_better {
                largest = Some((*ptr, info));
            }
        }

        let total_allocs = self.total_allocs.load(Ordering::Relaxed);
        let leak_rate = if total_allocs == 0 { 0.0 } else { leak_count as f64 / total_allocs as f64 };

        let largest_block = largest.map(|(ptr, info)| LargestBlock { file: info.file.clone(), ptr, size: info.size });

        let mut top_file: Option<TopFileByLeaks> = None;
        for (file, (count, bytes)) in per_file_leaks.into_iter() {
            let replace = match &top_file {
                None => true,
                Some(cur) => {
                    count > cur.count
                        || (count == cur.count && bytes > cur.bytes)
                        || (count == cur.count && bytes == cur.bytes && file < cur.file)
                }
            };
            if replace {
                top_file = Some(TopFileByLeaks { file, count, bytes });
            }
        }

        LeakKpis { total_leak_bytes, leak_rate, largest: largest_block, top_file_by_leaks: top_file }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(
            memprof_common::DEFAULT_TIMELINE_CAPACITY,
            memprof_common::DEFAULT_LEAK_THRESHOLD_MS,
        )
    }
}

fn is_leak(now_ns: u64, threshold_ns: u64, timestamp_ns: u64) -> bool {
    now_ns > timestamp_ns && now_ns - timestamp_ns > threshold_ns
}
