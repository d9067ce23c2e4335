//! The transient Event record and the data model owned by the Registry
//! (spec §3).

use serde::{Deserialize, Serialize};

/// Discriminates an allocation from a deallocation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Alloc,
    Free,
}

/// One recorded alloc or free, as produced by the interceptor (§4.D) or
/// parsed off the wire by the Consumer Aggregator (§4.H).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub ptr: u64,
    /// 0 is permitted on `Free`; never 0 on `Alloc` (rounded up to 1).
    pub size: u64,
    pub ty: Option<String>,
    pub file: Option<String>,
    pub line: u32,
    pub timestamp_ns: u64,
    pub is_array: bool,
    pub thread_id: u64,
}

impl Event {
    pub fn alloc(ptr: u64, size: u64, timestamp_ns: u64, thread_id: u64) -> Self {
        Self {
            kind: EventKind::Alloc,
            ptr,
            size: size.max(1),
            ty: None,
            file: None,
            line: 0,
            timestamp_ns,
            is_array: false,
            thread_id,
        }
    }

    pub fn free(ptr: u64, timestamp_ns: u64, thread_id: u64) -> Self {
        Self {
            kind: EventKind::Free,
            ptr,
            size: 0,
            ty: None,
            file: None,
            line: 0,
            timestamp_ns,
            is_array: false,
            thread_id,
        }
    }

    pub fn with_site(mut self, file: Option<String>, line: u32, ty: Option<String>) -> Self {
        self.file = file;
        self.line = line;
        self.ty = ty;
        self
    }

    pub fn with_is_array(mut self, is_array: bool) -> Self {
        self.is_array = is_array;
        self
    }
}

/// Entry owned by the Registry's live map. Created on Alloc, destroyed on
/// the matching Free (or at shutdown).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocInfo {
    pub size: u64,
    pub file: Option<String>,
    pub line: u32,
    pub ty: Option<String>,
    pub timestamp_ns: u64,
    pub is_array: bool,
    pub thread_id: u64,
    pub serial_id: u64,
}

/// Per-source-file aggregate stats (spec §3, invariants I2/I3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub alloc_count: u64,
    pub alloc_bytes: u64,
    pub live_count: u64,
    pub live_bytes: u64,
}

/// One point on the bounded timeline (spec §3, invariant I4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub t_ns: u64,
    pub current_bytes: u64,
    pub leak_bytes: u64,
}

/// One bin of the fixed size-histogram ladder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lo: u64,
    pub hi: u64,
    pub bytes: u64,
    pub allocations: u64,
}

/// Snapshot of the Registry's scalar counters (spec §4.E `metrics()`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetrics {
    pub current_bytes: u64,
    pub peak_bytes: u64,
    pub active_allocs: u64,
    pub total_allocs: u64,
    pub leak_bytes: u64,
}

/// The single largest live block, for the leak KPIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LargestBlock {
    pub file: Option<String>,
    pub ptr: u64,
    pub size: u64,
}

/// The file with the most leaked blocks, for the leak KPIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopFileByLeaks {
    pub file: String,
    pub count: u64,
    pub bytes: u64,
}

/// Derived leak-classification KPIs (spec §3 "Leak KPIs").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeakKpis {
    pub total_leak_bytes: u64,
    pub leak_rate: f64,
    pub largest: Option<LargestBlock>,
    pub top_file_by_leaks: Option<TopFileByLeaks>,
}

/// Default size-histogram ladder: powers of two from 1 up to 2^30, plus one
/// catch-all bin `[2^30, 2^62)` (spec §3).
pub fn default_histogram_ladder() -> Vec<(u64, u64)> {
    let mut bins = Vec::with_capacity(31);
    let mut lo: u64 = 1;
    while lo < (1u64 << 30) {
        let hi = lo << 1;
        bins.push((lo, hi));
        lo = hi;
    }
    bins.push((1u64 << 30, 1u64 << 62));
    bins
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_covers_one_through_the_catch_all() {
        let ladder = default_histogram_ladder();
        assert_eq!(ladder.first().copied(), Some((1, 2)));
        assert_eq!(ladder.last().copied(), Some((1 << 30, 1u64 << 62)));
        for pair in ladder.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "ladder bins must be contiguous");
        }
    }

    #[test]
    fn zero_byte_alloc_rounds_up_to_one() {
        let ev = Event::alloc(0x20, 0, 0, 0);
        assert_eq!(ev.size, 1);
    }
}
