//! Shared data model, wire codec, and clock/identity primitives used by
//! every other crate in this workspace (spec §3, §4.A, §4.B, §6).

pub mod clock;
pub mod codec;
pub mod error;
pub mod event;
pub mod schema;

pub use error::ProfilerError;
pub use event::{
    default_histogram_ladder, AllocInfo, Event, EventKind, FileStats, HistogramBin, LargestBlock,
    LeakKpis, RegistryMetrics, TimelinePoint, TopFileByLeaks,
};

/// Default broker port (spec §6).
pub const DEFAULT_BROKER_PORT: u16 = 5000;
/// Default direct viewer-stream port (spec §6), bound to loopback.
pub const DEFAULT_VIEWER_PORT: u16 = 7070;
/// Default leak-classification threshold, in milliseconds (spec §3).
pub const DEFAULT_LEAK_THRESHOLD_MS: u64 = 3_000;
/// Default bounded-timeline capacity (spec §3).
pub const DEFAULT_TIMELINE_CAPACITY: usize = 4096;
/// Default Snapshot Builder tick period, in milliseconds (spec §4.F).
pub const DEFAULT_SNAPSHOT_PERIOD_MS: u64 = 250;

/// The five well-known profiler topic names (spec §6).
pub const TOPIC_MEMORY_UPDATE: &str = "MEMORY_UPDATE";
pub const TOPIC_ALLOCATION: &str = "ALLOCATION";
pub const TOPIC_DEALLOCATION: &str = "DEALLOCATION";
pub const TOPIC_LEAK_DETECTED: &str = "LEAK_DETECTED";
pub const TOPIC_FILE_STATS: &str = "FILE_STATS";

/// All well-known profiler topics, used by the broker's "topic shortcut"
/// rule (spec §4.G).
pub const PROFILER_TOPICS: [&str; 5] = [
    TOPIC_MEMORY_UPDATE,
    TOPIC_ALLOCATION,
    TOPIC_DEALLOCATION,
    TOPIC_LEAK_DETECTED,
    TOPIC_FILE_STATS,
];
