//! Live-block registry and metrics aggregator (spec §4.E).

mod registry;

pub use registry::{Registry, UNKNOWN_FILE};
