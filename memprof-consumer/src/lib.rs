//! Viewer-side mirror of the Registry (spec §4.H): consumes raw alloc/free
//! JSON lines (as opposed to the Snapshot Builder's full documents) and
//! drives the same `Registry` state machine used in-process.

use memprof_common::clock::{now_ns, thread_id};
use memprof_common::{Event, ProfilerError};
use memprof_registry::Registry;
use serde_json::Value;

/// Wraps a `Registry` and feeds it from a raw event stream instead of the
/// in-process interceptor. Identical in contract to §4.E once an event has
/// been parsed.
pub struct ConsumerAggregator {
    registry: Registry,
}

impl ConsumerAggregator {
    pub fn new(timeline_capacity: usize, leak_threshold_ms: u64) -> Self {
        Self { registry: Registry::new(timeline_capacity, leak_threshold_ms) }
    }

    /// Same as [`ConsumerAggregator::new`] but with a caller-supplied
    /// size-histogram ladder instead of the default power-of-two one
    /// (config override, spec §3).
    pub fn with_histogram_ladder(
        timeline_capacity: usize,
        leak_threshold_ms: u64,
        histogram_ladder: Vec<(u64, u64)>,
    ) -> Self {
        Self { registry: Registry::with_histogram_ladder(timeline_capacity, leak_threshold_ms, histogram_ladder) }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Parse one JSON line and drive `on_alloc`/`on_free`. Malformed lines
    /// are dropped silently (spec §4.H.2): logged at `debug` only, never
    /// propagated as an error.
    pub fn process_event(&self, line: &str) {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(err) => {
                let err = ProfilerError::ProtocolMalformed(err.to_string());
                tracing::debug!(%err, line, "dropping malformed event line");
                return;
            }
        };

        let Some(kind) = value.get("kind").and_then(Value::as_str) else {
            let err = ProfilerError::ProtocolMalformed("missing \"kind\" field".into());
            tracing::debug!(%err, line, "dropping event line");
            return;
        };

        match kind {
            "ALLOC" => self.handle_alloc(&value, line),
            "FREE" => self.handle_free(&value, line),
            other => {
                let err = ProfilerError::ProtocolMalformed(format!("unknown event kind {other:?}"));
                tracing::debug!(%err, "dropping event");
            }
        }
    }

    fn handle_alloc(&self, value: &Value, raw_line: &str) {
        let Some(ptr) = value.get("ptr").and_then(parse_ptr) else {
            let err = ProfilerError::ProtocolMalformed("ALLOC missing a parseable ptr".into());
            tracing::debug!(%err, line = raw_line);
            return;
        };
        let size = value.get("size").and_then(Value::as_u64).unwrap_or(0);
        let ts_ns = value.get("ts_ns").and_then(Value::as_u64).unwrap_or_else(now_ns);
        let file = value.get("file").and_then(Value::as_str).map(str::to_owned);
        let line = value.get("line").and_then(Value::as_u64).unwrap_or(0) as u32;
        let ty = value.get("type").and_then(Value::as_str).map(str::to_owned);
        let is_array = value.get("is_array").and_then(Value::as_bool).unwrap_or(false);

        let ev = Event::alloc(ptr, size, ts_ns, thread_id()).with_site(file, line, ty).with_is_array(is_array);
        self.registry.on_alloc(ev);
    }

    fn handle_free(&self, value: &Value, raw_line: &str) {
        let Some(ptr) = value.get("ptr").and_then(parse_ptr) else {
            let err = ProfilerError::ProtocolMalformed("FREE missing a parseable ptr".into());
            tracing::debug!(%err, line = raw_line);
            return;
        };
        let size = value.get("size").and_then(Value::as_u64);
        self.registry.on_free(ptr, size);
    }
}

/// `ptr` may arrive as a JSON number, a decimal string, or a `"0x..."` hex
/// string (spec §4.H.1: "hex or decimal string or number").
fn parse_ptr(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let s = value.as_str()?;
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok();
    }
    s.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_round_trip_through_hex_ptr() {
        let agg = ConsumerAggregator::new(16, 3_000);
        agg.process_event(r#"{"kind":"ALLOC","ptr":"0x10","size":64,"ts_ns":1,"file":"a.c","line":5,"type":"int","is_array":false}"#);
        let m = agg.registry().metrics();
        assert_eq!(m.current_bytes, 64);
        assert_eq!(m.active_allocs, 1);

        agg.process_event(r#"{"kind":"FREE","ptr":"0x10"}"#);
        assert_eq!(agg.registry().metrics().current_bytes, 0);
    }

    #[test]
    fn decimal_and_numeric_ptrs_are_accepted() {
        let agg = ConsumerAggregator::new(16, 3_000);
        agg.process_event(r#"{"kind":"ALLOC","ptr":"16","size":8,"ts_ns":1}"#);
        agg.process_event(r#"{"kind":"ALLOC","ptr":32,"size":8,"ts_ns":1}"#);
        assert_eq!(agg.registry().metrics().active_allocs, 2);
    }

    #[test]
    fn malformed_lines_are_dropped_without_panicking() {
        let agg = ConsumerAggregator::new(16, 3_000);
        agg.process_event("not json");
        agg.process_event(r#"{"kind":"ALLOC"}"#); // no ptr
        agg.process_event(r#"{"kind":"WAT"}"#);
        assert_eq!(agg.registry().metrics().total_allocs, 0);
    }
}
