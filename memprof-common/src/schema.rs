//! The NDJSON snapshot document (spec §6). One `Snapshot` is emitted per
//! line by the Snapshot Builder (§4.F) and parsed back by viewers.

use crate::codec::format_address;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

fn serialize_address<S: Serializer>(ptr: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_address(*ptr))
}

fn deserialize_address<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(d)?;
    let trimmed = raw.strip_prefix("0x").unwrap_or(&raw);
    u64::from_str_radix(trimmed, 16).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralStats {
    pub uptime_ms: u64,
    pub heap_current: u64,
    pub heap_peak: u64,
    pub active_allocs: u64,
    pub alloc_rate: f64,
    pub free_rate: f64,
    pub total_allocs: u64,
    pub leak_bytes: u64,
    pub leak_rate: f64,
    pub largest_size: u64,
    pub largest_file: String,
    pub top_file: String,
    pub top_file_count: u64,
    pub top_file_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerFileEntry {
    pub file: String,
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
    pub allocs: u64,
    pub frees: u64,
    #[serde(rename = "netBytes")]
    pub net_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramBinEntry {
    pub lo: u64,
    pub hi: u64,
    pub bytes: u64,
    pub allocations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeakEntry {
    #[serde(serialize_with = "serialize_address", deserialize_with = "deserialize_address")]
    pub ptr: u64,
    pub size: u64,
    pub file: String,
    pub line: u32,
    #[serde(rename = "type")]
    pub ty: String,
    pub ts_ns: u64,
    pub is_leak: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub general: GeneralStats,
    pub per_file: Vec<PerFileEntry>,
    pub bins: Vec<HistogramBinEntry>,
    pub leaks: Vec<LeakEntry>,
    /// `[t_ms, heap_bytes]` pairs. Internal storage is nanoseconds;
    /// conversion to milliseconds happens only at emission (spec §9).
    pub timeline: Vec<(u64, u64)>,
}

impl Snapshot {
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_json() {
        let snap = Snapshot {
            general: GeneralStats {
                uptime_ms: 10,
                heap_current: 100,
                heap_peak: 200,
                active_allocs: 1,
                alloc_rate: 1.5,
                free_rate: 0.5,
                total_allocs: 5,
                leak_bytes: 0,
                leak_rate: 0.0,
                largest_size: 100,
                largest_file: "a.c".into(),
                top_file: "a.c".into(),
                top_file_count: 1,
                top_file_bytes: 100,
            },
            per_file: vec![PerFileEntry {
                file: "a.c".into(),
                total_bytes: 100,
                allocs: 1,
                frees: 0,
                net_bytes: 100,
            }],
            bins: vec![HistogramBinEntry { lo: 64, hi: 128, bytes: 100, allocations: 1 }],
            leaks: vec![LeakEntry {
                ptr: 0x10,
                size: 100,
                file: "a.c".into(),
                line: 1,
                ty: "int".into(),
                ts_ns: 0,
                is_leak: false,
            }],
            timeline: vec![(0, 100)],
        };
        let line = snap.to_line().unwrap();
        assert!(line.contains("\"ptr\":\"0x"));
        let parsed = Snapshot::from_line(&line).unwrap();
        assert_eq!(parsed, snap);
        // Re-emitting the parsed document must reproduce the same line.
        assert_eq!(parsed.to_line().unwrap(), line);
    }

    #[test]
    fn address_round_trips_as_uppercase_hex_string() {
        let entry = LeakEntry { ptr: 0xDEAD_BEEF, ..Default::default() };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"0xDEADBEEF\"") || json.to_uppercase().contains("DEADBEEF"));
        let back: LeakEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ptr, entry.ptr);
    }
}
