//! The orchestrator's JSON-serializable output (spec §6). Field names are
//! part of the wire contract consumed by external CSV tooling — do not
//! rename without checking downstream consumers.

use serde::{Deserialize, Serialize};

use crate::config::Mode;

impl Serialize for Mode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Mode::WifiOnly => "WIFI_ONLY",
            Mode::AutoSwitch => "AUTO_SWITCH",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One entry in `perFile`, indexed by the URL's original enqueue order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerFileRecord {
    /// The URL this record describes.
    pub url: String,
    /// Elapsed seconds, or `-1` on failure.
    pub t: f64,
    /// Bytes written, `0` on failure.
    pub bytes: u64,
    /// Which link was active when this transfer completed.
    pub path: LinkPath,
    /// Whether a Range request was used.
    pub used_range: bool,
    /// Whether a non-empty prefix already existed on disk at entry.
    pub retried: bool,
}

/// Which link a transfer completed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPath {
    /// The default (Wi-Fi) link.
    Wifi,
    /// The migrated-to (cellular) link.
    Cell,
}

/// Pool parallelism limits used across the batch's three phases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    /// Limit before any weak verdict (`CONC_BEFORE`).
    pub before: usize,
    /// Limit while draining toward migration (`CONC_WEAK`).
    pub weak: usize,
    /// Limit after a successful migration (`CONC_AFTER`).
    pub after: usize,
}

/// Probe overhead counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeCounters {
    /// Number of probes issued.
    pub count: u64,
    /// Cumulative probe cost in milliseconds.
    pub cost_ms: f64,
}

/// The full batch result, serialized with the exact field casing spec §6
/// requires: `weak_detect_index` and `switch_trigger_ts` stay snake_case
/// while the rest of the record is camelCase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Batch start timestamp, epoch milliseconds.
    pub ts: u64,
    /// The (normalized) base URL the batch was run against.
    pub base_url: String,
    /// Number of URLs in the batch.
    pub count: u32,
    /// Migration mode the batch ran under.
    pub mode: Mode,
    /// Real elapsed seconds from batch start to batch end.
    pub wall_time: f64,
    /// Accumulated pause time during migration, in milliseconds.
    pub paused_ms: f64,
    /// `wallTime` minus accumulated pause — the figure of merit.
    pub total_time: f64,
    /// Sum of bytes written across all `perFile` entries.
    pub total_bytes: u64,
    /// Per-URL results, indexed by original enqueue order.
    pub per_file: Vec<PerFileRecord>,
    /// Index of the URL whose task first observed a weak verdict and began
    /// migration, or `-1` if migration never triggered.
    #[serde(rename = "weak_detect_index")]
    pub weak_detect_index: i64,
    /// Epoch-ms timestamp of the `Draining -> Switched` transition, or `0`
    /// if the batch never switched.
    #[serde(rename = "switch_trigger_ts")]
    pub switch_trigger_ts: u64,
    /// Pool parallelism limits used across the batch.
    pub scheduler: SchedulerSnapshot,
    /// Probe overhead counters.
    pub probes: ProbeCounters,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn field_names_match_the_wire_contract() {
        let report = BatchReport {
            ts: 1_700_000_000_000,
            base_url: "https://example.com/images".into(),
            count: 2,
            mode: Mode::AutoSwitch,
            wall_time: 12.5,
            paused_ms: 1500.0,
            total_time: 11.0,
            total_bytes: 2048,
            per_file: vec![PerFileRecord {
                url: "https://example.com/images/img_001.jpg".into(),
                t: 1.2,
                bytes: 1024,
                path: LinkPath::Wifi,
                used_range: true,
                retried: false,
            }],
            weak_detect_index: -1,
            switch_trigger_ts: 0,
            scheduler: SchedulerSnapshot {
                before: 3,
                weak: 2,
                after: 8,
            },
            probes: ProbeCounters {
                count: 1,
                cost_ms: 42.0,
            },
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["baseUrl"], "https://example.com/images");
        assert_eq!(json["wallTime"], 12.5);
        assert_eq!(json["pausedMs"], 1500.0);
        assert_eq!(json["totalTime"], 11.0);
        assert_eq!(json["totalBytes"], 2048);
        assert_eq!(json["weak_detect_index"], -1);
        assert_eq!(json["switch_trigger_ts"], 0);
        assert_eq!(json["perFile"][0]["used_range"], true);
        assert_eq!(json["probes"]["costMs"], 42.0);
        assert_eq!(json["mode"], "AUTO_SWITCH");
        assert_eq!(json["perFile"][0]["path"], "wifi");
    }

    #[test]
    fn round_trips_through_json() {
        let report = BatchReport {
            ts: 1,
            base_url: "https://x".into(),
            count: 1,
            mode: Mode::WifiOnly,
            wall_time: 1.0,
            paused_ms: 0.0,
            total_time: 1.0,
            total_bytes: 0,
            per_file: vec![],
            weak_detect_index: -1,
            switch_trigger_ts: 0,
            scheduler: SchedulerSnapshot {
                before: 3,
                weak: 2,
                after: 8,
            },
            probes: ProbeCounters {
                count: 0,
                cost_ms: 0.0,
            },
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: BatchReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, back);
    }
}
