//! Batch-level and pool-level configuration.

use crate::detector::DetectorConfig;
use crate::error::BatchError;

/// Default pool parallelism limit before any weak verdict is observed.
pub const CONC_BEFORE: usize = 3;
/// Pool parallelism limit while `AUTO_SWITCH` is draining toward a migration.
pub const CONC_WEAK: usize = 2;
/// Pool parallelism limit once the batch has switched links.
pub const CONC_AFTER: usize = 8;

/// How the orchestrator reacts to a weak-link verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Stay on the default link regardless of detector verdicts.
    #[default]
    WifiOnly,
    /// Drive the staged migration protocol when the detector trips weak.
    AutoSwitch,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WIFI_ONLY" => Ok(Self::WifiOnly),
            "AUTO_SWITCH" => Ok(Self::AutoSwitch),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Configuration for one `run_batch` call.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Base URL, trailing slash stripped.
    pub base_url: String,
    /// Number of objects to fetch, `img_001.jpg .. img_{count:03}.jpg`.
    pub count: u32,
    /// Migration behavior for this batch.
    pub mode: Mode,
    /// Directory transfers are written into.
    pub out_dir: std::path::PathBuf,
    /// Detector tuning; defaults match the spec's constants.
    pub detector: DetectorConfig,
    /// Probe cadence; see [`crate::probe::LightProbe`].
    pub probe_every_n: u32,
}

impl BatchConfig {
    /// Validates and normalizes a raw batch request.
    ///
    /// Strips a trailing slash from `base_url`. Fails fast (spec §7.6) on a
    /// non-positive `count` or an empty `base_url` — these are the only
    /// faults that surface as a returned `Err` from `run_batch`.
    pub fn new(
        base_url: impl Into<String>,
        count: i64,
        mode: Mode,
        out_dir: impl Into<std::path::PathBuf>,
    ) -> Result<Self, BatchError> {
        let base_url = base_url.into();
        let trimmed = base_url.trim().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(BatchError::EmptyBaseUrl);
        }
        if count <= 0 {
            return Err(BatchError::InvalidCount(count));
        }
        Ok(Self {
            base_url: trimmed,
            count: count as u32,
            mode,
            out_dir: out_dir.into(),
            detector: DetectorConfig::default(),
            probe_every_n: 10,
        })
    }

    /// Overrides the probe cadence. Spec §4.4 requires `everyN >= 2`;
    /// rejecting a smaller value here keeps a bad CLI flag from reaching
    /// [`crate::probe::LightProbe::new`], whose own `everyN >= 2` invariant
    /// is a debug assertion, not a recoverable error.
    pub fn with_probe_every_n(mut self, every_n: u32) -> Result<Self, BatchError> {
        if every_n < 2 {
            return Err(BatchError::InvalidProbeEveryN(every_n));
        }
        self.probe_every_n = every_n;
        Ok(self)
    }
}
