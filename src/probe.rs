//! Light RTT probe (C4): periodically issues minimum-cost samples that
//! augment detector input without polluting throughput statistics.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use crate::transport::{RangeTimeouts, Transport};

/// Counters surfaced in the batch report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeSnapshot {
    /// Number of probes actually issued (cadence misses don't count).
    pub count: u64,
    /// Cumulative wall-clock cost of all issued probes, in milliseconds.
    pub cost_ms: f64,
}

/// Issues a 1-byte Range GET every `every_n` calls (halved during a boost
/// window), swallowing every error — a probe must never impair the batch.
pub struct LightProbe<T: Transport> {
    transport: T,
    every_n: u32,
    fast_until: Option<Instant>,
    count: u64,
    cost_ms: f64,
    scratch_dir: PathBuf,
}

impl<T: Transport> LightProbe<T> {
    /// Creates a probe with the given cadence and a scratch directory for
    /// the throwaway 1-byte bodies it fetches.
    #[must_use]
    pub fn new(transport: T, every_n: u32, scratch_dir: impl Into<PathBuf>) -> Self {
        assert!(every_n >= 2, "everyN must be >= 2");
        Self {
            transport,
            every_n,
            fast_until: None,
            count: 0,
            cost_ms: 0.0,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Issues a probe if `index` falls on the effective cadence boundary.
    /// Returns whether a probe was actually issued.
    #[instrument(skip(self, sample_url), fields(index))]
    pub async fn maybe_probe(&mut self, index: u32, sample_url: &str) -> bool {
        let now = Instant::now();
        let effective_n = match self.fast_until {
            Some(until) if now < until => (self.every_n / 2).max(2),
            _ => self.every_n,
        };

        if effective_n == 0 || index % effective_n != 0 {
            return false;
        }

        let scratch = self.scratch_dir.join(format!("probe-{index}.tmp"));
        tokio::fs::remove_file(&scratch).await.ok();

        let start = Instant::now();
        let result = self
            .transport
            .get_range_append(
                sample_url,
                &scratch,
                0,
                RangeTimeouts {
                    connect_ms: 5_000,
                    read_ms: 5_000,
                },
            )
            .await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1_000.0;

        if let Err(e) = result {
            debug!(error = %e, "probe request failed, swallowing");
        }

        tokio::fs::remove_file(&scratch).await.ok();

        self.count += 1;
        self.cost_ms += elapsed_ms;
        true
    }

    /// Extends the boost window so the effective cadence is halved until
    /// `now + duration`.
    pub fn boost_short(&mut self, duration: Duration) {
        let candidate = Instant::now() + duration;
        self.fast_until = Some(match self.fast_until {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> ProbeSnapshot {
        ProbeSnapshot {
            count: self.count,
            cost_ms: self.cost_ms,
        }
    }
}
