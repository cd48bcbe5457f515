//! Fetch progress reporting.
//!
//! While a run is `Fetching`, a ticker task samples the transfer counters and
//! emits a progress event whenever the byte count moved.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::state::{RequestId, RunState};
use super::Inner;
use crate::fetch::TransferCounters;

pub(super) const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Progress of the current fetch attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchProgress {
    pub bytes_done: u64,
    /// Announced archive size, if the server sent one.
    pub total_bytes: Option<u64>,
    /// Seconds since the run started fetching.
    pub elapsed_secs: f64,
}

impl FetchProgress {
    /// Fraction complete in [0.0, 1.0]; unknown without a total.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_done as f64 / total as f64).min(1.0)),
            None => None,
        }
    }

    /// Average rate in bytes per second (0 if no time has elapsed).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / self.elapsed_secs
    }
}

/// Spawn the sampling loop for run `id`. Abort the handle when fetching ends.
pub(super) fn spawn_ticker(
    inner: Arc<Inner>,
    id: RequestId,
    counters: TransferCounters,
) -> tokio::task::JoinHandle<()> {
    let started = Instant::now();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last: Option<(u32, u64)> = None;
        loop {
            interval.tick().await;
            let attempt = counters.attempt();
            let bytes_done = counters.bytes_done();
            if attempt == 0 || last == Some((attempt, bytes_done)) {
                continue;
            }
            last = Some((attempt, bytes_done));
            let progress = FetchProgress {
                bytes_done,
                total_bytes: counters.total_bytes(),
                elapsed_secs: started.elapsed().as_secs_f64(),
            };
            inner.report_progress(id, RunState::Fetching, attempt, progress);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_and_rate() {
        let p = FetchProgress {
            bytes_done: 250,
            total_bytes: Some(1000),
            elapsed_secs: 2.0,
        };
        assert_eq!(p.fraction(), Some(0.25));
        assert_eq!(p.bytes_per_sec(), 125.0);

        let unknown = FetchProgress {
            bytes_done: 10,
            total_bytes: None,
            elapsed_secs: 0.0,
        };
        assert_eq!(unknown.fraction(), None);
        assert_eq!(unknown.bytes_per_sec(), 0.0);
    }
}
