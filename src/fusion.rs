//! Sensor-fusion aggregation for dead-reckoning-capable receivers.
//!
//! The F9R emits high-rate UBX-ESF-INS records alongside navigation
//! solutions. [`FusionAggregator`] buffers recent samples and attaches an
//! averaged inertial enrichment to each solution. Samples older than the
//! freshness window are dropped before merging so stale inertial data can
//! never silently override a fresh satellite-only fix; when nothing fresh is
//! available the solution passes through unchanged and a degraded counter
//! ticks instead.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::types::solution::{FusionData, FusionSample, NavigationSolution};

/// Upper bound on buffered samples; ESF-INS arrives at up to ~30 Hz, so this
/// comfortably covers any sane freshness window.
const MAX_SAMPLES: usize = 64;

/// Merges inertial samples into navigation solutions.
#[derive(Debug)]
pub struct FusionAggregator {
    enabled: bool,
    freshness: Duration,
    samples: VecDeque<FusionSample>,
    merged: u64,
    degraded: u64,
}

impl FusionAggregator {
    /// `freshness` defaults to one nominal update period of the receiver.
    pub fn new(enabled: bool, freshness: Duration) -> Self {
        Self { enabled, freshness, samples: VecDeque::new(), merged: 0, degraded: 0 }
    }

    /// Buffer one decoded inertial sample.
    pub fn push(&mut self, sample: FusionSample) {
        if !self.enabled {
            return;
        }
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Merge fresh samples into `solution`, or return it unchanged.
    pub fn merge(&mut self, solution: NavigationSolution) -> NavigationSolution {
        self.merge_at(solution, Instant::now())
    }

    /// Merge with an explicit "now", for deterministic tests.
    pub fn merge_at(
        &mut self,
        mut solution: NavigationSolution,
        now: Instant,
    ) -> NavigationSolution {
        if !self.enabled {
            return solution;
        }

        let cutoff = now.checked_sub(self.freshness);
        self.samples.retain(|s| cutoff.is_none_or(|c| s.received_at >= c));

        if self.samples.is_empty() {
            self.degraded += 1;
            trace!(degraded = self.degraded, "no fresh fusion samples, passing solution through");
            return solution;
        }

        let mut data = FusionData {
            ang_rate_dps: [0.0; 3],
            ang_rate_valid: [false; 3],
            accel_mps2: [0.0; 3],
            accel_valid: [false; 3],
            samples: self.samples.len(),
        };

        for axis in 0..3 {
            let rates: Vec<f64> = self
                .samples
                .iter()
                .filter(|s| s.ang_rate_valid[axis])
                .map(|s| s.ang_rate_dps[axis])
                .collect();
            if !rates.is_empty() {
                data.ang_rate_dps[axis] = rates.iter().sum::<f64>() / rates.len() as f64;
                data.ang_rate_valid[axis] = true;
            }

            let accels: Vec<f64> = self
                .samples
                .iter()
                .filter(|s| s.accel_valid[axis])
                .map(|s| s.accel_mps2[axis])
                .collect();
            if !accels.is_empty() {
                data.accel_mps2[axis] = accels.iter().sum::<f64>() / accels.len() as f64;
                data.accel_valid[axis] = true;
            }
        }

        self.merged += 1;
        solution.fusion = Some(data);
        solution
    }

    /// Solutions that passed through unenriched because no fresh sample
    /// existed.
    pub fn degraded_count(&self) -> u64 {
        self.degraded
    }

    /// Solutions that received an inertial enrichment.
    pub fn merged_count(&self) -> u64 {
        self.merged
    }
}
