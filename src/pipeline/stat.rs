//! Running statistics with destructive reads.

use serde::{Deserialize, Serialize};

/// How a sensor's samples are folded into its running sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionMode {
    /// Arithmetic mean of the samples
    Raw,
    /// Mean of absolute values (vibration amplitude)
    Absolute,
    /// Root mean square
    Rms,
}

impl ReductionMode {
    fn fold(self, sample: f64) -> f64 {
        match self {
            ReductionMode::Raw => sample,
            ReductionMode::Absolute => sample.abs(),
            ReductionMode::Rms => sample * sample,
        }
    }

    fn finish(self, mean: f64) -> f64 {
        match self {
            ReductionMode::Rms => mean.sqrt(),
            ReductionMode::Raw | ReductionMode::Absolute => mean,
        }
    }
}

/// Sum and count of reduced samples for one (machine, sensor).
///
/// Only the aggregation task touches a `Stat`, so reads and resets need no
/// synchronization.
#[derive(Debug, Clone)]
pub struct Stat {
    mode: ReductionMode,
    sum: f64,
    count: usize,
}

impl Stat {
    pub fn new(mode: ReductionMode) -> Self {
        Self { mode, sum: 0.0, count: 0 }
    }

    pub fn mode(&self) -> ReductionMode {
        self.mode
    }

    pub fn add(&mut self, samples: &[f64]) {
        let mode = self.mode;
        self.sum += samples.iter().map(|&x| mode.fold(x)).sum::<f64>();
        self.count += samples.len();
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Return the average and reset sum and count to zero.
    ///
    /// An empty stat reads as `0.0`.
    pub fn take_average(&mut self) -> f64 {
        let average = if self.count == 0 {
            0.0
        } else {
            self.mode.finish(self.sum / self.count as f64)
        };
        self.sum = 0.0;
        self.count = 0;
        average
    }
}
