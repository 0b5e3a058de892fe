//! Progress aggregation for composite (mini-pipeline) stages.
use std::collections::HashMap;

use crate::core::stage::StageId;
use crate::error::{Error, Result};

/// Observer of per-stage progress during an update.
pub trait ProgressSink {
    fn progress(&mut self, stage: StageId, fraction: f64);
}

/// Sink that discards all reports.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn progress(&mut self, _stage: StageId, _fraction: f64) {}
}

/// Aggregates weighted progress over the internal stages of a composite.
///
/// Weights must sum to 1.0; the accumulated value is
/// `sum(weight_i * fraction_i)` over the registered stages. Scoped to one
/// outer update: [`reset`](ProgressTracker::reset) runs at the start of the
/// owning composite's execution.
pub struct ProgressTracker {
    weights: HashMap<StageId, f64>,
    fractions: HashMap<StageId, f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            weights: HashMap::new(),
            fractions: HashMap::new(),
        }
    }

    pub fn register(&mut self, stage: StageId, weight: f64) {
        self.weights.insert(stage, weight);
    }

    /// Check the weights sum to 1.0 within a small tolerance.
    pub fn validate(&self) -> Result<()> {
        let total: f64 = self.weights.values().sum();
        if (total - 1.0).abs() > 1e-9 {
            return Err(Error::Configuration {
                param: "progress_weights",
                value: format!("sum to {total}, expected 1.0"),
            });
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.fractions.clear();
    }

    pub fn accumulated(&self) -> f64 {
        self.weights
            .iter()
            .map(|(stage, w)| w * self.fractions.get(stage).copied().unwrap_or(0.0))
            .sum()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ProgressTracker {
    fn progress(&mut self, stage: StageId, fraction: f64) {
        if self.weights.contains_key(&stage) {
            self.fractions.insert(stage, fraction.clamp(0.0, 1.0));
        }
    }
}
