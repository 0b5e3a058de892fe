//! Pass-through statistics collection.
//!
//! Demonstrates the per-thread scratch contract: each worker accumulates
//! into its own clone, and `after_compute` reduces the clones in ascending
//! thread-id order so totals are deterministic.
use serde::Serialize;

use crate::core::extent::Extent;
use crate::core::product::{TileView, TileViewMut};
use crate::core::stage::{Scratch, Stage};
use crate::error::{ComputeError, Error, Result};

/// Summary over the pixels of the last executed request (all channels).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SummaryStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub sum_sq: f64,
}

impl SummaryStats {
    fn empty() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    fn push(&mut self, v: f64) {
        self.count += 1;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.sum += v;
        self.sum_sq += v * v;
    }

    fn merge(&mut self, other: &SummaryStats) {
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / self.count as f64 - mean * mean).max(0.0)
    }
}

/// Copies its input through unchanged while collecting [`SummaryStats`]
/// over the computed region.
pub struct Statistics {
    stats: Option<SummaryStats>,
}

impl Statistics {
    pub fn new() -> Self {
        Self { stats: None }
    }

    /// Statistics of the most recent successful execution, if any.
    pub fn stats(&self) -> Option<&SummaryStats> {
        self.stats.as_ref()
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Statistics {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn output_metadata(&mut self, inputs: &[Extent]) -> Result<Vec<Extent>> {
        Ok(vec![inputs[0].clone()])
    }

    fn before_compute(&mut self, thread_count: usize) -> Result<Vec<Scratch>> {
        self.stats = None;
        Ok((0..thread_count)
            .map(|_| Box::new(SummaryStats::empty()) as Scratch)
            .collect())
    }

    fn compute(
        &self,
        inputs: &[TileView<'_>],
        outputs: &mut [TileViewMut<'_>],
        scratch: Option<&mut Scratch>,
        _thread_id: usize,
    ) -> std::result::Result<(), ComputeError> {
        let accum = scratch
            .and_then(|s| s.downcast_mut::<SummaryStats>())
            .ok_or_else(|| ComputeError::Kernel("missing statistics scratch".to_string()))?;
        let input = &inputs[0];
        let out = &mut outputs[0];
        let region = out.region();
        for y in region.origin[1]..region.end(1) {
            for x in region.origin[0]..region.end(0) {
                for c in 0..out.channels() {
                    let v = input.at(x, y, c);
                    out.set(x, y, c, v);
                    accum.push(v);
                }
            }
        }
        Ok(())
    }

    fn after_compute(&mut self, scratch: Vec<Scratch>) -> Result<()> {
        let mut total = SummaryStats::empty();
        for (thread_id, boxed) in scratch.into_iter().enumerate() {
            let accum = boxed
                .downcast::<SummaryStats>()
                .map_err(|_| Error::Configuration {
                    param: "scratch",
                    value: format!("thread {thread_id} returned foreign scratch"),
                })?;
            total.merge(&accum);
        }
        self.stats = Some(total);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::Pipeline;
    use crate::core::region::Region;
    use crate::stages::source::SyntheticSource;
    use crate::types::Pattern;

    fn ramp_stats(threads: usize) -> SummaryStats {
        let mut pipeline = Pipeline::new();
        let mut source = SyntheticSource::new(16, 4);
        source.set_pattern(Pattern::RampX);
        let src = pipeline.add_stage(source);
        let stats = pipeline.add_stage(Statistics::new());
        let src_out = pipeline.output(src, 0).unwrap();
        pipeline.connect(stats, 0, src_out).unwrap();
        pipeline.set_thread_count(stats, threads).unwrap();
        let out = pipeline.output(stats, 0).unwrap();
        pipeline
            .update_region(out, Region::new([0, 0], [16, 4]))
            .unwrap();
        *pipeline.stage_ref::<Statistics>(stats).unwrap().stats().unwrap()
    }

    #[test]
    fn totals_match_closed_form() {
        let s = ramp_stats(1);
        assert_eq!(s.count, 64);
        assert_eq!(s.min, 0.0);
        assert_eq!(s.max, 15.0);
        // 4 rows of 0..=15.
        assert_eq!(s.sum, 4.0 * (15.0 * 16.0 / 2.0));
    }

    #[test]
    fn reduction_is_thread_count_invariant() {
        let single = ramp_stats(1);
        let multi = ramp_stats(4);
        assert_eq!(single.count, multi.count);
        assert_eq!(single.min, multi.min);
        assert_eq!(single.max, multi.max);
        assert_eq!(single.sum, multi.sum);
        assert_eq!(single.sum_sq, multi.sum_sq);
    }
}
