//! Bright-target detection as a composite (mini-pipeline) stage.
//!
//! The detector is built from a private sub-graph: a bridge source fed with
//! the outer input tile, a smoothing filter, a threshold classifier, an
//! index normalizer, and a statistics sink. The outer stage aggregates the
//! inner stages' progress through a weighted tracker and takes the final
//! inner product over by GraftOutput instead of copying it.
use crate::core::extent::Extent;
use crate::core::pipeline::Pipeline;
use crate::core::product::{TileView, TileViewMut};
use crate::core::progress::ProgressTracker;
use crate::core::region::Region;
use crate::core::stage::{CompositeParts, ProductId, Scratch, Stage, StageId};
use crate::core::stamp::{Param, Stamp};
use crate::error::{ComputeError, Result};
use crate::stages::elementwise::{ShiftScale, Threshold};
use crate::stages::neighborhood::BoxFilter;
use crate::stages::source::ExternalSource;
use crate::stages::statistics::{Statistics, SummaryStats};

/// Detect pixels whose smoothed value exceeds a threshold, scaled to a
/// 0..gain detection index. Single-channel output matching the input
/// geometry.
pub struct BrightTargetDetector {
    inner: Pipeline,
    bridge: StageId,
    stats: StageId,
    smooth: StageId,
    thresh: StageId,
    sink: ProductId,
    tracker: ProgressTracker,
    radius: Param<usize>,
    threshold: Param<f64>,
    gain: Param<f64>,
    synced_at: Stamp,
}

impl BrightTargetDetector {
    pub fn new(radius: usize, threshold: f64) -> Self {
        let mut inner = Pipeline::new();
        let bridge = inner.add_stage(ExternalSource::new());
        let smooth = inner.add_stage(BoxFilter::new(radius));
        let thresh = inner.add_stage(Threshold::new(threshold, f64::INFINITY));
        let normalize = inner.add_stage(ShiftScale::new(1.0, 0.0));
        let stats = inner.add_stage(Statistics::new());

        let chain = [bridge, smooth, thresh, normalize, stats];
        for pair in chain.windows(2) {
            let upstream = inner.output(pair[0], 0).expect("inner output");
            inner.connect(pair[1], 0, upstream).expect("inner wiring");
        }
        let sink = inner.output(stats, 0).expect("inner sink");

        let mut tracker = ProgressTracker::new();
        for (stage, weight) in chain.iter().zip([0.1, 0.1, 0.1, 0.2, 0.5]) {
            tracker.register(*stage, weight);
        }

        Self {
            inner,
            bridge,
            stats,
            smooth,
            thresh,
            sink,
            tracker,
            radius: Param::new(radius),
            threshold: Param::new(threshold),
            gain: Param::new(1.0),
            synced_at: Stamp::ZERO,
        }
    }

    pub fn set_radius(&mut self, radius: usize) {
        self.radius.set(radius);
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold.set(threshold);
    }

    /// Detection index value assigned to hits (misses stay 0).
    pub fn set_gain(&mut self, gain: f64) {
        self.gain.set(gain);
    }

    /// Progress over the inner stages for the current/last outer update.
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Statistics of the detection index from the last execution.
    pub fn stats(&self) -> Option<SummaryStats> {
        self.inner
            .stage_ref::<Statistics>(self.stats)
            .ok()
            .and_then(|s| s.stats().copied())
    }

    fn config_stamp(&self) -> Stamp {
        self.radius
            .stamp()
            .max(self.threshold.stamp())
            .max(self.gain.stamp())
    }

    /// Push outer parameters into the inner stages, exactly once per
    /// configuration change so unchanged updates stay cached.
    fn sync_config(&mut self) -> Result<()> {
        let stamp = self.config_stamp();
        if stamp <= self.synced_at {
            return Ok(());
        }
        self.inner
            .stage_mut::<BoxFilter>(self.smooth)?
            .set_radius(self.radius.value());
        let thresh = self.inner.stage_mut::<Threshold>(self.thresh)?;
        thresh.set_bounds(self.threshold.value(), f64::INFINITY);
        thresh.set_levels(self.gain.value(), 0.0);
        self.synced_at = stamp;
        Ok(())
    }
}

impl Stage for BrightTargetDetector {
    fn name(&self) -> &'static str {
        "bright_target_detector"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn param_stamp(&self) -> Stamp {
        self.config_stamp()
    }

    fn output_metadata(&mut self, inputs: &[Extent]) -> Result<Vec<Extent>> {
        self.sync_config()?;
        self.inner
            .stage_mut::<ExternalSource>(self.bridge)?
            .set_extent(inputs[0].clone());
        let extent = self.inner.propagate_metadata(self.sink)?;
        Ok(vec![extent])
    }

    /// Mirrors the inner smoothing filter's neighborhood.
    fn input_region(
        &self,
        _input: usize,
        input_extent: &Extent,
        output_region: &Region,
    ) -> Result<Region> {
        Ok(output_region
            .dilate(self.radius.value())
            .crop_to(&input_extent.full_region))
    }

    fn bind_inputs(&mut self, _extents: &[Extent], inputs: &[TileView<'_>]) -> Result<()> {
        let tile = &inputs[0];
        self.inner
            .stage_mut::<ExternalSource>(self.bridge)?
            .set_tile(tile.region(), tile.data().to_owned())
    }

    fn composite(&mut self) -> Option<CompositeParts<'_>> {
        Some(CompositeParts {
            pipeline: &mut self.inner,
            sink: self.sink,
            tracker: &mut self.tracker,
        })
    }

    fn compute(
        &self,
        _inputs: &[TileView<'_>],
        _outputs: &mut [TileViewMut<'_>],
        _scratch: Option<&mut Scratch>,
        _thread_id: usize,
    ) -> std::result::Result<(), ComputeError> {
        Err(ComputeError::Kernel(
            "composite stage executes through its inner pipeline".to_string(),
        ))
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
    use crate::stages::source::SyntheticSource;
    use crate::types::Pattern;

    fn detector_pipeline() -> (Pipeline, StageId, ProductId) {
        let mut pipeline = Pipeline::new();
        let mut source = SyntheticSource::new(24, 24);
        source.set_pattern(Pattern::RampX);
        let src = pipeline.add_stage(source);
        let det = pipeline.add_stage(BrightTargetDetector::new(1, 12.0));
        let src_out = pipeline.output(src, 0).unwrap();
        pipeline.connect(det, 0, src_out).unwrap();
        let out = pipeline.output(det, 0).unwrap();
        (pipeline, det, out)
    }

    #[test]
    fn detects_bright_half_of_ramp() {
        let (mut pipeline, det, out) = detector_pipeline();
        let region = Region::new([0, 0], [24, 24]);
        pipeline.update_region(out, region).unwrap();

        let view = pipeline.product(out).unwrap().view(region);
        // Smoothed ramp crosses the threshold at x == 12.
        assert_eq!(view.at(4, 4, 0), 0.0);
        assert_eq!(view.at(20, 4, 0), 1.0);

        let stats = pipeline
            .stage_ref::<BrightTargetDetector>(det)
            .unwrap()
            .stats()
            .unwrap();
        assert_eq!(stats.count, 24 * 24);
        assert_eq!(stats.max, 1.0);
    }

    #[test]
    fn tracker_reaches_one_after_update() {
        let (mut pipeline, det, out) = detector_pipeline();
        pipeline.update(out).unwrap();
        let tracker = pipeline
            .stage_ref::<BrightTargetDetector>(det)
            .unwrap()
            .tracker();
        assert!((tracker.accumulated() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn graft_leaves_inner_product_empty() {
        let (mut pipeline, det, out) = detector_pipeline();
        pipeline.update(out).unwrap();
        assert!(!pipeline.product(out).unwrap().buffered().is_empty());

        let detector = pipeline.stage_ref::<BrightTargetDetector>(det).unwrap();
        let inner_product = detector.inner.product(detector.sink).unwrap();
        assert!(inner_product.buffered().is_empty());
        assert!(inner_product.buffer().is_none());
    }

    #[test]
    fn gain_change_invalidates_outer_cache() {
        let (mut pipeline, det, out) = detector_pipeline();
        pipeline.update(out).unwrap();
        let stamp_before = pipeline.execution_stamp(det).unwrap();

        pipeline
            .stage_mut::<BrightTargetDetector>(det)
            .unwrap()
            .set_gain(100.0);
        pipeline.update(out).unwrap();
        assert!(pipeline.execution_stamp(det).unwrap() > stamp_before);

        let region = Region::new([0, 0], [24, 24]);
        let view = pipeline.product(out).unwrap().view(region);
        assert_eq!(view.at(20, 4, 0), 100.0);
    }
}
