//! Whole-extent transforms.
//!
//! These stages cannot produce any output pixel from a local input window,
//! so they request the entire upstream extent regardless of how small the
//! downstream request is. That is a declared per-stage policy, not an
//! accident; it trades recompute volume for correctness.
use crate::core::extent::Extent;
use crate::core::product::{TileView, TileViewMut};
use crate::core::region::Region;
use crate::core::stage::{Scratch, Stage};
use crate::core::stamp::{Param, Stamp};
use crate::error::{ComputeError, Result};

/// Mirror the image across either axis of its full extent.
pub struct Flip {
    horizontal: Param<bool>,
    vertical: Param<bool>,
}

impl Flip {
    pub fn new(horizontal: bool, vertical: bool) -> Self {
        Self {
            horizontal: Param::new(horizontal),
            vertical: Param::new(vertical),
        }
    }

    pub fn set_axes(&mut self, horizontal: bool, vertical: bool) {
        self.horizontal.set(horizontal);
        self.vertical.set(vertical);
    }
}

impl Stage for Flip {
    fn name(&self) -> &'static str {
        "flip"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn param_stamp(&self) -> Stamp {
        self.horizontal.stamp().max(self.vertical.stamp())
    }

    fn output_metadata(&mut self, inputs: &[Extent]) -> Result<Vec<Extent>> {
        Ok(vec![inputs[0].clone()])
    }

    /// Whole-extent policy: every output pixel mirrors across the full
    /// region, so the full input is required whatever was asked for.
    fn input_region(
        &self,
        _input: usize,
        input_extent: &Extent,
        _output_region: &Region,
    ) -> Result<Region> {
        Ok(input_extent.full_region)
    }

    fn compute(
        &self,
        inputs: &[TileView<'_>],
        outputs: &mut [TileViewMut<'_>],
        _scratch: Option<&mut Scratch>,
        _thread_id: usize,
    ) -> std::result::Result<(), ComputeError> {
        let input = &inputs[0];
        let full = input.region();
        let out = &mut outputs[0];
        let region = out.region();
        let (h, v) = (self.horizontal.value(), self.vertical.value());
        for y in region.origin[1]..region.end(1) {
            let sy = if v { full.origin[1] + full.end(1) - 1 - y } else { y };
            for x in region.origin[0]..region.end(0) {
                let sx = if h { full.origin[0] + full.end(0) - 1 - x } else { x };
                for c in 0..out.channels() {
                    out.set(x, y, c, input.at(sx, sy, c));
                }
            }
        }
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
    use crate::stages::source::SyntheticSource;
    use crate::types::Pattern;

    #[test]
    fn horizontal_flip_of_ramp() {
        let mut pipeline = Pipeline::new();
        let mut source = SyntheticSource::new(10, 4);
        source.set_pattern(Pattern::RampX);
        let src = pipeline.add_stage(source);
        let flip = pipeline.add_stage(Flip::new(true, false));
        let src_out = pipeline.output(src, 0).unwrap();
        pipeline.connect(flip, 0, src_out).unwrap();
        let out = pipeline.output(flip, 0).unwrap();

        // A small request still reads the whole upstream extent.
        let region = Region::new([0, 0], [3, 2]);
        pipeline.update_region(out, region).unwrap();
        assert_eq!(
            pipeline.product(src_out).unwrap().buffered(),
            Region::new([0, 0], [10, 4])
        );
        let view = pipeline.product(out).unwrap().view(region);
        assert_eq!(view.at(0, 0, 0), 9.0);
        assert_eq!(view.at(2, 1, 0), 7.0);
    }

    #[test]
    fn double_flip_round_trips() {
        let mut pipeline = Pipeline::new();
        let mut source = SyntheticSource::new(6, 6);
        source.set_pattern(Pattern::Checkerboard);
        source.set_period(2);
        let src = pipeline.add_stage(source);
        let a = pipeline.add_stage(Flip::new(true, true));
        let b = pipeline.add_stage(Flip::new(true, true));
        let src_out = pipeline.output(src, 0).unwrap();
        pipeline.connect(a, 0, src_out).unwrap();
        let a_out = pipeline.output(a, 0).unwrap();
        pipeline.connect(b, 0, a_out).unwrap();
        let out = pipeline.output(b, 0).unwrap();

        pipeline.update(out).unwrap();
        let region = Region::new([0, 0], [6, 6]);
        let original = pipeline.product(src_out).unwrap().view(region);
        let restored = pipeline.product(out).unwrap().view(region);
        for y in 0..6 {
            for x in 0..6 {
                assert_eq!(original.at(x, y, 0), restored.at(x, y, 0));
            }
        }
    }
}
