//! Neighborhood stages: kernels that read a window around each pixel and
//! therefore dilate their upstream region request.
use crate::core::extent::Extent;
use crate::core::product::{TileView, TileViewMut};
use crate::core::region::Region;
use crate::core::stage::{Scratch, Stage};
use crate::core::stamp::{Param, Stamp};
use crate::error::{ComputeError, Result};

/// Mean over a `(2r+1) x (2r+1)` window, per channel. Requests its input
/// dilated by `r`; samples beyond the input's full extent clamp to the
/// edge.
pub struct BoxFilter {
    radius: Param<usize>,
}

impl BoxFilter {
    pub fn new(radius: usize) -> Self {
        Self {
            radius: Param::new(radius),
        }
    }

    pub fn radius(&self) -> usize {
        self.radius.value()
    }

    pub fn set_radius(&mut self, radius: usize) {
        self.radius.set(radius);
    }
}

impl Stage for BoxFilter {
    fn name(&self) -> &'static str {
        "box_filter"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn param_stamp(&self) -> Stamp {
        self.radius.stamp()
    }

    fn output_metadata(&mut self, inputs: &[Extent]) -> Result<Vec<Extent>> {
        Ok(vec![inputs[0].clone()])
    }

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

    fn compute(
        &self,
        inputs: &[TileView<'_>],
        outputs: &mut [TileViewMut<'_>],
        _scratch: Option<&mut Scratch>,
        _thread_id: usize,
    ) -> std::result::Result<(), ComputeError> {
        let input = &inputs[0];
        let out = &mut outputs[0];
        let region = out.region();
        let r = self.radius.value() as i64;
        let norm = ((2 * r + 1) * (2 * r + 1)) as f64;
        for y in region.origin[1]..region.end(1) {
            for x in region.origin[0]..region.end(0) {
                for c in 0..out.channels() {
                    let mut sum = 0.0;
                    for dy in -r..=r {
                        for dx in -r..=r {
                            sum += input.at_clamped(x + dx, y + dy, c);
                        }
                    }
                    out.set(x, y, c, sum / norm);
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
    fn mean_of_constant_is_constant() {
        let mut pipeline = Pipeline::new();
        let mut source = SyntheticSource::new(16, 16);
        source.set_value(5.0);
        let src = pipeline.add_stage(source);
        let filter = pipeline.add_stage(BoxFilter::new(2));
        let src_out = pipeline.output(src, 0).unwrap();
        pipeline.connect(filter, 0, src_out).unwrap();
        let out = pipeline.output(filter, 0).unwrap();

        let region = Region::new([4, 4], [8, 8]);
        pipeline.update_region(out, region).unwrap();
        let view = pipeline.product(out).unwrap().view(region);
        for y in 4..12 {
            for x in 4..12 {
                assert_eq!(view.at(x, y, 0), 5.0);
            }
        }
    }

    #[test]
    fn ramp_mean_away_from_edges() {
        let mut pipeline = Pipeline::new();
        let mut source = SyntheticSource::new(32, 8);
        source.set_pattern(Pattern::RampX);
        let src = pipeline.add_stage(source);
        let filter = pipeline.add_stage(BoxFilter::new(1));
        let src_out = pipeline.output(src, 0).unwrap();
        pipeline.connect(filter, 0, src_out).unwrap();
        let out = pipeline.output(filter, 0).unwrap();

        let region = Region::new([8, 2], [4, 4]);
        pipeline.update_region(out, region).unwrap();
        let view = pipeline.product(out).unwrap().view(region);
        // Window means of an x-ramp are the center value off the edges.
        assert_eq!(view.at(9, 3, 0), 9.0);
        assert_eq!(view.at(11, 4, 0), 11.0);
    }

    #[test]
    fn dilated_request_is_clamped() {
        let filter = BoxFilter::new(3);
        let extent = Extent::new(Region::new([0, 0], [10, 10]), 1);
        let request = filter
            .input_region(0, &extent, &Region::new([0, 0], [4, 4]))
            .unwrap();
        assert_eq!(request, Region::new([0, 0], [7, 7]));
    }
}
