//! Pointwise stages: per-pixel maps with the default region propagation.
use crate::core::extent::Extent;
use crate::core::product::{TileView, TileViewMut};
use crate::core::stage::{Scratch, Stage};
use crate::core::stamp::{Param, Stamp};
use crate::error::{ComputeError, Error, Result};

/// `out = in * scale + shift`, every channel.
pub struct ShiftScale {
    scale: Param<f64>,
    shift: Param<f64>,
}

impl ShiftScale {
    pub fn new(scale: f64, shift: f64) -> Self {
        Self {
            scale: Param::new(scale),
            shift: Param::new(shift),
        }
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale.set(scale);
    }

    pub fn set_shift(&mut self, shift: f64) {
        self.shift.set(shift);
    }
}

impl Stage for ShiftScale {
    fn name(&self) -> &'static str {
        "shift_scale"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn param_stamp(&self) -> Stamp {
        self.scale.stamp().max(self.shift.stamp())
    }

    fn output_metadata(&mut self, inputs: &[Extent]) -> Result<Vec<Extent>> {
        Ok(vec![inputs[0].clone()])
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
        let (scale, shift) = (self.scale.value(), self.shift.value());
        for y in region.origin[1]..region.end(1) {
            for x in region.origin[0]..region.end(0) {
                for c in 0..out.channels() {
                    out.set(x, y, c, input.at(x, y, c) * scale + shift);
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

/// Binary classifier: `inside` where `low <= v <= high`, else `outside`.
pub struct Threshold {
    low: Param<f64>,
    high: Param<f64>,
    inside: Param<f64>,
    outside: Param<f64>,
}

impl Threshold {
    pub fn new(low: f64, high: f64) -> Self {
        Self {
            low: Param::new(low),
            high: Param::new(high),
            inside: Param::new(1.0),
            outside: Param::new(0.0),
        }
    }

    pub fn set_bounds(&mut self, low: f64, high: f64) {
        self.low.set(low);
        self.high.set(high);
    }

    pub fn set_levels(&mut self, inside: f64, outside: f64) {
        self.inside.set(inside);
        self.outside.set(outside);
    }
}

impl Stage for Threshold {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn param_stamp(&self) -> Stamp {
        self.low
            .stamp()
            .max(self.high.stamp())
            .max(self.inside.stamp())
            .max(self.outside.stamp())
    }

    fn output_metadata(&mut self, inputs: &[Extent]) -> Result<Vec<Extent>> {
        if self.low.value() > self.high.value() {
            return Err(Error::Configuration {
                param: "bounds",
                value: format!("low {} > high {}", self.low.value(), self.high.value()),
            });
        }
        Ok(vec![inputs[0].clone()])
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
        let (low, high) = (self.low.value(), self.high.value());
        let (inside, outside) = (self.inside.value(), self.outside.value());
        for y in region.origin[1]..region.end(1) {
            for x in region.origin[0]..region.end(0) {
                for c in 0..out.channels() {
                    let v = input.at(x, y, c);
                    out.set(x, y, c, if v >= low && v <= high { inside } else { outside });
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
    use crate::core::region::Region;
    use crate::stages::source::SyntheticSource;
    use crate::types::Pattern;

    #[test]
    fn shift_scale_applies_per_pixel() {
        let mut pipeline = Pipeline::new();
        let mut source = SyntheticSource::new(8, 8);
        source.set_pattern(Pattern::RampX);
        let src = pipeline.add_stage(source);
        let stage = pipeline.add_stage(ShiftScale::new(2.0, 1.0));
        let src_out = pipeline.output(src, 0).unwrap();
        pipeline.connect(stage, 0, src_out).unwrap();
        let out = pipeline.output(stage, 0).unwrap();

        pipeline.update(out).unwrap();
        let view = pipeline
            .product(out)
            .unwrap()
            .view(Region::new([0, 0], [8, 8]));
        assert_eq!(view.at(3, 0, 0), 7.0);
        assert_eq!(view.at(0, 5, 0), 1.0);
    }

    #[test]
    fn threshold_rejects_inverted_bounds() {
        let mut pipeline = Pipeline::new();
        let src = pipeline.add_stage(SyntheticSource::new(4, 4));
        let stage = pipeline.add_stage(Threshold::new(5.0, 1.0));
        let src_out = pipeline.output(src, 0).unwrap();
        pipeline.connect(stage, 0, src_out).unwrap();
        let out = pipeline.output(stage, 0).unwrap();
        assert!(matches!(
            pipeline.update(out),
            Err(Error::Configuration { param: "bounds", .. })
        ));
    }
}
