//! Complex-to-intensity detection.
use num_complex::Complex;

use crate::core::extent::Extent;
use crate::core::product::{TileView, TileViewMut};
use crate::core::stage::{Scratch, Stage};
use crate::core::stamp::{Param, Stamp};
use crate::error::{ComputeError, Error, Result};

const DB_FLOOR: f64 = 1e-10;

/// Detect a two-channel complex product (re, im) into single-channel power,
/// optionally in decibels.
pub struct Intensity {
    db: Param<bool>,
}

impl Intensity {
    pub fn new() -> Self {
        Self {
            db: Param::new(false),
        }
    }

    pub fn set_db(&mut self, db: bool) {
        self.db.set(db);
    }
}

impl Default for Intensity {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Intensity {
    fn name(&self) -> &'static str {
        "intensity"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn param_stamp(&self) -> Stamp {
        self.db.stamp()
    }

    fn output_metadata(&mut self, inputs: &[Extent]) -> Result<Vec<Extent>> {
        let input = &inputs[0];
        if input.channels != 2 {
            return Err(Error::Configuration {
                param: "input_channels",
                value: format!("{} (complex input needs re,im planes)", input.channels),
            });
        }
        let mut extent = input.clone();
        extent.channels = 1;
        Ok(vec![extent])
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
        let db = self.db.value();
        for y in region.origin[1]..region.end(1) {
            for x in region.origin[0]..region.end(0) {
                let z = Complex::new(input.at(x, y, 0), input.at(x, y, 1));
                let power = z.norm_sqr();
                let v = if db {
                    10.0 * power.max(DB_FLOOR).log10()
                } else {
                    power
                };
                out.set(x, y, 0, v);
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
    use crate::stages::source::ExternalSource;
    use ndarray::Array3;

    #[test]
    fn power_of_complex_pixels() {
        let mut data = Array3::zeros((2, 2, 2));
        data[[0, 0, 0]] = 3.0;
        data[[0, 0, 1]] = 4.0;
        data[[1, 1, 0]] = 1.0;

        let mut pipeline = Pipeline::new();
        let src = pipeline.add_stage(ExternalSource::from_array([0, 0], data));
        let stage = pipeline.add_stage(Intensity::new());
        let src_out = pipeline.output(src, 0).unwrap();
        pipeline.connect(stage, 0, src_out).unwrap();
        let out = pipeline.output(stage, 0).unwrap();

        pipeline.update(out).unwrap();
        let view = pipeline
            .product(out)
            .unwrap()
            .view(Region::new([0, 0], [2, 2]));
        assert_eq!(view.at(0, 0, 0), 25.0);
        assert_eq!(view.at(1, 1, 0), 1.0);
        assert_eq!(view.channels(), 1);
    }

    #[test]
    fn single_channel_input_rejected() {
        let mut pipeline = Pipeline::new();
        let src = pipeline.add_stage(ExternalSource::from_array([0, 0], Array3::zeros((2, 2, 1))));
        let stage = pipeline.add_stage(Intensity::new());
        let src_out = pipeline.output(src, 0).unwrap();
        pipeline.connect(stage, 0, src_out).unwrap();
        let out = pipeline.output(stage, 0).unwrap();
        assert!(matches!(
            pipeline.update(out),
            Err(Error::Configuration { .. })
        ));
    }
}
