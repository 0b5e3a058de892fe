//! Expression-driven stages.
//!
//! [`BandMath`] applies a bound [`Evaluator`] to the channel tuple gathered
//! from its inputs at every pixel. The evaluator is an auxiliary object:
//! its own modification stamp participates in cache invalidation, and each
//! worker thread evaluates through its own clone.
use crate::core::extent::Extent;
use crate::core::product::{TileView, TileViewMut};
use crate::core::stage::{Scratch, Stage};
use crate::core::stamp::Stamp;
use crate::error::{ComputeError, Error, Result};
use crate::eval::Evaluator;

pub struct BandMath {
    evaluator: Box<dyn Evaluator>,
    num_inputs: usize,
}

impl BandMath {
    pub fn new(evaluator: Box<dyn Evaluator>, num_inputs: usize) -> Self {
        Self {
            evaluator,
            num_inputs,
        }
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }

    /// Mutable access to the bound evaluator; its stamp makes any
    /// configuration change visible to the cache.
    pub fn evaluator_mut(&mut self) -> &mut dyn Evaluator {
        self.evaluator.as_mut()
    }

    pub fn set_evaluator(&mut self, evaluator: Box<dyn Evaluator>) {
        self.evaluator = evaluator;
    }
}

impl Stage for BandMath {
    fn name(&self) -> &'static str {
        "band_math"
    }

    fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    fn param_stamp(&self) -> Stamp {
        self.evaluator.modified()
    }

    fn output_metadata(&mut self, inputs: &[Extent]) -> Result<Vec<Extent>> {
        let first = &inputs[0];
        if inputs.iter().any(|e| e.full_region != first.full_region) {
            return Err(Error::Configuration {
                param: "inputs",
                value: "band math inputs disagree on full region".to_string(),
            });
        }
        let total_channels: usize = inputs.iter().map(|e| e.channels).sum();
        if total_channels != self.evaluator.arity() {
            return Err(Error::Configuration {
                param: "arity",
                value: format!(
                    "evaluator expects {} values, inputs supply {total_channels} channels",
                    self.evaluator.arity()
                ),
            });
        }
        let mut extent = first.clone();
        extent.channels = 1;
        Ok(vec![extent])
    }

    fn before_compute(&mut self, thread_count: usize) -> Result<Vec<Scratch>> {
        Ok((0..thread_count)
            .map(|_| Box::new(self.evaluator.clone_boxed()) as Scratch)
            .collect())
    }

    fn compute(
        &self,
        inputs: &[TileView<'_>],
        outputs: &mut [TileViewMut<'_>],
        scratch: Option<&mut Scratch>,
        _thread_id: usize,
    ) -> std::result::Result<(), ComputeError> {
        let evaluator = scratch
            .and_then(|s| s.downcast_mut::<Box<dyn Evaluator>>())
            .ok_or_else(|| ComputeError::Kernel("missing evaluator clone".to_string()))?;
        let out = &mut outputs[0];
        let region = out.region();
        let mut values = vec![0.0; evaluator.arity()];
        for y in region.origin[1]..region.end(1) {
            for x in region.origin[0]..region.end(0) {
                let mut slot = 0;
                for input in inputs {
                    for c in 0..input.channels() {
                        values[slot] = input.at(x, y, c);
                        slot += 1;
                    }
                }
                out.set(x, y, 0, evaluator.evaluate(&values)?);
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
