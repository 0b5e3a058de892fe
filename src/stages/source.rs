//! Source stages: synthetic test patterns and caller-provided tiles.
use ndarray::Array3;

use crate::core::extent::Extent;
use crate::core::product::{TileView, TileViewMut};
use crate::core::region::Region;
use crate::core::stage::{Scratch, Stage};
use crate::core::stamp::{Param, Stamp};
use crate::error::{ComputeError, Error, Result};
use crate::types::Pattern;

/// Parametric scene generator. Values are a closed-form function of the
/// absolute pixel index, so any region and any split produce identical
/// data.
pub struct SyntheticSource {
    width: Param<usize>,
    height: Param<usize>,
    channels: Param<usize>,
    spacing: Param<[f64; 2]>,
    pattern: Param<Pattern>,
    value: Param<f64>,
    period: Param<usize>,
    /// Added per channel index, so multi-channel scenes differ per band.
    channel_offset: Param<f64>,
}

impl SyntheticSource {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width: Param::new(width),
            height: Param::new(height),
            channels: Param::new(1),
            spacing: Param::new([1.0, 1.0]),
            pattern: Param::new(Pattern::Constant),
            value: Param::new(0.0),
            period: Param::new(8),
            channel_offset: Param::new(0.0),
        }
    }

    pub fn set_size(&mut self, width: usize, height: usize) {
        self.width.set(width);
        self.height.set(height);
    }

    pub fn set_channels(&mut self, channels: usize) {
        self.channels.set(channels);
    }

    pub fn set_spacing(&mut self, spacing: [f64; 2]) {
        self.spacing.set(spacing);
    }

    pub fn set_pattern(&mut self, pattern: Pattern) {
        self.pattern.set(pattern);
    }

    pub fn set_value(&mut self, value: f64) {
        self.value.set(value);
    }

    pub fn set_period(&mut self, period: usize) {
        self.period.set(period);
    }

    pub fn set_channel_offset(&mut self, offset: f64) {
        self.channel_offset.set(offset);
    }

    fn sample(&self, x: i64, y: i64, c: usize) -> f64 {
        let base = match self.pattern.value() {
            Pattern::Constant => self.value.value(),
            Pattern::RampX => x as f64,
            Pattern::RampY => y as f64,
            Pattern::Checkerboard => {
                let p = self.period.value() as i64;
                ((x.div_euclid(p) + y.div_euclid(p)).rem_euclid(2)) as f64
            }
        };
        base + self.channel_offset.value() * c as f64
    }
}

impl Stage for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic_source"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn param_stamp(&self) -> Stamp {
        self.width
            .stamp()
            .max(self.height.stamp())
            .max(self.channels.stamp())
            .max(self.spacing.stamp())
            .max(self.pattern.stamp())
            .max(self.value.stamp())
            .max(self.period.stamp())
            .max(self.channel_offset.stamp())
    }

    fn output_metadata(&mut self, _inputs: &[Extent]) -> Result<Vec<Extent>> {
        let (w, h) = (self.width.value(), self.height.value());
        if w == 0 || h == 0 {
            return Err(Error::Configuration {
                param: "size",
                value: format!("{w}x{h}"),
            });
        }
        if self.channels.value() == 0 {
            return Err(Error::Configuration {
                param: "channels",
                value: "0".to_string(),
            });
        }
        if self.period.value() == 0 {
            return Err(Error::Configuration {
                param: "period",
                value: "0".to_string(),
            });
        }
        let extent = Extent::new(Region::new([0, 0], [w, h]), self.channels.value())
            .with_spacing(self.spacing.value());
        Ok(vec![extent])
    }

    fn compute(
        &self,
        _inputs: &[TileView<'_>],
        outputs: &mut [TileViewMut<'_>],
        _scratch: Option<&mut Scratch>,
        _thread_id: usize,
    ) -> std::result::Result<(), ComputeError> {
        let out = &mut outputs[0];
        let region = out.region();
        let channels = out.channels();
        for y in region.origin[1]..region.end(1) {
            for x in region.origin[0]..region.end(0) {
                for c in 0..channels {
                    out.set(x, y, c, self.sample(x, y, c));
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

struct ExternalTile {
    region: Region,
    data: Array3<f64>,
}

/// Source over a caller-provided in-memory tile.
///
/// Also the bridge stage of composite pipelines: the outer stage copies its
/// requested input tile in through [`set_tile`](ExternalSource::set_tile),
/// and the stamp bump carries the invalidation into the inner graph.
pub struct ExternalSource {
    extent: Param<Option<Extent>>,
    tile: Param<Option<ExternalTile>>,
}

impl ExternalSource {
    pub fn new() -> Self {
        Self {
            extent: Param::new(None),
            tile: Param::new(None),
        }
    }

    /// Build a source whose full extent and tile cover `data` entirely,
    /// with the index origin at `origin`.
    pub fn from_array(origin: [i64; 2], data: Array3<f64>) -> Self {
        let (h, w, c) = data.dim();
        let region = Region::new(origin, [w, h]);
        let mut source = Self::new();
        source.extent.set(Some(Extent::new(region, c)));
        source.tile.set(Some(ExternalTile { region, data }));
        source
    }

    /// Declare the product geometry. A no-op when unchanged, so repeated
    /// metadata passes do not invalidate downstream caches.
    pub fn set_extent(&mut self, extent: Extent) {
        if self.extent.get().as_ref() != Some(&extent) {
            self.extent.set(Some(extent));
        }
    }

    /// Supply the buffered tile. The data shape must match `region` and
    /// the declared channel count.
    pub fn set_tile(&mut self, region: Region, data: Array3<f64>) -> Result<()> {
        let (h, w, c) = data.dim();
        if (w, h) != (region.width(), region.height()) {
            return Err(Error::Configuration {
                param: "tile",
                value: format!("data is {w}x{h}, region is {region}"),
            });
        }
        if let Some(extent) = self.extent.get().as_ref() {
            if extent.channels != c {
                return Err(Error::Configuration {
                    param: "tile",
                    value: format!("data has {c} channels, extent has {}", extent.channels),
                });
            }
        }
        self.tile.set(Some(ExternalTile { region, data }));
        Ok(())
    }
}

impl Default for ExternalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ExternalSource {
    fn name(&self) -> &'static str {
        "external_source"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn param_stamp(&self) -> Stamp {
        self.extent.stamp().max(self.tile.stamp())
    }

    fn output_metadata(&mut self, _inputs: &[Extent]) -> Result<Vec<Extent>> {
        let extent = self.extent.get().clone().ok_or_else(|| Error::MissingInput {
            stage: "external_source".to_string(),
            input: 0,
        })?;
        Ok(vec![extent])
    }

    fn compute(
        &self,
        _inputs: &[TileView<'_>],
        outputs: &mut [TileViewMut<'_>],
        _scratch: Option<&mut Scratch>,
        _thread_id: usize,
    ) -> std::result::Result<(), ComputeError> {
        let out = &mut outputs[0];
        let region = out.region();
        let tile = self
            .tile
            .get()
            .as_ref()
            .ok_or_else(|| ComputeError::Kernel("no tile bound to external source".to_string()))?;
        if !tile.region.contains(&region) {
            return Err(ComputeError::Kernel(format!(
                "bound tile {} does not cover requested {}",
                tile.region, region
            )));
        }
        let channels = out.channels();
        for y in region.origin[1]..region.end(1) {
            for x in region.origin[0]..region.end(0) {
                let iy = (y - tile.region.origin[1]) as usize;
                let ix = (x - tile.region.origin[0]) as usize;
                for c in 0..channels {
                    out.set(x, y, c, tile.data[[iy, ix, c]]);
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

    #[test]
    fn synthetic_ramp_is_absolute_indexed() {
        let mut pipeline = Pipeline::new();
        let mut source = SyntheticSource::new(32, 16);
        source.set_pattern(Pattern::RampX);
        let id = pipeline.add_stage(source);
        let product = pipeline.output(id, 0).unwrap();
        let region = Region::new([10, 4], [4, 4]);
        pipeline.update_region(product, region).unwrap();
        let view = pipeline.product(product).unwrap().view(region);
        assert_eq!(view.at(10, 4, 0), 10.0);
        assert_eq!(view.at(13, 7, 0), 13.0);
    }

    #[test]
    fn external_source_requires_extent() {
        let mut pipeline = Pipeline::new();
        let id = pipeline.add_stage(ExternalSource::new());
        let product = pipeline.output(id, 0).unwrap();
        assert!(matches!(
            pipeline.update(product),
            Err(Error::MissingInput { .. })
        ));
    }

    #[test]
    fn external_source_round_trips_data() {
        let data = Array3::from_shape_fn((4, 6, 1), |(y, x, _)| (y * 10 + x) as f64);
        let mut pipeline = Pipeline::new();
        let id = pipeline.add_stage(ExternalSource::from_array([0, 0], data));
        let product = pipeline.output(id, 0).unwrap();
        pipeline.update(product).unwrap();
        let view = pipeline
            .product(product)
            .unwrap()
            .view(Region::new([0, 0], [6, 4]));
        assert_eq!(view.at(0, 0, 0), 0.0);
        assert_eq!(view.at(5, 3, 0), 35.0);
    }

    #[test]
    fn tile_shape_mismatch_rejected_eagerly() {
        let mut source = ExternalSource::new();
        source.set_extent(Extent::new(Region::new([0, 0], [4, 4]), 1));
        let bad = Array3::zeros((2, 2, 1));
        assert!(source.set_tile(Region::new([0, 0], [4, 4]), bad).is_err());
    }
}
