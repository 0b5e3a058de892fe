//! Stage output products and region-addressed views over their buffers.
//!
//! A [`Product`] is the owned output artifact of one pipeline stage: pixel
//! buffer, extent, region bookkeeping, and a modification stamp. Buffers are
//! `Array3<f64>` in rows x cols x channels layout covering exactly the
//! buffered region. [`TileView`]/[`TileViewMut`] address a buffer in
//! absolute index space so compute kernels never see buffer offsets.
use ndarray::{Array3, ArrayView3, ArrayViewMut3, s};

use crate::core::extent::Extent;
use crate::core::region::Region;
use crate::core::stage::{ProducerRef, StageId};
use crate::core::stamp::Stamp;

pub struct Product {
    extent: Option<Extent>,
    requested: Region,
    buffered: Region,
    buffer: Option<Array3<f64>>,
    modified: Stamp,
    producer: ProducerRef,
}

impl Product {
    pub(crate) fn new(stage: StageId, output: usize) -> Self {
        Self {
            extent: None,
            requested: Region::empty(),
            buffered: Region::empty(),
            buffer: None,
            modified: Stamp::next(),
            producer: ProducerRef { stage, output },
        }
    }

    /// Back-reference to the producing stage. Lookup only; holding it does
    /// not keep the stage alive.
    pub fn producer(&self) -> ProducerRef {
        self.producer
    }

    pub fn extent(&self) -> Option<&Extent> {
        self.extent.as_ref()
    }

    pub(crate) fn set_extent(&mut self, extent: Extent) {
        self.extent = Some(extent);
    }

    pub fn requested(&self) -> Region {
        self.requested
    }

    pub(crate) fn set_requested(&mut self, region: Region) {
        self.requested = region;
    }

    pub fn buffered(&self) -> Region {
        self.buffered
    }

    pub fn modified(&self) -> Stamp {
        self.modified
    }

    /// Record an external mutation of this product (manual overwrite).
    /// Downstream stages become stale on the next update.
    pub fn mark_modified(&mut self) {
        self.modified = Stamp::next();
    }

    pub fn buffer(&self) -> Option<&Array3<f64>> {
        self.buffer.as_ref()
    }

    /// Raw mutable buffer access for manual overwrites. Reach it through
    /// [`Pipeline::product_mut`](crate::core::pipeline::Pipeline::product_mut)
    /// so the modification is stamped.
    pub fn buffer_mut(&mut self) -> Option<&mut Array3<f64>> {
        self.buffer.as_mut()
    }

    pub(crate) fn channels(&self) -> usize {
        self.extent.as_ref().map_or(0, |e| e.channels)
    }

    /// Make sure the buffer covers `region` with `channels` planes.
    ///
    /// An existing buffer that already covers the region is kept and its
    /// contents preserved; otherwise a zeroed buffer over exactly `region`
    /// replaces it.
    pub(crate) fn ensure_allocated(&mut self, region: Region, channels: usize) {
        let fits = self.buffer.as_ref().is_some_and(|b| {
            self.buffered.contains(&region) && !self.buffered.is_empty() && b.dim().2 == channels
        });
        if !fits {
            self.buffer = Some(Array3::zeros((region.height(), region.width(), channels)));
            self.buffered = region;
        }
    }

    pub(crate) fn clear_buffer(&mut self) {
        self.buffer = None;
        self.buffered = Region::empty();
    }

    /// Read view of `region`, which must lie inside the buffered region.
    pub fn view(&self, region: Region) -> TileView<'_> {
        debug_assert!(self.buffered.contains(&region));
        let buf = self
            .buffer
            .as_ref()
            .expect("view() on a product without a buffer");
        let sx = (region.origin[0] - self.buffered.origin[0]) as usize;
        let sy = (region.origin[1] - self.buffered.origin[1]) as usize;
        TileView {
            region,
            data: buf.slice(s![sy..sy + region.height(), sx..sx + region.width(), ..]),
        }
    }

    /// Write view of `region`, which must lie inside the buffered region.
    pub(crate) fn view_mut(&mut self, region: Region) -> TileViewMut<'_> {
        debug_assert!(self.buffered.contains(&region));
        let buffered = self.buffered;
        let buf = self
            .buffer
            .as_mut()
            .expect("view_mut() on a product without a buffer");
        let sx = (region.origin[0] - buffered.origin[0]) as usize;
        let sy = (region.origin[1] - buffered.origin[1]) as usize;
        TileViewMut {
            region,
            data: buf.slice_mut(s![sy..sy + region.height(), sx..sx + region.width(), ..]),
        }
    }

    /// GraftOutput: take over `src`'s buffer, extent and regions by move.
    ///
    /// Afterwards exactly one of the two products holds the live buffer;
    /// `src` keeps its extent for metadata queries but its regions are reset
    /// to empty rather than left pointing at moved-out storage.
    pub(crate) fn graft_from(&mut self, src: &mut Product) {
        self.extent = src.extent.clone();
        self.buffer = src.buffer.take();
        self.buffered = src.buffered;
        self.requested = src.requested;
        src.buffered = Region::empty();
        src.requested = Region::empty();
    }

    /// Detach the buffer, leaving the product empty. Used by callers that
    /// want to own the final result without a copy.
    pub(crate) fn take_buffer(&mut self) -> Option<(Region, Array3<f64>)> {
        let region = self.buffered;
        let buf = self.buffer.take()?;
        self.buffered = Region::empty();
        self.requested = Region::empty();
        Some((region, buf))
    }
}

/// Read-only, absolute-indexed view of one product's buffered data.
#[derive(Clone)]
pub struct TileView<'a> {
    region: Region,
    data: ArrayView3<'a, f64>,
}

impl<'a> TileView<'a> {
    pub fn region(&self) -> Region {
        self.region
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// Sample at an absolute index; must lie inside the view's region.
    #[inline]
    pub fn at(&self, x: i64, y: i64, c: usize) -> f64 {
        let ix = (x - self.region.origin[0]) as usize;
        let iy = (y - self.region.origin[1]) as usize;
        self.data[[iy, ix, c]]
    }

    /// Sample with clamp-to-edge semantics for indices outside the region.
    #[inline]
    pub fn at_clamped(&self, x: i64, y: i64, c: usize) -> f64 {
        let cx = x.clamp(self.region.origin[0], self.region.end(0) - 1);
        let cy = y.clamp(self.region.origin[1], self.region.end(1) - 1);
        self.at(cx, cy, c)
    }

    pub fn data(&self) -> &ArrayView3<'a, f64> {
        &self.data
    }
}

/// Exclusive, absolute-indexed view of one worker's output slice.
pub struct TileViewMut<'a> {
    region: Region,
    data: ArrayViewMut3<'a, f64>,
}

impl<'a> TileViewMut<'a> {
    pub(crate) fn new(region: Region, data: ArrayViewMut3<'a, f64>) -> Self {
        Self { region, data }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    #[inline]
    pub fn set(&mut self, x: i64, y: i64, c: usize, value: f64) {
        let ix = (x - self.region.origin[0]) as usize;
        let iy = (y - self.region.origin[1]) as usize;
        self.data[[iy, ix, c]] = value;
    }

    #[inline]
    pub fn at(&self, x: i64, y: i64, c: usize) -> f64 {
        let ix = (x - self.region.origin[0]) as usize;
        let iy = (y - self.region.origin[1]) as usize;
        self.data[[iy, ix, c]]
    }

    /// Split along a region axis into two disjoint views. `index` is the
    /// size of the first part along that axis.
    pub(crate) fn split_at(self, axis: usize, index: usize) -> (Self, Self) {
        let nd_axis = ndarray::Axis(if axis == 0 { 1 } else { 0 });
        let (a, b) = self.data.split_at(nd_axis, index);
        let mut ra = self.region;
        let mut rb = self.region;
        ra.size[axis] = index;
        rb.origin[axis] += index as i64;
        rb.size[axis] -= index;
        (Self { region: ra, data: a }, Self { region: rb, data: b })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_with(region: Region, channels: usize) -> Product {
        let mut p = Product::new(StageId::dangling(), 0);
        p.set_extent(Extent::new(region, channels));
        p.ensure_allocated(region, channels);
        p
    }

    #[test]
    fn views_address_absolute_indices() {
        let region = Region::new([10, 20], [4, 3]);
        let mut p = product_with(region, 2);
        {
            let mut v = p.view_mut(region);
            v.set(10, 20, 0, 1.5);
            v.set(13, 22, 1, -2.0);
        }
        let v = p.view(region);
        assert_eq!(v.at(10, 20, 0), 1.5);
        assert_eq!(v.at(13, 22, 1), -2.0);
        assert_eq!(v.at_clamped(9, 19, 0), 1.5);
    }

    #[test]
    fn ensure_allocated_keeps_covering_buffer() {
        let region = Region::new([0, 0], [8, 8]);
        let mut p = product_with(region, 1);
        p.view_mut(region).set(3, 3, 0, 7.0);
        p.ensure_allocated(Region::new([2, 2], [4, 4]), 1);
        assert_eq!(p.buffered(), region);
        assert_eq!(p.view(p.buffered()).at(3, 3, 0), 7.0);

        p.ensure_allocated(Region::new([0, 0], [16, 16]), 1);
        assert_eq!(p.buffered(), Region::new([0, 0], [16, 16]));
        assert_eq!(p.view(p.buffered()).at(3, 3, 0), 0.0);
    }

    #[test]
    fn graft_moves_buffer_exclusively() {
        let region = Region::new([0, 0], [4, 4]);
        let mut inner = product_with(region, 1);
        inner.set_requested(region);
        inner.view_mut(region).set(1, 1, 0, 9.0);

        let mut outer = Product::new(StageId::dangling(), 0);
        outer.graft_from(&mut inner);

        assert!(inner.buffer().is_none());
        assert!(inner.buffered().is_empty());
        assert!(inner.requested().is_empty());
        assert_eq!(outer.buffered(), region);
        assert_eq!(outer.view(region).at(1, 1, 0), 9.0);
    }

    #[test]
    fn split_views_are_disjoint_and_exact() {
        let region = Region::new([0, 0], [6, 4]);
        let mut p = product_with(region, 1);
        {
            let v = p.view_mut(region);
            let (mut left, mut right) = v.split_at(0, 2);
            assert_eq!(left.region(), Region::new([0, 0], [2, 4]));
            assert_eq!(right.region(), Region::new([2, 0], [4, 4]));
            left.set(0, 0, 0, 1.0);
            right.set(2, 0, 0, 2.0);
        }
        let v = p.view(region);
        assert_eq!(v.at(0, 0, 0), 1.0);
        assert_eq!(v.at(2, 0, 0), 2.0);
    }
}
