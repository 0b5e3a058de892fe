//! The stage contract: propagation hooks, compute hooks, and execution state.
//!
//! A stage is a pipeline node transforming input products into output
//! products through a per-tile compute callback. Stages live in a
//! generation-stamped arena owned by [`Pipeline`](crate::core::pipeline::Pipeline);
//! handles ([`StageId`], [`ProductId`]) are lookup-only and detectably
//! dangle after removal instead of extending lifetimes.
use std::any::Any;

use crate::core::extent::Extent;
use crate::core::product::{TileView, TileViewMut};
use crate::core::progress::ProgressTracker;
use crate::core::region::Region;
use crate::core::stamp::Stamp;
use crate::error::{ComputeError, Result};

/// Handle to a stage slot in the pipeline arena. Generation-stamped:
/// resolving a handle whose stage was removed fails with
/// [`Error::UnknownStage`](crate::error::Error::UnknownStage) rather than
/// touching recycled storage.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct StageId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl StageId {
    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        Self {
            index: u32::MAX,
            generation: 0,
        }
    }
}

/// Handle to one output product of a stage.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ProductId {
    pub stage: StageId,
    pub output: usize,
}

/// Back-reference from a product to its producing stage. Lookup only.
pub type ProducerRef = ProductId;

/// Execution state of a stage across the update passes.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum StageState {
    #[default]
    Idle,
    /// An extent-affecting change (configuration, reconnection) happened
    /// since the last metadata propagation.
    MetadataStale,
    /// Metadata is current but the requested region changed since the last
    /// region propagation.
    RegionStale,
    /// Regions are propagated and the cache-validity invariant fails.
    DataStale,
    Executing,
    UpToDate,
    /// An error occurred while executing; stamps and buffered regions were
    /// left untouched so the next update retries.
    Faulted,
}

/// Which region axes the scheduler may partition for this stage.
///
/// A stage whose kernel mixes data along an axis (a transform that mixes
/// rows, say) declares that axis unsplittable and the scheduler will not
/// partition it.
#[derive(Copy, Clone, Debug)]
pub struct SplitConstraint {
    pub x: bool,
    pub y: bool,
}

impl Default for SplitConstraint {
    fn default() -> Self {
        Self { x: true, y: true }
    }
}

impl SplitConstraint {
    pub fn none() -> Self {
        Self { x: false, y: false }
    }

    pub fn splittable(&self, axis: usize) -> bool {
        match axis {
            0 => self.x,
            _ => self.y,
        }
    }
}

/// Per-thread scratch state materialized by `before_compute`. The scheduler
/// hands each worker exclusive access to the clone at its own thread index.
pub type Scratch = Box<dyn Any + Send>;

/// Borrowed pieces of a composite (mini-pipeline) stage.
///
/// Returned by [`Stage::composite`]; the executor drives the inner pipeline
/// through these instead of dispatching the stage's own compute callback.
pub struct CompositeParts<'a> {
    pub pipeline: &'a mut crate::core::pipeline::Pipeline,
    /// The inner product to pull and then graft into the outer output.
    pub sink: ProductId,
    pub tracker: &'a mut ProgressTracker,
}

/// A pipeline node. Implementations supply the two propagation hooks and
/// the compute hooks; the pipeline owns wiring, staleness and dispatch.
pub trait Stage: Send + Sync + Any {
    fn name(&self) -> &'static str;

    fn num_inputs(&self) -> usize;

    /// Number of output products; must be at least 1.
    fn num_outputs(&self) -> usize {
        1
    }

    /// Most recent modification stamp over this stage's configuration and
    /// any bound auxiliary objects (expression evaluators and the like).
    fn param_stamp(&self) -> Stamp {
        Stamp::ZERO
    }

    /// Metadata propagation hook: compute output extents from input extents
    /// and configuration. Never allocates buffers, never touches regions.
    fn output_metadata(&mut self, inputs: &[Extent]) -> Result<Vec<Extent>>;

    /// Requested-region propagation hook: the input region needed to produce
    /// `output_region`. The default is the pointwise policy: the output
    /// region clamped to the input's full extent. Neighborhood stages dilate
    /// first; whole-extent stages return the full input region regardless.
    fn input_region(
        &self,
        input: usize,
        input_extent: &Extent,
        output_region: &Region,
    ) -> Result<Region> {
        let _ = input;
        Ok(output_region.crop_to(&input_extent.full_region))
    }

    fn split_constraint(&self) -> SplitConstraint {
        SplitConstraint::default()
    }

    /// Setup hook, run exactly once per update outside the threaded section.
    /// Returns the per-thread scratch clones; either empty (stateless
    /// kernel) or exactly `thread_count` entries.
    fn before_compute(&mut self, thread_count: usize) -> Result<Vec<Scratch>> {
        let _ = thread_count;
        Ok(Vec::new())
    }

    /// Per-tile kernel. Each worker receives read views of the stage's
    /// inputs over their requested regions, exclusive write views of its own
    /// disjoint output sub-region, and exclusive access to its own scratch
    /// clone. Must be a pure function of those: results are required to be
    /// bit-identical for any thread count.
    fn compute(
        &self,
        inputs: &[TileView<'_>],
        outputs: &mut [TileViewMut<'_>],
        scratch: Option<&mut Scratch>,
        thread_id: usize,
    ) -> std::result::Result<(), ComputeError>;

    /// Reduction hook, run exactly once per update after all workers join.
    /// Scratch clones arrive in ascending thread-id order.
    fn after_compute(&mut self, scratch: Vec<Scratch>) -> Result<()> {
        let _ = scratch;
        Ok(())
    }

    /// Bridge hook for composite stages: receive the outer input tiles
    /// before the inner pipeline runs. Leaf stages ignore it.
    fn bind_inputs(&mut self, extents: &[Extent], inputs: &[TileView<'_>]) -> Result<()> {
        let _ = (extents, inputs);
        Ok(())
    }

    /// Composite stages expose their inner pipeline here; the executor then
    /// runs it and grafts its sink product instead of calling `compute`.
    fn composite(&mut self) -> Option<CompositeParts<'_>> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
