//! The pipeline graph and the demand-driven update algorithm.
//!
//! Stages live in a generation-stamped arena together with their owned
//! output products; handles are plain ids, so a reference to a removed
//! stage is detected instead of dangling. `update` on a terminal product
//! walks the graph three times: metadata propagation from sources to sinks,
//! requested-region propagation from the sink back to sources, and an
//! execution pass that recomputes only stages whose cached state is stale
//! under the stamp/region invariant.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::Array3;
use tracing::debug;

use crate::core::extent::Extent;
use crate::core::product::{Product, TileView};
use crate::core::progress::{NullProgress, ProgressSink};
use crate::core::region::Region;
use crate::core::scheduler;
use crate::core::stage::{CompositeParts, ProductId, Stage, StageId, StageState};
use crate::core::stamp::Stamp;
use crate::error::{Error, Result};

struct Slot {
    stage: Box<dyn Stage>,
    inputs: Vec<Option<ProductId>>,
    outputs: Vec<Product>,
    state: StageState,
    execution_stamp: Stamp,
    /// Max stamp over this stage's parameters, wiring, input products and
    /// the whole upstream producer chain; refreshed by the metadata pass.
    pipeline_stamp: Stamp,
    wiring_stamp: Stamp,
    thread_count: usize,
    abort: Arc<AtomicBool>,
    progress: f64,
}

struct Entry {
    generation: u32,
    slot: Option<Slot>,
}

pub struct Pipeline {
    entries: Vec<Entry>,
    default_thread_count: usize,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            default_thread_count: rayon::current_num_threads().max(1),
        }
    }

    /// Add a stage; its output products are created immediately and owned
    /// by the pipeline slot for the stage's whole lifetime.
    pub fn add_stage(&mut self, stage: impl Stage) -> StageId {
        let index = self.entries.len() as u32;
        let id = StageId {
            index,
            generation: 0,
        };
        let outputs = (0..stage.num_outputs())
            .map(|k| Product::new(id, k))
            .collect();
        let inputs = vec![None; stage.num_inputs()];
        self.entries.push(Entry {
            generation: 0,
            slot: Some(Slot {
                stage: Box::new(stage),
                inputs,
                outputs,
                state: StageState::MetadataStale,
                execution_stamp: Stamp::ZERO,
                pipeline_stamp: Stamp::ZERO,
                wiring_stamp: Stamp::next(),
                thread_count: self.default_thread_count,
                abort: Arc::new(AtomicBool::new(false)),
                progress: 0.0,
            }),
        });
        id
    }

    /// Wire `product` into input `input` of `stage`. Reconnection is an
    /// extent-affecting change: it bumps the stage's wiring stamp.
    pub fn connect(&mut self, stage: StageId, input: usize, product: ProductId) -> Result<()> {
        self.product(product)?;
        let slot = self.slot_mut(stage)?;
        if input >= slot.inputs.len() {
            return Err(Error::Configuration {
                param: "input",
                value: format!("{input} out of {} on '{}'", slot.inputs.len(), slot.stage.name()),
            });
        }
        slot.inputs[input] = Some(product);
        slot.wiring_stamp = Stamp::next();
        slot.state = StageState::MetadataStale;
        Ok(())
    }

    /// Remove a stage and its products. Consumers referencing them are
    /// disconnected (their next update fails with `MissingInput` instead of
    /// touching recycled storage), and the stale handle itself becomes
    /// detectably dangling through the generation bump.
    pub fn remove_stage(&mut self, stage: StageId) -> Result<()> {
        self.slot(stage)?;
        for entry in &mut self.entries {
            let Some(slot) = entry.slot.as_mut() else {
                continue;
            };
            let mut detached = false;
            for input in slot.inputs.iter_mut() {
                if input.is_some_and(|pid| pid.stage == stage) {
                    *input = None;
                    detached = true;
                }
            }
            if detached {
                slot.wiring_stamp = Stamp::next();
                slot.state = StageState::MetadataStale;
            }
        }
        let entry = &mut self.entries[stage.index as usize];
        entry.slot = None;
        entry.generation += 1;
        Ok(())
    }

    /// Handle to output `index` of `stage`.
    pub fn output(&self, stage: StageId, index: usize) -> Result<ProductId> {
        let slot = self.slot(stage)?;
        if index >= slot.outputs.len() {
            return Err(Error::Configuration {
                param: "output",
                value: format!("{index} out of {} on '{}'", slot.outputs.len(), slot.stage.name()),
            });
        }
        Ok(ProductId {
            stage,
            output: index,
        })
    }

    pub fn product(&self, id: ProductId) -> Result<&Product> {
        let slot = self.slot(id.stage)?;
        slot.outputs.get(id.output).ok_or(Error::UnknownStage {
            index: id.stage.index,
            generation: id.stage.generation,
        })
    }

    /// Mutable product access for manual overwrites. Bumps the product's
    /// modification stamp, so downstream stages go stale.
    pub fn product_mut(&mut self, id: ProductId) -> Result<&mut Product> {
        let product = self.product_raw_mut(id)?;
        product.mark_modified();
        Ok(product)
    }

    /// Detach the buffered result of `id`, leaving the product empty.
    pub fn take_buffer(&mut self, id: ProductId) -> Result<(Region, Array3<f64>)> {
        let stage_name = self.slot(id.stage)?.stage.name().to_string();
        let product = self.product_raw_mut(id)?;
        product.take_buffer().ok_or(Error::MissingInput {
            stage: stage_name,
            input: id.output,
        })
    }

    /// Typed access to a stage for configuration reads.
    pub fn stage_ref<T: Stage>(&self, id: StageId) -> Result<&T> {
        let slot = self.slot(id)?;
        slot.stage
            .as_any()
            .downcast_ref::<T>()
            .ok_or(Error::Configuration {
                param: "stage",
                value: format!("'{}' is not the requested stage type", slot.stage.name()),
            })
    }

    /// Typed access to a stage for configuration setters. Parameter stamps
    /// carry the invalidation; mutate only outside a running update.
    pub fn stage_mut<T: Stage>(&mut self, id: StageId) -> Result<&mut T> {
        let slot = self.slot_mut(id)?;
        let name = slot.stage.name();
        slot.stage
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(Error::Configuration {
                param: "stage",
                value: format!("'{name}' is not the requested stage type"),
            })
    }

    pub fn set_thread_count(&mut self, stage: StageId, threads: usize) -> Result<()> {
        if threads == 0 {
            return Err(Error::Configuration {
                param: "threads",
                value: "0".to_string(),
            });
        }
        self.slot_mut(stage)?.thread_count = threads;
        Ok(())
    }

    /// Shared cancellation flag for `stage`; set it from any thread to
    /// cancel between sub-region dispatches.
    pub fn abort_handle(&self, stage: StageId) -> Result<Arc<AtomicBool>> {
        Ok(self.slot(stage)?.abort.clone())
    }

    pub fn request_abort(&self, stage: StageId) -> Result<()> {
        self.slot(stage)?.abort.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Aborts are sticky so a caller can observe the faulted state; clear
    /// explicitly before retrying.
    pub fn clear_abort(&self, stage: StageId) -> Result<()> {
        self.slot(stage)?.abort.store(false, Ordering::Relaxed);
        Ok(())
    }

    pub fn state(&self, stage: StageId) -> Result<StageState> {
        Ok(self.slot(stage)?.state)
    }

    pub fn execution_stamp(&self, stage: StageId) -> Result<Stamp> {
        Ok(self.slot(stage)?.execution_stamp)
    }

    pub fn progress(&self, stage: StageId) -> Result<f64> {
        Ok(self.slot(stage)?.progress)
    }

    /// Bring the whole product up to date over its full extent.
    pub fn update(&mut self, product: ProductId) -> Result<()> {
        self.update_region_with_progress(product, None, &mut NullProgress)
    }

    /// Bring `region` of the product up to date.
    pub fn update_region(&mut self, product: ProductId, region: Region) -> Result<()> {
        self.update_region_with_progress(product, Some(region), &mut NullProgress)
    }

    /// The full update protocol: metadata propagation (top-down),
    /// requested-region propagation (bottom-up from the pulled sink), then
    /// execution of every stale stage in dependency order. Blocks until the
    /// walked pipeline segment completes or faults.
    pub fn update_region_with_progress(
        &mut self,
        product: ProductId,
        region: Option<Region>,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        self.propagate_metadata(product)?;

        let full = self.extent_of(product)?.full_region;
        let requested = region.unwrap_or(full);

        let mut touched = HashSet::new();
        self.region_pass(product.stage, requested, &mut touched)?;

        let mut done = HashSet::new();
        self.execute_pass(product.stage, sink, &mut done)
    }

    /// Run only the metadata propagation pass for the sub-graph feeding
    /// `product` and return the product's extent.
    pub fn propagate_metadata(&mut self, product: ProductId) -> Result<Extent> {
        let mut visiting = Vec::new();
        let mut done = HashMap::new();
        self.metadata_pass(product.stage, &mut visiting, &mut done)?;
        self.extent_of(product)
    }

    fn extent_of(&self, product: ProductId) -> Result<Extent> {
        let name = self.slot(product.stage)?.stage.name().to_string();
        self.product(product)?
            .extent()
            .cloned()
            .ok_or(Error::MissingInput {
                stage: name,
                input: product.output,
            })
    }

    // ---- pass 1: metadata -------------------------------------------------

    fn metadata_pass(
        &mut self,
        stage: StageId,
        visiting: &mut Vec<StageId>,
        done: &mut HashMap<StageId, Stamp>,
    ) -> Result<Stamp> {
        if let Some(stamp) = done.get(&stage) {
            return Ok(*stamp);
        }
        if visiting.contains(&stage) {
            return Err(Error::Cycle {
                stage: self.slot(stage)?.stage.name().to_string(),
            });
        }
        visiting.push(stage);

        let slot = self.slot(stage)?;
        let name = slot.stage.name();
        let input_ids = slot.inputs.clone();
        let mut pipeline_stamp = slot.stage.param_stamp().max(slot.wiring_stamp);

        let mut input_extents = Vec::with_capacity(input_ids.len());
        for (i, maybe_pid) in input_ids.iter().enumerate() {
            let pid = maybe_pid.ok_or_else(|| Error::MissingInput {
                stage: name.to_string(),
                input: i,
            })?;
            let upstream = self.metadata_pass(pid.stage, visiting, done)?;
            let product = self.product(pid)?;
            let extent = product.extent().cloned().ok_or_else(|| Error::MissingInput {
                stage: name.to_string(),
                input: i,
            })?;
            pipeline_stamp = pipeline_stamp.max(upstream).max(product.modified());
            input_extents.push(extent);
        }

        let mut slot = self.take_slot(stage)?;
        let result = slot.stage.output_metadata(&input_extents);
        let outcome = result.and_then(|extents| {
            Self::apply_output_extents(&mut slot, extents, pipeline_stamp)
        });
        self.put_slot(stage, slot);
        outcome?;

        visiting.pop();
        done.insert(stage, pipeline_stamp);
        Ok(pipeline_stamp)
    }

    fn apply_output_extents(
        slot: &mut Slot,
        extents: Vec<Extent>,
        pipeline_stamp: Stamp,
    ) -> Result<()> {
        if extents.len() != slot.outputs.len() {
            return Err(Error::Configuration {
                param: "outputs",
                value: format!(
                    "'{}' produced {} extents for {} outputs",
                    slot.stage.name(),
                    extents.len(),
                    slot.outputs.len()
                ),
            });
        }
        // Multi-output stages must share one full region; dispatch splits
        // all outputs with the same sub-region geometry.
        if let Some(first) = extents.first() {
            if extents.iter().any(|e| e.full_region != first.full_region) {
                return Err(Error::Configuration {
                    param: "outputs",
                    value: format!("'{}' outputs disagree on full region", slot.stage.name()),
                });
            }
        }
        for (product, extent) in slot.outputs.iter_mut().zip(extents) {
            if product.extent() != Some(&extent) {
                product.clear_buffer();
            }
            product.set_extent(extent);
        }
        slot.pipeline_stamp = pipeline_stamp;
        if slot.execution_stamp < pipeline_stamp {
            slot.state = StageState::RegionStale;
        }
        Ok(())
    }

    // ---- pass 2: requested regions ---------------------------------------

    fn region_pass(
        &mut self,
        stage: StageId,
        region: Region,
        touched: &mut HashSet<StageId>,
    ) -> Result<()> {
        let slot = self.slot(stage)?;
        let name = slot.stage.name().to_string();
        let full = match slot.outputs.first().and_then(|p| p.extent()) {
            Some(extent) => extent.full_region,
            None => {
                return Err(Error::MissingInput {
                    stage: name,
                    input: 0,
                });
            }
        };

        let clamped = region.crop_to(&full);
        if clamped.is_empty() {
            return Err(Error::Region {
                stage: name,
                requested: region,
                available: full,
            });
        }

        // A stage pulled through several consumers serves the bounding
        // union of their requests this pass.
        let effective = if touched.contains(&stage) {
            let prior = slot.outputs[0].requested();
            if prior.contains(&clamped) {
                return Ok(());
            }
            prior.bounding_union(&clamped)
        } else {
            clamped
        };
        touched.insert(stage);

        let input_ids = slot.inputs.clone();
        let mut input_requests = Vec::with_capacity(input_ids.len());
        for (i, maybe_pid) in input_ids.iter().enumerate() {
            let pid = maybe_pid.ok_or_else(|| Error::MissingInput {
                stage: name.clone(),
                input: i,
            })?;
            let request = self.resolved_input_region(stage, i, pid, &effective)?;
            input_requests.push((pid, request));
        }

        let slot = self.slot_mut(stage)?;
        for product in slot.outputs.iter_mut() {
            product.set_requested(effective);
        }
        let stale_region = slot
            .outputs
            .iter()
            .any(|p| !p.buffered().contains(&p.requested()));
        if stale_region || slot.execution_stamp < slot.pipeline_stamp {
            slot.state = StageState::DataStale;
        } else if slot.state != StageState::Faulted {
            slot.state = StageState::UpToDate;
        }

        for (pid, request) in input_requests {
            self.region_pass(pid.stage, request, touched)?;
        }
        Ok(())
    }

    /// The input region `stage` needs from input `input` to produce
    /// `output_region`: the stage's own propagation hook, clamped to the
    /// input's full extent, with fail-fast on collapse to empty.
    fn resolved_input_region(
        &self,
        stage: StageId,
        input: usize,
        pid: ProductId,
        output_region: &Region,
    ) -> Result<Region> {
        let slot = self.slot(stage)?;
        let name = slot.stage.name().to_string();
        let input_extent = self
            .product(pid)?
            .extent()
            .cloned()
            .ok_or_else(|| Error::MissingInput {
                stage: name.clone(),
                input,
            })?;
        let raw = slot
            .stage
            .input_region(input, &input_extent, output_region)?;
        let clamped = raw.crop_to(&input_extent.full_region);
        if clamped.is_empty() {
            return Err(Error::Region {
                stage: name,
                requested: raw,
                available: input_extent.full_region,
            });
        }
        Ok(clamped)
    }

    // ---- pass 3: execution ------------------------------------------------

    fn execute_pass(
        &mut self,
        stage: StageId,
        sink: &mut dyn ProgressSink,
        done: &mut HashSet<StageId>,
    ) -> Result<()> {
        if done.contains(&stage) {
            return Ok(());
        }
        let input_ids = self.slot(stage)?.inputs.clone();
        for maybe_pid in input_ids.into_iter() {
            if let Some(pid) = maybe_pid {
                self.execute_pass(pid.stage, sink, done)?;
            }
        }
        done.insert(stage);

        if !self.is_stale(stage)? {
            let slot = self.slot_mut(stage)?;
            slot.state = StageState::UpToDate;
            slot.progress = 1.0;
            sink.progress(stage, 1.0);
            return Ok(());
        }
        self.execute_stage(stage, sink)
    }

    /// The global cache-validity invariant: stale when the execution stamp
    /// trails any upstream modification, or any output's buffer does not
    /// cover its requested region.
    fn is_stale(&self, stage: StageId) -> Result<bool> {
        let slot = self.slot(stage)?;
        if slot.execution_stamp < slot.pipeline_stamp {
            return Ok(true);
        }
        Ok(slot
            .outputs
            .iter()
            .any(|p| !p.buffered().contains(&p.requested())))
    }

    fn execute_stage(&mut self, stage: StageId, sink: &mut dyn ProgressSink) -> Result<()> {
        {
            let slot = self.slot_mut(stage)?;
            let region = slot
                .outputs
                .first()
                .map(|p| p.requested())
                .unwrap_or_default();
            debug!(stage = slot.stage.name(), region = %region, "executing stage");
            slot.state = StageState::Executing;
            slot.progress = 0.0;
        }
        sink.progress(stage, 0.0);

        let mut slot = self.take_slot(stage)?;
        let result = self.run_taken(&mut slot);
        match &result {
            Ok(()) => {
                slot.state = StageState::UpToDate;
                slot.execution_stamp = Stamp::next();
                slot.progress = 1.0;
            }
            Err(e) => {
                debug!(stage = slot.stage.name(), error = %e, "stage faulted");
                slot.state = StageState::Faulted;
                // Partial worker output must never be mistaken for valid
                // cached data: drop the buffers, keep the stamps.
                for product in slot.outputs.iter_mut() {
                    product.clear_buffer();
                }
            }
        }
        self.put_slot(stage, slot);
        if result.is_ok() {
            sink.progress(stage, 1.0);
        }
        result
    }

    fn run_taken(&self, slot: &mut Slot) -> Result<()> {
        let name = slot.stage.name().to_string();
        let requested = slot.outputs[0].requested();

        // Read views of every input over the region this stage asked for.
        let mut input_extents = Vec::with_capacity(slot.inputs.len());
        let mut input_views: Vec<TileView<'_>> = Vec::with_capacity(slot.inputs.len());
        for (i, maybe_pid) in slot.inputs.iter().enumerate() {
            let pid = maybe_pid.ok_or_else(|| Error::MissingInput {
                stage: name.clone(),
                input: i,
            })?;
            let extent = self
                .product(pid)?
                .extent()
                .cloned()
                .ok_or_else(|| Error::MissingInput {
                    stage: name.clone(),
                    input: i,
                })?;
            let raw = slot.stage.input_region(i, &extent, &requested)?;
            let region = raw.crop_to(&extent.full_region);
            input_views.push(self.product(pid)?.view(region));
            input_extents.push(extent);
        }

        if slot.stage.composite().is_some() {
            slot.stage.bind_inputs(&input_extents, &input_views)?;
            drop(input_views);
            if let Some(CompositeParts {
                pipeline,
                sink,
                tracker,
            }) = slot.stage.composite()
            {
                tracker.reset();
                tracker.validate()?;
                pipeline.update_region_with_progress(sink, Some(requested), tracker)?;
                let sink_product = pipeline.product_raw_mut(sink)?;
                slot.outputs[0].graft_from(sink_product);
            }
            return Ok(());
        }

        for product in slot.outputs.iter_mut() {
            let channels = product.channels();
            product.ensure_allocated(requested, channels);
        }

        let workers =
            scheduler::worker_count(&requested, slot.stage.split_constraint(), slot.thread_count);
        let mut scratch = slot.stage.before_compute(workers)?;
        if !scratch.is_empty() && scratch.len() != workers {
            return Err(Error::Configuration {
                param: "scratch",
                value: format!(
                    "'{name}' materialized {} scratch clones for {workers} workers",
                    scratch.len()
                ),
            });
        }
        let outputs = slot
            .outputs
            .iter_mut()
            .map(|p| p.view_mut(requested))
            .collect();
        scheduler::dispatch(
            &*slot.stage,
            &input_views,
            outputs,
            requested,
            workers,
            &mut scratch,
            &slot.abort,
        )?;
        drop(input_views);
        slot.stage.after_compute(scratch)
    }

    // ---- arena plumbing ---------------------------------------------------

    fn entry(&self, id: StageId) -> Result<&Entry> {
        let entry = self
            .entries
            .get(id.index as usize)
            .filter(|e| e.generation == id.generation);
        entry.ok_or(Error::UnknownStage {
            index: id.index,
            generation: id.generation,
        })
    }

    fn slot(&self, id: StageId) -> Result<&Slot> {
        self.entry(id)?.slot.as_ref().ok_or(Error::UnknownStage {
            index: id.index,
            generation: id.generation,
        })
    }

    fn slot_mut(&mut self, id: StageId) -> Result<&mut Slot> {
        let entry = self
            .entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .ok_or(Error::UnknownStage {
                index: id.index,
                generation: id.generation,
            })?;
        entry.slot.as_mut().ok_or(Error::UnknownStage {
            index: id.index,
            generation: id.generation,
        })
    }

    fn product_raw_mut(&mut self, id: ProductId) -> Result<&mut Product> {
        let slot = self.slot_mut(id.stage)?;
        slot.outputs.get_mut(id.output).ok_or(Error::UnknownStage {
            index: id.stage.index,
            generation: id.stage.generation,
        })
    }

    fn take_slot(&mut self, id: StageId) -> Result<Slot> {
        let entry = self
            .entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .ok_or(Error::UnknownStage {
                index: id.index,
                generation: id.generation,
            })?;
        entry.slot.take().ok_or(Error::UnknownStage {
            index: id.index,
            generation: id.generation,
        })
    }

    fn put_slot(&mut self, id: StageId, slot: Slot) {
        self.entries[id.index as usize].slot = Some(slot);
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
