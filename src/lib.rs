#![doc = r#"
RASTERFLOW — a demand-driven raster processing pipeline core.

This crate provides the scheduling, caching and data-ownership machinery for
region-based remote-sensing pipelines: stages are wired into a graph, and a
single `update` call on a terminal product propagates metadata downstream,
propagates the requested region upstream, and recomputes exactly the stages
whose cached state is stale. Compute kernels are simple per-tile functions;
the scheduler splits each request across a bounded worker pool and joins
before returning.

What the core guarantees
------------------------
- After a successful update, every product's buffered region covers the
  requested region.
- A second update with no configuration, input or auxiliary-object change
  recomputes nothing.
- Outputs are bit-identical whatever the worker thread count.
- A faulted stage never advances its stamps: the next update retries.

Quick start: wire and pull a pipeline
-------------------------------------
```rust
use rasterflow::core::pipeline::Pipeline;
use rasterflow::core::region::Region;
use rasterflow::stages::{BoxFilter, SyntheticSource};
use rasterflow::types::Pattern;

fn main() -> rasterflow::Result<()> {
    let mut pipeline = Pipeline::new();

    let mut scene = SyntheticSource::new(512, 512);
    scene.set_pattern(Pattern::RampX);
    let scene = pipeline.add_stage(scene);
    let smooth = pipeline.add_stage(BoxFilter::new(2));

    let scene_out = pipeline.output(scene, 0)?;
    pipeline.connect(smooth, 0, scene_out)?;
    let out = pipeline.output(smooth, 0)?;

    // Demand only a window; upstream requests are dilated and clamped
    // automatically, and later updates reuse everything still valid.
    let window = Region::new([100, 100], [64, 64]);
    pipeline.update_region(out, window)?;

    let view = pipeline.product(out)?.view(window);
    assert_eq!(view.at(120, 110, 0), 120.0);
    Ok(())
}
```

One-call helpers over in-memory arrays
--------------------------------------
```rust
use ndarray::Array3;
use rasterflow::{band_index, IndexOp};

fn main() -> rasterflow::Result<()> {
    let nir = Array3::from_elem((256, 256, 1), 0.8);
    let red = Array3::from_elem((256, 256, 1), 0.2);
    let ndvi = band_index(nir, red, IndexOp::NDiff, 4)?;
    assert!((ndvi[[0, 0, 0]] - 0.6).abs() < 1e-12);
    Ok(())
}
```

Caching and invalidation
------------------------
Every parameter setter bumps a modification stamp, including setters on
bound auxiliary objects such as expression evaluators. An update recomputes
a stage only when some upstream stamp passed its execution stamp or the
requested region outgrew the buffered one.

Error handling
--------------
All public functions return `rasterflow::Result<T>`; match on
`rasterflow::Error` to handle specific cases. Configuration and propagation
failures surface before any buffer is touched; worker failures are
collected per worker and aggregated after the join.

```rust,no_run
use rasterflow::{Error, Result};

fn report(result: Result<()>) {
    match result {
        Ok(()) => {}
        Err(Error::MissingInput { stage, input }) => {
            eprintln!("stage {stage} is missing input {input}")
        }
        Err(Error::Compute { failures, workers, .. }) => {
            eprintln!("{failures} of {workers} workers failed")
        }
        Err(other) => eprintln!("update failed: {other}"),
    }
}
```

Useful modules
--------------
- [`core`] — pipeline graph, regions, products, scheduler, progress.
- [`stages`] — built-in sources, filters, band math, and the composite
  bright-target detector.
- [`eval`] — the expression-evaluator contract and the built-in index
  algebra registry.
- [`api`] — high-level, ergonomic entry points.
- [`error`] — crate-level `Error` and `Result`.
"#]

// Core modules (public)
pub mod api;
pub mod core;
pub mod error;
pub mod eval;
pub mod stages;
pub mod types;

// Curated public API surface
// Types
pub use core::extent::Extent;
pub use core::pipeline::Pipeline;
pub use core::product::{Product, TileView, TileViewMut};
pub use core::progress::{NullProgress, ProgressSink, ProgressTracker};
pub use core::region::Region;
pub use core::stage::{
    CompositeParts, ProducerRef, ProductId, Scratch, SplitConstraint, Stage, StageId, StageState,
};
pub use core::stamp::{Param, Stamp};
pub use error::{ComputeError, Error, EvalError, Result};
pub use types::{IndexOp, Pattern};

// Evaluator contract and registry
pub use eval::{Evaluator, IndexEvaluator, create_evaluator, evaluator_names, register_evaluator};

// High-level API re-exports
pub use api::{Detection, band_index, detect_bright_targets, sar_intensity};
