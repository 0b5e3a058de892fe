//! Threaded execution: region splitting and fork-join dispatch.
//!
//! A dispatch partitions the longest splittable axis of the requested
//! region into `min(thread_count, size)` contiguous sub-regions and runs
//! the stage's compute callback over them on scoped rayon workers. Each
//! worker owns the disjoint output view for its own sub-region (obtained by
//! splitting ndarray views, so exclusivity is structural) and its own
//! scratch clone. Worker errors are captured per worker and aggregated
//! after the join; nothing unwinds across the scope boundary.
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::product::{TileView, TileViewMut};
use crate::core::region::Region;
use crate::core::stage::{Scratch, SplitConstraint, Stage};
use crate::error::{ComputeError, Error, Result};

/// Longest splittable axis of `region`, or `None` if the stage forbids
/// splitting every axis.
pub fn choose_axis(region: &Region, constraint: SplitConstraint) -> Option<usize> {
    let mut best: Option<usize> = None;
    for axis in 0..2 {
        if !constraint.splittable(axis) {
            continue;
        }
        match best {
            Some(b) if region.size[b] >= region.size[axis] => {}
            _ => best = Some(axis),
        }
    }
    best
}

/// Partition `region` along `axis` into at most `parts` contiguous,
/// non-overlapping, gap-free sub-regions whose union equals `region`
/// exactly. Fewer sub-regions are produced when `parts` exceeds the axis
/// size.
pub fn split(region: &Region, axis: usize, parts: usize) -> Vec<Region> {
    if region.is_empty() {
        return Vec::new();
    }
    let n = parts.clamp(1, region.size[axis]);
    let base = region.size[axis] / n;
    let rem = region.size[axis] % n;
    let mut out = Vec::with_capacity(n);
    let mut cursor = region.origin[axis];
    for i in 0..n {
        let len = base + usize::from(i < rem);
        let mut sub = *region;
        sub.origin[axis] = cursor;
        sub.size[axis] = len;
        cursor += len as i64;
        out.push(sub);
    }
    out
}

/// Number of workers a dispatch over `region` will actually use.
pub fn worker_count(region: &Region, constraint: SplitConstraint, thread_count: usize) -> usize {
    match choose_axis(region, constraint) {
        Some(axis) => thread_count.clamp(1, region.size[axis].max(1)),
        None => 1,
    }
}

/// Run `stage.compute` across `region` with the given worker count.
///
/// `outputs` holds one write view per stage output, each covering exactly
/// `region`. `scratch` is either empty or holds one clone per worker.
/// The abort flag is polled between sub-region spawns and at worker entry;
/// a cancelled dispatch reports [`Error::Aborted`].
pub(crate) fn dispatch(
    stage: &dyn Stage,
    inputs: &[TileView<'_>],
    outputs: Vec<TileViewMut<'_>>,
    region: Region,
    thread_count: usize,
    scratch: &mut [Scratch],
    abort: &AtomicBool,
) -> Result<()> {
    if region.is_empty() {
        return Ok(());
    }
    let axis = choose_axis(&region, stage.split_constraint());
    let subregions = match axis {
        Some(a) => split(&region, a, thread_count),
        None => vec![region],
    };
    let workers = subregions.len();

    // Carve every output view into per-worker slices along the split axis.
    let mut per_worker: Vec<Vec<TileViewMut<'_>>> =
        (0..workers).map(|_| Vec::with_capacity(outputs.len())).collect();
    for view in outputs {
        let mut rest = view;
        if let Some(a) = axis {
            for (i, sub) in subregions.iter().enumerate().take(workers - 1) {
                let (head, tail) = rest.split_at(a, sub.size[a]);
                per_worker[i].push(head);
                rest = tail;
            }
        }
        per_worker[workers - 1].push(rest);
    }

    let mut scratch_refs: Vec<Option<&mut Scratch>> = if scratch.is_empty() {
        (0..workers).map(|_| None).collect()
    } else {
        scratch.iter_mut().map(Some).collect()
    };

    let mut results: Vec<Option<ComputeError>> = (0..workers).map(|_| None).collect();
    let mut cancelled = false;

    rayon::scope(|scope| {
        let units = per_worker
            .drain(..)
            .zip(scratch_refs.drain(..))
            .zip(results.iter_mut())
            .enumerate();
        for (thread_id, ((mut outs, scratch_ref), slot)) in units {
            if abort.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
            scope.spawn(move |_| {
                if abort.load(Ordering::Relaxed) {
                    *slot = Some(ComputeError::Cancelled);
                    return;
                }
                if let Err(e) = stage.compute(inputs, &mut outs, scratch_ref, thread_id) {
                    *slot = Some(e);
                }
            });
        }
    });

    if cancelled || abort.load(Ordering::Relaxed) {
        return Err(Error::Aborted {
            stage: stage.name().to_string(),
        });
    }

    let failures: Vec<ComputeError> = results.into_iter().flatten().collect();
    if let Some(first) = failures.first() {
        return Err(Error::Compute {
            stage: stage.name().to_string(),
            workers,
            failures: failures.len(),
            first: first.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_partition(region: Region, subs: &[Region], axis: usize) {
        // Union equals the region, contiguous and gap-free.
        let mut cursor = region.origin[axis];
        let mut total = 0usize;
        for sub in subs {
            assert_eq!(sub.origin[axis], cursor);
            let other = 1 - axis;
            assert_eq!(sub.origin[other], region.origin[other]);
            assert_eq!(sub.size[other], region.size[other]);
            assert!(sub.size[axis] > 0);
            cursor = sub.end(axis);
            total += sub.size[axis];
        }
        assert_eq!(cursor, region.end(axis));
        assert_eq!(total, region.size[axis]);
        // Pairwise disjoint.
        for (i, a) in subs.iter().enumerate() {
            for b in subs.iter().skip(i + 1) {
                assert!(a.is_disjoint(b));
            }
        }
    }

    #[test]
    fn split_exact_even_and_ragged() {
        let region = Region::new([3, -2], [10, 7]);
        for parts in [1, 2, 3, 4, 7, 10] {
            let subs = split(&region, 0, parts);
            assert_eq!(subs.len(), parts.min(10));
            assert_exact_partition(region, &subs, 0);
        }
    }

    #[test]
    fn split_more_threads_than_rows() {
        let region = Region::new([0, 0], [64, 3]);
        let subs = split(&region, 1, 8);
        assert_eq!(subs.len(), 3);
        assert_exact_partition(region, &subs, 1);
    }

    #[test]
    fn split_empty_region_yields_nothing() {
        assert!(split(&Region::empty(), 0, 4).is_empty());
    }

    #[test]
    fn choose_axis_prefers_longest_splittable() {
        let region = Region::new([0, 0], [100, 40]);
        assert_eq!(choose_axis(&region, SplitConstraint::default()), Some(0));
        assert_eq!(
            choose_axis(&region, SplitConstraint { x: false, y: true }),
            Some(1)
        );
        assert_eq!(choose_axis(&region, SplitConstraint::none()), None);
    }

    #[test]
    fn worker_count_clamps_to_axis_size() {
        let region = Region::new([0, 0], [100, 2]);
        assert_eq!(worker_count(&region, SplitConstraint::default(), 8), 8);
        let thin = Region::new([0, 0], [2, 100]);
        assert_eq!(
            worker_count(&thin, SplitConstraint { x: true, y: false }, 8),
            2
        );
        assert_eq!(worker_count(&thin, SplitConstraint::none(), 8), 1);
    }
}
