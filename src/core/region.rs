//! Axis-aligned index-space boxes.
//!
//! A [`Region`] is the unit of demand in the pipeline: requests propagate
//! upstream as regions, buffers are allocated over regions, and the
//! scheduler partitions regions into per-worker sub-regions. Axis 0 is x
//! (columns), axis 1 is y (rows).
use serde::{Deserialize, Serialize};

/// An axis-aligned index-space box: start index plus size per dimension.
///
/// A region with any zero size is empty. Immutable value type; every
/// operation returns a new region.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Region {
    pub origin: [i64; 2],
    pub size: [usize; 2],
}

impl Region {
    pub fn new(origin: [i64; 2], size: [usize; 2]) -> Self {
        Self { origin, size }
    }

    /// The canonical empty region.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.size[0] == 0 || self.size[1] == 0
    }

    pub fn width(&self) -> usize {
        self.size[0]
    }

    pub fn height(&self) -> usize {
        self.size[1]
    }

    /// Number of index positions covered.
    pub fn len(&self) -> usize {
        self.size[0] * self.size[1]
    }

    /// One-past-the-end index along `axis`.
    pub fn end(&self, axis: usize) -> i64 {
        self.origin[axis] + self.size[axis] as i64
    }

    pub fn contains_index(&self, index: [i64; 2]) -> bool {
        (0..2).all(|a| index[a] >= self.origin[a] && index[a] < self.end(a))
    }

    /// Whether `other` lies entirely inside `self`. Empty regions are
    /// contained in everything.
    pub fn contains(&self, other: &Region) -> bool {
        if other.is_empty() {
            return true;
        }
        (0..2).all(|a| other.origin[a] >= self.origin[a] && other.end(a) <= self.end(a))
    }

    pub fn is_disjoint(&self, other: &Region) -> bool {
        self.intersect(other).is_empty()
    }

    /// Intersection of two regions; empty if they do not overlap.
    pub fn intersect(&self, other: &Region) -> Region {
        let mut origin = [0i64; 2];
        let mut size = [0usize; 2];
        for a in 0..2 {
            let lo = self.origin[a].max(other.origin[a]);
            let hi = self.end(a).min(other.end(a));
            if hi <= lo {
                return Region::empty();
            }
            origin[a] = lo;
            size[a] = (hi - lo) as usize;
        }
        Region { origin, size }
    }

    /// Crop `self` so it fits inside `other`; identical to [`intersect`].
    ///
    /// [`intersect`]: Region::intersect
    pub fn crop_to(&self, other: &Region) -> Region {
        self.intersect(other)
    }

    /// Grow the region by `radius` on every side of every axis.
    pub fn dilate(&self, radius: usize) -> Region {
        if self.is_empty() {
            return *self;
        }
        let r = radius as i64;
        Region {
            origin: [self.origin[0] - r, self.origin[1] - r],
            size: [self.size[0] + 2 * radius, self.size[1] + 2 * radius],
        }
    }

    /// Smallest region covering both operands. Empty operands are ignored.
    pub fn bounding_union(&self, other: &Region) -> Region {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let mut origin = [0i64; 2];
        let mut size = [0usize; 2];
        for a in 0..2 {
            let lo = self.origin[a].min(other.origin[a]);
            let hi = self.end(a).max(other.end(a));
            origin[a] = lo;
            size[a] = (hi - lo) as usize;
        }
        Region { origin, size }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}..{}, {}..{}]",
            self.origin[0],
            self.end(0),
            self.origin[1],
            self.end(1)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_region_semantics() {
        let e = Region::empty();
        assert!(e.is_empty());
        assert!(Region::new([5, 5], [0, 3]).is_empty());
        assert!(Region::new([0, 0], [10, 10]).contains(&e));
    }

    #[test]
    fn intersect_and_disjoint() {
        let a = Region::new([0, 0], [10, 10]);
        let b = Region::new([5, 5], [10, 10]);
        let i = a.intersect(&b);
        assert_eq!(i, Region::new([5, 5], [5, 5]));
        assert!(!a.is_disjoint(&b));

        let c = Region::new([20, 20], [3, 3]);
        assert!(a.intersect(&c).is_empty());
        assert!(a.is_disjoint(&c));
    }

    #[test]
    fn contains_is_inclusive_of_edges() {
        let a = Region::new([0, 0], [10, 10]);
        assert!(a.contains(&Region::new([0, 0], [10, 10])));
        assert!(a.contains(&Region::new([9, 9], [1, 1])));
        assert!(!a.contains(&Region::new([9, 9], [2, 1])));
        assert!(a.contains_index([9, 9]));
        assert!(!a.contains_index([10, 9]));
    }

    #[test]
    fn dilate_then_crop() {
        let full = Region::new([0, 0], [100, 80]);
        let r = Region::new([0, 0], [10, 10]).dilate(2);
        assert_eq!(r, Region::new([-2, -2], [14, 14]));
        assert_eq!(r.crop_to(&full), Region::new([0, 0], [12, 12]));
    }

    #[test]
    fn bounding_union_covers_both() {
        let a = Region::new([0, 0], [4, 4]);
        let b = Region::new([10, 2], [2, 8]);
        let u = a.bounding_union(&b);
        assert!(u.contains(&a));
        assert!(u.contains(&b));
        assert_eq!(u, Region::new([0, 0], [12, 10]));
        assert_eq!(a.bounding_union(&Region::empty()), a);
    }
}
