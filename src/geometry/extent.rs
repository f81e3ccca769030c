//! Inclusive voxel index ranges.

use serde::{Deserialize, Serialize};

/// An inclusive voxel index range `(i0, i1, j0, j1, k0, k1)`.
///
/// Any axis with `min > max` makes the extent empty. Empty extents are
/// representable on purpose so that "no voxels" can flow through geometry
/// computations without special casing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extent(pub [i32; 6]);

impl Default for Extent {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Extent {
    /// The canonical empty extent.
    pub const EMPTY: Extent = Extent([0, -1, 0, -1, 0, -1]);

    #[inline]
    pub fn new(i0: i32, i1: i32, j0: i32, j1: i32, k0: i32, k1: i32) -> Self {
        Self([i0, i1, j0, j1, k0, k1])
    }

    /// Creates an extent starting at zero with the given number of voxels per axis.
    pub fn from_dimensions(dims: [usize; 3]) -> Self {
        let max = |d: usize| d as i32 - 1;
        Self([0, max(dims[0]), 0, max(dims[1]), 0, max(dims[2])])
    }

    /// Lower index along `axis` (0 = i, 1 = j, 2 = k).
    #[inline]
    pub fn min(&self, axis: usize) -> i32 {
        self.0[axis * 2]
    }

    /// Upper (inclusive) index along `axis`.
    #[inline]
    pub fn max(&self, axis: usize) -> i32 {
        self.0[axis * 2 + 1]
    }

    /// Returns true if any axis pair is inverted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min(axis) > self.max(axis))
    }

    /// Number of voxels along each axis; all zero for an empty extent.
    pub fn dimensions(&self) -> [usize; 3] {
        if self.is_empty() {
            return [0, 0, 0];
        }
        let d = |axis: usize| (i64::from(self.max(axis)) - i64::from(self.min(axis)) + 1) as usize;
        [d(0), d(1), d(2)]
    }

    /// Total number of voxels; saturates at `usize::MAX`.
    pub fn voxel_count(&self) -> usize {
        let [a, b, c] = self.dimensions();
        a.saturating_mul(b).saturating_mul(c)
    }

    #[inline]
    pub fn contains(&self, i: i32, j: i32, k: i32) -> bool {
        i >= self.0[0]
            && i <= self.0[1]
            && j >= self.0[2]
            && j <= self.0[3]
            && k >= self.0[4]
            && k <= self.0[5]
    }

    /// Returns true if `other` lies completely inside this extent.
    pub fn contains_extent(&self, other: &Extent) -> bool {
        if other.is_empty() {
            return true;
        }
        (0..3).all(|axis| other.min(axis) >= self.min(axis) && other.max(axis) <= self.max(axis))
    }

    /// Linear offset of a voxel in an i-fastest buffer, or `None` when outside.
    #[inline]
    pub fn offset_of(&self, i: i32, j: i32, k: i32) -> Option<usize> {
        if !self.contains(i, j, k) {
            return None;
        }
        let [di, dj, _] = self.dimensions();
        let li = (i - self.0[0]) as usize;
        let lj = (j - self.0[2]) as usize;
        let lk = (k - self.0[4]) as usize;
        Some(li + di * (lj + dj * lk))
    }

    /// Smallest extent containing both; an empty side is ignored.
    pub fn union(&self, other: &Extent) -> Extent {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let mut out = [0; 6];
        for axis in 0..3 {
            out[axis * 2] = self.min(axis).min(other.min(axis));
            out[axis * 2 + 1] = self.max(axis).max(other.max(axis));
        }
        Extent(out)
    }

    /// Overlap of both extents; may be empty.
    pub fn intersection(&self, other: &Extent) -> Extent {
        let mut out = [0; 6];
        for axis in 0..3 {
            out[axis * 2] = self.min(axis).max(other.min(axis));
            out[axis * 2 + 1] = self.max(axis).min(other.max(axis));
        }
        Extent(out)
    }

    /// Grows every axis by `voxels` on both sides. Empty extents stay empty.
    pub fn padded(&self, voxels: i32) -> Extent {
        if self.is_empty() {
            return *self;
        }
        let mut out = self.0;
        for axis in 0..3 {
            out[axis * 2] -= voxels;
            out[axis * 2 + 1] += voxels;
        }
        Extent(out)
    }

    /// Iterates voxel indices with `i` varying fastest, matching buffer order.
    pub fn indices(&self) -> impl Iterator<Item = [i32; 3]> + '_ {
        let e = if self.is_empty() { Extent::EMPTY } else { *self };
        (e.0[4]..=e.0[5]).flat_map(move |k| {
            (e.0[2]..=e.0[3]).flat_map(move |j| (e.0[0]..=e.0[1]).map(move |i| [i, j, k]))
        })
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let e = &self.0;
        write!(
            f,
            "[{}..{}, {}..{}, {}..{}]",
            e[0], e[1], e[2], e[3], e[4], e[5]
        )
    }
}
