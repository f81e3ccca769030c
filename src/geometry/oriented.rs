//! Voxel grids with an arbitrary affine image-to-world transform.

use std::cell::Cell;

use approx::abs_diff_eq;
use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

use super::{Bounds, Extent};

/// Tolerance used when deciding whether a geometry component changed.
const GEOMETRY_EPSILON: f64 = 1e-9;

/// Voxel storage type of an [`OrientedVolume`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    U8,
    U16,
}

/// A typed voxel buffer laid out i-fastest over the volume extent.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalars {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl Scalars {
    fn zeros(scalar_type: ScalarType, len: usize) -> Self {
        match scalar_type {
            ScalarType::U8 => Scalars::U8(vec![0; len]),
            ScalarType::U16 => Scalars::U16(vec![0; len]),
        }
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Scalars::U8(_) => ScalarType::U8,
            Scalars::U16(_) => ScalarType::U16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Scalars::U8(v) => v.len(),
            Scalars::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, offset: usize) -> u16 {
        match self {
            Scalars::U8(v) => v[offset] as u16,
            Scalars::U16(v) => v[offset],
        }
    }

    /// Writes a voxel, promoting an 8-bit buffer when the value does not fit.
    #[inline]
    pub fn set(&mut self, offset: usize, value: u16) {
        if value > u8::MAX as u16 {
            self.promote();
        }
        match self {
            Scalars::U8(v) => v[offset] = value as u8,
            Scalars::U16(v) => v[offset] = value,
        }
    }

    fn promote(&mut self) {
        if let Scalars::U8(v) = self {
            let widened = v.iter().map(|&x| x as u16).collect();
            *self = Scalars::U16(widened);
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = u16> + '_> {
        match self {
            Scalars::U8(v) => Box::new(v.iter().map(|&x| x as u16)),
            Scalars::U16(v) => Box::new(v.iter().copied()),
        }
    }
}

/// A 3D labelmap or scalar volume whose voxel grid may be rotated.
///
/// The image-to-world matrix is `directions * diag(spacing)` with `origin`
/// as translation. Directions are stored as unit columns. Voxel `(i, j, k)`
/// has its centre at `image_to_world * (i, j, k, 1)`.
#[derive(Clone, Debug)]
pub struct OrientedVolume {
    extent: Extent,
    spacing: Vector3<f64>,
    origin: Point3<f64>,
    directions: Matrix3<f64>,
    scalars: Scalars,
    bounds_cache: Cell<Option<Bounds>>,
}

impl Default for OrientedVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl OrientedVolume {
    /// Creates an empty volume with identity orientation and unit spacing.
    pub fn new() -> Self {
        Self {
            extent: Extent::EMPTY,
            spacing: Vector3::new(1.0, 1.0, 1.0),
            origin: Point3::origin(),
            directions: Matrix3::identity(),
            scalars: Scalars::U8(Vec::new()),
            bounds_cache: Cell::new(None),
        }
    }

    /// Creates a zero-filled 8-bit volume with the given geometry.
    pub fn with_geometry(image_to_world: &Matrix4<f64>, extent: Extent) -> Self {
        let mut volume = Self::new();
        volume.set_image_to_world_matrix(image_to_world);
        volume.set_extent(extent);
        volume.allocate_scalars(ScalarType::U8);
        volume
    }

    /// Copies extent and orientation but not voxels; the copy is unallocated.
    pub fn geometry_only(&self) -> Self {
        Self {
            extent: self.extent,
            spacing: self.spacing,
            origin: self.origin,
            directions: self.directions,
            scalars: Scalars::U8(Vec::new()),
            bounds_cache: Cell::new(None),
        }
    }

    /// Copies extent and orientation from `other`; voxel storage is released.
    pub fn copy_geometry_from(&mut self, other: &OrientedVolume) {
        self.extent = other.extent;
        self.spacing = other.spacing;
        self.origin = other.origin;
        self.directions = other.directions;
        self.scalars = Scalars::U8(Vec::new());
        self.bounds_cache.set(None);
    }

    #[inline]
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Changes the extent. Existing voxels are discarded; call
    /// [`allocate_scalars`](Self::allocate_scalars) before writing.
    pub fn set_extent(&mut self, extent: Extent) {
        if self.extent != extent {
            self.extent = extent;
            self.scalars = Scalars::U8(Vec::new());
            self.bounds_cache.set(None);
        }
    }

    pub fn spacing(&self) -> Vector3<f64> {
        self.spacing
    }

    pub fn set_spacing(&mut self, spacing: Vector3<f64>) {
        self.spacing = spacing;
        self.bounds_cache.set(None);
    }

    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    pub fn set_origin(&mut self, origin: Point3<f64>) {
        self.origin = origin;
        self.bounds_cache.set(None);
    }

    pub fn directions(&self) -> Matrix3<f64> {
        self.directions
    }

    /// Sets the direction cosines, normalising each column.
    pub fn set_directions(&mut self, directions: Matrix3<f64>) {
        let mut d = directions;
        for mut col in d.column_iter_mut() {
            let norm = col.norm();
            if norm > 0.0 {
                col /= norm;
            }
        }
        self.directions = d;
        self.bounds_cache.set(None);
    }

    /// Product of the spacing components.
    pub fn voxel_volume(&self) -> f64 {
        self.spacing.x * self.spacing.y * self.spacing.z
    }

    /// Returns true if the extent has an inverted axis.
    pub fn is_empty(&self) -> bool {
        self.extent.is_empty()
    }

    pub fn image_to_world_matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        for r in 0..3 {
            for c in 0..3 {
                m[(r, c)] = self.spacing[c] * self.directions[(r, c)];
            }
            m[(r, 3)] = self.origin[r];
        }
        m
    }

    /// Decomposes an affine matrix into spacing, directions and origin.
    ///
    /// Returns true when any component actually changed.
    pub fn set_image_to_world_matrix(&mut self, matrix: &Matrix4<f64>) -> bool {
        let mut spacing = Vector3::zeros();
        let mut directions = Matrix3::zeros();
        let mut origin = Point3::origin();
        for c in 0..3 {
            let column = Vector3::new(matrix[(0, c)], matrix[(1, c)], matrix[(2, c)]);
            let norm = column.norm();
            spacing[c] = norm;
            let unit = if norm > 0.0 { column / norm } else { column };
            directions.set_column(c, &unit);
            origin[c] = matrix[(c, 3)];
        }

        let changed = !abs_diff_eq!(spacing, self.spacing, epsilon = GEOMETRY_EPSILON)
            || !abs_diff_eq!(directions, self.directions, epsilon = GEOMETRY_EPSILON)
            || !abs_diff_eq!(origin, self.origin, epsilon = GEOMETRY_EPSILON);
        if changed {
            self.spacing = spacing;
            self.directions = directions;
            self.origin = origin;
            self.bounds_cache.set(None);
        }
        changed
    }

    /// Inverse of the image-to-world matrix; `None` for zero spacing.
    pub fn world_to_image_matrix(&self) -> Option<Matrix4<f64>> {
        self.image_to_world_matrix().try_inverse()
    }

    /// World bounds of the outer voxel faces.
    pub fn compute_bounds(&self) -> Bounds {
        if let Some(bounds) = self.bounds_cache.get() {
            return bounds;
        }
        let bounds = if self.is_empty() {
            Bounds::EMPTY
        } else {
            let e = &self.extent;
            let index_box = Bounds::new(
                Point3::new(e.min(0) as f64 - 0.5, e.min(1) as f64 - 0.5, e.min(2) as f64 - 0.5),
                Point3::new(e.max(0) as f64 + 0.5, e.max(1) as f64 + 0.5, e.max(2) as f64 + 0.5),
            );
            index_box.transformed(&self.image_to_world_matrix())
        };
        self.bounds_cache.set(Some(bounds));
        bounds
    }

    /// Replaces voxel storage with zeros of the given type.
    pub fn allocate_scalars(&mut self, scalar_type: ScalarType) {
        self.scalars = Scalars::zeros(scalar_type, self.extent.voxel_count());
    }

    /// True once storage matches the extent.
    pub fn is_allocated(&self) -> bool {
        !self.extent.is_empty() && self.scalars.len() == self.extent.voxel_count()
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalars.scalar_type()
    }

    pub fn scalars(&self) -> &Scalars {
        &self.scalars
    }

    /// Replaces voxels wholesale; the buffer length must match the extent.
    pub fn set_scalars(&mut self, scalars: Scalars) -> bool {
        if scalars.len() != self.extent.voxel_count() {
            return false;
        }
        self.scalars = scalars;
        true
    }

    /// Voxel value, zero outside the extent or when unallocated.
    #[inline]
    pub fn voxel(&self, i: i32, j: i32, k: i32) -> u16 {
        match self.extent.offset_of(i, j, k) {
            Some(offset) if offset < self.scalars.len() => self.scalars.get(offset),
            _ => 0,
        }
    }

    /// Writes a voxel; writes outside the extent are ignored.
    #[inline]
    pub fn set_voxel(&mut self, i: i32, j: i32, k: i32, value: u16) {
        if let Some(offset) = self.extent.offset_of(i, j, k) {
            if offset < self.scalars.len() {
                self.scalars.set(offset, value);
            }
        }
    }

    pub fn fill(&mut self, value: u16) {
        let scalar_type = if value > u8::MAX as u16 {
            ScalarType::U16
        } else {
            self.scalar_type()
        };
        self.allocate_scalars(scalar_type);
        if value != 0 {
            for offset in 0..self.scalars.len() {
                self.scalars.set(offset, value);
            }
        }
    }

    /// Minimum and maximum voxel value, `None` when there are no voxels.
    pub fn scalar_range(&self) -> Option<(u16, u16)> {
        self.scalars.iter().fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Distinct non-zero voxel values in ascending order.
    pub fn labels(&self) -> Vec<u16> {
        let mut seen = std::collections::BTreeSet::new();
        for v in self.scalars.iter() {
            if v != 0 {
                seen.insert(v);
            }
        }
        seen.into_iter().collect()
    }

    /// Iterates `([i, j, k], value)` over every allocated voxel.
    pub fn voxels(&self) -> impl Iterator<Item = ([i32; 3], u16)> + '_ {
        self.extent.indices().zip(self.scalars.iter())
    }

    /// World position of a voxel centre.
    pub fn voxel_center(&self, i: i32, j: i32, k: i32) -> Point3<f64> {
        self.image_to_world_matrix()
            .transform_point(&Point3::new(i as f64, j as f64, k as f64))
    }
}
