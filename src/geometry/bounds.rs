//! Axis-aligned world-space bounding boxes.

use nalgebra::{Matrix4, Point3, Vector3};

/// An axis-aligned box in world coordinates.
///
/// The default value is the inverted "nothing" box that any point extends.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Bounds {
    pub const EMPTY: Bounds = Bounds {
        min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
        max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
    };

    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point; empty for no points.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Self {
        let mut bounds = Self::EMPTY;
        for p in points {
            bounds.include(p);
        }
        bounds
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }

    pub fn include(&mut self, p: &Point3<f64>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Side lengths; zero for an empty box.
    pub fn size(&self) -> Vector3<f64> {
        if self.is_empty() {
            return Vector3::zeros();
        }
        self.max - self.min
    }

    pub fn volume(&self) -> f64 {
        let s = self.size();
        s.x * s.y * s.z
    }

    /// The eight corners, x varying fastest.
    pub fn corners(&self) -> [Point3<f64>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Point3::new(a.x, a.y, a.z),
            Point3::new(b.x, a.y, a.z),
            Point3::new(a.x, b.y, a.z),
            Point3::new(b.x, b.y, a.z),
            Point3::new(a.x, a.y, b.z),
            Point3::new(b.x, a.y, b.z),
            Point3::new(a.x, b.y, b.z),
            Point3::new(b.x, b.y, b.z),
        ]
    }

    /// Axis-aligned box around the transformed corners.
    pub fn transformed(&self, matrix: &Matrix4<f64>) -> Bounds {
        if self.is_empty() {
            return *self;
        }
        let corners = self.corners().map(|c| matrix.transform_point(&c));
        Bounds::from_points(corners.iter())
    }

    pub fn contains_point(&self, p: &Point3<f64>, tolerance: f64) -> bool {
        (0..3).all(|axis| {
            p[axis] >= self.min[axis] - tolerance && p[axis] <= self.max[axis] + tolerance
        })
    }

    /// Returns true if `other` is inside this box, allowing `tolerance` slack.
    pub fn contains_bounds(&self, other: &Bounds, tolerance: f64) -> bool {
        other.is_empty()
            || (self.contains_point(&other.min, tolerance)
                && self.contains_point(&other.max, tolerance))
    }

    /// VTK-style flat layout `[xmin, xmax, ymin, ymax, zmin, zmax]`.
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.min.x, self.max.x, self.min.y, self.max.y, self.min.z, self.max.z,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_extend_empty_box() {
        let pts = [Point3::new(1.0, -2.0, 3.0), Point3::new(-1.0, 4.0, 0.5)];
        let b = Bounds::from_points(pts.iter());
        assert_eq!(b.min, Point3::new(-1.0, -2.0, 0.5));
        assert_eq!(b.max, Point3::new(1.0, 4.0, 3.0));
        assert!(Bounds::EMPTY.is_empty());
        assert_eq!(Bounds::EMPTY.volume(), 0.0);
    }

    #[test]
    fn transformed_covers_rotated_corners() {
        let b = Bounds::new(Point3::origin(), Point3::new(2.0, 1.0, 1.0));
        // 90 degrees around z
        let m = Matrix4::new(
            0.0, -1.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        );
        let t = b.transformed(&m);
        assert_eq!(t.min, Point3::new(-1.0, 0.0, 0.0));
        assert_eq!(t.max, Point3::new(0.0, 2.0, 1.0));
    }
}
