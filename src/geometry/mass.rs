//! Volume, area and shape index of closed triangle meshes.

use super::mesh::signed_tetra_volume;
use super::SurfaceMesh;

/// Surface area of a sphere divided by its volume^(2/3), square-rooted.
///
/// `sqrt(area) / cbrt(volume)` equals this constant for a perfect sphere,
/// which is the most compact shape.
const SPHERE_SHAPE_CONSTANT: f64 = 2.199085233;

/// Integral properties of a closed surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MassProperties {
    /// Enclosed volume (divergence theorem over signed tetrahedra).
    pub volume: f64,
    /// Volume estimated from the per-axis projections, weighted by how much
    /// of the surface faces each axis. Matches `volume` for a closed mesh.
    pub projected_volume: f64,
    pub surface_area: f64,
    /// One for a sphere, larger for more convoluted shapes.
    pub normalized_shape_index: f64,
}

impl MassProperties {
    /// Computes the properties of a consistently oriented mesh.
    ///
    /// Returns `None` when the mesh has no triangles or encloses no volume.
    pub fn from_mesh(mesh: &SurfaceMesh) -> Option<Self> {
        let triangles = mesh.triangles();
        if triangles.is_empty() {
            return None;
        }

        let mut volume = 0.0;
        let mut area = 0.0;
        let mut axis_volume = [0.0f64; 3];
        let mut axis_weight = [0.0f64; 3];
        for t in &triangles {
            let (a, b, c) = (mesh.points[t[0]], mesh.points[t[1]], mesh.points[t[2]]);
            let cross = (b - a).cross(&(c - a));
            let tri_area = 0.5 * cross.norm();
            area += tri_area;
            volume += signed_tetra_volume(&mesh.points, t);

            // cross == 2 * area * unit normal
            let centroid = (a.coords + b.coords + c.coords) / 3.0;
            for axis in 0..3 {
                axis_volume[axis] += 0.5 * cross[axis] * centroid[axis];
                axis_weight[axis] += (0.5 * cross[axis]).abs();
            }
        }

        let weight_sum: f64 = axis_weight.iter().sum();
        if volume <= 0.0 || weight_sum <= 0.0 {
            return None;
        }
        let projected_volume = (0..3)
            .map(|axis| axis_weight[axis] / weight_sum * axis_volume[axis])
            .sum();

        Some(Self {
            volume,
            projected_volume,
            surface_area: area,
            normalized_shape_index: area.sqrt() / volume.cbrt() / SPHERE_SHAPE_CONSTANT,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{box_mesh, sphere_mesh};
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn box_properties() {
        let mesh = box_mesh(Point3::origin(), Point3::new(2.0, 2.0, 2.0));
        let props = MassProperties::from_mesh(&mesh).unwrap();
        assert_relative_eq!(props.volume, 8.0, epsilon = 1e-12);
        assert_relative_eq!(props.projected_volume, 8.0, epsilon = 1e-12);
        assert_relative_eq!(props.surface_area, 24.0, epsilon = 1e-12);
        // cube: sqrt(6) / 2.199...
        assert_relative_eq!(props.normalized_shape_index, 1.1138, epsilon = 1e-3);
    }

    #[test]
    fn fine_sphere_is_almost_perfectly_compact() {
        let mesh = sphere_mesh(Point3::origin(), 3.0, 64, 96);
        let props = MassProperties::from_mesh(&mesh).unwrap();
        assert!((props.normalized_shape_index - 1.0).abs() < 0.01);
    }

    #[test]
    fn inverted_mesh_has_no_properties() {
        let mut mesh = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        for poly in &mut mesh.polys {
            poly.reverse();
        }
        assert!(MassProperties::from_mesh(&mesh).is_none());
        assert!(MassProperties::from_mesh(&SurfaceMesh::default()).is_none());
    }
}
