//! Binary labelmap → closed surface.

use std::collections::HashMap;

use log::warn;
use nalgebra::{Point3, Vector3};

use super::params::SMOOTHING_FACTOR;
use super::report::{ConversionIssue, ConversionIssueCode};
use super::{ConversionParameters, ConversionRule};
use crate::error::SegmentationError;
use crate::geometry::{OrientedVolume, SurfaceMesh};
use crate::segmentation::{Representation, Segment, BINARY_LABELMAP, CLOSED_SURFACE};

const CONVERSION_COST: u32 = 500;
const MAX_SMOOTHING_ITERATIONS: f64 = 10.0;
const RELAXATION: f64 = 0.5;

/// Builds the voxel-boundary surface of a segment's labelmap.
///
/// Every face between a voxel carrying the segment's label and a voxel that
/// does not becomes a quad, so the result is closed and outward-facing. A
/// positive `Smoothing factor` runs a few Laplacian passes afterwards.
#[derive(Clone, Debug, Default)]
pub struct BinaryLabelmapToClosedSurface;

impl BinaryLabelmapToClosedSurface {
    pub fn new() -> Self {
        Self
    }
}

fn smoothing_iterations(parameters: &ConversionParameters) -> usize {
    let raw = parameters.value(SMOOTHING_FACTOR).unwrap_or("0").trim();
    match raw.parse::<f64>() {
        Ok(factor) if factor.is_finite() => {
            (factor.clamp(0.0, 1.0) * MAX_SMOOTHING_ITERATIONS).round() as usize
        }
        _ => {
            warn!("Invalid smoothing factor '{}'; smoothing disabled", raw);
            0
        }
    }
}

/// Voxel-face surface of `label` in `volume`, in IJK coordinates.
pub(crate) fn boundary_faces(volume: &OrientedVolume, label: u16) -> SurfaceMesh {
    let mut mesh = SurfaceMesh::default();
    let mut index: HashMap<[i64; 3], usize> = HashMap::new();
    // Corners are keyed on doubled coordinates so that half-voxel offsets
    // stay integral.
    let mut vertex = |key: [i64; 3], mesh: &mut SurfaceMesh| -> usize {
        *index.entry(key).or_insert_with(|| {
            mesh.points.push(Point3::new(
                key[0] as f64 / 2.0,
                key[1] as f64 / 2.0,
                key[2] as f64 / 2.0,
            ));
            mesh.points.len() - 1
        })
    };

    const CORNERS: [(i64, i64); 4] = [(-1, -1), (1, -1), (1, 1), (-1, 1)];
    for ([i, j, k], value) in volume.voxels() {
        if value != label {
            continue;
        }
        let centre = [2 * i as i64, 2 * j as i64, 2 * k as i64];
        for axis in 0..3 {
            for dir in [-1i32, 1] {
                let mut n = [i, j, k];
                n[axis] += dir;
                if volume.voxel(n[0], n[1], n[2]) == label {
                    continue;
                }
                let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
                let mut quad = Vec::with_capacity(4);
                for (du, dv) in CORNERS {
                    let mut key = centre;
                    key[axis] += dir as i64;
                    key[u] += du;
                    key[v] += dv;
                    quad.push(vertex(key, &mut mesh));
                }
                if dir < 0 {
                    quad.reverse();
                }
                mesh.polys.push(quad);
            }
        }
    }
    mesh
}

/// Laplacian smoothing over mesh edges.
fn smooth(mesh: &mut SurfaceMesh, iterations: usize) {
    if iterations == 0 || mesh.points.is_empty() {
        return;
    }
    let mut neighbours: Vec<Vec<usize>> = vec![Vec::new(); mesh.points.len()];
    for poly in &mesh.polys {
        for w in 0..poly.len() {
            let (a, b) = (poly[w], poly[(w + 1) % poly.len()]);
            if !neighbours[a].contains(&b) {
                neighbours[a].push(b);
                neighbours[b].push(a);
            }
        }
    }
    for _ in 0..iterations {
        let previous = mesh.points.clone();
        for (p, ring) in mesh.points.iter_mut().zip(&neighbours) {
            if ring.is_empty() {
                continue;
            }
            let sum: Vector3<f64> = ring.iter().map(|&n| previous[n].coords).sum();
            let average = sum / ring.len() as f64;
            *p += (average - p.coords) * RELAXATION;
        }
    }
}

impl ConversionRule for BinaryLabelmapToClosedSurface {
    fn source_representation_name(&self) -> &'static str {
        BINARY_LABELMAP
    }

    fn target_representation_name(&self) -> &'static str {
        CLOSED_SURFACE
    }

    fn conversion_cost(&self) -> u32 {
        CONVERSION_COST
    }

    fn default_parameters(&self) -> ConversionParameters {
        let mut params = ConversionParameters::new();
        params.set(
            SMOOTHING_FACTOR,
            "0",
            "Smoothing factor used in the labelmap to surface conversion. 0 = voxel faces, 1 = strongest smoothing",
        );
        params
    }

    fn convert(
        &self,
        segment: &mut Segment,
        parameters: &ConversionParameters,
    ) -> Result<(), SegmentationError> {
        let Some(handle) = segment.binary_labelmap() else {
            return Err(SegmentationError::IncompatibleRepresentation(format!(
                "segment '{}' has no {} representation",
                segment.name(),
                BINARY_LABELMAP
            )));
        };
        let volume = handle.borrow();
        let mut mesh = if volume.is_allocated() {
            boundary_faces(&volume, segment.label_value())
        } else {
            SurfaceMesh::default()
        };
        smooth(&mut mesh, smoothing_iterations(parameters));
        mesh.transform(&volume.image_to_world_matrix());
        drop(volume);

        segment.add_representation(CLOSED_SURFACE, Representation::closed_surface(mesh));
        Ok(())
    }

    fn describe(&self, parameters: &ConversionParameters) -> Vec<ConversionIssue> {
        let mut issues = vec![ConversionIssue::warning(
            ConversionIssueCode::VoxelBoundarySurface,
            "Surfaces follow voxel faces and are stair-stepped",
        )];
        let iterations = smoothing_iterations(parameters);
        if iterations > 0 {
            issues.push(ConversionIssue::info(
                ConversionIssueCode::SurfaceSmoothed,
                format!("{} Laplacian smoothing passes are applied", iterations),
            ));
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Extent, MassProperties};
    use approx::assert_relative_eq;
    use nalgebra::Matrix4;

    fn labelmap_with_block(label: u16) -> OrientedVolume {
        let mut m = Matrix4::identity();
        m[(0, 0)] = 2.0;
        m[(0, 3)] = 10.0;
        let mut v = OrientedVolume::with_geometry(&m, Extent::new(0, 4, 0, 4, 0, 4));
        for i in 1..=2 {
            for j in 1..=3 {
                v.set_voxel(i, j, 1, label);
            }
        }
        v.set_voxel(4, 4, 4, label + 1);
        v
    }

    #[test]
    fn block_surface_is_closed_and_encloses_voxels() {
        let mut segment = Segment::new("block")
            .with_representation(BINARY_LABELMAP, Representation::binary_labelmap(labelmap_with_block(3)));
        segment.set_label_value(3);
        let rule = BinaryLabelmapToClosedSurface::new();
        rule.convert(&mut segment, &rule.default_parameters()).unwrap();

        let handle = segment.closed_surface().unwrap();
        let mesh = handle.borrow();
        // A 2x3x1 block has 2*(6 + 2 + 3) faces.
        assert_eq!(mesh.number_of_cells(), 22);
        assert!(mesh.is_closed());
        let mass = MassProperties::from_mesh(&mesh).unwrap();
        // Six voxels of 2x1x1 world units.
        assert_relative_eq!(mass.volume, 12.0, epsilon = 1e-9);
        let bounds = mesh.bounds();
        assert_relative_eq!(bounds.min.x, 10.0 + 2.0 * 0.5);
        assert_relative_eq!(bounds.max.x, 10.0 + 2.0 * 2.5);
    }

    #[test]
    fn smoothing_shrinks_and_keeps_topology() {
        let volume = labelmap_with_block(1);
        let faces = boundary_faces(&volume, 1);
        let mut smoothed = faces.clone();
        smooth(&mut smoothed, 5);
        assert_eq!(smoothed.polys, faces.polys);
        let before = MassProperties::from_mesh(&faces).unwrap().volume;
        let after = MassProperties::from_mesh(&smoothed).unwrap().volume;
        assert!(after < before);
    }

    #[test]
    fn smoothing_factor_maps_to_iterations() {
        let mut params = BinaryLabelmapToClosedSurface::new().default_parameters();
        assert_eq!(smoothing_iterations(&params), 0);
        params.set_value(SMOOTHING_FACTOR, "0.5");
        assert_eq!(smoothing_iterations(&params), 5);
        params.set_value(SMOOTHING_FACTOR, "soft");
        assert_eq!(smoothing_iterations(&params), 0);
    }

    #[test]
    fn empty_labelmap_gives_empty_surface() {
        let mut segment = Segment::new("empty")
            .with_representation(BINARY_LABELMAP, Representation::binary_labelmap(OrientedVolume::new()));
        let rule = BinaryLabelmapToClosedSurface::new();
        rule.convert(&mut segment, &ConversionParameters::new()).unwrap();
        assert!(segment.closed_surface().unwrap().borrow().is_empty());
    }
}
