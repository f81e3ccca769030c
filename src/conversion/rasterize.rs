//! Scanline rasterisation of closed surfaces into binary labelmaps.
//!
//! The surface is brought into the IJK frame of the output volume, then for
//! every `(j, k)` row a ray is cast along +i. Crossings with the surface are
//! sorted and paired; voxel centres between an entry and the next exit are
//! set to 1. The ray is nudged off the integer lattice so that it never
//! passes exactly through a mesh vertex or edge of an axis-aligned surface.

use std::collections::HashMap;

use nalgebra::Point3;

use crate::error::SegmentationError;
use crate::geometry::{OrientedVolume, ScalarType, SurfaceMesh};

const RAY_OFFSET_J: f64 = 1e-6;
const RAY_OFFSET_K: f64 = 1.3e-6;
const PROJECTION_EPSILON: f64 = 1e-12;

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// Rasterises `mesh` (world coordinates) into the geometry of `output`.
///
/// The output keeps its extent and orientation; voxels are reallocated as
/// 8-bit zeros before filling. An empty extent yields an empty result.
pub fn rasterize_surface(
    mesh: &SurfaceMesh,
    output: &mut OrientedVolume,
) -> Result<(), SegmentationError> {
    if output.is_empty() {
        return Ok(());
    }
    let world_to_ijk = output.world_to_image_matrix().ok_or_else(|| {
        SegmentationError::DegenerateGeometry("output geometry has zero spacing".into())
    })?;
    output.allocate_scalars(ScalarType::U8);

    let points: Vec<Point3<f64>> = mesh
        .points
        .iter()
        .map(|p| {
            let q = world_to_ijk.transform_point(p);
            Point3::new(round6(q.x), round6(q.y), round6(q.z))
        })
        .collect();
    let triangles = mesh.triangles();

    let extent = output.extent();
    let (j0, j1, k0, k1) = (extent.min(1), extent.max(1), extent.min(2), extent.max(2));

    // Bin triangles by the rows whose ray can hit them.
    let mut rows: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
    for (t_idx, t) in triangles.iter().enumerate() {
        let ys = t.map(|v| points[v].y);
        let zs = t.map(|v| points[v].z);
        let (y_lo, y_hi) = min_max(&ys);
        let (z_lo, z_hi) = min_max(&zs);
        let row_lo = ((y_lo - RAY_OFFSET_J).ceil() as i32).max(j0);
        let row_hi = ((y_hi - RAY_OFFSET_J).floor() as i32).min(j1);
        let slice_lo = ((z_lo - RAY_OFFSET_K).ceil() as i32).max(k0);
        let slice_hi = ((z_hi - RAY_OFFSET_K).floor() as i32).min(k1);
        for k in slice_lo..=slice_hi {
            for j in row_lo..=row_hi {
                rows.entry((j, k)).or_default().push(t_idx);
            }
        }
    }

    let (i0, i1) = (extent.min(0), extent.max(0));
    let mut crossings = Vec::new();
    for ((j, k), candidates) in rows {
        let y = j as f64 + RAY_OFFSET_J;
        let z = k as f64 + RAY_OFFSET_K;
        crossings.clear();
        for &t_idx in &candidates {
            let [a, b, c] = triangles[t_idx].map(|v| points[v]);
            if let Some(x) = ray_crossing(&a, &b, &c, y, z) {
                crossings.push(round6(x));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        if crossings.len() % 2 == 1 {
            // Open or self-touching surface; the last crossing has no partner.
            crossings.pop();
        }
        for pair in crossings.chunks_exact(2) {
            let start = (pair[0].ceil() as i32).max(i0);
            let stop = (pair[1].ceil() as i32 - 1).min(i1);
            for i in start..=stop {
                output.set_voxel(i, j, k, 1);
            }
        }
    }
    Ok(())
}

fn min_max(values: &[f64; 3]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// X coordinate where the ray `(*, y, z)` crosses triangle `abc`, if it does.
fn ray_crossing(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, y: f64, z: f64) -> Option<f64> {
    // Signed area of the triangle projected onto the (y, z) plane.
    let area = (b.y - a.y) * (c.z - a.z) - (c.y - a.y) * (b.z - a.z);
    if area.abs() < PROJECTION_EPSILON {
        return None;
    }
    let edge = |p: &Point3<f64>, q: &Point3<f64>| (q.y - p.y) * (z - p.z) - (y - p.y) * (q.z - p.z);
    let wa = edge(b, c) / area;
    let wb = edge(c, a) / area;
    let wc = edge(a, b) / area;
    if wa < 0.0 || wb < 0.0 || wc < 0.0 {
        return None;
    }
    Some(wa * a.x + wb * b.x + wc * c.x)
}
