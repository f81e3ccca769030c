//! Extent arithmetic and voxel copying between oriented volumes.
//!
//! These helpers move labelmap content between geometries: cropping,
//! padding, nearest-neighbour resampling, label extraction and merging.
//! Everything is integer-voxel based; no interpolation is ever performed
//! because labelmap values are categorical.

use approx::abs_diff_eq;
use nalgebra::{Matrix4, Point3};

use super::{Extent, OrientedVolume};
use crate::error::SegmentationError;

const MATRIX_EPSILON: f64 = 1e-6;

/// Bounding extent of the non-zero voxels (or of `label` only).
///
/// Returns `None` when no voxel qualifies.
pub fn effective_extent(volume: &OrientedVolume, label: Option<u16>) -> Option<Extent> {
    let mut out = Extent::EMPTY;
    for ([i, j, k], v) in volume.voxels() {
        let hit = match label {
            Some(l) => v == l,
            None => v != 0,
        };
        if hit {
            out = out.union(&Extent::new(i, i, j, j, k, k));
        }
    }
    (!out.is_empty()).then_some(out)
}

/// Maps an extent through an index-to-index transform.
///
/// Outer voxel faces are transformed, then pulled in by half a voxel to get
/// back to centres. Values are rounded to six decimals before the outward
/// floor/ceil so that numerical noise does not add a voxel.
pub fn transform_extent(extent: &Extent, matrix: &Matrix4<f64>) -> Extent {
    if extent.is_empty() {
        return *extent;
    }
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for corner in 0..8 {
        let pick = |axis: usize| {
            if corner & (1 << axis) == 0 {
                extent.min(axis) as f64 - 0.5
            } else {
                extent.max(axis) as f64 + 0.5
            }
        };
        let p = matrix.transform_point(&Point3::new(pick(0), pick(1), pick(2)));
        for axis in 0..3 {
            lo[axis] = lo[axis].min(p[axis]);
            hi[axis] = hi[axis].max(p[axis]);
        }
    }
    let round6 = |x: f64| (x * 1e6).round() / 1e6;
    let mut out = [0; 6];
    for axis in 0..3 {
        out[axis * 2] = round6(lo[axis] + 0.5).floor() as i32;
        out[axis * 2 + 1] = round6(hi[axis] - 0.5).ceil() as i32;
    }
    Extent(out)
}

/// Matrix taking voxel indices of `from` to voxel indices of `to`.
pub fn transform_between(
    from: &OrientedVolume,
    to: &OrientedVolume,
) -> Result<Matrix4<f64>, SegmentationError> {
    let world_to_target = to.world_to_image_matrix().ok_or_else(|| {
        SegmentationError::DegenerateGeometry("target volume has zero spacing".into())
    })?;
    Ok(world_to_target * from.image_to_world_matrix())
}

/// True when both volumes share the same image-to-world matrix.
pub fn geometries_match(a: &OrientedVolume, b: &OrientedVolume) -> bool {
    abs_diff_eq!(
        a.image_to_world_matrix(),
        b.image_to_world_matrix(),
        epsilon = MATRIX_EPSILON
    )
}

/// Copy of `volume` cropped or padded to `extent`; new voxels are zero.
pub fn copy_with_extent(volume: &OrientedVolume, extent: Extent) -> OrientedVolume {
    let mut out = volume.geometry_only();
    out.set_extent(extent);
    out.allocate_scalars(volume.scalar_type());
    let overlap = extent.intersection(&volume.extent());
    for [i, j, k] in overlap.indices() {
        let v = volume.voxel(i, j, k);
        if v != 0 {
            out.set_voxel(i, j, k, v);
        }
    }
    out
}

/// Grows `volume` so that its extent also covers `extent`.
pub fn pad_to_contain(volume: &mut OrientedVolume, extent: &Extent) {
    let wanted = volume.extent().union(extent);
    if wanted != volume.extent() {
        *volume = copy_with_extent(volume, wanted);
    }
}

/// Nearest-neighbour resampling of `volume` onto the geometry of `reference`.
///
/// The result uses the reference extent and orientation.
pub fn resample_to_geometry(
    volume: &OrientedVolume,
    reference: &OrientedVolume,
) -> Result<OrientedVolume, SegmentationError> {
    if geometries_match(volume, reference) {
        return Ok(copy_with_extent(volume, reference.extent()));
    }
    let to_source = transform_between(reference, volume)?;
    let mut out = reference.geometry_only();
    out.allocate_scalars(volume.scalar_type());
    for [i, j, k] in reference.extent().indices() {
        let p = to_source.transform_point(&Point3::new(i as f64, j as f64, k as f64));
        let v = volume.voxel(
            (p.x + 0.5).floor() as i32,
            (p.y + 0.5).floor() as i32,
            (p.z + 0.5).floor() as i32,
        );
        if v != 0 {
            out.set_voxel(i, j, k, v);
        }
    }
    Ok(out)
}

/// Binary mask (0/1) of the voxels equal to `label`, cropped to their extent.
pub fn extract_label(volume: &OrientedVolume, label: u16) -> Option<OrientedVolume> {
    let extent = effective_extent(volume, Some(label))?;
    let mut out = volume.geometry_only();
    out.set_extent(extent);
    out.allocate_scalars(super::ScalarType::U8);
    for [i, j, k] in extent.indices() {
        if volume.voxel(i, j, k) == label {
            out.set_voxel(i, j, k, 1);
        }
    }
    Some(out)
}

/// Brings `mask` into the frame of `target`, padding `target` to fit it.
fn mask_in_target_frame(
    target: &mut OrientedVolume,
    mask: &OrientedVolume,
) -> Result<Option<OrientedVolume>, SegmentationError> {
    let Some(mask_extent) = effective_extent(mask, None) else {
        return Ok(None);
    };
    if geometries_match(target, mask) {
        pad_to_contain(target, &mask_extent);
        return Ok(Some(copy_with_extent(mask, mask_extent)));
    }
    let extent_in_target = transform_extent(&mask_extent, &transform_between(mask, target)?);
    pad_to_contain(target, &extent_in_target);
    let mut frame = target.geometry_only();
    frame.set_extent(extent_in_target);
    resample_to_geometry(mask, &frame).map(Some)
}

/// Writes `value` wherever `mask` is non-zero, overwriting existing content.
pub fn merge_label(
    target: &mut OrientedVolume,
    mask: &OrientedVolume,
    value: u16,
) -> Result<(), SegmentationError> {
    let Some(local) = mask_in_target_frame(target, mask)? else {
        return Ok(());
    };
    for ([i, j, k], v) in local.voxels() {
        if v != 0 {
            target.set_voxel(i, j, k, value);
        }
    }
    Ok(())
}

/// True when some voxel is non-zero in both volumes.
pub fn masks_overlap(
    target: &OrientedVolume,
    mask: &OrientedVolume,
) -> Result<bool, SegmentationError> {
    let Some(mask_extent) = effective_extent(mask, None) else {
        return Ok(false);
    };
    if geometries_match(target, mask) {
        let overlap = mask_extent.intersection(&target.extent());
        return Ok(overlap
            .indices()
            .any(|[i, j, k]| mask.voxel(i, j, k) != 0 && target.voxel(i, j, k) != 0));
    }
    let to_target = transform_between(mask, target)?;
    let mut frame = target.geometry_only();
    frame.set_extent(transform_extent(&mask_extent, &to_target).intersection(&target.extent()));
    let local = resample_to_geometry(mask, &frame)?;
    let hit = local
        .voxels()
        .any(|([i, j, k], v)| v != 0 && target.voxel(i, j, k) != 0);
    Ok(hit)
}

/// Zeroes every voxel equal to `label`.
pub fn erase_label(target: &mut OrientedVolume, label: u16) {
    let hits: Vec<[i32; 3]> = target
        .voxels()
        .filter(|&(_, v)| v == label)
        .map(|(ijk, _)| ijk)
        .collect();
    for [i, j, k] in hits {
        target.set_voxel(i, j, k, 0);
    }
}

/// True if the volume has no non-zero voxel.
pub fn is_blank(volume: &OrientedVolume) -> bool {
    volume.scalars().iter().all(|v| v == 0)
}
