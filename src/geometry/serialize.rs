//! Text encoding of an image geometry.
//!
//! A geometry is written as the 16 values of the image-to-world matrix in
//! row-major order followed by the 6 extent values, each terminated by `;`.

use nalgebra::Matrix4;

use super::{Extent, OrientedVolume};
use crate::error::SegmentationError;

const MATRIX_VALUES: usize = 16;
const EXTENT_VALUES: usize = 6;

/// Largest extent a geometry string may describe.
pub const MAX_VOXEL_COUNT: usize = 1 << 30;

/// Largest absolute voxel index accepted on any axis.
const MAX_EXTENT_INDEX: i32 = 1 << 24;

/// Encodes the geometry (not the voxels) of a volume.
pub fn serialize_image_geometry(volume: &OrientedVolume) -> String {
    serialize_geometry_parts(&volume.image_to_world_matrix(), &volume.extent())
}

/// Encodes an explicit matrix and extent.
pub fn serialize_geometry_parts(matrix: &Matrix4<f64>, extent: &Extent) -> String {
    let mut out = String::new();
    for r in 0..4 {
        for c in 0..4 {
            out.push_str(&matrix[(r, c)].to_string());
            out.push(';');
        }
    }
    for value in extent.0 {
        out.push_str(&value.to_string());
        out.push(';');
    }
    out
}

/// Decodes a geometry string into an unallocated volume.
///
/// Whitespace around values is ignored and the trailing separator is
/// optional.
pub fn deserialize_image_geometry(text: &str) -> Result<OrientedVolume, SegmentationError> {
    let fields: Vec<&str> = text
        .split(';')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();
    if fields.len() != MATRIX_VALUES + EXTENT_VALUES {
        return Err(SegmentationError::InvalidInput(format!(
            "image geometry needs {} values, found {}",
            MATRIX_VALUES + EXTENT_VALUES,
            fields.len()
        )));
    }

    let mut matrix = Matrix4::zeros();
    for (n, field) in fields[..MATRIX_VALUES].iter().enumerate() {
        let value: f64 = field.parse().map_err(|_| {
            SegmentationError::InvalidInput(format!("bad matrix value '{}'", field))
        })?;
        if !value.is_finite() {
            return Err(SegmentationError::InvalidInput(format!(
                "non-finite matrix value '{}'",
                field
            )));
        }
        matrix[(n / 4, n % 4)] = value;
    }

    let mut extent = [0i32; EXTENT_VALUES];
    for (slot, field) in extent.iter_mut().zip(&fields[MATRIX_VALUES..]) {
        *slot = field.parse().map_err(|_| {
            SegmentationError::InvalidInput(format!("bad extent value '{}'", field))
        })?;
    }

    if let Some(index) = extent.iter().find(|v| v.abs() > MAX_EXTENT_INDEX) {
        return Err(SegmentationError::InvalidInput(format!(
            "extent index {} is out of range (limit {})",
            index, MAX_EXTENT_INDEX
        )));
    }
    let extent = Extent(extent);
    if extent.voxel_count() > MAX_VOXEL_COUNT {
        return Err(SegmentationError::InvalidInput(format!(
            "extent {:?} has {} voxels (limit {})",
            extent.0,
            extent.voxel_count(),
            MAX_VOXEL_COUNT
        )));
    }

    let mut volume = OrientedVolume::new();
    volume.set_image_to_world_matrix(&matrix);
    volume.set_extent(extent);
    Ok(volume)
}

/// Parses an arbitrary string; used by the fuzz targets.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_image_geometry(text: &str) -> bool {
    deserialize_image_geometry(text).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn round_trip_keeps_matrix_and_extent() {
        let mut m = Matrix4::identity();
        m[(0, 0)] = -0.7;
        m[(1, 1)] = 0.7;
        m[(0, 3)] = 12.25;
        m[(2, 3)] = -100.0;
        let text = serialize_geometry_parts(&m, &Extent::new(0, 99, -5, 5, 3, 3));
        assert!(text.ends_with(';'));

        let v = deserialize_image_geometry(&text).unwrap();
        assert_relative_eq!(v.image_to_world_matrix(), m, epsilon = 1e-12);
        assert_eq!(v.extent(), Extent::new(0, 99, -5, 5, 3, 3));
        assert!(!v.is_allocated());
    }

    #[test]
    fn oversized_extents_are_rejected() {
        let huge = "1;0;0;0;0;1;0;0;0;0;1;0;0;0;0;1;0;2147483647;0;0;0;0;";
        assert!(matches!(
            deserialize_image_geometry(huge),
            Err(SegmentationError::InvalidInput(_))
        ));

        let over_budget = serialize_geometry_parts(
            &Matrix4::identity(),
            &Extent::new(0, 2047, 0, 2047, 0, 2047),
        );
        assert!(matches!(
            deserialize_image_geometry(&over_budget),
            Err(SegmentationError::InvalidInput(_))
        ));

        let at_budget = serialize_geometry_parts(
            &Matrix4::identity(),
            &Extent::new(0, 1023, 0, 1023, 0, 1023),
        );
        assert_eq!(
            deserialize_image_geometry(&at_budget).unwrap().extent().voxel_count(),
            MAX_VOXEL_COUNT
        );
    }

    #[test]
    fn identity_encoding_is_stable() {
        let text = serialize_geometry_parts(&Matrix4::identity(), &Extent::new(0, 1, 0, 1, 0, 1));
        assert_eq!(
            text,
            "1;0;0;0;0;1;0;0;0;0;1;0;0;0;0;1;0;1;0;1;0;1;"
        );
    }

    #[test]
    fn malformed_strings_are_rejected() {
        assert!(deserialize_image_geometry("").is_err());
        assert!(deserialize_image_geometry(";").is_err());
        assert!(deserialize_image_geometry("1;2;3").is_err());
        let text = "1;0;0;0;0;1;0;0;0;0;1;0;0;0;0;1;0;x;0;1;0;1;";
        assert!(deserialize_image_geometry(text).is_err());
    }
}
