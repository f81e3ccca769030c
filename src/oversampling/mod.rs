//! Automatic oversampling for surface rasterisation.
//!
//! Small or convoluted structures lose detail when rasterised onto a coarse
//! reference grid. The estimator measures how large a structure is relative
//! to the reference image and how far its shape departs from a sphere, and
//! feeds both measures through a small fuzzy rule base:
//!
//! | size \ complexity | low       | high      |
//! |-------------------|-----------|-----------|
//! | very small        | very high | very high |
//! | small             | high      | very high |
//! | medium            | normal    | high      |
//! | large             | low       | low       |
//!
//! The defuzzified oversampling *power* `p` gives the factor `2^p`.

mod fuzzy;

pub use fuzzy::{centroid, ClippedTrapezoid, MembershipFunction};

use log::{debug, warn};
use nalgebra::Point3;

use crate::error::SegmentationError;
use crate::geometry::{Extent, MassProperties, OrientedVolume, SurfaceMesh};

/// Smallest oversampling factor accepted by [`apply_oversampling_on_image_geometry`].
pub const MIN_OVERSAMPLING_FACTOR: f64 = 0.01;
/// Largest oversampling factor accepted by [`apply_oversampling_on_image_geometry`].
pub const MAX_OVERSAMPLING_FACTOR: f64 = 100.0;

/// Relative difference between volume estimates that triggers a warning.
const VOLUME_MISMATCH_TOLERANCE: f64 = 0.01;

/// Structure size classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    VerySmall,
    Small,
    Medium,
    Large,
}

/// Shape complexity classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComplexityClass {
    Low,
    High,
}

/// Output classes of the oversampling power.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerClass {
    Low,
    Normal,
    High,
    VeryHigh,
}

impl PowerClass {
    /// Power at the centre of the class.
    pub fn centre(self) -> f64 {
        match self {
            PowerClass::Low => -1.0,
            PowerClass::Normal => 0.0,
            PowerClass::High => 1.0,
            PowerClass::VeryHigh => 2.0,
        }
    }

    fn output_set(self, height: f64) -> ClippedTrapezoid {
        let c = self.centre();
        ClippedTrapezoid {
            a: c - 0.5,
            b: c - 0.25,
            c: c + 0.25,
            d: c + 0.5,
            height,
        }
    }
}

/// One inference rule. A `None` antecedent matches any value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FuzzyRule {
    pub size: SizeClass,
    pub complexity: Option<ComplexityClass>,
    pub output: PowerClass,
}

/// The six rules of the default rule base, in evaluation order.
pub const DEFAULT_RULES: [FuzzyRule; 6] = [
    FuzzyRule {
        size: SizeClass::VerySmall,
        complexity: None,
        output: PowerClass::VeryHigh,
    },
    FuzzyRule {
        size: SizeClass::Small,
        complexity: Some(ComplexityClass::Low),
        output: PowerClass::High,
    },
    FuzzyRule {
        size: SizeClass::Small,
        complexity: Some(ComplexityClass::High),
        output: PowerClass::VeryHigh,
    },
    FuzzyRule {
        size: SizeClass::Medium,
        complexity: Some(ComplexityClass::Low),
        output: PowerClass::Normal,
    },
    FuzzyRule {
        size: SizeClass::Medium,
        complexity: Some(ComplexityClass::High),
        output: PowerClass::High,
    },
    FuzzyRule {
        size: SizeClass::Large,
        complexity: None,
        output: PowerClass::Low,
    },
];

/// Everything the estimator derived for one structure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OversamplingEstimate {
    pub mass_properties: MassProperties,
    pub relative_structure_size: f64,
    pub complexity: f64,
    pub power: i32,
    pub factor: f64,
}

/// Fuzzy oversampling estimator with the standard membership functions.
#[derive(Clone, Debug)]
pub struct OversamplingEstimator {
    very_small: MembershipFunction,
    small: MembershipFunction,
    medium: MembershipFunction,
    large: MembershipFunction,
    low_complexity: MembershipFunction,
    high_complexity: MembershipFunction,
    rules: Vec<FuzzyRule>,
}

impl Default for OversamplingEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl OversamplingEstimator {
    pub fn new() -> Self {
        Self {
            very_small: MembershipFunction::left_shoulder(0.02, 0.04),
            small: MembershipFunction::trapezoid(0.02, 0.04, 0.10, 0.15),
            medium: MembershipFunction::trapezoid(0.10, 0.15, 0.30, 0.40),
            large: MembershipFunction::right_shoulder(0.30, 0.40),
            low_complexity: MembershipFunction::left_shoulder(0.2, 0.6),
            high_complexity: MembershipFunction::right_shoulder(0.2, 0.6),
            rules: DEFAULT_RULES.to_vec(),
        }
    }

    pub fn size_membership(&self, class: SizeClass, size: f64) -> f64 {
        match class {
            SizeClass::VerySmall => self.very_small.membership(size),
            SizeClass::Small => self.small.membership(size),
            SizeClass::Medium => self.medium.membership(size),
            SizeClass::Large => self.large.membership(size),
        }
    }

    pub fn complexity_membership(&self, class: ComplexityClass, complexity: f64) -> f64 {
        match class {
            ComplexityClass::Low => self.low_complexity.membership(complexity),
            ComplexityClass::High => self.high_complexity.membership(complexity),
        }
    }

    /// Runs the rule base and defuzzifies to an integer power.
    ///
    /// When no rule fires the power is zero (no oversampling).
    pub fn infer_power(&self, relative_structure_size: f64, complexity: f64) -> i32 {
        let sets: Vec<ClippedTrapezoid> = self
            .rules
            .iter()
            .map(|rule| {
                let size = self.size_membership(rule.size, relative_structure_size);
                let strength = match rule.complexity {
                    Some(class) => size.min(self.complexity_membership(class, complexity)),
                    None => size,
                };
                rule.output.output_set(strength)
            })
            .collect();

        match centroid(&sets) {
            Some(x) => x.round() as i32,
            None => {
                warn!(
                    "No oversampling rule fired (size {:.4}, complexity {:.4}); using power 0",
                    relative_structure_size, complexity
                );
                0
            }
        }
    }

    /// Estimates the oversampling needed to rasterise `mesh` onto `reference`.
    ///
    /// # Errors
    /// Fails with [`SegmentationError::DegenerateGeometry`] when the mesh
    /// encloses no volume and [`SegmentationError::InvalidInput`] when the
    /// reference geometry has no voxels.
    pub fn estimate(
        &self,
        mesh: &SurfaceMesh,
        reference: &OrientedVolume,
    ) -> Result<OversamplingEstimate, SegmentationError> {
        if mesh.is_empty() {
            return Err(SegmentationError::DegenerateGeometry(
                "cannot estimate oversampling for an empty surface".into(),
            ));
        }
        let reference_volume = reference.extent().voxel_count() as f64 * reference.voxel_volume();
        if reference_volume <= 0.0 {
            return Err(SegmentationError::InvalidInput(
                "reference geometry has no volume".into(),
            ));
        }

        let mut oriented = mesh.clone();
        oriented.orient_consistently();
        let mass_properties = MassProperties::from_mesh(&oriented).ok_or_else(|| {
            SegmentationError::DegenerateGeometry("surface encloses no volume".into())
        })?;

        let mismatch = (mass_properties.volume - mass_properties.projected_volume).abs()
            / mass_properties.volume;
        if mismatch > VOLUME_MISMATCH_TOLERANCE {
            warn!(
                "Surface volume estimates differ by {:.1}% (volume {}, projected {}); the surface may not be closed",
                mismatch * 100.0,
                mass_properties.volume,
                mass_properties.projected_volume
            );
        }

        let relative_structure_size = (mass_properties.volume / reference_volume).cbrt();
        let complexity = (mass_properties.normalized_shape_index - 1.0).max(0.0);
        let power = self.infer_power(relative_structure_size, complexity);
        let factor = 2f64.powi(power);
        debug!(
            "Oversampling: size {:.4}, complexity {:.4} -> power {} (factor {})",
            relative_structure_size, complexity, power, factor
        );

        Ok(OversamplingEstimate {
            mass_properties,
            relative_structure_size,
            complexity,
            power,
            factor,
        })
    }
}

/// Rescales a geometry by `factor` while keeping its outer voxel faces in place.
///
/// Extent indices are scaled (ceil for the start, whole voxels for the
/// length) and spacing divided by `factor`. The origin moves by the
/// difference between the old and new half-voxel, so that the physical
/// boundary of the grid does not grow or shrink.
///
/// Returns false, leaving the volume untouched, when `factor` lies outside
/// `(0.01, 100)`.
pub fn apply_oversampling_on_image_geometry(volume: &mut OrientedVolume, factor: f64) -> bool {
    if !(factor > MIN_OVERSAMPLING_FACTOR && factor < MAX_OVERSAMPLING_FACTOR) {
        warn!(
            "Oversampling factor {} is outside ({}, {}); geometry left unchanged",
            factor, MIN_OVERSAMPLING_FACTOR, MAX_OVERSAMPLING_FACTOR
        );
        return false;
    }
    if factor == 1.0 {
        return true;
    }

    let old_matrix = volume.image_to_world_matrix();
    let old_extent = volume.extent();
    let [di, dj, dk] = old_extent.dimensions();
    let dims = [di, dj, dk];

    let mut new_extent = [0i32; 6];
    for axis in 0..3 {
        let start = (factor * old_extent.min(axis) as f64).ceil() as i32;
        let length = (factor * dims[axis] as f64).floor() as i32;
        new_extent[axis * 2] = start;
        new_extent[axis * 2 + 1] = start + length - 1;
    }

    let shift = 0.5 / factor - 0.5;
    let origin = old_matrix.transform_point(&Point3::new(shift, shift, shift));

    volume.set_spacing(volume.spacing() / factor);
    volume.set_origin(origin);
    volume.set_extent(Extent(new_extent));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{box_mesh, sphere_mesh};
    use approx::assert_relative_eq;
    use nalgebra::{Matrix4, Vector3};

    fn reference_grid(n: i32, spacing: f64) -> OrientedVolume {
        let mut m = Matrix4::identity();
        for axis in 0..3 {
            m[(axis, axis)] = spacing;
        }
        let mut v = OrientedVolume::new();
        v.set_image_to_world_matrix(&m);
        v.set_extent(Extent::new(0, n - 1, 0, n - 1, 0, n - 1));
        v
    }

    #[test]
    fn pure_classes_map_to_rule_outputs() {
        let est = OversamplingEstimator::new();
        assert_eq!(est.infer_power(0.01, 0.0), 2);
        assert_eq!(est.infer_power(0.07, 0.0), 1);
        assert_eq!(est.infer_power(0.07, 1.0), 2);
        assert_eq!(est.infer_power(0.2, 0.0), 0);
        assert_eq!(est.infer_power(0.2, 1.0), 1);
        assert_eq!(est.infer_power(0.9, 5.0), -1);
    }

    #[test]
    fn large_sphere_needs_no_oversampling() {
        let est = OversamplingEstimator::new();
        let reference = reference_grid(10, 1.0);
        let sphere = sphere_mesh(Point3::new(5.0, 5.0, 5.0), 4.0, 32, 48);
        let result = est.estimate(&sphere, &reference).unwrap();
        assert!(result.relative_structure_size > 0.6);
        assert!(result.complexity < 0.05);
        assert_eq!(result.power, -1);
        assert_relative_eq!(result.factor, 0.5);
    }

    #[test]
    fn tiny_box_is_oversampled_heavily() {
        let est = OversamplingEstimator::new();
        let reference = reference_grid(100, 1.0);
        let tiny = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let result = est.estimate(&tiny, &reference).unwrap();
        assert_relative_eq!(result.relative_structure_size, 0.01, epsilon = 1e-9);
        assert_eq!(result.factor, 4.0);
    }

    #[test]
    fn degenerate_inputs_are_errors() {
        let est = OversamplingEstimator::new();
        let reference = reference_grid(10, 1.0);
        let flat = SurfaceMesh::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            vec![vec![0, 1, 2], vec![0, 2, 1]],
        );
        assert!(est.estimate(&flat, &reference).is_err());
        assert!(est.estimate(&SurfaceMesh::default(), &reference).is_err());
        let cube = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        assert!(est.estimate(&cube, &OrientedVolume::new()).is_err());
    }

    #[test]
    fn doubling_preserves_outer_boundary() {
        let mut v = reference_grid(10, 2.0);
        v.set_origin(Point3::new(5.0, -1.0, 0.0));
        let before = v.compute_bounds();
        assert!(apply_oversampling_on_image_geometry(&mut v, 2.0));
        assert_eq!(v.extent(), Extent::new(0, 19, 0, 19, 0, 19));
        assert_relative_eq!(v.spacing(), Vector3::new(1.0, 1.0, 1.0));
        let after = v.compute_bounds();
        assert_relative_eq!(after.min, before.min, epsilon = 1e-9);
        assert_relative_eq!(after.max, before.max, epsilon = 1e-9);
    }

    #[test]
    fn halving_preserves_outer_boundary() {
        let mut v = reference_grid(8, 1.0);
        let before = v.compute_bounds();
        assert!(apply_oversampling_on_image_geometry(&mut v, 0.5));
        assert_eq!(v.extent(), Extent::new(0, 3, 0, 3, 0, 3));
        let after = v.compute_bounds();
        assert_relative_eq!(after.min, before.min, epsilon = 1e-9);
        assert_relative_eq!(after.max, before.max, epsilon = 1e-9);
    }

    #[test]
    fn out_of_range_factor_is_rejected() {
        let mut v = reference_grid(4, 1.0);
        let matrix = v.image_to_world_matrix();
        assert!(!apply_oversampling_on_image_geometry(&mut v, 0.0));
        assert!(!apply_oversampling_on_image_geometry(&mut v, 100.0));
        assert!(!apply_oversampling_on_image_geometry(&mut v, f64::NAN));
        assert_eq!(v.image_to_world_matrix(), matrix);
        assert_eq!(v.extent(), Extent::new(0, 3, 0, 3, 0, 3));
    }
}
