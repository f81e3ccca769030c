//! Closed surface → binary labelmap.

use log::{debug, warn};
use nalgebra::Vector3;

use super::params::{
    AUTOMATIC_OVERSAMPLING, COLLAPSE_LABELMAPS, CROP_TO_REFERENCE_IMAGE_GEOMETRY,
    OVERSAMPLING_FACTOR, REFERENCE_IMAGE_GEOMETRY,
};
use super::report::{ConversionIssue, ConversionIssueCode};
use super::{rasterize_surface, ConversionParameters, ConversionRule};
use crate::error::SegmentationError;
use crate::geometry::{deserialize_image_geometry, Extent, OrientedVolume, SurfaceMesh};
use crate::oversampling::{apply_oversampling_on_image_geometry, OversamplingEstimator};
use crate::segmentation::{Representation, Segment, Segmentation, BINARY_LABELMAP, CLOSED_SURFACE};

/// Voxel budget per axis of the default geometry.
const DEFAULT_VOXELS_PER_AXIS: f64 = 250.0;
/// Label written for voxels inside the surface.
const INSIDE_VALUE: u16 = 1;
const CONVERSION_COST: u32 = 500;

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// Rasterises closed surfaces onto a voxel grid.
///
/// The grid comes from, in order of precedence: an explicit output geometry
/// set on the rule, the `Reference image geometry` parameter, or a default
/// derived from the surface bounds. The grid is then oversampled and
/// shrunk to the surface extent (optionally cropped to the reference).
#[derive(Clone, Debug, Default)]
pub struct ClosedSurfaceToBinaryLabelmap {
    output_geometry: Option<OrientedVolume>,
}

impl ClosedSurfaceToBinaryLabelmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `geometry` verbatim instead of computing one per segment.
    pub fn with_output_geometry(geometry: OrientedVolume) -> Self {
        Self {
            output_geometry: Some(geometry.geometry_only()),
        }
    }

    /// Oversampling factor requested by `parameters` for `mesh` on `reference`.
    ///
    /// Unparseable values fall back to 1 with a warning.
    pub fn oversampling_factor(
        &self,
        parameters: &ConversionParameters,
        mesh: &SurfaceMesh,
        reference: &OrientedVolume,
    ) -> f64 {
        let raw = parameters.value(OVERSAMPLING_FACTOR).unwrap_or("1").trim();
        if raw == AUTOMATIC_OVERSAMPLING {
            return match OversamplingEstimator::new().estimate(mesh, reference) {
                Ok(estimate) => estimate.factor,
                Err(err) => {
                    warn!("Automatic oversampling failed ({}); using factor 1", err);
                    1.0
                }
            };
        }
        match raw.parse::<f64>() {
            Ok(factor) if factor.is_finite() => factor,
            _ => {
                warn!("Invalid oversampling factor '{}'; using factor 1", raw);
                1.0
            }
        }
    }

    /// Geometry the labelmap of `mesh` will be rasterised into.
    pub fn calculate_output_geometry(
        &self,
        mesh: &SurfaceMesh,
        parameters: &ConversionParameters,
    ) -> Result<OrientedVolume, SegmentationError> {
        if mesh.is_empty() {
            return Err(SegmentationError::DegenerateGeometry(
                "closed surface has no cells".into(),
            ));
        }
        let reference = self.reference_geometry(mesh, parameters);

        let mut geometry = reference.geometry_only();
        let factor = self.oversampling_factor(parameters, mesh, &reference);
        apply_oversampling_on_image_geometry(&mut geometry, factor);

        let world_to_ijk = geometry.world_to_image_matrix().ok_or_else(|| {
            SegmentationError::DegenerateGeometry("reference geometry has zero spacing".into())
        })?;
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for p in &mesh.points {
            let q = world_to_ijk.transform_point(p);
            for axis in 0..3 {
                lo[axis] = lo[axis].min(round6(q[axis]));
                hi[axis] = hi[axis].max(round6(q[axis]));
            }
        }
        let mut extent = Extent::new(
            lo[0].floor() as i32,
            hi[0].ceil() as i32,
            lo[1].floor() as i32,
            hi[1].ceil() as i32,
            lo[2].floor() as i32,
            hi[2].ceil() as i32,
        );

        if parameters.flag(CROP_TO_REFERENCE_IMAGE_GEOMETRY) && !geometry.is_empty() {
            extent = extent.intersection(&geometry.extent());
        }
        geometry.set_extent(extent);
        debug!("Rasterising into extent {}", extent);
        Ok(geometry)
    }

    /// The reference grid from the parameter, or the default for `mesh`.
    fn reference_geometry(&self, mesh: &SurfaceMesh, parameters: &ConversionParameters) -> OrientedVolume {
        let text = parameters.value(REFERENCE_IMAGE_GEOMETRY).unwrap_or("").trim();
        if text.is_empty() || text == ";" {
            return default_image_geometry_for_surface(mesh);
        }
        match deserialize_image_geometry(text) {
            Ok(geometry) => geometry,
            Err(err) => {
                warn!("Ignoring malformed reference image geometry ({}); using surface bounds", err);
                default_image_geometry_for_surface(mesh)
            }
        }
    }
}

/// Axis-aligned grid covering the surface bounds with about 250³ voxels.
pub fn default_image_geometry_for_surface(mesh: &SurfaceMesh) -> OrientedVolume {
    let bounds = mesh.bounds();
    let mut geometry = OrientedVolume::new();
    if bounds.is_empty() {
        return geometry;
    }
    let size = bounds.size();
    let budget = DEFAULT_VOXELS_PER_AXIS.powi(3);
    let positive = |s: f64| s.is_finite() && s > 0.0;
    let mut spacing = (bounds.volume() / budget).cbrt();
    if !positive(spacing) {
        spacing = size.max() / DEFAULT_VOXELS_PER_AXIS;
    }
    if !positive(spacing) {
        spacing = 1.0;
    }
    geometry.set_spacing(Vector3::new(spacing, spacing, spacing));
    geometry.set_origin(bounds.min);
    geometry.set_extent(Extent::new(
        0,
        round6(size.x / spacing).ceil() as i32,
        0,
        round6(size.y / spacing).ceil() as i32,
        0,
        round6(size.z / spacing).ceil() as i32,
    ));
    geometry
}

impl ConversionRule for ClosedSurfaceToBinaryLabelmap {
    fn source_representation_name(&self) -> &'static str {
        CLOSED_SURFACE
    }

    fn target_representation_name(&self) -> &'static str {
        BINARY_LABELMAP
    }

    fn conversion_cost(&self) -> u32 {
        CONVERSION_COST
    }

    fn default_parameters(&self) -> ConversionParameters {
        let mut params = ConversionParameters::new();
        params.set(
            REFERENCE_IMAGE_GEOMETRY,
            "",
            "Image geometry description string determining the geometry of the labelmap that is created in course of conversion",
        );
        params.set(
            OVERSAMPLING_FACTOR,
            "1",
            "Determines the oversampling of the reference image geometry. If it's a number, then all segments are oversampled with the same value. If it's 'A', then automatic oversampling is calculated",
        );
        params.set(
            CROP_TO_REFERENCE_IMAGE_GEOMETRY,
            "0",
            "Crop the model to the extent of reference geometry. 0 (default) = created labelmap will contain the entire model. 1 = created labelmap extent will be within reference image extent",
        );
        params.set(
            COLLAPSE_LABELMAPS,
            "1",
            "Merge the labelmaps into as few shared labelmaps as possible. 1 = created labelmaps will be shared if possible without overwriting each other",
        );
        params
    }

    fn convert(
        &self,
        segment: &mut Segment,
        parameters: &ConversionParameters,
    ) -> Result<(), SegmentationError> {
        let Some(handle) = segment.closed_surface() else {
            return Err(SegmentationError::IncompatibleRepresentation(format!(
                "segment '{}' has no {} representation",
                segment.name(),
                CLOSED_SURFACE
            )));
        };
        let mesh = handle.borrow();
        if mesh.number_of_points() < 2 || mesh.number_of_cells() < 2 {
            return Err(SegmentationError::DegenerateGeometry(format!(
                "closed surface of segment '{}' has {} points and {} cells",
                segment.name(),
                mesh.number_of_points(),
                mesh.number_of_cells()
            )));
        }

        let mut labelmap = match &self.output_geometry {
            Some(geometry) => geometry.geometry_only(),
            None => self.calculate_output_geometry(&mesh, parameters)?,
        };
        rasterize_surface(&mesh, &mut labelmap)?;
        drop(mesh);

        segment.add_representation(BINARY_LABELMAP, Representation::binary_labelmap(labelmap));
        segment.set_label_value(INSIDE_VALUE);
        Ok(())
    }

    fn post_convert(
        &self,
        segmentation: &mut Segmentation,
        parameters: &ConversionParameters,
    ) -> Result<(), SegmentationError> {
        if parameters.flag(COLLAPSE_LABELMAPS) {
            segmentation.collapse_binary_labelmaps(false)?;
        }
        Ok(())
    }

    fn describe(&self, parameters: &ConversionParameters) -> Vec<ConversionIssue> {
        let mut issues = vec![ConversionIssue::warning(
            ConversionIssueCode::VoxelizedSurface,
            "Closed surfaces are sampled at voxel centres; detail below the voxel size is lost",
        )];

        let reference = parameters.value(REFERENCE_IMAGE_GEOMETRY).unwrap_or("").trim();
        if self.output_geometry.is_none() {
            if reference.is_empty() || reference == ";" {
                issues.push(ConversionIssue::info(
                    ConversionIssueCode::DefaultGeometryFromSurfaceBounds,
                    "No reference geometry; each labelmap grid is derived from the surface bounds (about 250 voxels per axis)",
                ));
            } else if deserialize_image_geometry(reference).is_err() {
                issues.push(ConversionIssue::warning(
                    ConversionIssueCode::MalformedReferenceGeometry,
                    format!("Reference geometry '{}' cannot be parsed; surface bounds are used instead", reference),
                ));
            }
        }

        let factor = parameters.value(OVERSAMPLING_FACTOR).unwrap_or("1").trim();
        if factor == AUTOMATIC_OVERSAMPLING {
            issues.push(ConversionIssue::info(
                ConversionIssueCode::AutomaticOversampling,
                "Oversampling factor is estimated per segment from its size and shape",
            ));
        } else if factor.parse::<f64>().map(|f| !f.is_finite()).unwrap_or(true) {
            issues.push(ConversionIssue::warning(
                ConversionIssueCode::InvalidOversamplingFactor,
                format!("Oversampling factor '{}' is invalid; factor 1 is used", factor),
            ));
        }

        if parameters.flag(CROP_TO_REFERENCE_IMAGE_GEOMETRY) {
            issues.push(ConversionIssue::warning(
                ConversionIssueCode::CroppedToReferenceGeometry,
                "Labelmaps are cropped to the reference extent; parts of surfaces outside it are dropped",
            ));
        }
        if parameters.flag(COLLAPSE_LABELMAPS) {
            issues.push(ConversionIssue::info(
                ConversionIssueCode::LabelmapsCollapsed,
                "Non-overlapping labelmaps are packed into shared layers",
            ));
        }
        issues
    }
}
