//! Common labelmap geometry across segments.
//!
//! Segments converted at different times may carry labelmaps on different
//! grids. Merging, exporting or editing them together needs one grid that
//! can hold all of them; this module computes it.

use log::warn;

use super::Segmentation;
use crate::conversion::params::REFERENCE_IMAGE_GEOMETRY;
use crate::geometry::resample::{effective_extent, transform_between, transform_extent};
use crate::geometry::{deserialize_image_geometry, serialize_image_geometry, Extent, OrientedVolume};
use crate::oversampling::apply_oversampling_on_image_geometry;

/// How the extent of a common geometry is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExtentComputationMode {
    /// Extent of the reference geometry (or of the finest labelmap).
    ReferenceGeometry,
    /// Union of the full labelmap extents.
    UnionOfSegments,
    /// Union of the full labelmap extents plus one voxel on each side.
    UnionOfSegmentsPadded,
    /// Union of the extents actually covered by each segment's label.
    #[default]
    UnionOfEffectiveSegments,
    /// Union of the effective extents plus one voxel on each side.
    UnionOfEffectiveSegmentsPadded,
}

impl ExtentComputationMode {
    fn union_flags(self) -> Option<(bool, bool)> {
        match self {
            ExtentComputationMode::ReferenceGeometry => None,
            ExtentComputationMode::UnionOfSegments => Some((false, false)),
            ExtentComputationMode::UnionOfSegmentsPadded => Some((false, true)),
            ExtentComputationMode::UnionOfEffectiveSegments => Some((true, false)),
            ExtentComputationMode::UnionOfEffectiveSegmentsPadded => Some((true, true)),
        }
    }
}

impl Segmentation {
    fn ids_or_all(&self, segment_ids: &[String]) -> Vec<String> {
        if segment_ids.is_empty() {
            self.segment_ids().to_vec()
        } else {
            segment_ids.to_vec()
        }
    }

    /// Allocated labelmaps of the given segments with their label values.
    fn labelmaps_of(&self, segment_ids: &[String]) -> Vec<(OrientedVolume, u16)> {
        segment_ids
            .iter()
            .filter_map(|id| self.segment(id))
            .filter_map(|segment| {
                let handle = segment.binary_labelmap()?;
                let volume = handle.borrow();
                (volume.is_allocated()).then(|| (volume.clone(), segment.label_value()))
            })
            .collect()
    }

    /// Geometry able to hold the labelmaps of `segment_ids` (all segments
    /// when empty), without voxel storage.
    ///
    /// The grid comes from the reference image geometry parameter when it
    /// is set, otherwise from the finest labelmap. When a reference grid is
    /// coarser than the finest labelmap it is oversampled to match. Returns
    /// `None` when none of the segments has a non-empty labelmap.
    pub fn determine_common_labelmap_geometry(
        &self,
        mode: ExtentComputationMode,
        segment_ids: &[String],
    ) -> Option<OrientedVolume> {
        let ids = self.ids_or_all(segment_ids);
        let labelmaps = self.labelmaps_of(&ids);
        let finest = labelmaps.iter().map(|(v, _)| v).min_by(|a, b| {
            let pa = a.spacing().iter().product::<f64>();
            let pb = b.spacing().iter().product::<f64>();
            pa.total_cmp(&pb)
        })?;

        let reference = self
            .conversion_parameter(REFERENCE_IMAGE_GEOMETRY)
            .filter(|text| !text.trim().is_empty() && text.trim() != ";")
            .and_then(|text| match deserialize_image_geometry(text) {
                Ok(geometry) => Some(geometry),
                Err(err) => {
                    warn!("Ignoring malformed reference image geometry: {}", err);
                    None
                }
            });
        let from_reference = reference.is_some();
        let mut common = reference.unwrap_or_else(|| finest.geometry_only());

        if let Some((effective, padded)) = mode.union_flags() {
            let extent = self.determine_common_labelmap_extent(&common, &ids, effective, padded);
            common.set_extent(extent);
        }

        if from_reference {
            let ratio = common.voxel_volume() / finest.voxel_volume();
            let factor = ratio.cbrt().round();
            if factor > 1.0 {
                apply_oversampling_on_image_geometry(&mut common, factor);
            }
        }
        Some(common)
    }

    /// [`determine_common_labelmap_geometry`](Self::determine_common_labelmap_geometry)
    /// in serialized form; empty when there is no labelmap.
    pub fn determine_common_labelmap_geometry_string(
        &self,
        mode: ExtentComputationMode,
        segment_ids: &[String],
    ) -> String {
        self.determine_common_labelmap_geometry(mode, segment_ids)
            .map(|g| serialize_image_geometry(&g))
            .unwrap_or_default()
    }

    /// Union of the segments' labelmap extents expressed on the grid of
    /// `common`.
    ///
    /// With `effective` only voxels carrying each segment's label count.
    /// With `padded` the result grows by one voxel on every side.
    pub fn determine_common_labelmap_extent(
        &self,
        common: &OrientedVolume,
        segment_ids: &[String],
        effective: bool,
        padded: bool,
    ) -> Extent {
        let ids = self.ids_or_all(segment_ids);
        let mut union = Extent::EMPTY;
        for (volume, label) in self.labelmaps_of(&ids) {
            let extent = if effective {
                match effective_extent(&volume, Some(label)) {
                    Some(extent) => extent,
                    None => continue,
                }
            } else {
                volume.extent()
            };
            match transform_between(&volume, common) {
                Ok(matrix) => union = union.union(&transform_extent(&extent, &matrix)),
                Err(err) => warn!("Skipping labelmap in common extent: {}", err),
            }
        }
        if padded {
            union.padded(1)
        } else {
            union
        }
    }

    /// Writes the common geometry into `image` (dropping its voxels).
    ///
    /// Returns false, leaving `image` untouched, when there is no labelmap.
    pub fn set_image_geometry_from_common_labelmap_geometry(
        &self,
        image: &mut OrientedVolume,
        segment_ids: &[String],
        mode: ExtentComputationMode,
    ) -> bool {
        match self.determine_common_labelmap_geometry(mode, segment_ids) {
            Some(geometry) => {
                image.copy_geometry_from(&geometry);
                true
            }
            None => false,
        }
    }
}
