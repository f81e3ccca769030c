//! JSON interchange for whole segmentations.
//!
//! Labelmap layers are stored once in `labelmaps` and referenced by index
//! from each segment, so that sharing survives a round trip. Voxels are
//! run-length encoded as `[value, count]` pairs in buffer order (`i`
//! fastest):
//!
//! ```json
//! {
//!   "master_representation": "Binary labelmap",
//!   "conversion_parameters": {},
//!   "labelmaps": [
//!     { "geometry": "1;0;0;0;0;1;0;0;0;0;1;0;0;0;0;1;0;1;0;0;0;0;", "allocated": true, "runs": [[0, 1], [1, 1]] }
//!   ],
//!   "segments": [
//!     { "id": "Segment_1", "name": "Segment_1", "color": [0.5, 0.5, 0.5], "label_value": 1, "labelmap": 0 }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{
    DataHandle, Representation, Segment, Segmentation, BINARY_LABELMAP, CLOSED_SURFACE, DEFAULT_COLOR,
};
use crate::conversion::{ConversionParameters, RuleRegistry};
use crate::error::SegmentationError;
use crate::geometry::{deserialize_image_geometry, serialize_image_geometry, OrientedVolume, SurfaceMesh};

/// Serialized form of a [`Segmentation`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentationDocument {
    pub master_representation: String,
    #[serde(default)]
    pub conversion_parameters: ConversionParameters,
    #[serde(default)]
    pub labelmaps: Vec<LabelmapRecord>,
    #[serde(default)]
    pub segments: Vec<SegmentRecord>,
}

/// One labelmap layer: serialized geometry plus run-length encoded voxels.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelmapRecord {
    pub geometry: String,
    #[serde(default)]
    pub allocated: bool,
    #[serde(default)]
    pub runs: Vec<(u16, u32)>,
}

/// One segment and the representations it holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: String,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: [f64; 3],
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default = "default_label")]
    pub label_value: u16,
    /// Index into [`SegmentationDocument::labelmaps`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labelmap: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_surface: Option<SurfaceMesh>,
}

fn default_color() -> [f64; 3] {
    DEFAULT_COLOR
}

fn default_label() -> u16 {
    1
}

impl LabelmapRecord {
    fn from_volume(volume: &OrientedVolume) -> Self {
        let mut runs: Vec<(u16, u32)> = Vec::new();
        if volume.is_allocated() {
            for value in volume.scalars().iter() {
                match runs.last_mut() {
                    Some((last, count)) if *last == value && *count < u32::MAX => *count += 1,
                    _ => runs.push((value, 1)),
                }
            }
        }
        Self {
            geometry: serialize_image_geometry(volume),
            allocated: volume.is_allocated(),
            runs,
        }
    }

    /// Rebuilds the volume, checking that the runs cover the extent exactly.
    pub fn to_volume(&self) -> Result<OrientedVolume, SegmentationError> {
        let mut volume = deserialize_image_geometry(&self.geometry)?;
        if !self.allocated {
            return Ok(volume);
        }
        let expected = volume.extent().voxel_count();
        let total: u64 = self.runs.iter().map(|&(_, n)| n as u64).sum();
        if total != expected as u64 {
            return Err(SegmentationError::InvalidInput(format!(
                "labelmap runs cover {} voxels but the extent has {}",
                total, expected
            )));
        }
        volume.fill(0);
        let indices: Vec<[i32; 3]> = volume.extent().indices().collect();
        let mut cursor = 0usize;
        for &(value, count) in &self.runs {
            let count = count as usize;
            if value != 0 {
                for &[i, j, k] in &indices[cursor..cursor + count] {
                    volume.set_voxel(i, j, k, value);
                }
            }
            cursor += count;
        }
        Ok(volume)
    }
}

impl SegmentationDocument {
    /// Captures the current state of `segmentation`.
    ///
    /// Stale derived representations (after an unprocessed master change)
    /// are left out.
    pub fn from_segmentation(segmentation: &Segmentation) -> Self {
        let mut layer_ids: Vec<u64> = Vec::new();
        let mut labelmaps = Vec::new();
        let mut segments = Vec::new();

        for (id, segment) in segmentation.segments() {
            let labelmap = segment.binary_labelmap().map(|handle| {
                match layer_ids.iter().position(|&known| known == handle.id()) {
                    Some(index) => index,
                    None => {
                        layer_ids.push(handle.id());
                        labelmaps.push(LabelmapRecord::from_volume(&handle.borrow()));
                        labelmaps.len() - 1
                    }
                }
            });
            segments.push(SegmentRecord {
                id: id.to_string(),
                name: segment.name().to_string(),
                color: segment.color(),
                tags: segment.tags().clone(),
                label_value: segment.label_value(),
                labelmap,
                closed_surface: segment.closed_surface().map(|h| h.borrow().clone()),
            });
        }

        Self {
            master_representation: segmentation.master_representation_name().to_string(),
            conversion_parameters: segmentation.conversion_parameters().clone(),
            labelmaps,
            segments,
        }
    }

    /// Builds a segmentation using the rules of `registry`.
    ///
    /// Segments go through [`Segmentation::add_segment`], so a document whose
    /// segments disagree on their representation sets is brought into line
    /// (or rejected) the same way as programmatic input.
    pub fn into_segmentation(self, registry: &RuleRegistry) -> Result<Segmentation, SegmentationError> {
        if Representation::kind_for_name(&self.master_representation).is_none() {
            return Err(SegmentationError::IncompatibleRepresentation(format!(
                "unknown master representation '{}'",
                self.master_representation
            )));
        }
        let mut segmentation = Segmentation::new(registry, &self.master_representation);
        {
            let parameters = segmentation.converter.parameters_mut();
            parameters.update_values(&self.conversion_parameters);
            parameters.insert_missing(&self.conversion_parameters);
        }

        let handles = self
            .labelmaps
            .iter()
            .map(|record| record.to_volume().map(DataHandle::new))
            .collect::<Result<Vec<_>, _>>()?;

        for record in self.segments {
            let mut segment = Segment::new(record.name);
            segment.set_color(record.color);
            for (key, value) in record.tags {
                segment.set_tag(key, value);
            }
            segment.set_label_value(record.label_value);
            if let Some(index) = record.labelmap {
                let handle = handles.get(index).ok_or_else(|| {
                    SegmentationError::InvalidInput(format!(
                        "segment '{}' references labelmap {} of {}",
                        record.id,
                        index,
                        handles.len()
                    ))
                })?;
                segment.add_representation(BINARY_LABELMAP, Representation::BinaryLabelmap(handle.clone()));
            }
            if let Some(mesh) = record.closed_surface {
                segment.add_representation(CLOSED_SURFACE, Representation::closed_surface(mesh));
            }
            segmentation.add_segment(segment, Some(&record.id), None)?;
        }
        Ok(segmentation)
    }
}

/// Reads a segmentation document from a JSON file.
pub fn read_document_json(path: &Path) -> Result<SegmentationDocument, SegmentationError> {
    let file = File::open(path).map_err(SegmentationError::Io)?;
    let reader = BufReader::new(file);

    serde_json::from_reader(reader).map_err(|source| SegmentationError::JsonParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes a segmentation document to a JSON file.
pub fn write_document_json(path: &Path, document: &SegmentationDocument) -> Result<(), SegmentationError> {
    let file = File::create(path).map_err(SegmentationError::Io)?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, document).map_err(|source| SegmentationError::JsonWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a segmentation from a JSON file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, or if the document
/// describes segments the registry cannot reconcile.
pub fn read_segmentation_json(path: &Path, registry: &RuleRegistry) -> Result<Segmentation, SegmentationError> {
    read_document_json(path)?.into_segmentation(registry)
}

/// Writes a segmentation to a JSON file.
pub fn write_segmentation_json(path: &Path, segmentation: &Segmentation) -> Result<(), SegmentationError> {
    write_document_json(path, &SegmentationDocument::from_segmentation(segmentation))
}
