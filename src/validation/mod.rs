//! Segmentation document validation.
//!
//! This module checks a [`SegmentationDocument`] against the invariants a
//! loaded [`Segmentation`] relies on:
//! - Structural integrity (unique segment IDs, valid labelmap references)
//! - Representation consistency (same set everywhere, master present)
//! - Shared-layer label uniqueness
//! - Data quality (empty segments, open surfaces, odd parameter values)

mod report;

pub use report::{IssueCode, IssueContext, Severity, ValidationIssue, ValidationReport};

use std::collections::{BTreeSet, HashMap};

use crate::conversion::params::{
    AUTOMATIC_OVERSAMPLING, COLLAPSE_LABELMAPS, CROP_TO_REFERENCE_IMAGE_GEOMETRY, OVERSAMPLING_FACTOR,
    REFERENCE_IMAGE_GEOMETRY, SMOOTHING_FACTOR,
};
use crate::geometry::{deserialize_image_geometry, OrientedVolume};
use crate::segmentation::io_json::{SegmentRecord, SegmentationDocument};
use crate::segmentation::{Representation, Segmentation, BINARY_LABELMAP, CLOSED_SURFACE};

/// Options for validation behavior.
#[derive(Clone, Debug, Default)]
pub struct ValidateOptions {
    /// If true, treat warnings as errors.
    pub strict: bool,
}

/// Validates a document and returns a report of all issues found.
pub fn validate_document(document: &SegmentationDocument, _opts: &ValidateOptions) -> ValidationReport {
    let mut report = ValidationReport::new();

    if Representation::kind_for_name(&document.master_representation).is_none() {
        report.add(ValidationIssue::error(
            IssueCode::UnknownMasterRepresentation,
            format!("Unknown master representation '{}'", document.master_representation),
            IssueContext::Document,
        ));
    }

    validate_parameters(document, &mut report);
    let volumes = validate_labelmaps(document, &mut report);
    validate_segments(document, &volumes, &mut report);

    report
}

/// Validates the current state of an in-memory segmentation.
pub fn validate_segmentation(segmentation: &Segmentation, opts: &ValidateOptions) -> ValidationReport {
    validate_document(&SegmentationDocument::from_segmentation(segmentation), opts)
}

fn validate_parameters(document: &SegmentationDocument, report: &mut ValidationReport) {
    let params = &document.conversion_parameters;
    let mut invalid = |name: &str, message: String| {
        report.add(ValidationIssue::warning(
            IssueCode::InvalidConversionParameter,
            message,
            IssueContext::Parameter { name: name.to_string() },
        ));
    };

    if let Some(text) = params.value(REFERENCE_IMAGE_GEOMETRY) {
        let trimmed = text.trim();
        if !trimmed.is_empty() && trimmed != ";" {
            if let Err(err) = deserialize_image_geometry(trimmed) {
                invalid(REFERENCE_IMAGE_GEOMETRY, format!("Malformed geometry: {}", err));
            }
        }
    }

    if let Some(value) = params.value(OVERSAMPLING_FACTOR) {
        let value = value.trim();
        let usable = value == AUTOMATIC_OVERSAMPLING || value.parse::<f64>().is_ok_and(|f| f > 0.0);
        if !usable {
            invalid(
                OVERSAMPLING_FACTOR,
                format!("'{}' is neither a positive number nor '{}'", value, AUTOMATIC_OVERSAMPLING),
            );
        }
    }

    for flag in [CROP_TO_REFERENCE_IMAGE_GEOMETRY, COLLAPSE_LABELMAPS] {
        if let Some(value) = params.value(flag) {
            if !matches!(value.trim(), "0" | "1") {
                invalid(flag, format!("'{}' is not 0 or 1", value));
            }
        }
    }

    if let Some(value) = params.value(SMOOTHING_FACTOR) {
        if !value.trim().parse::<f64>().is_ok_and(|f| (0.0..=1.0).contains(&f)) {
            invalid(SMOOTHING_FACTOR, format!("'{}' is not a number in [0, 1]", value));
        }
    }
}

/// Decodes every labelmap, reporting those that cannot be decoded.
fn validate_labelmaps(document: &SegmentationDocument, report: &mut ValidationReport) -> Vec<Option<OrientedVolume>> {
    let referenced: BTreeSet<usize> = document.segments.iter().filter_map(|s| s.labelmap).collect();
    let mut volumes = Vec::with_capacity(document.labelmaps.len());

    for (index, record) in document.labelmaps.iter().enumerate() {
        let context = IssueContext::Labelmap { index };
        if let Err(err) = deserialize_image_geometry(&record.geometry) {
            report.add(ValidationIssue::error(
                IssueCode::InvalidLabelmapGeometry,
                format!("Geometry does not parse: {}", err),
                context,
            ));
            volumes.push(None);
            continue;
        }
        match record.to_volume() {
            Ok(volume) => volumes.push(Some(volume)),
            Err(err) => {
                report.add(ValidationIssue::error(
                    IssueCode::LabelmapRunMismatch,
                    err.to_string(),
                    context.clone(),
                ));
                volumes.push(None);
            }
        }
        if !referenced.contains(&index) {
            report.add(ValidationIssue::warning(
                IssueCode::UnreferencedLabelmap,
                "No segment references this labelmap",
                IssueContext::Labelmap { index },
            ));
        }
    }

    volumes
}

fn representation_names(segment: &SegmentRecord) -> BTreeSet<&'static str> {
    let mut names = BTreeSet::new();
    if segment.labelmap.is_some() {
        names.insert(BINARY_LABELMAP);
    }
    if segment.closed_surface.is_some() {
        names.insert(CLOSED_SURFACE);
    }
    names
}

/// Validates all segments in the document.
fn validate_segments(
    document: &SegmentationDocument,
    volumes: &[Option<OrientedVolume>],
    report: &mut ValidationReport,
) {
    let master = document.master_representation.as_str();
    let mut seen_ids: HashMap<&str, usize> = HashMap::new();
    let mut seen_names: HashMap<String, &str> = HashMap::new();
    let mut layer_labels: HashMap<usize, HashMap<u16, &str>> = HashMap::new();
    let expected_names = document.segments.first().map(representation_names);

    for (idx, segment) in document.segments.iter().enumerate() {
        let id = segment.id.as_str();
        let context = || IssueContext::Segment { id: id.to_string() };

        // IDs
        if id.is_empty() {
            report.add(ValidationIssue::error(
                IssueCode::EmptySegmentId,
                format!("Segment at index {} has an empty ID", idx),
                IssueContext::Document,
            ));
        } else if let Some(first_idx) = seen_ids.get(id) {
            report.add(ValidationIssue::error(
                IssueCode::DuplicateSegmentId,
                format!("Duplicate segment ID (first seen at index {})", first_idx),
                context(),
            ));
        } else {
            seen_ids.insert(id, idx);
        }

        // Names
        if segment.name.is_empty() {
            report.add(ValidationIssue::warning(
                IssueCode::EmptySegmentName,
                "Empty segment name",
                context(),
            ));
        } else if let Some(first_id) = seen_names.get(&segment.name.to_lowercase()) {
            report.add(ValidationIssue::warning(
                IssueCode::DuplicateSegmentName,
                format!("Name '{}' is also used by segment '{}'", segment.name, first_id),
                context(),
            ));
        } else {
            seen_names.insert(segment.name.to_lowercase(), id);
        }

        if segment.color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            report.add(ValidationIssue::warning(
                IssueCode::ColorOutOfRange,
                format!("Colour {:?} has components outside [0, 1]", segment.color),
                context(),
            ));
        }

        // Representations
        let names = representation_names(segment);
        if !names.contains(master) {
            report.add(ValidationIssue::error(
                IssueCode::MissingMasterRepresentation,
                format!("Segment has no '{}' representation", master),
                context(),
            ));
        }
        if let Some(expected) = &expected_names {
            if idx > 0 && &names != expected {
                report.add(ValidationIssue::error(
                    IssueCode::RepresentationSetMismatch,
                    format!("Holds {:?} but the first segment holds {:?}", names, expected),
                    context(),
                ));
            }
        }

        if segment.label_value == 0 {
            report.add(ValidationIssue::error(
                IssueCode::InvalidLabelValue,
                "Label value 0 is reserved for background",
                context(),
            ));
        }

        let mut volume = None;
        if let Some(index) = segment.labelmap {
            if index >= document.labelmaps.len() {
                report.add(ValidationIssue::error(
                    IssueCode::DanglingLabelmapRef,
                    format!(
                        "References labelmap {} but only {} exist",
                        index,
                        document.labelmaps.len()
                    ),
                    context(),
                ));
            } else {
                let labels = layer_labels.entry(index).or_default();
                if let Some(other) = labels.get(&segment.label_value) {
                    report.add(ValidationIssue::error(
                        IssueCode::DuplicateLabelInLayer,
                        format!(
                            "Label value {} in labelmap {} is also used by segment '{}'",
                            segment.label_value, index, other
                        ),
                        context(),
                    ));
                } else {
                    labels.insert(segment.label_value, id);
                }
                volume = volumes.get(index).and_then(Option::as_ref);
            }
        }

        if let Some(mesh) = &segment.closed_surface {
            if !mesh.is_empty() && !mesh.is_closed() {
                report.add(ValidationIssue::warning(
                    IssueCode::OpenSurface,
                    "Closed surface has boundary edges",
                    context(),
                ));
            }
        }

        // Empty master
        let empty = match master {
            BINARY_LABELMAP => volume.is_some_and(|v| {
                !v.is_allocated() || !v.voxels().any(|(_, value)| value == segment.label_value)
            }),
            CLOSED_SURFACE => segment.closed_surface.as_ref().is_some_and(|m| m.is_empty()),
            _ => false,
        };
        if empty {
            report.add(ValidationIssue::warning(
                IssueCode::EmptySegment,
                format!("Master representation '{}' holds no data", master),
                context(),
            ));
        }
    }

    // Voxel values nobody claims
    for (index, labels) in &layer_labels {
        let Some(Some(volume)) = volumes.get(*index) else {
            continue;
        };
        let unclaimed: Vec<u16> = volume
            .labels()
            .into_iter()
            .filter(|value| !labels.contains_key(value))
            .collect();
        if !unclaimed.is_empty() {
            report.add(ValidationIssue::warning(
                IssueCode::UnclaimedLabelValue,
                format!("Voxel values {:?} belong to no segment", unclaimed),
                IssueContext::Labelmap { index: *index },
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{box_mesh, serialize_geometry_parts, Extent, SurfaceMesh};
    use crate::segmentation::io_json::LabelmapRecord;
    use crate::segmentation::DEFAULT_COLOR;
    use nalgebra::{Matrix4, Point3};
    use std::collections::BTreeMap;

    fn record(id: &str, labelmap: Option<usize>, label: u16) -> SegmentRecord {
        SegmentRecord {
            id: id.into(),
            name: id.into(),
            color: DEFAULT_COLOR,
            tags: BTreeMap::new(),
            label_value: label,
            labelmap,
            closed_surface: None,
        }
    }

    fn layer(runs: Vec<(u16, u32)>) -> LabelmapRecord {
        LabelmapRecord {
            geometry: serialize_geometry_parts(&Matrix4::identity(), &Extent::new(0, 3, 0, 0, 0, 0)),
            allocated: true,
            runs,
        }
    }

    fn labelmap_document(segments: Vec<SegmentRecord>, labelmaps: Vec<LabelmapRecord>) -> SegmentationDocument {
        SegmentationDocument {
            master_representation: BINARY_LABELMAP.into(),
            labelmaps,
            segments,
            ..Default::default()
        }
    }

    #[test]
    fn consistent_document_is_clean() {
        let doc = labelmap_document(
            vec![record("a", Some(0), 1), record("b", Some(0), 2)],
            vec![layer(vec![(1, 2), (2, 2)])],
        );
        let report = validate_document(&doc, &ValidateOptions::default());
        assert!(report.is_ok_strict(), "{}", report);
    }

    #[test]
    fn shared_layer_label_collision_is_an_error() {
        let doc = labelmap_document(
            vec![record("a", Some(0), 1), record("b", Some(0), 1)],
            vec![layer(vec![(1, 4)])],
        );
        let report = validate_document(&doc, &ValidateOptions::default());
        assert!(report.has(IssueCode::DuplicateLabelInLayer));
        assert!(!report.is_ok());
    }

    #[test]
    fn structural_problems_are_reported() {
        let doc = labelmap_document(
            vec![
                record("a", Some(0), 1),
                record("a", Some(5), 1),
                record("c", None, 0),
            ],
            vec![layer(vec![(1, 1), (0, 1), (7, 2)]), layer(vec![(0, 3)])],
        );
        let report = validate_document(&doc, &ValidateOptions::default());
        for code in [
            IssueCode::DuplicateSegmentId,
            IssueCode::DuplicateSegmentName,
            IssueCode::DanglingLabelmapRef,
            IssueCode::MissingMasterRepresentation,
            IssueCode::RepresentationSetMismatch,
            IssueCode::InvalidLabelValue,
            IssueCode::LabelmapRunMismatch,
            IssueCode::UnclaimedLabelValue,
        ] {
            assert!(report.has(code), "missing {:?} in {}", code, report);
        }
    }

    #[test]
    fn surface_quality_warnings() {
        let mut open = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        open.polys.pop();
        let mut a = record("a", None, 1);
        a.closed_surface = Some(open);
        let mut b = record("b", None, 1);
        b.closed_surface = Some(SurfaceMesh::default());
        b.color = [2.0, 0.0, 0.0];
        let mut doc = SegmentationDocument {
            master_representation: CLOSED_SURFACE.into(),
            segments: vec![a, b],
            ..Default::default()
        };
        doc.conversion_parameters.set_value(OVERSAMPLING_FACTOR, "fast");
        doc.conversion_parameters.set_value(REFERENCE_IMAGE_GEOMETRY, "1;2;3");

        let report = validate_document(&doc, &ValidateOptions::default());
        assert!(report.is_ok(), "{}", report);
        for code in [
            IssueCode::OpenSurface,
            IssueCode::EmptySegment,
            IssueCode::ColorOutOfRange,
            IssueCode::InvalidConversionParameter,
        ] {
            assert!(report.has(code), "missing {:?} in {}", code, report);
        }
    }

    #[test]
    fn live_segmentation_validates_clean() {
        let mut seg = Segmentation::default();
        let id = seg.add_empty_segment(None, Some("Liver"), None).unwrap();
        let report = validate_segmentation(&seg, &ValidateOptions::default());
        // A freshly added segment has no voxels yet.
        assert!(report.is_ok());
        assert!(report
            .issues
            .iter()
            .all(|i| i.code == IssueCode::EmptySegment && matches!(&i.context, IssueContext::Segment { id: s } if *s == id)));
    }
}
