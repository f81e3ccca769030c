#![allow(dead_code)]

use nalgebra::{Matrix4, Point3};
use segcore::conversion::params::REFERENCE_IMAGE_GEOMETRY;
use segcore::geometry::{box_mesh, serialize_geometry_parts, Extent};
use segcore::segmentation::{Representation, Segment, BINARY_LABELMAP, CLOSED_SURFACE};
use segcore::Segmentation;

/// Identity-oriented reference grid covering `0..=max` on every axis.
pub fn reference_geometry(max: i32) -> String {
    serialize_geometry_parts(&Matrix4::identity(), &Extent::new(0, max, 0, max, 0, max))
}

/// A closed-surface segmentation whose labelmaps land on a small grid.
pub fn surface_segmentation(grid_max: i32) -> Segmentation {
    let mut seg = Segmentation::with_default_rules(CLOSED_SURFACE);
    seg.set_conversion_parameter(REFERENCE_IMAGE_GEOMETRY, reference_geometry(grid_max));
    seg
}

pub fn box_segment(name: &str, min: [f64; 3], max: [f64; 3]) -> Segment {
    let mesh = box_mesh(Point3::from(min), Point3::from(max));
    Segment::new(name).with_representation(CLOSED_SURFACE, Representation::closed_surface(mesh))
}

/// Number of voxels carrying the segment's own label in its labelmap.
pub fn label_voxel_count(seg: &Segmentation, id: &str) -> usize {
    let segment = seg.segment(id).expect("segment exists");
    let Some(handle) = segment.binary_labelmap() else {
        return 0;
    };
    let label = segment.label_value();
    let volume = handle.borrow();
    volume.voxels().filter(|&(_, value)| value == label).count()
}

/// Asserts that every segment holds exactly the segmentation's representations
/// and that the master is among them.
pub fn assert_representation_sets_agree(seg: &Segmentation) {
    let expected = seg.contained_representation_names();
    for (id, segment) in seg.segments() {
        let mut names = segment.representation_names();
        names.sort();
        let mut wanted = expected.clone();
        wanted.sort();
        assert_eq!(names, wanted, "segment '{}' disagrees", id);
        assert!(
            segment.contains_representation(seg.master_representation_name()),
            "segment '{}' lacks the master",
            id
        );
    }
}

/// Asserts that no two segments sharing a labelmap use the same label.
pub fn assert_layer_labels_unique(seg: &Segmentation) {
    for layer in seg.labelmap_layers() {
        let mut labels: Vec<u16> = layer
            .segment_ids
            .iter()
            .map(|id| seg.segment(id).expect("layer member").label_value())
            .collect();
        let total = labels.len();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), total, "duplicate label in a shared layer");
    }
}

pub fn has_labelmap(seg: &Segmentation, id: &str) -> bool {
    seg.segment(id)
        .is_some_and(|s| s.contains_representation(BINARY_LABELMAP))
}
