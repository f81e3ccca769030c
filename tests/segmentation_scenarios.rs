use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{Matrix4, Vector3};
use segcore::conversion::params::{OVERSAMPLING_FACTOR, REFERENCE_IMAGE_GEOMETRY};
use segcore::segmentation::io_json::{read_segmentation_json, write_segmentation_json};
use segcore::conversion::RuleRegistry;
use segcore::segmentation::{SegmentationEvent, BINARY_LABELMAP, CLOSED_SURFACE};
use segcore::{ErrorKind, Segmentation};

mod common;

fn two_boxes() -> (Segmentation, String, String) {
    let mut seg = common::surface_segmentation(19);
    let a = seg
        .add_segment(common::box_segment("a", [0.5, 0.5, 0.5], [3.5, 3.5, 3.5]), None, None)
        .expect("add a");
    let b = seg
        .add_segment(common::box_segment("b", [9.5, 9.5, 9.5], [11.5, 11.5, 11.5]), None, None)
        .expect("add b");
    (seg, a, b)
}

#[test]
fn surfaces_rasterise_onto_the_reference_grid() {
    let (mut seg, a, b) = two_boxes();
    seg.create_representation(BINARY_LABELMAP, false).expect("convert");

    assert_eq!(common::label_voxel_count(&seg, &a), 27);
    assert_eq!(common::label_voxel_count(&seg, &b), 8);
    // Disjoint segments on the same grid end up in one layer.
    assert_eq!(seg.number_of_layers(), 1);
    common::assert_representation_sets_agree(&seg);
    common::assert_layer_labels_unique(&seg);

    let handle = seg.segment(&a).and_then(|s| s.binary_labelmap()).expect("labelmap");
    let spacing = handle.borrow().spacing();
    assert!((spacing - Vector3::new(1.0, 1.0, 1.0)).norm() < 1e-9);
}

#[test]
fn empty_segment_added_after_conversion_joins_the_first_layer() {
    let (mut seg, a, _) = two_boxes();
    seg.create_representation(BINARY_LABELMAP, false).expect("convert");

    let empty = seg.add_empty_segment(Some("empty"), Some("Empty"), None).expect("add empty");
    assert_eq!(empty, "empty");
    assert!(seg.segment_ids_sharing_labelmap(&a).contains(&empty));
    assert_eq!(seg.segment(&empty).map(|s| s.label_value()), Some(3));
    assert_eq!(common::label_voxel_count(&seg, &empty), 0);
    common::assert_representation_sets_agree(&seg);
}

#[test]
fn empty_placeholder_converts_to_empty_labelmap() {
    let mut seg = common::surface_segmentation(19);
    let full = seg
        .add_segment(common::box_segment("full", [0.5, 0.5, 0.5], [2.5, 2.5, 2.5]), None, None)
        .expect("add full");
    let empty = seg.add_empty_segment(None, Some("Nothing yet"), None).expect("add empty");
    assert!(seg
        .segment(&empty)
        .and_then(|s| s.representation(CLOSED_SURFACE))
        .is_some_and(|r| r.is_empty()));

    seg.create_representation(BINARY_LABELMAP, false).expect("convert");
    assert!(common::has_labelmap(&seg, &empty));
    assert_eq!(common::label_voxel_count(&seg, &full), 8);
    assert_eq!(common::label_voxel_count(&seg, &empty), 0);
    common::assert_layer_labels_unique(&seg);
}

#[test]
fn editing_the_master_drops_and_rebuilds_derived_data() {
    let (mut seg, a, _) = two_boxes();
    seg.create_representation(BINARY_LABELMAP, false).expect("convert");
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    seg.subscribe(move |e| sink.borrow_mut().push(e.clone()));

    let shift = Matrix4::new_translation(&Vector3::new(4.0, 0.0, 0.0));
    seg.segment(&a)
        .and_then(|s| s.representation(CLOSED_SURFACE))
        .expect("master")
        .apply_transform(&shift);
    // Listeners hear about the edit before the segmentation is touched again.
    assert_eq!(*events.borrow(), vec![SegmentationEvent::MasterRepresentationModified]);
    assert!(seg.process_pending_changes());
    assert!(!seg.contains_representation(BINARY_LABELMAP));
    assert_eq!(seg.contained_representation_names(), vec![CLOSED_SURFACE.to_string()]);

    seg.create_representation(BINARY_LABELMAP, false).expect("reconvert");
    assert_eq!(common::label_voxel_count(&seg, &a), 27);
    let bounds = seg
        .segment_representation(&a, CLOSED_SURFACE)
        .expect("surface")
        .bounds();
    assert!((bounds.min.x - 4.5).abs() < 1e-6, "{:?}", bounds);
}

#[test]
fn disabled_tracking_keeps_derived_data() {
    let (mut seg, a, _) = two_boxes();
    seg.create_representation(BINARY_LABELMAP, false).expect("convert");
    assert!(seg.set_master_representation_modified_enabled(false));

    seg.segment(&a)
        .and_then(|s| s.representation(CLOSED_SURFACE))
        .expect("master")
        .apply_transform(&Matrix4::new_translation(&Vector3::new(1.0, 0.0, 0.0)));
    seg.process_pending_changes();
    assert!(seg.contains_representation(BINARY_LABELMAP));
}

#[test]
fn labelmap_master_drops_extra_representations_of_new_segments() {
    let mut seg = Segmentation::with_default_rules(BINARY_LABELMAP);
    seg.set_conversion_parameter(REFERENCE_IMAGE_GEOMETRY, common::reference_geometry(19));
    let first = seg
        .add_segment(common::box_segment("box", [0.5, 0.5, 0.5], [2.5, 2.5, 2.5]), None, None)
        .expect("add");
    // The first segment defines the representation set, so it keeps its surface.
    assert!(seg.contains_representation(CLOSED_SURFACE));
    assert_eq!(common::label_voxel_count(&seg, &first), 8);

    seg.remove_representation(CLOSED_SURFACE).expect("drop surfaces");
    let second = seg
        .add_segment(common::box_segment("other", [5.5, 5.5, 5.5], [6.5, 6.5, 6.5]), None, None)
        .expect("add second");
    let names = seg.segment(&second).expect("segment").representation_names();
    assert_eq!(names, vec![BINARY_LABELMAP.to_string()]);
    assert_eq!(common::label_voxel_count(&seg, &second), 1);
    common::assert_representation_sets_agree(&seg);
}

#[test]
fn switching_master_converts_before_invalidating() {
    let (mut seg, a, _) = two_boxes();
    seg.set_master_representation_name(BINARY_LABELMAP).expect("switch");
    assert_eq!(seg.master_representation_name(), BINARY_LABELMAP);
    assert_eq!(seg.contained_representation_names(), vec![BINARY_LABELMAP.to_string()]);
    assert_eq!(common::label_voxel_count(&seg, &a), 27);

    let err = seg.remove_representation(BINARY_LABELMAP).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn bulk_conversion_announces_new_names_last() {
    let (mut seg, a, b) = two_boxes();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    seg.subscribe(move |e| sink.borrow_mut().push(e.clone()));

    seg.create_representation(BINARY_LABELMAP, false).expect("convert");
    let events = events.borrow();
    assert_eq!(events.last(), Some(&SegmentationEvent::ContainedRepresentationNamesModified));
    for id in [&a, &b] {
        assert!(events.contains(&SegmentationEvent::RepresentationModified(id.clone())));
    }
}

#[test]
fn unsatisfiable_oversampling_still_converts() {
    let (mut seg, a, _) = two_boxes();
    seg.set_conversion_parameter(OVERSAMPLING_FACTOR, "1000");
    seg.create_representation(BINARY_LABELMAP, false).expect("convert");
    // An out-of-range factor leaves the grid alone.
    assert_eq!(common::label_voxel_count(&seg, &a), 27);
}

#[test]
fn parameters_travel_as_text() {
    let (mut seg, _, _) = two_boxes();
    seg.set_conversion_parameter(OVERSAMPLING_FACTOR, "A");
    let text = seg.serialize_all_conversion_parameters();

    let mut other = Segmentation::with_default_rules(CLOSED_SURFACE);
    assert!(other.deserialize_conversion_parameters(&text) >= 2);
    assert_eq!(other.conversion_parameter(OVERSAMPLING_FACTOR), Some("A"));
    assert_eq!(
        other.conversion_parameter(REFERENCE_IMAGE_GEOMETRY),
        seg.conversion_parameter(REFERENCE_IMAGE_GEOMETRY)
    );
}

#[test]
fn document_files_preserve_layers_and_labels() {
    let (mut seg, a, b) = two_boxes();
    seg.create_representation(BINARY_LABELMAP, false).expect("convert");
    seg.set_segment_tag(&b, "Organ", "kidney").expect("tag");

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("seg.json");
    write_segmentation_json(&path, &seg).expect("write");
    let restored = read_segmentation_json(&path, &RuleRegistry::with_default_rules()).expect("read");

    assert_eq!(restored.segment_ids(), seg.segment_ids());
    assert_eq!(restored.number_of_layers(), 1);
    assert_eq!(common::label_voxel_count(&restored, &a), 27);
    assert_eq!(common::label_voxel_count(&restored, &b), 8);
    assert_eq!(restored.segments_by_tag("Organ", Some("kidney")).len(), 1);
    common::assert_representation_sets_agree(&restored);
}
