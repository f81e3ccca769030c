use nalgebra::{Matrix4, Vector3};
use proptest::prelude::*;
use segcore::conversion::params::COLLAPSE_LABELMAPS;
use segcore::segmentation::{BINARY_LABELMAP, CLOSED_SURFACE};
use segcore::Segmentation;

mod common;
mod proptest_helpers;

#[derive(Clone, Debug)]
enum Op {
    AddBox([f64; 3], [f64; 3]),
    AddEmpty,
    RemoveFirst,
    CreateLabelmap,
    CreateSurface,
    ShiftFirstMaster(i32),
    ShiftAll(i32),
    ToggleMaster,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => proptest_helpers::arb_box().prop_map(|(min, max)| Op::AddBox(min, max)),
        1 => Just(Op::AddEmpty),
        1 => Just(Op::RemoveFirst),
        2 => Just(Op::CreateLabelmap),
        1 => Just(Op::CreateSurface),
        1 => (-2i32..=2).prop_map(Op::ShiftFirstMaster),
        1 => (-2i32..=2).prop_map(Op::ShiftAll),
        1 => Just(Op::ToggleMaster),
    ]
}

fn translation(step: i32) -> Matrix4<f64> {
    Matrix4::new_translation(&Vector3::new(step as f64, 0.0, -(step as f64)))
}

fn apply(seg: &mut Segmentation, op: &Op, counter: &mut usize) {
    match op {
        Op::AddBox(min, max) => {
            *counter += 1;
            let segment = common::box_segment(&format!("box {}", counter), *min, *max);
            seg.add_segment(segment, None, None).expect("add box");
        }
        Op::AddEmpty => {
            seg.add_empty_segment(None, None, None).expect("add empty");
        }
        Op::RemoveFirst => {
            if let Some(id) = seg.nth_segment_id(0).map(str::to_string) {
                seg.remove_segment(&id).expect("remove");
            }
        }
        Op::CreateLabelmap => seg.create_representation(BINARY_LABELMAP, false).expect("labelmap"),
        Op::CreateSurface => seg.create_representation(CLOSED_SURFACE, false).expect("surface"),
        Op::ShiftFirstMaster(step) => {
            let master = seg.master_representation_name().to_string();
            if let Some(rep) = seg.nth_segment(0).and_then(|s| s.representation(&master)) {
                rep.apply_transform(&translation(*step));
            }
            seg.process_pending_changes();
        }
        Op::ShiftAll(step) => seg.apply_linear_transform(&translation(*step)).expect("transform"),
        Op::ToggleMaster => {
            let next = if seg.master_representation_name() == BINARY_LABELMAP {
                CLOSED_SURFACE
            } else {
                BINARY_LABELMAP
            };
            seg.set_master_representation_name(next).expect("switch master");
        }
    }
}

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn operations_keep_representation_sets_uniform(
        ops in prop::collection::vec(arb_op(), 1..8),
    ) {
        let mut seg = common::surface_segmentation(29);
        let mut counter = 0;
        for op in &ops {
            apply(&mut seg, op, &mut counter);
            common::assert_representation_sets_agree(&seg);
            common::assert_layer_labels_unique(&seg);
        }
    }

    #[test]
    fn collapsing_keeps_every_segment_voxel(
        boxes in prop::collection::vec(proptest_helpers::arb_box(), 1..5),
    ) {
        let mut seg = common::surface_segmentation(29);
        seg.set_conversion_parameter(COLLAPSE_LABELMAPS, "0");
        for (n, (min, max)) in boxes.iter().enumerate() {
            seg.add_segment(common::box_segment(&format!("box {}", n), *min, *max), None, None)
                .expect("add box");
        }
        seg.create_representation(BINARY_LABELMAP, false).expect("labelmap");
        prop_assert_eq!(seg.number_of_layers(), boxes.len());

        let ids: Vec<String> = seg.segment_ids().to_vec();
        let before: Vec<usize> = ids.iter().map(|id| common::label_voxel_count(&seg, id)).collect();

        seg.collapse_binary_labelmaps(false).expect("collapse");
        let after: Vec<usize> = ids.iter().map(|id| common::label_voxel_count(&seg, id)).collect();

        prop_assert_eq!(before, after);
        prop_assert!(seg.number_of_layers() <= boxes.len());
        common::assert_layer_labels_unique(&seg);
    }

    #[test]
    fn forced_collapse_leaves_one_layer(
        boxes in prop::collection::vec(proptest_helpers::arb_box(), 1..5),
    ) {
        let mut seg = common::surface_segmentation(29);
        seg.set_conversion_parameter(COLLAPSE_LABELMAPS, "0");
        for (n, (min, max)) in boxes.iter().enumerate() {
            seg.add_segment(common::box_segment(&format!("box {}", n), *min, *max), None, None)
                .expect("add box");
        }
        seg.create_representation(BINARY_LABELMAP, false).expect("labelmap");
        seg.collapse_binary_labelmaps(true).expect("collapse");

        prop_assert_eq!(seg.number_of_layers(), 1);
        common::assert_layer_labels_unique(&seg);
        // The last segment is painted last and so keeps all of its voxels.
        let last = seg.nth_segment_id(boxes.len() - 1).expect("last id").to_string();
        prop_assert!(common::label_voxel_count(&seg, &last) > 0);
    }
}
