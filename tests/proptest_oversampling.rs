use nalgebra::{Matrix4, Point3};
use proptest::prelude::*;
use segcore::geometry::{sphere_mesh, Extent, OrientedVolume};
use segcore::oversampling::{apply_oversampling_on_image_geometry, OversamplingEstimator};

mod proptest_helpers;

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn larger_structures_never_need_more_oversampling(
        a in 0.0f64..1.0,
        b in 0.0f64..1.0,
        complexity in 0.0f64..2.0,
    ) {
        let estimator = OversamplingEstimator::new();
        let (small, large) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(estimator.infer_power(small, complexity) >= estimator.infer_power(large, complexity));
    }

    #[test]
    fn more_complex_structures_never_need_less_oversampling(
        size in 0.0f64..1.0,
        a in 0.0f64..2.0,
        b in 0.0f64..2.0,
    ) {
        let estimator = OversamplingEstimator::new();
        let (simple, complex) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(estimator.infer_power(size, simple) <= estimator.infer_power(size, complex));
    }

    #[test]
    fn inferred_power_stays_within_output_classes(
        size in 0.0f64..5.0,
        complexity in 0.0f64..5.0,
    ) {
        let power = OversamplingEstimator::new().infer_power(size, complexity);
        prop_assert!((-1..=2).contains(&power));
    }

    #[test]
    fn oversampling_keeps_outer_faces_in_place(
        extent in proptest_helpers::arb_extent(),
        matrix in proptest_helpers::arb_image_to_world(),
        power in -1i32..3,
    ) {
        let mut volume = OrientedVolume::with_geometry(&matrix, extent).geometry_only();
        let before = volume.compute_bounds();
        let factor = 2f64.powi(power);
        prop_assert!(apply_oversampling_on_image_geometry(&mut volume, factor));

        if power >= 0 {
            let after = volume.compute_bounds();
            let tolerance = 1e-6 * (1.0 + before.size().norm());
            // Growing the grid never moves the outer faces past the original ones.
            prop_assert!(before.contains_bounds(&after, tolerance), "{:?} -> {:?}", before, after);
        }
    }
}

#[test]
fn sphere_estimate_is_deterministic() {
    let mesh = sphere_mesh(Point3::new(10.0, 10.0, 10.0), 3.0, 16, 32);
    let reference = OrientedVolume::with_geometry(&Matrix4::identity(), Extent::new(0, 19, 0, 19, 0, 19))
        .geometry_only();
    let estimator = OversamplingEstimator::new();
    let first = estimator.estimate(&mesh, &reference).expect("estimate");
    let second = estimator.estimate(&mesh, &reference).expect("estimate");
    assert_eq!(first.power, second.power);
    assert_eq!(first.factor, 2f64.powi(first.power));
    assert!(first.relative_structure_size > 0.0);
}
