#![allow(dead_code)]

use nalgebra::{Matrix4, Rotation3, Vector3};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};
use segcore::geometry::Extent;

pub const EPS_MATRIX: f64 = 1e-6;

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Non-empty extents with small dimensions anywhere near the origin.
pub fn arb_extent() -> impl Strategy<Value = Extent> {
    (
        prop::array::uniform3(-6i32..6),
        prop::array::uniform3(0i32..6),
    )
        .prop_map(|(lo, len)| {
            Extent::new(
                lo[0],
                lo[0] + len[0],
                lo[1],
                lo[1] + len[1],
                lo[2],
                lo[2] + len[2],
            )
        })
}

/// Rotated, anisotropically scaled and translated image-to-world matrices.
pub fn arb_image_to_world() -> impl Strategy<Value = Matrix4<f64>> {
    (
        prop::array::uniform3(-3.1f64..3.1),
        prop::array::uniform3(0.2f64..3.0),
        prop::array::uniform3(-50.0f64..50.0),
    )
        .prop_map(|(angles, spacing, origin)| {
            let rotation = Rotation3::from_euler_angles(angles[0], angles[1], angles[2]);
            Matrix4::new_translation(&Vector3::from(origin))
                * rotation.to_homogeneous()
                * Matrix4::new_nonuniform_scaling(&Vector3::from(spacing))
        })
}

/// Axis-aligned boxes inside `[1, 25]³` given as `(min, max)` corners.
pub fn arb_box() -> impl Strategy<Value = ([f64; 3], [f64; 3])> {
    (
        prop::array::uniform3(1.0f64..19.0),
        prop::array::uniform3(1.5f64..6.0),
    )
        .prop_map(|(min, size)| {
            let max = [min[0] + size[0], min[1] + size[1], min[2] + size[2]];
            (min, max)
        })
}

pub fn matrices_close(a: &Matrix4<f64>, b: &Matrix4<f64>, eps: f64) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= eps * (1.0 + x.abs()))
}
