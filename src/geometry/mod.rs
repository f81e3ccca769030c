//! Geometric building blocks: voxel grids, meshes and their conversions.
//!
//! # Coordinate frames
//!
//! Two frames appear throughout the crate:
//!
//! 1. **World** (physical, typically millimetres). Meshes live here.
//! 2. **IJK** (voxel index). Each [`OrientedVolume`] maps IJK to world with
//!    its image-to-world matrix; voxel `(i, j, k)` is centred at the image
//!    of the integer point, so its outer faces sit half a voxel away.
//!
//! Extents are always inclusive and always expressed in the IJK frame of
//! the volume they belong to.

mod bounds;
mod extent;
pub mod io_json;
pub mod io_obj;
mod mass;
mod mesh;
mod oriented;
pub mod resample;
mod serialize;

pub use bounds::Bounds;
pub use extent::Extent;
pub use mass::MassProperties;
pub use mesh::{box_mesh, sphere_mesh, SurfaceMesh};
pub use oriented::{OrientedVolume, ScalarType, Scalars};
#[cfg(feature = "fuzzing")]
pub use serialize::fuzz_parse_image_geometry;
pub use serialize::{
    deserialize_image_geometry, serialize_geometry_parts, serialize_image_geometry, MAX_VOXEL_COUNT,
};
