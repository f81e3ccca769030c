//! The closed set of representation kinds a segment can hold.

use nalgebra::Matrix4;

use super::handle::{ChangeBus, DataHandle};
use crate::error::SegmentationError;
use crate::geometry::{Bounds, OrientedVolume, SurfaceMesh};
use std::rc::Rc;

/// Name of the voxel-mask representation.
pub const BINARY_LABELMAP: &str = "Binary labelmap";
/// Name of the closed triangle-surface representation.
pub const CLOSED_SURFACE: &str = "Closed surface";

/// Underlying data structure of a representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataKind {
    /// Points and polygons.
    PolyData,
    /// An oriented voxel grid.
    ImageData,
}

/// One encoding of a segment's shape.
#[derive(Clone, Debug)]
pub enum Representation {
    ClosedSurface(DataHandle<SurfaceMesh>),
    BinaryLabelmap(DataHandle<OrientedVolume>),
}

impl Representation {
    pub fn closed_surface(mesh: SurfaceMesh) -> Self {
        Representation::ClosedSurface(DataHandle::new(mesh))
    }

    pub fn binary_labelmap(volume: OrientedVolume) -> Self {
        Representation::BinaryLabelmap(DataHandle::new(volume))
    }

    /// Data kind stored under a representation name, if the name is known.
    pub fn kind_for_name(name: &str) -> Option<DataKind> {
        match name {
            CLOSED_SURFACE => Some(DataKind::PolyData),
            BINARY_LABELMAP => Some(DataKind::ImageData),
            _ => None,
        }
    }

    /// An empty placeholder object for the named representation.
    pub fn empty(name: &str) -> Result<Self, SegmentationError> {
        match Self::kind_for_name(name) {
            Some(DataKind::PolyData) => Ok(Self::closed_surface(SurfaceMesh::default())),
            Some(DataKind::ImageData) => Ok(Self::binary_labelmap(OrientedVolume::new())),
            None => Err(SegmentationError::IncompatibleRepresentation(format!(
                "unable to construct representation '{}'",
                name
            ))),
        }
    }

    pub fn kind(&self) -> DataKind {
        match self {
            Representation::ClosedSurface(_) => DataKind::PolyData,
            Representation::BinaryLabelmap(_) => DataKind::ImageData,
        }
    }

    /// Identity of the underlying object.
    pub fn object_id(&self) -> u64 {
        match self {
            Representation::ClosedSurface(h) => h.id(),
            Representation::BinaryLabelmap(h) => h.id(),
        }
    }

    pub fn mtime(&self) -> u64 {
        match self {
            Representation::ClosedSurface(h) => h.mtime(),
            Representation::BinaryLabelmap(h) => h.mtime(),
        }
    }

    pub fn same_object(&self, other: &Representation) -> bool {
        self.object_id() == other.object_id()
    }

    /// True for a mesh without polygons or a labelmap without voxels.
    pub fn is_empty(&self) -> bool {
        match self {
            Representation::ClosedSurface(h) => h.borrow().is_empty(),
            Representation::BinaryLabelmap(h) => !h.borrow().is_allocated(),
        }
    }

    pub fn bounds(&self) -> Bounds {
        match self {
            Representation::ClosedSurface(h) => h.borrow().bounds(),
            Representation::BinaryLabelmap(h) => {
                let volume = h.borrow();
                if volume.is_allocated() {
                    volume.compute_bounds()
                } else {
                    Bounds::EMPTY
                }
            }
        }
    }

    pub fn as_closed_surface(&self) -> Option<&DataHandle<SurfaceMesh>> {
        match self {
            Representation::ClosedSurface(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_binary_labelmap(&self) -> Option<&DataHandle<OrientedVolume>> {
        match self {
            Representation::BinaryLabelmap(h) => Some(h),
            _ => None,
        }
    }

    /// Copies the underlying object into a fresh handle.
    pub fn deep_copy(&self) -> Self {
        match self {
            Representation::ClosedSurface(h) => Representation::ClosedSurface(h.deep_copy()),
            Representation::BinaryLabelmap(h) => Representation::BinaryLabelmap(h.deep_copy()),
        }
    }

    /// Moves the object in world space; observers are notified.
    pub fn apply_transform(&self, matrix: &Matrix4<f64>) {
        match self {
            Representation::ClosedSurface(h) => h.modify(|mesh| mesh.transform(matrix)),
            Representation::BinaryLabelmap(h) => h.modify(|volume| {
                let moved = matrix * volume.image_to_world_matrix();
                volume.set_image_to_world_matrix(&moved);
            }),
        }
    }

    pub(crate) fn attach(&self, bus: &Rc<ChangeBus>) {
        match self {
            Representation::ClosedSurface(h) => h.attach(bus),
            Representation::BinaryLabelmap(h) => h.attach(bus),
        }
    }

    pub(crate) fn detach(&self, bus: &Rc<ChangeBus>) {
        match self {
            Representation::ClosedSurface(h) => h.detach(bus),
            Representation::BinaryLabelmap(h) => h.detach(bus),
        }
    }

    pub(crate) fn is_observed_by(&self, bus: &Rc<ChangeBus>) -> bool {
        match self {
            Representation::ClosedSurface(h) => h.is_observed_by(bus),
            Representation::BinaryLabelmap(h) => h.is_observed_by(bus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::box_mesh;
    use nalgebra::Point3;

    #[test]
    fn placeholders_match_names() {
        let surface = Representation::empty(CLOSED_SURFACE).unwrap();
        assert_eq!(surface.kind(), DataKind::PolyData);
        assert!(surface.is_empty());
        let labelmap = Representation::empty(BINARY_LABELMAP).unwrap();
        assert_eq!(labelmap.kind(), DataKind::ImageData);
        assert!(labelmap.is_empty());
        assert!(Representation::empty("Fractional labelmap").is_err());
    }

    #[test]
    fn transform_moves_mesh_and_bumps_mtime() {
        let rep = Representation::closed_surface(box_mesh(
            Point3::origin(),
            Point3::new(1.0, 1.0, 1.0),
        ));
        let before = rep.mtime();
        rep.apply_transform(&Matrix4::new_translation(&nalgebra::Vector3::new(2.0, 0.0, 0.0)));
        assert!(rep.mtime() > before);
        assert_eq!(rep.bounds().min, Point3::new(2.0, 0.0, 0.0));
    }
}
