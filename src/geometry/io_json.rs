//! JSON encoding of surface meshes.
//!
//! Points are written as `[x, y, z]` arrays and polygons as index arrays:
//!
//! ```json
//! { "points": [[0, 0, 0], [1, 0, 0], [0, 1, 0]], "polys": [[0, 1, 2]] }
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::SurfaceMesh;
use crate::error::SegmentationError;

/// Reads a mesh from a JSON file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn read_mesh_json(path: &Path) -> Result<SurfaceMesh, SegmentationError> {
    let file = File::open(path).map_err(SegmentationError::Io)?;
    let reader = BufReader::new(file);

    serde_json::from_reader(reader).map_err(|source| SegmentationError::JsonParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes a mesh to a JSON file.
pub fn write_mesh_json(path: &Path, mesh: &SurfaceMesh) -> Result<(), SegmentationError> {
    let file = File::create(path).map_err(SegmentationError::Io)?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, mesh).map_err(|source| SegmentationError::JsonWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a mesh from a JSON string.
pub fn from_json_str(json: &str) -> Result<SurfaceMesh, serde_json::Error> {
    serde_json::from_str(json)
}

/// Writes a mesh to a JSON string.
pub fn to_json_string(mesh: &SurfaceMesh) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(mesh)
}
