//! Wavefront OBJ reading and writing for surface meshes.
//!
//! Only vertex (`v`) and face (`f`) records are interpreted. Texture and
//! normal references in face records (`f 1/2/3 ...`) are accepted and
//! ignored, negative indices count back from the last vertex, and every
//! other record type is skipped.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use nalgebra::Point3;

use super::SurfaceMesh;
use crate::error::SegmentationError;

/// Reads a mesh from an OBJ file.
pub fn read_obj(path: &Path) -> Result<SurfaceMesh, SegmentationError> {
    let text = fs::read_to_string(path)?;
    parse_obj(&text, path)
}

/// Parses OBJ text that did not come from a file.
pub fn from_obj_str(text: &str) -> Result<SurfaceMesh, SegmentationError> {
    parse_obj(text, Path::new("<string>"))
}

fn parse_obj(text: &str, path: &Path) -> Result<SurfaceMesh, SegmentationError> {
    let fail = |line: usize, message: String| SegmentationError::MeshParse {
        path: PathBuf::from(path),
        line,
        message,
    };

    let mut mesh = SurfaceMesh::default();
    for (n, raw) in text.lines().enumerate() {
        let line_no = n + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let coords: Vec<f64> = tokens
                    .take(3)
                    .map(|t| t.parse::<f64>())
                    .collect::<Result<_, _>>()
                    .map_err(|e| fail(line_no, format!("bad vertex coordinate: {}", e)))?;
                if coords.len() != 3 || coords.iter().any(|c| !c.is_finite()) {
                    return Err(fail(line_no, "vertex needs three finite coordinates".into()));
                }
                mesh.points.push(Point3::new(coords[0], coords[1], coords[2]));
            }
            Some("f") => {
                let mut poly = Vec::new();
                for token in tokens {
                    let index_text = token.split('/').next().unwrap_or("");
                    let index: i64 = index_text
                        .parse()
                        .map_err(|_| fail(line_no, format!("bad face index '{}'", token)))?;
                    let resolved = if index > 0 {
                        index - 1
                    } else {
                        mesh.points.len() as i64 + index
                    };
                    if index == 0 || resolved < 0 || resolved >= mesh.points.len() as i64 {
                        return Err(fail(line_no, format!("face index {} out of range", index)));
                    }
                    poly.push(resolved as usize);
                }
                if poly.len() < 3 {
                    return Err(fail(line_no, "face needs at least three vertices".into()));
                }
                mesh.polys.push(poly);
            }
            _ => {}
        }
    }
    Ok(mesh)
}

/// Writes a mesh as OBJ.
pub fn write_obj(path: &Path, mesh: &SurfaceMesh) -> Result<(), SegmentationError> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    writer.write_all(to_obj_string(mesh).as_bytes())?;
    writer.flush()?;
    Ok(())
}

pub fn to_obj_string(mesh: &SurfaceMesh) -> String {
    let mut out = String::new();
    for p in &mesh.points {
        out.push_str(&format!("v {} {} {}\n", p.x, p.y, p.z));
    }
    for poly in &mesh.polys {
        out.push('f');
        for idx in poly {
            out.push_str(&format!(" {}", idx + 1));
        }
        out.push('\n');
    }
    out
}

/// Parses arbitrary OBJ text; used by the fuzz targets.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_obj(text: &str) -> Result<usize, SegmentationError> {
    from_obj_str(text).map(|m| m.number_of_cells())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::box_mesh;

    #[test]
    fn parses_quads_with_texture_refs_and_negative_indices() {
        let text = "# a square\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvn 0 0 1\nf 1/1/1 2/2/1 3/3/1 4/4/1\nf -4 -3 -2\n";
        let mesh = from_obj_str(text).unwrap();
        assert_eq!(mesh.number_of_points(), 4);
        assert_eq!(mesh.polys, vec![vec![0, 1, 2, 3], vec![0, 1, 2]]);
    }

    #[test]
    fn reports_line_of_bad_index() {
        let err = from_obj_str("v 0 0 0\nv 1 0 0\nf 1 2 3\n").unwrap_err();
        match err {
            SegmentationError::MeshParse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_short_vertex() {
        assert!(from_obj_str("v 1 2\n").is_err());
        assert!(from_obj_str("v 1 2 nan\n").is_err());
    }

    #[test]
    fn written_text_parses_back() {
        let mesh = box_mesh(nalgebra::Point3::origin(), nalgebra::Point3::new(1.0, 2.0, 3.0));
        let parsed = from_obj_str(&to_obj_string(&mesh)).unwrap();
        assert_eq!(parsed, mesh);
    }
}
