//! Polygonal surface meshes.

use std::collections::{HashMap, VecDeque};

use nalgebra::{Matrix4, Point3};
use serde::{Deserialize, Serialize};

use super::Bounds;

/// A polygonal surface: shared points plus polygons indexing into them.
///
/// Polygons may have any number of vertices; most algorithms operate on
/// the fan triangulation returned by [`SurfaceMesh::triangles`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMesh {
    pub points: Vec<Point3<f64>>,
    pub polys: Vec<Vec<usize>>,
}

impl SurfaceMesh {
    pub fn new(points: Vec<Point3<f64>>, polys: Vec<Vec<usize>>) -> Self {
        Self { points, polys }
    }

    pub fn number_of_points(&self) -> usize {
        self.points.len()
    }

    pub fn number_of_cells(&self) -> usize {
        self.polys.len()
    }

    /// True when there is nothing to rasterise or render.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() || self.polys.is_empty()
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_points(self.points.iter())
    }

    /// Fan triangulation of every polygon. Polygons with fewer than three
    /// vertices or dangling indices are skipped.
    pub fn triangles(&self) -> Vec<[usize; 3]> {
        let n = self.points.len();
        let mut out = Vec::with_capacity(self.polys.len());
        for poly in &self.polys {
            if poly.len() < 3 || poly.iter().any(|&idx| idx >= n) {
                continue;
            }
            for w in 1..poly.len() - 1 {
                out.push([poly[0], poly[w], poly[w + 1]]);
            }
        }
        out
    }

    /// Replaces the polygons with their triangulation.
    pub fn triangulate(&mut self) {
        self.polys = self.triangles().into_iter().map(|t| t.to_vec()).collect();
    }

    /// Returns a copy with every point mapped through a homogeneous matrix.
    pub fn transformed(&self, matrix: &Matrix4<f64>) -> SurfaceMesh {
        let mut out = self.clone();
        out.transform(matrix);
        out
    }

    pub fn transform(&mut self, matrix: &Matrix4<f64>) {
        for p in &mut self.points {
            *p = matrix.transform_point(p);
        }
        // A mirroring transform turns outward normals inward.
        if matrix.fixed_view::<3, 3>(0, 0).determinant() < 0.0 {
            for poly in &mut self.polys {
                poly.reverse();
            }
        }
    }

    /// Counts of undirected edges by how many triangles use them.
    fn edge_uses(&self, triangles: &[[usize; 3]]) -> HashMap<(usize, usize), usize> {
        let mut uses = HashMap::new();
        for t in triangles {
            for e in 0..3 {
                let (a, b) = (t[e], t[(e + 1) % 3]);
                *uses.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        uses
    }

    /// Returns true if every edge is shared by exactly two triangles.
    pub fn is_closed(&self) -> bool {
        let triangles = self.triangles();
        !triangles.is_empty() && self.edge_uses(&triangles).values().all(|&n| n == 2)
    }

    /// Triangulates and flips triangles so that neighbours agree on winding
    /// and every connected component encloses positive volume.
    pub fn orient_consistently(&mut self) {
        let mut triangles = self.triangles();
        let mut by_edge: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
        for (t_idx, t) in triangles.iter().enumerate() {
            for e in 0..3 {
                let (a, b) = (t[e], t[(e + 1) % 3]);
                by_edge.entry((a.min(b), a.max(b))).or_default().push(t_idx);
            }
        }

        let mut visited = vec![false; triangles.len()];
        for seed in 0..triangles.len() {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut component = vec![seed];
            let mut queue = VecDeque::from([seed]);
            while let Some(current) = queue.pop_front() {
                let tri = triangles[current];
                for e in 0..3 {
                    let (a, b) = (tri[e], tri[(e + 1) % 3]);
                    let Some(neighbours) = by_edge.get(&(a.min(b), a.max(b))) else {
                        continue;
                    };
                    for &n in neighbours {
                        if visited[n] {
                            continue;
                        }
                        visited[n] = true;
                        if has_directed_edge(&triangles[n], a, b) {
                            triangles[n].swap(1, 2);
                        }
                        component.push(n);
                        queue.push_back(n);
                    }
                }
            }

            let volume: f64 = component
                .iter()
                .map(|&t| signed_tetra_volume(&self.points, &triangles[t]))
                .sum();
            if volume < 0.0 {
                for &t in &component {
                    triangles[t].swap(1, 2);
                }
            }
        }

        self.polys = triangles.into_iter().map(|t| t.to_vec()).collect();
    }
}

fn has_directed_edge(t: &[usize; 3], a: usize, b: usize) -> bool {
    (0..3).any(|e| t[e] == a && t[(e + 1) % 3] == b)
}

/// Signed volume of the tetrahedron spanned by the origin and a triangle.
pub(crate) fn signed_tetra_volume(points: &[Point3<f64>], t: &[usize; 3]) -> f64 {
    let (p1, p2, p3) = (points[t[0]].coords, points[t[1]].coords, points[t[2]].coords);
    p1.dot(&p2.cross(&p3)) / 6.0
}

/// An axis-aligned box with outward-facing quads; handy for tests and demos.
pub fn box_mesh(min: Point3<f64>, max: Point3<f64>) -> SurfaceMesh {
    let corners = Bounds::new(min, max).corners();
    let polys = vec![
        vec![0, 2, 3, 1],
        vec![4, 5, 7, 6],
        vec![0, 1, 5, 4],
        vec![2, 6, 7, 3],
        vec![0, 4, 6, 2],
        vec![1, 3, 7, 5],
    ];
    SurfaceMesh::new(corners.to_vec(), polys)
}

/// A UV sphere with `rings` latitude bands and `segments` longitude slices.
pub fn sphere_mesh(center: Point3<f64>, radius: f64, rings: usize, segments: usize) -> SurfaceMesh {
    let rings = rings.max(2);
    let segments = segments.max(3);
    let mut points = vec![center + nalgebra::Vector3::new(0.0, 0.0, radius)];
    for r in 1..rings {
        let theta = std::f64::consts::PI * r as f64 / rings as f64;
        for s in 0..segments {
            let phi = 2.0 * std::f64::consts::PI * s as f64 / segments as f64;
            points.push(
                center
                    + nalgebra::Vector3::new(
                        radius * theta.sin() * phi.cos(),
                        radius * theta.sin() * phi.sin(),
                        radius * theta.cos(),
                    ),
            );
        }
    }
    points.push(center - nalgebra::Vector3::new(0.0, 0.0, radius));
    let south = points.len() - 1;
    let ring_start = |r: usize| 1 + (r - 1) * segments;

    let mut polys = Vec::new();
    for s in 0..segments {
        let next = (s + 1) % segments;
        polys.push(vec![0, ring_start(1) + s, ring_start(1) + next]);
    }
    for r in 1..rings - 1 {
        for s in 0..segments {
            let next = (s + 1) % segments;
            polys.push(vec![
                ring_start(r) + s,
                ring_start(r + 1) + s,
                ring_start(r + 1) + next,
                ring_start(r) + next,
            ]);
        }
    }
    for s in 0..segments {
        let next = (s + 1) % segments;
        polys.push(vec![south, ring_start(rings - 1) + next, ring_start(rings - 1) + s]);
    }
    SurfaceMesh::new(points, polys)
}
