//! Hole detection and filling.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adjacency::MeshAdjacency;
use crate::error::HoldResult;
use crate::types::{Mesh, Triangle};

/// Default upper bound on the size of holes that get filled.
pub const DEFAULT_MAX_HOLE_EDGES: usize = 100;

/// A closed boundary loop.
///
/// Vertices are ordered so that triangles built from consecutive loop
/// vertices wind consistently with the faces around the hole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryLoop {
    pub vertices: Vec<u32>,
}

impl BoundaryLoop {
    pub fn edge_count(&self) -> usize {
        self.vertices.len()
    }
}

/// Outcome of [`fill_holes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HoleFillReport {
    /// Holes closed.
    pub filled: usize,
    /// Holes left open because they exceed the edge limit.
    pub skipped: usize,
    /// Triangles added.
    pub faces_added: usize,
}

/// Trace all boundary loops of a mesh.
///
/// Open chains that never return to their start (from non-manifold
/// boundaries) are logged and dropped.
pub fn detect_holes(adjacency: &MeshAdjacency) -> Vec<BoundaryLoop> {
    let half_edges = adjacency.boundary_half_edges();
    if half_edges.is_empty() {
        return Vec::new();
    }
    debug!(count = half_edges.len(), "Boundary half-edges");

    let mut outgoing: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(from, to) in half_edges {
        outgoing.entry(from).or_default().push(to);
    }

    let mut used: HashSet<(u32, u32)> = HashSet::new();
    let mut loops = Vec::new();

    for &(start, first) in half_edges {
        if used.contains(&(start, first)) {
            continue;
        }

        let mut chain = vec![start];
        used.insert((start, first));
        let mut current = first;
        let mut closed = false;

        while chain.len() <= half_edges.len() {
            if current == start {
                closed = true;
                break;
            }
            chain.push(current);

            let next = outgoing
                .get(&current)
                .and_then(|targets| targets.iter().find(|&&t| !used.contains(&(current, t))))
                .copied();
            match next {
                Some(n) => {
                    used.insert((current, n));
                    current = n;
                }
                None => break,
            }
        }

        if !closed {
            warn!(start, "Boundary chain is not closed, skipping");
            continue;
        }
        if chain.len() >= 3 {
            // Boundary half-edges run against the hole, so the fill runs the
            // other way.
            chain.reverse();
            loops.push(BoundaryLoop { vertices: chain });
        }
    }

    debug!(
        holes = loops.len(),
        sizes = ?loops.iter().map(BoundaryLoop::edge_count).collect::<Vec<_>>(),
        "Detected boundary loops"
    );
    loops
}

/// Triangulate a hole by ear clipping.
///
/// Falls back to a fan over the remaining vertices when no ear can be
/// found, which happens for strongly non-planar loops.
pub fn fill_hole_ear_clipping(mesh: &Mesh, boundary: &BoundaryLoop) -> Vec<[u32; 3]> {
    let n = boundary.vertices.len();
    if n < 3 {
        return Vec::new();
    }

    let positions: Vec<Point3<f64>> = boundary
        .vertices
        .iter()
        .map(|&idx| mesh.vertices[idx as usize].position)
        .collect();
    let hole_normal = loop_normal(&positions);

    let mut remaining: Vec<usize> = (0..n).collect();
    let mut triangles = Vec::with_capacity(n - 2);

    while remaining.len() > 3 {
        let count = remaining.len();
        let ear = (0..count).find(|&i| {
            let prev = remaining[(i + count - 1) % count];
            let next = remaining[(i + 1) % count];
            is_ear(&positions, &remaining, prev, remaining[i], next, &hole_normal)
        });

        let Some(i) = ear else {
            warn!(remaining = count, "Ear clipping stuck, using fan triangulation");
            break;
        };
        let prev = remaining[(i + count - 1) % count];
        let next = remaining[(i + 1) % count];
        triangles.push([
            boundary.vertices[prev],
            boundary.vertices[remaining[i]],
            boundary.vertices[next],
        ]);
        remaining.remove(i);
    }

    for i in 1..remaining.len().saturating_sub(1) {
        triangles.push([
            boundary.vertices[remaining[0]],
            boundary.vertices[remaining[i]],
            boundary.vertices[remaining[i + 1]],
        ]);
    }

    triangles
}

/// Newell normal of a closed polygon.
fn loop_normal(positions: &[Point3<f64>]) -> Vector3<f64> {
    let n = positions.len();
    let centroid = positions.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n as f64;
    let mut normal = Vector3::zeros();
    for i in 0..n {
        let v0 = positions[i].coords - centroid;
        let v1 = positions[(i + 1) % n].coords - centroid;
        normal += v0.cross(&v1);
    }
    normal.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::z)
}

fn is_ear(
    positions: &[Point3<f64>],
    remaining: &[usize],
    prev: usize,
    curr: usize,
    next: usize,
    hole_normal: &Vector3<f64>,
) -> bool {
    let (a, b, c) = (positions[prev], positions[curr], positions[next]);
    let Some(tri_normal) = Triangle::new(a, b, c).normal() else {
        return false;
    };
    if tri_normal.dot(hole_normal) < 0.0 {
        return false;
    }

    remaining
        .iter()
        .filter(|&&idx| idx != prev && idx != curr && idx != next)
        .all(|&idx| !point_in_triangle_projected(&positions[idx], &a, &b, &c, hole_normal))
}

/// Point-in-triangle after dropping the axis most aligned with `normal`.
fn point_in_triangle_projected(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    normal: &Vector3<f64>,
) -> bool {
    let abs = normal.abs();
    let project = |q: &Point3<f64>| -> (f64, f64) {
        if abs.z >= abs.x && abs.z >= abs.y {
            (q.x, q.y)
        } else if abs.y >= abs.x {
            (q.x, q.z)
        } else {
            (q.y, q.z)
        }
    };
    let (p, a, b, c) = (project(p), project(a), project(b), project(c));

    let sign = |p1: (f64, f64), p2: (f64, f64), p3: (f64, f64)| {
        (p1.0 - p3.0) * (p2.1 - p3.1) - (p2.0 - p3.0) * (p1.1 - p3.1)
    };
    let d1 = sign(p, a, b);
    let d2 = sign(p, b, c);
    let d3 = sign(p, c, a);

    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Fill every hole with at most `max_hole_edges` edges.
///
/// Holes are triangulated independently in parallel and merged afterwards.
pub fn fill_holes(mesh: &mut Mesh, max_hole_edges: usize) -> HoldResult<HoleFillReport> {
    mesh.validate_indices()?;
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let holes = detect_holes(&adjacency);

    let (fillable, skipped): (Vec<_>, Vec<_>) = holes
        .into_iter()
        .partition(|hole| hole.edge_count() <= max_hole_edges);

    for hole in &skipped {
        warn!(
            edges = hole.edge_count(),
            max = max_hole_edges,
            "Skipping hole above the edge limit"
        );
    }

    Ok(fill_loops(mesh, &fillable, skipped.len()))
}

/// Fill the given loops, returning a report that counts `skipped` as given.
pub(crate) fn fill_loops(mesh: &mut Mesh, loops: &[BoundaryLoop], skipped: usize) -> HoleFillReport {
    let new_triangles: Vec<Vec<[u32; 3]>> = loops
        .par_iter()
        .map(|hole| fill_hole_ear_clipping(mesh, hole))
        .collect();

    let mut report = HoleFillReport {
        skipped,
        ..Default::default()
    };
    for triangles in new_triangles {
        if triangles.is_empty() {
            continue;
        }
        report.filled += 1;
        report.faces_added += triangles.len();
        mesh.faces.extend(triangles);
    }

    if report.filled > 0 {
        info!(filled = report.filled, faces = report.faces_added, "Filled holes");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;
    use approx::assert_relative_eq;

    /// Unit cube with outward faces and the top (z = 1) missing.
    fn open_box_mesh() -> Mesh {
        let mut mesh = Mesh::new();
        for (x, y, z) in [
            (0.0, 0.0, 0.0),
            (1.0, 0.0, 0.0),
            (1.0, 1.0, 0.0),
            (0.0, 1.0, 0.0),
            (0.0, 0.0, 1.0),
            (1.0, 0.0, 1.0),
            (1.0, 1.0, 1.0),
            (0.0, 1.0, 1.0),
        ] {
            mesh.vertices.push(Vertex::from_coords(x, y, z));
        }
        mesh.faces = vec![
            [0, 2, 1],
            [0, 3, 2],
            [0, 1, 5],
            [0, 5, 4],
            [1, 2, 6],
            [1, 6, 5],
            [2, 3, 7],
            [2, 7, 6],
            [3, 0, 4],
            [3, 4, 7],
        ];
        mesh
    }

    #[test]
    fn test_detect_square_hole() {
        let mesh = open_box_mesh();
        let holes = detect_holes(&MeshAdjacency::build(&mesh.faces));
        assert_eq!(holes.len(), 1);
        assert_eq!(holes[0].edge_count(), 4);
    }

    #[test]
    fn test_fill_closes_with_outward_winding() {
        let mut mesh = open_box_mesh();
        let report = fill_holes(&mut mesh, DEFAULT_MAX_HOLE_EDGES).unwrap();
        assert_eq!(report.filled, 1);
        assert_eq!(report.faces_added, 2);

        let adjacency = MeshAdjacency::build(&mesh.faces);
        assert!(adjacency.is_closed_manifold());
        assert_relative_eq!(mesh.signed_volume(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_limit_skips_large_holes() {
        let mut mesh = open_box_mesh();
        let report = fill_holes(&mut mesh, 3).unwrap();
        assert_eq!(report.filled, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(mesh.face_count(), 10);
    }

    #[test]
    fn test_concave_loop() {
        // L-shaped hole in the XY plane
        let mut mesh = Mesh::new();
        for (x, y) in [(0.0, 0.0), (2.0, 0.0), (2.0, 1.0), (1.0, 1.0), (1.0, 2.0), (0.0, 2.0)] {
            mesh.vertices.push(Vertex::from_coords(x, y, 0.0));
        }
        let boundary = BoundaryLoop {
            vertices: (0..6).collect(),
        };
        let triangles = fill_hole_ear_clipping(&mesh, &boundary);
        assert_eq!(triangles.len(), 4);

        let area: f64 = triangles
            .iter()
            .map(|t| {
                let p = |i: u32| mesh.vertices[i as usize].position;
                Triangle::new(p(t[0]), p(t[1]), p(t[2])).area()
            })
            .sum();
        assert_relative_eq!(area, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_watertight_mesh_has_no_holes() {
        let mut mesh = open_box_mesh();
        fill_holes(&mut mesh, DEFAULT_MAX_HOLE_EDGES).unwrap();
        assert!(detect_holes(&MeshAdjacency::build(&mesh.faces)).is_empty());
    }
}
