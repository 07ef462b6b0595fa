//! Taubin smoothing.
//!
//! Each iteration applies a shrinking Laplacian step (`lambda > 0`) followed
//! by an inflating one (`mu < -lambda`), which removes reconstruction noise
//! without the volume loss of plain Laplacian smoothing.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::Mesh;

/// Parameters for [`taubin_smooth`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaubinParams {
    /// Number of lambda/mu step pairs.
    pub iterations: usize,
    /// Shrinking step factor.
    pub lambda: f64,
    /// Inflating step factor, negative.
    pub mu: f64,
}

impl Default for TaubinParams {
    fn default() -> Self {
        Self {
            iterations: 100,
            lambda: 0.5,
            mu: -0.53,
        }
    }
}

impl TaubinParams {
    /// No smoothing.
    pub fn disabled() -> Self {
        Self {
            iterations: 0,
            ..Default::default()
        }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }
}

/// Deduplicated neighbour lists for every vertex.
pub(crate) fn build_vertex_adjacency(mesh: &Mesh) -> Vec<Vec<u32>> {
    let mut adjacency: Vec<Vec<u32>> = vec![Vec::new(); mesh.vertices.len()];

    for face in &mesh.faces {
        for i in 0..3 {
            let v0 = face[i];
            let v1 = face[(i + 1) % 3];
            adjacency[v0 as usize].push(v1);
            adjacency[v1 as usize].push(v0);
        }
    }

    for neighbors in &mut adjacency {
        neighbors.sort_unstable();
        neighbors.dedup();
    }

    adjacency
}

fn umbrella_step(positions: &[Point3<f64>], adjacency: &[Vec<u32>], factor: f64) -> Vec<Point3<f64>> {
    positions
        .par_iter()
        .zip(adjacency.par_iter())
        .map(|(p, neighbors)| {
            if neighbors.is_empty() {
                return *p;
            }
            let centroid = neighbors
                .iter()
                .map(|&ni| positions[ni as usize].coords)
                .sum::<Vector3<f64>>()
                / neighbors.len() as f64;
            p + (centroid - p.coords) * factor
        })
        .collect()
}

/// Smooth `mesh` in place with uniform umbrella weights.
///
/// Connectivity and attributes other than positions are left untouched;
/// callers that need normals should recompute them afterwards.
pub fn taubin_smooth(mesh: &mut Mesh, params: &TaubinParams) {
    if params.iterations == 0 || mesh.faces.is_empty() {
        return;
    }

    let adjacency = build_vertex_adjacency(mesh);
    let mut positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();

    for _ in 0..params.iterations {
        positions = umbrella_step(&positions, &adjacency, params.lambda);
        positions = umbrella_step(&positions, &adjacency, params.mu);
    }

    for (vertex, p) in mesh.vertices.iter_mut().zip(positions) {
        vertex.position = p;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;
    use approx::assert_relative_eq;

    fn octahedron() -> Mesh {
        let mut mesh = Mesh::new();
        for p in [
            [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0],
        ] {
            mesh.vertices.push(Vertex::from_coords(p[0], p[1], p[2]));
        }
        mesh.faces = vec![
            [0, 2, 4],
            [2, 1, 4],
            [1, 3, 4],
            [3, 0, 4],
            [2, 0, 5],
            [1, 2, 5],
            [3, 1, 5],
            [0, 3, 5],
        ];
        mesh
    }

    #[test]
    fn test_adjacency_dedup() {
        let adjacency = build_vertex_adjacency(&octahedron());
        assert_eq!(adjacency[4], vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_flat_mesh_is_fixed_point() {
        let mut mesh = Mesh::new();
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            mesh.vertices.push(Vertex::from_coords(x, y, 0.0));
        }
        mesh.faces = vec![[0, 1, 2], [0, 2, 3]];
        taubin_smooth(&mut mesh, &TaubinParams::default().with_iterations(10));
        for v in &mesh.vertices {
            assert_relative_eq!(v.position.z, 0.0);
        }
    }

    #[test]
    fn test_taubin_preserves_size_better_than_laplacian() {
        let mut taubin = octahedron();
        taubin_smooth(&mut taubin, &TaubinParams::default().with_iterations(5));

        let mut laplacian = octahedron();
        taubin_smooth(
            &mut laplacian,
            &TaubinParams {
                iterations: 5,
                lambda: 0.5,
                mu: 0.0,
            },
        );

        let radius = |m: &Mesh| m.vertices[0].position.coords.norm();
        assert!(radius(&taubin) > radius(&laplacian));
    }

    #[test]
    fn test_disabled_is_noop() {
        let mut mesh = octahedron();
        taubin_smooth(&mut mesh, &TaubinParams::disabled());
        assert_eq!(mesh, octahedron());
    }
}
