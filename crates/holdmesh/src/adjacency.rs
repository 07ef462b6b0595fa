//! Edge and vertex adjacency for triangle meshes.

use hashbrown::HashMap;

/// Adjacency information for a face list.
///
/// Edge keys are normalized so that `v0 < v1`. Boundary edges are also kept
/// as directed half-edges in the winding of the face that owns them, which
/// is what hole filling needs to close a loop with consistent orientation.
#[derive(Debug, Clone)]
pub struct MeshAdjacency {
    edge_to_faces: HashMap<(u32, u32), Vec<usize>>,
    vertex_to_faces: HashMap<u32, Vec<usize>>,
    boundary: Vec<(u32, u32)>,
}

impl MeshAdjacency {
    /// Build adjacency from triangle faces.
    ///
    /// ```
    /// use holdmesh::MeshAdjacency;
    ///
    /// let faces = vec![[0, 1, 2], [1, 3, 2]];
    /// let adj = MeshAdjacency::build(&faces);
    ///
    /// assert_eq!(adj.boundary_edge_count(), 4);
    /// ```
    #[must_use]
    pub fn build(faces: &[[u32; 3]]) -> Self {
        let mut edge_to_faces: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
        let mut vertex_to_faces: HashMap<u32, Vec<usize>> = HashMap::new();

        for (face_idx, face) in faces.iter().enumerate() {
            for &v in face {
                vertex_to_faces.entry(v).or_default().push(face_idx);
            }
            for i in 0..3 {
                let edge = normalize_edge(face[i], face[(i + 1) % 3]);
                edge_to_faces.entry(edge).or_default().push(face_idx);
            }
        }

        let mut boundary = Vec::new();
        for face in faces {
            for i in 0..3 {
                let (a, b) = (face[i], face[(i + 1) % 3]);
                if edge_to_faces
                    .get(&normalize_edge(a, b))
                    .is_some_and(|f| f.len() == 1)
                {
                    boundary.push((a, b));
                }
            }
        }

        Self {
            edge_to_faces,
            vertex_to_faces,
            boundary,
        }
    }

    /// Faces adjacent to an edge, in either direction.
    #[must_use]
    pub fn faces_for_edge(&self, v0: u32, v1: u32) -> Option<&[usize]> {
        self.edge_to_faces
            .get(&normalize_edge(v0, v1))
            .map(Vec::as_slice)
    }

    #[must_use]
    pub fn faces_for_vertex(&self, v: u32) -> &[usize] {
        self.vertex_to_faces.get(&v).map_or(&[], Vec::as_slice)
    }

    /// Boundary half-edges `(from, to)` in the winding of their only face.
    pub fn boundary_half_edges(&self) -> &[(u32, u32)] {
        &self.boundary
    }

    #[must_use]
    pub fn boundary_edge_count(&self) -> usize {
        self.boundary.len()
    }

    #[must_use]
    pub fn non_manifold_edge_count(&self) -> usize {
        self.edge_to_faces.values().filter(|f| f.len() > 2).count()
    }

    /// At most two faces per edge.
    #[must_use]
    pub fn is_manifold(&self) -> bool {
        self.edge_to_faces.values().all(|f| f.len() <= 2)
    }

    /// No boundary edges.
    #[must_use]
    pub fn is_watertight(&self) -> bool {
        self.edge_to_faces.values().all(|f| f.len() >= 2)
    }

    /// Exactly two faces per edge.
    #[must_use]
    pub fn is_closed_manifold(&self) -> bool {
        !self.edge_to_faces.is_empty() && self.edge_to_faces.values().all(|f| f.len() == 2)
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edge_to_faces.len()
    }
}

#[inline]
fn normalize_edge(v0: u32, v1: u32) -> (u32, u32) {
    if v0 < v1 { (v0, v1) } else { (v1, v0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> Vec<[u32; 3]> {
        vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]]
    }

    #[test]
    fn test_shared_edge() {
        let adj = MeshAdjacency::build(&[[0, 1, 2], [1, 3, 2]]);
        assert_eq!(adj.faces_for_edge(2, 1).map(<[usize]>::len), Some(2));
        assert_eq!(adj.faces_for_edge(0, 1).map(<[usize]>::len), Some(1));
        assert!(adj.faces_for_edge(0, 3).is_none());
        assert_eq!(adj.faces_for_vertex(2).len(), 2);
        assert!(adj.faces_for_vertex(9).is_empty());
    }

    #[test]
    fn test_boundary_half_edges_follow_winding() {
        let adj = MeshAdjacency::build(&[[0, 1, 2]]);
        assert_eq!(adj.boundary_half_edges(), &[(0, 1), (1, 2), (2, 0)]);
        assert!(!adj.is_watertight());
    }

    #[test]
    fn test_closed_tetrahedron() {
        let adj = MeshAdjacency::build(&tetrahedron());
        assert_eq!(adj.edge_count(), 6);
        assert!(adj.is_closed_manifold());
        assert_eq!(adj.boundary_edge_count(), 0);
    }

    #[test]
    fn test_non_manifold_edge() {
        let adj = MeshAdjacency::build(&[[0, 1, 2], [0, 1, 3], [0, 1, 4]]);
        assert_eq!(adj.non_manifold_edge_count(), 1);
        assert!(!adj.is_manifold());
        assert!(!adj.is_closed_manifold());
    }
}
