//! Core mesh data types.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{HoldError, HoldResult};

/// RGB color with floating point components in [0, 1].
///
/// Scans come out of the capture software either as 8-bit or as float
/// colors; everything inside the pipeline works on the float form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    /// Pure white, used for synthesized backing points.
    pub const WHITE: Rgb = Rgb {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    /// Create a new color from float components.
    #[inline]
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Create a color from 8-bit components.
    #[inline]
    pub fn from_u8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f64 / 255.0,
            g: g as f64 / 255.0,
            b: b as f64 / 255.0,
        }
    }

    /// Convert to 8-bit components, clamping out-of-range values.
    #[inline]
    pub fn to_u8(&self) -> [u8; 3] {
        [
            (self.r.clamp(0.0, 1.0) * 255.0).round() as u8,
            (self.g.clamp(0.0, 1.0) * 255.0).round() as u8,
            (self.b.clamp(0.0, 1.0) * 255.0).round() as u8,
        ]
    }

    /// Largest component.
    #[inline]
    pub fn max_component(&self) -> f64 {
        self.r.max(self.g).max(self.b)
    }

    /// Scale every component by `factor`.
    #[inline]
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.r * factor, self.g * factor, self.b * factor)
    }

    /// Linear interpolation towards `other`.
    #[inline]
    pub fn lerp(&self, other: &Rgb, t: f64) -> Self {
        Self::new(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
        )
    }
}

/// A vertex in the mesh with optional attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal vector.
    pub normal: Option<Vector3<f64>>,

    /// Vertex color.
    pub color: Option<Rgb>,
}

impl Vertex {
    /// Create a new vertex with only position set.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
            color: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Create a vertex with position and color.
    #[inline]
    pub fn with_color(position: Point3<f64>, color: Rgb) -> Self {
        Self {
            position,
            normal: None,
            color: Some(color),
        }
    }

    /// Interpolate position and attributes between two vertices.
    ///
    /// Attributes present on only one side are dropped.
    pub fn lerp(&self, other: &Vertex, t: f64) -> Vertex {
        let position = self.position + (other.position - self.position) * t;
        let normal = match (self.normal, other.normal) {
            (Some(a), Some(b)) => {
                let n = a + (b - a) * t;
                n.try_normalize(f64::EPSILON)
            }
            _ => None,
        };
        let color = match (self.color, other.color) {
            (Some(a), Some(b)) => Some(a.lerp(&b, t)),
            _ => None,
        };
        Vertex {
            position,
            normal,
            color,
        }
    }
}

/// A triangle mesh with indexed vertices and faces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    /// Each face is [v0, v1, v2] with counter-clockwise winding.
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if mesh is empty (no vertices or faces).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Whether every vertex carries a color.
    pub fn has_colors(&self) -> bool {
        !self.vertices.is_empty() && self.vertices.iter().all(|v| v.color.is_some())
    }

    /// Compute the axis-aligned bounding box.
    /// Returns (min_corner, max_corner) or None if mesh is empty.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?.position;
        let mut min = first;
        let mut max = first;

        for vertex in &self.vertices[1..] {
            let p = &vertex.position;
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some((min, max))
    }

    /// Iterate over triangles, yielding Triangle structs with actual vertex data.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Get a specific triangle by face index.
    pub fn triangle(&self, face_idx: usize) -> Option<Triangle> {
        self.faces.get(face_idx).map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Check that every face index refers to an existing vertex.
    pub fn validate_indices(&self) -> HoldResult<()> {
        let vertex_count = self.vertices.len();
        for (face_index, face) in self.faces.iter().enumerate() {
            for &vertex_index in face {
                if vertex_index as usize >= vertex_count {
                    return Err(HoldError::InvalidVertexIndex {
                        face_index,
                        vertex_index,
                        vertex_count,
                    });
                }
            }
        }
        Ok(())
    }

    /// Translate mesh by the given vector.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for vertex in &mut self.vertices {
            vertex.position += offset;
        }
    }

    /// Reverse the winding of every face.
    pub fn flip_faces(&mut self) {
        for face in &mut self.faces {
            face.swap(1, 2);
        }
        for vertex in &mut self.vertices {
            if let Some(normal) = vertex.normal.as_mut() {
                *normal = -*normal;
            }
        }
    }

    /// Append another mesh, offsetting its face indices.
    pub fn append(&mut self, other: &Mesh) {
        let offset = self.vertices.len() as u32;
        self.vertices.extend(other.vertices.iter().cloned());
        self.faces.extend(
            other
                .faces
                .iter()
                .map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]),
        );
    }

    /// Remove the vertices flagged in `mask` together with every face that
    /// references one of them, compacting the remaining indices.
    ///
    /// Returns the number of vertices removed.
    pub fn remove_vertices_by_mask(&mut self, mask: &[bool]) -> usize {
        debug_assert_eq!(mask.len(), self.vertices.len());

        let mut remap = vec![u32::MAX; self.vertices.len()];
        let mut kept = Vec::with_capacity(self.vertices.len());
        for (i, vertex) in self.vertices.drain(..).enumerate() {
            if !mask.get(i).copied().unwrap_or(false) {
                remap[i] = kept.len() as u32;
                kept.push(vertex);
            }
        }
        let removed = remap.len() - kept.len();
        self.vertices = kept;

        self.faces = self
            .faces
            .iter()
            .filter_map(|f| {
                let mapped = [
                    remap[f[0] as usize],
                    remap[f[1] as usize],
                    remap[f[2] as usize],
                ];
                (!mapped.contains(&u32::MAX)).then_some(mapped)
            })
            .collect();

        removed
    }

    /// Drop vertices that no face references.
    ///
    /// Returns the number of vertices removed.
    pub fn remove_unreferenced_vertices(&mut self) -> usize {
        let mut referenced = vec![false; self.vertices.len()];
        for face in &self.faces {
            for &v in face {
                if let Some(flag) = referenced.get_mut(v as usize) {
                    *flag = true;
                }
            }
        }
        let mask: Vec<bool> = referenced.iter().map(|&r| !r).collect();
        self.remove_vertices_by_mask(&mask)
    }

    /// Drop faces that repeat a vertex or have (near) zero area.
    ///
    /// Returns the number of faces removed.
    pub fn remove_degenerate_faces(&mut self, min_area: f64) -> usize {
        let before = self.faces.len();
        let vertices = &self.vertices;
        self.faces.retain(|f| {
            if f[0] == f[1] || f[1] == f[2] || f[0] == f[2] {
                return false;
            }
            let tri = Triangle::new(
                vertices[f[0] as usize].position,
                vertices[f[1] as usize].position,
                vertices[f[2] as usize].position,
            );
            tri.area() > min_area
        });
        before - self.faces.len()
    }

    /// Compute the signed volume of the mesh.
    ///
    /// Positive for a closed mesh with outward-facing (CCW) winding,
    /// negative when the mesh is inside-out. Meaningless for open meshes.
    pub fn signed_volume(&self) -> f64 {
        self.triangles()
            .map(|tri| tri.v0.coords.dot(&tri.v1.coords.cross(&tri.v2.coords)))
            .sum::<f64>()
            / 6.0
    }

    /// Compute the total surface area of the mesh.
    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|tri| tri.area()).sum()
    }

    /// Area-weighted vertex normals.
    pub fn compute_vertex_normals(&mut self) {
        let mut accum = vec![Vector3::zeros(); self.vertices.len()];
        for face in &self.faces {
            let tri = Triangle::new(
                self.vertices[face[0] as usize].position,
                self.vertices[face[1] as usize].position,
                self.vertices[face[2] as usize].position,
            );
            let n = tri.normal_unnormalized();
            for &v in face {
                accum[v as usize] += n;
            }
        }
        for (vertex, n) in self.vertices.iter_mut().zip(accum) {
            vertex.normal = n.try_normalize(f64::EPSILON);
        }
    }
}

/// A triangle with concrete vertex positions.
///
/// Winding is counter-clockwise when viewed from the front.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Create a new triangle from three points.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Unnormalized face normal (length is twice the area).
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Unit face normal, or None for degenerate triangles.
    #[inline]
    pub fn normal(&self) -> Option<Vector3<f64>> {
        self.normal_unnormalized().try_normalize(f64::EPSILON)
    }

    /// Triangle area.
    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Triangle centroid.
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_tetrahedron() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 1.0));
        mesh.faces.push([0, 2, 1]);
        mesh.faces.push([0, 1, 3]);
        mesh.faces.push([0, 3, 2]);
        mesh.faces.push([1, 2, 3]);
        mesh
    }

    #[test]
    fn test_rgb_u8_conversion() {
        let c = Rgb::from_u8(255, 0, 128);
        assert_relative_eq!(c.r, 1.0);
        assert_relative_eq!(c.g, 0.0);
        assert_eq!(c.to_u8(), [255, 0, 128]);
        assert_eq!(Rgb::new(2.0, -1.0, 0.5).to_u8(), [255, 0, 128]);
    }

    #[test]
    fn test_signed_volume_tetrahedron() {
        let mesh = unit_tetrahedron();
        assert_relative_eq!(mesh.signed_volume(), 1.0 / 6.0, epsilon = 1e-12);

        let mut flipped = mesh.clone();
        flipped.flip_faces();
        assert!(flipped.signed_volume() < 0.0);
    }

    #[test]
    fn test_remove_vertices_by_mask_compacts_faces() {
        let mut mesh = unit_tetrahedron();
        let removed = mesh.remove_vertices_by_mask(&[false, false, false, true]);
        assert_eq!(removed, 1);
        assert_eq!(mesh.vertex_count(), 3);
        // Only the base face survives
        assert_eq!(mesh.faces, vec![[0, 2, 1]]);
        assert!(mesh.validate_indices().is_ok());
    }

    #[test]
    fn test_remove_unreferenced_vertices() {
        let mut mesh = unit_tetrahedron();
        mesh.vertices.push(Vertex::from_coords(5.0, 5.0, 5.0));
        assert_eq!(mesh.remove_unreferenced_vertices(), 1);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.face_count(), 4);
    }

    #[test]
    fn test_validate_indices() {
        let mut mesh = unit_tetrahedron();
        mesh.faces.push([0, 1, 9]);
        match mesh.validate_indices() {
            Err(HoldError::InvalidVertexIndex {
                face_index,
                vertex_index,
                ..
            }) => {
                assert_eq!(face_index, 4);
                assert_eq!(vertex_index, 9);
            }
            other => panic!("Expected InvalidVertexIndex, got {:?}", other),
        }
    }

    #[test]
    fn test_vertex_lerp_interpolates_color() {
        let a = Vertex::with_color(Point3::new(0.0, 0.0, 0.0), Rgb::new(0.0, 0.0, 0.0));
        let b = Vertex::with_color(Point3::new(2.0, 0.0, 0.0), Rgb::new(1.0, 1.0, 1.0));
        let mid = a.lerp(&b, 0.5);
        assert_relative_eq!(mid.position.x, 1.0);
        assert_relative_eq!(mid.color.map(|c| c.g).unwrap_or(-1.0), 0.5);
    }

    #[test]
    fn test_degenerate_face_removal() {
        let mut mesh = unit_tetrahedron();
        mesh.faces.push([1, 1, 2]);
        assert_eq!(mesh.remove_degenerate_faces(1e-12), 1);
        assert_eq!(mesh.face_count(), 4);
    }
}
