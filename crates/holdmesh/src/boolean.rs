//! Mesh boolean operations.
//!
//! Constructive solid geometry on closed triangle meshes:
//!
//! - **Union**: A ∪ B
//! - **Intersection**: A ∩ B
//! - **Difference**: A − B
//!
//! Each triangle of one operand is split by the supporting planes of the
//! triangles of the other operand that cross it, so that every fragment lies
//! entirely inside, outside, or on the surface of the other solid. Fragments
//! are then classified by ray parity and kept according to the operation.
//! Coplanar fragments are detected explicitly and resolved through
//! [`CoplanarStrategy`]. The result is welded and cleaned.
//!
//! Both operands must be watertight and manifold; open or non-manifold input
//! is rejected with [`HoldError::BooleanFailed`].
//!
//! # Example
//!
//! ```
//! use holdmesh::boolean::{BooleanOp, BooleanParams, boolean_operation};
//! use holdmesh::Mesh;
//! # fn cube(min: f64, max: f64) -> Mesh {
//! #     use holdmesh::Vertex;
//! #     let mut mesh = Mesh::new();
//! #     for &(x, y, z) in &[(min, min, min), (max, min, min), (max, max, min), (min, max, min),
//! #                         (min, min, max), (max, min, max), (max, max, max), (min, max, max)] {
//! #         mesh.vertices.push(Vertex::from_coords(x, y, z));
//! #     }
//! #     mesh.faces = vec![[0, 2, 1], [0, 3, 2], [4, 5, 6], [4, 6, 7], [0, 1, 5], [0, 5, 4],
//! #                       [2, 3, 7], [2, 7, 6], [1, 2, 6], [1, 6, 5], [3, 0, 4], [3, 4, 7]];
//! #     mesh
//! # }
//!
//! let a = cube(0.0, 1.0);
//! let b = cube(0.5, 1.5);
//! let result = boolean_operation(&a, &b, BooleanOp::Intersection, &BooleanParams::default())?;
//! assert!((result.mesh.signed_volume() - 0.125).abs() < 1e-9);
//! # Ok::<(), holdmesh::HoldError>(())
//! ```

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adjacency::MeshAdjacency;
use crate::error::{HoldError, HoldResult};
use crate::types::{Mesh, Vertex};

/// Boolean operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanOp {
    /// A ∪ B.
    Union,
    /// A ∩ B.
    Intersection,
    /// A − B.
    Difference,
}

impl BooleanOp {
    pub fn name(&self) -> &'static str {
        match self {
            BooleanOp::Union => "union",
            BooleanOp::Intersection => "intersection",
            BooleanOp::Difference => "difference",
        }
    }
}

/// Strategy for fragments lying on the surface of the other operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoplanarStrategy {
    /// Keep one copy where the operation keeps the shared surface.
    #[default]
    Include,
    /// Drop every coplanar fragment.
    Exclude,
    /// Keep coplanar fragments from both operands (may be non-manifold).
    KeepBoth,
}

/// Parameters for boolean operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BooleanParams {
    /// Distance below which a vertex counts as lying on a splitting plane.
    pub tolerance: f64,

    /// Distance below which a fragment counts as lying on the other surface.
    pub coplanar_tolerance: f64,

    /// Vertices closer than this are merged during cleanup.
    pub weld_tolerance: f64,

    pub coplanar_strategy: CoplanarStrategy,

    /// Weld vertices and remove degenerate and excess faces.
    pub cleanup: bool,
}

impl Default for BooleanParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            coplanar_tolerance: 1e-7,
            weld_tolerance: 1e-7,
            coplanar_strategy: CoplanarStrategy::Include,
            cleanup: true,
        }
    }
}

impl BooleanParams {
    /// Looser tolerances for reconstructed scan meshes.
    pub fn for_scans() -> Self {
        Self {
            tolerance: 1e-7,
            coplanar_tolerance: 1e-5,
            weld_tolerance: 1e-6,
            ..Default::default()
        }
    }

    pub fn with_coplanar_strategy(mut self, strategy: CoplanarStrategy) -> Self {
        self.coplanar_strategy = strategy;
        self
    }
}

/// Result of a boolean operation.
#[derive(Debug, Clone)]
pub struct BooleanResult {
    pub mesh: Mesh,
    pub stats: BooleanStats,
}

/// Statistics from a boolean operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BooleanStats {
    /// Faces contributed by A.
    pub faces_from_a: usize,
    /// Faces contributed by B.
    pub faces_from_b: usize,
    /// Input triangles that were split.
    pub faces_split: usize,
    /// Fragments found on the other operand's surface.
    pub coplanar_fragments: usize,
    /// Vertices merged during cleanup.
    pub vertices_welded: usize,
    /// Edges shared by more than two faces that were repaired.
    pub non_manifold_edges_fixed: usize,
    /// Faces split to remove T-junctions.
    pub t_junctions_repaired: usize,
}

// ============================================================================
// BVH
// ============================================================================

#[derive(Debug, Clone)]
struct Aabb {
    min: Point3<f64>,
    max: Point3<f64>,
}

impl Aabb {
    fn empty() -> Self {
        Self {
            min: Point3::new(f64::MAX, f64::MAX, f64::MAX),
            max: Point3::new(f64::MIN, f64::MIN, f64::MIN),
        }
    }

    fn from_points(points: &[Point3<f64>]) -> Self {
        let mut bbox = Self::empty();
        for p in points {
            bbox.min = bbox.min.inf(p);
            bbox.max = bbox.max.sup(p);
        }
        bbox
    }

    fn expand(&mut self, other: &Aabb) {
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    fn intersects(&self, other: &Aabb, tolerance: f64) -> bool {
        (0..3).all(|i| {
            self.max[i] + tolerance >= other.min[i] && other.max[i] + tolerance >= self.min[i]
        })
    }

    fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    fn longest_axis(&self) -> usize {
        (self.max - self.min).imax()
    }

    /// Slab test for a ray starting at `origin`.
    fn hit_by_ray(&self, origin: &Point3<f64>, inv_dir: &Vector3<f64>) -> bool {
        let mut t_min = 0.0f64;
        let mut t_max = f64::INFINITY;
        for i in 0..3 {
            let t1 = (self.min[i] - origin[i]) * inv_dir[i];
            let t2 = (self.max[i] - origin[i]) * inv_dir[i];
            t_min = t_min.max(t1.min(t2));
            t_max = t_max.min(t1.max(t2));
        }
        t_min <= t_max
    }
}

enum BvhNode {
    Leaf {
        bbox: Aabb,
        triangles: Vec<usize>,
    },
    Internal {
        bbox: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    fn bbox(&self) -> &Aabb {
        match self {
            BvhNode::Leaf { bbox, .. } | BvhNode::Internal { bbox, .. } => bbox,
        }
    }
}

/// Bounding volume hierarchy over the faces of one operand.
struct Bvh {
    root: Option<BvhNode>,
}

impl Bvh {
    const MAX_LEAF_SIZE: usize = 8;

    fn build(triangles: &[[Point3<f64>; 3]]) -> Self {
        if triangles.is_empty() {
            return Self { root: None };
        }
        let boxes: Vec<Aabb> = triangles.iter().map(|t| Aabb::from_points(t)).collect();
        let indices: Vec<usize> = (0..triangles.len()).collect();
        Self {
            root: Some(Self::build_recursive(&boxes, indices)),
        }
    }

    fn build_recursive(boxes: &[Aabb], mut indices: Vec<usize>) -> BvhNode {
        let mut bbox = Aabb::empty();
        for &i in &indices {
            bbox.expand(&boxes[i]);
        }

        if indices.len() <= Self::MAX_LEAF_SIZE {
            return BvhNode::Leaf {
                bbox,
                triangles: indices,
            };
        }

        let axis = bbox.longest_axis();
        indices.sort_by(|&a, &b| boxes[a].center()[axis].total_cmp(&boxes[b].center()[axis]));
        let right = indices.split_off(indices.len() / 2);

        BvhNode::Internal {
            bbox,
            left: Box::new(Self::build_recursive(boxes, indices)),
            right: Box::new(Self::build_recursive(boxes, right)),
        }
    }

    fn query(&self, query: &Aabb, tolerance: f64) -> Vec<usize> {
        let mut result = Vec::new();
        let mut stack: Vec<&BvhNode> = self.root.iter().collect();
        while let Some(node) = stack.pop() {
            if !node.bbox().intersects(query, tolerance) {
                continue;
            }
            match node {
                BvhNode::Leaf { triangles, .. } => result.extend_from_slice(triangles),
                BvhNode::Internal { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        result
    }

    fn query_ray(&self, origin: &Point3<f64>, dir: &Vector3<f64>) -> Vec<usize> {
        let inv_dir = dir.map(|d| 1.0 / d);
        let mut result = Vec::new();
        let mut stack: Vec<&BvhNode> = self.root.iter().collect();
        while let Some(node) = stack.pop() {
            if !node.bbox().hit_by_ray(origin, &inv_dir) {
                continue;
            }
            match node {
                BvhNode::Leaf { triangles, .. } => result.extend_from_slice(triangles),
                BvhNode::Internal { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        result
    }
}

/// A mesh prepared for splitting and classification.
struct Operand<'a> {
    mesh: &'a Mesh,
    triangles: Vec<[Point3<f64>; 3]>,
    normals: Vec<Option<Vector3<f64>>>,
    bvh: Bvh,
}

impl<'a> Operand<'a> {
    fn new(mesh: &'a Mesh) -> Self {
        let triangles: Vec<[Point3<f64>; 3]> = mesh
            .faces
            .iter()
            .map(|f| {
                [
                    mesh.vertices[f[0] as usize].position,
                    mesh.vertices[f[1] as usize].position,
                    mesh.vertices[f[2] as usize].position,
                ]
            })
            .collect();
        let normals = triangles
            .iter()
            .map(|t| (t[1] - t[0]).cross(&(t[2] - t[0])).try_normalize(1e-300))
            .collect();
        let bvh = Bvh::build(&triangles);
        Self {
            mesh,
            triangles,
            normals,
            bvh,
        }
    }

    /// Inside test by majority vote over three skewed ray directions.
    fn contains(&self, p: &Point3<f64>) -> bool {
        const DIRECTIONS: [[f64; 3]; 3] = [
            [0.577_215_66, 0.618_033_99, 0.533_049_81],
            [-0.707_106_78, 0.412_310_56, 0.574_456_26],
            [0.301_511_34, -0.904_534_03, 0.301_511_34],
        ];
        let votes = DIRECTIONS
            .iter()
            .filter(|d| {
                let dir = Vector3::new(d[0], d[1], d[2]);
                let hits = self
                    .bvh
                    .query_ray(p, &dir)
                    .into_iter()
                    .filter(|&i| {
                        let [v0, v1, v2] = &self.triangles[i];
                        ray_triangle_intersect(p, &dir, v0, v1, v2).is_some()
                    })
                    .count();
                hits % 2 == 1
            })
            .count();
        votes >= 2
    }

    /// Orientation of a coplanar face of this operand under `p`, if any.
    fn coplanar_normal_at(&self, p: &Point3<f64>, tolerance: f64) -> Option<Vector3<f64>> {
        let probe = Aabb { min: *p, max: *p };
        self.bvh.query(&probe, tolerance).into_iter().find_map(|i| {
            let normal = self.normals[i]?;
            let [v0, v1, v2] = &self.triangles[i];
            let distance = normal.dot(&(p - v0));
            (distance.abs() <= tolerance && point_in_triangle(p, v0, v1, v2, &normal, tolerance))
                .then_some(normal)
        })
    }
}

// ============================================================================
// Predicates
// ============================================================================

/// Möller–Trumbore ray/triangle intersection, returning the ray parameter.
fn ray_triangle_intersect(
    origin: &Point3<f64>,
    dir: &Vector3<f64>,
    v0: &Point3<f64>,
    v1: &Point3<f64>,
    v2: &Point3<f64>,
) -> Option<f64> {
    const EPSILON: f64 = 1e-12;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = dir.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * dir.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(&q);
    (t > EPSILON).then_some(t)
}

/// Inclusive point-in-triangle test for a point on the triangle's plane.
fn point_in_triangle(
    p: &Point3<f64>,
    v0: &Point3<f64>,
    v1: &Point3<f64>,
    v2: &Point3<f64>,
    normal: &Vector3<f64>,
    tolerance: f64,
) -> bool {
    [(v0, v1), (v1, v2), (v2, v0)].iter().all(|(a, b)| {
        let edge = *b - *a;
        let len = edge.norm();
        len == 0.0 || edge.cross(&(p - *a)).dot(normal) / len >= -tolerance
    })
}

/// Whether triangle `b` crosses the plane of triangle `a` within `a`'s
/// bounding region. Only a conservative filter: splitting by a plane that
/// does not actually cut the triangle is a no-op.
fn straddles(a: &[Point3<f64>; 3], plane_point: &Point3<f64>, normal: &Vector3<f64>, tolerance: f64) -> bool {
    let mut below = false;
    let mut above = false;
    for p in a {
        let d = normal.dot(&(p - plane_point));
        below |= d < -tolerance;
        above |= d > tolerance;
    }
    below && above
}

// ============================================================================
// Splitting
// ============================================================================

/// Split a triangle by a plane, preserving winding.
///
/// Vertices within `tolerance` of the plane are treated as lying on it, so
/// no sliver fragments are produced for near-touching input. Returns the
/// input unchanged when the plane does not cross it.
pub(crate) fn split_triangle_by_plane(
    tri: &[Vertex; 3],
    plane_point: &Point3<f64>,
    normal: &Vector3<f64>,
    tolerance: f64,
) -> Vec<[Vertex; 3]> {
    let d: [f64; 3] = std::array::from_fn(|i| normal.dot(&(tri[i].position - plane_point)));
    let side = |x: f64| {
        if x > tolerance {
            1
        } else if x < -tolerance {
            -1
        } else {
            0
        }
    };
    let sides: [i32; 3] = std::array::from_fn(|i| side(d[i]));
    if !sides.contains(&1) || !sides.contains(&-1) {
        return vec![tri.clone()];
    }

    let mut front: Vec<Vertex> = Vec::with_capacity(4);
    let mut back: Vec<Vertex> = Vec::with_capacity(4);
    for i in 0..3 {
        let j = (i + 1) % 3;
        match sides[i] {
            1 => front.push(tri[i].clone()),
            -1 => back.push(tri[i].clone()),
            _ => {
                front.push(tri[i].clone());
                back.push(tri[i].clone());
            }
        }
        if sides[i] * sides[j] < 0 {
            let t = d[i] / (d[i] - d[j]);
            let mut v = tri[i].lerp(&tri[j], t);
            v.position -= normal * normal.dot(&(v.position - plane_point));
            front.push(v.clone());
            back.push(v);
        }
    }

    let mut result = Vec::with_capacity(3);
    for polygon in [front, back] {
        for k in 1..polygon.len().saturating_sub(1) {
            result.push([polygon[0].clone(), polygon[k].clone(), polygon[k + 1].clone()]);
        }
    }
    result
}

/// Fragments of `operand`'s faces cut by every plane of `other` that
/// crosses them. Returns the fragments and the number of split faces.
fn split_against(operand: &Operand, other: &Operand, params: &BooleanParams) -> (Vec<[Vertex; 3]>, usize) {
    let per_face: Vec<Vec<[Vertex; 3]>> = operand
        .mesh
        .faces
        .par_iter()
        .enumerate()
        .map(|(fi, face)| {
            let tri = operand.triangles[fi];
            let mut pieces: Vec<[Vertex; 3]> = vec![[
                operand.mesh.vertices[face[0] as usize].clone(),
                operand.mesh.vertices[face[1] as usize].clone(),
                operand.mesh.vertices[face[2] as usize].clone(),
            ]];
            let own_normal = operand.normals[fi];

            for bi in other.bvh.query(&Aabb::from_points(&tri), params.tolerance) {
                let Some(normal_b) = other.normals[bi] else {
                    continue;
                };
                let tri_b = &other.triangles[bi];

                let coplanar = own_normal.is_some_and(|n| n.cross(&normal_b).norm() < 1e-9)
                    && tri.iter().all(|p| normal_b.dot(&(p - tri_b[0])).abs() <= params.coplanar_tolerance);

                if coplanar {
                    // Cut along the other triangle's edges so coverage is exact
                    for k in 0..3 {
                        let a = tri_b[k];
                        let b = tri_b[(k + 1) % 3];
                        let Some(edge_normal) = normal_b.cross(&(b - a)).try_normalize(1e-300) else {
                            continue;
                        };
                        pieces = split_all(pieces, &a, &edge_normal, params.tolerance);
                    }
                } else if straddles(&tri, &tri_b[0], &normal_b, params.tolerance)
                    && straddles(tri_b, &tri[0], &own_normal.unwrap_or(normal_b), params.tolerance)
                {
                    pieces = split_all(pieces, &tri_b[0], &normal_b, params.tolerance);
                }
            }
            pieces
        })
        .collect();

    let split = per_face.iter().filter(|p| p.len() > 1).count();
    (per_face.into_iter().flatten().collect(), split)
}

fn split_all(
    pieces: Vec<[Vertex; 3]>,
    plane_point: &Point3<f64>,
    normal: &Vector3<f64>,
    tolerance: f64,
) -> Vec<[Vertex; 3]> {
    pieces
        .iter()
        .flat_map(|piece| split_triangle_by_plane(piece, plane_point, normal, tolerance))
        .collect()
}

// ============================================================================
// Classification and assembly
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaceLocation {
    Inside,
    Outside,
    /// On the other surface; `true` when both face the same way.
    OnBoundary { same_orientation: bool },
}

fn classify(fragments: &[[Vertex; 3]], other: &Operand, params: &BooleanParams) -> Vec<FaceLocation> {
    fragments
        .par_iter()
        .map(|f| {
            let centroid = Point3::from(
                (f[0].position.coords + f[1].position.coords + f[2].position.coords) / 3.0,
            );
            let normal = (f[1].position - f[0].position).cross(&(f[2].position - f[0].position));

            if let Some(other_normal) = other.coplanar_normal_at(&centroid, params.coplanar_tolerance) {
                FaceLocation::OnBoundary {
                    same_orientation: normal.dot(&other_normal) > 0.0,
                }
            } else if other.contains(&centroid) {
                FaceLocation::Inside
            } else {
                FaceLocation::Outside
            }
        })
        .collect()
}

/// Keep/invert decision for one fragment. Returns None to drop it.
fn select(op: BooleanOp, location: FaceLocation, from_a: bool, strategy: CoplanarStrategy) -> Option<bool> {
    match location {
        FaceLocation::OnBoundary { same_orientation } => {
            let keep_shared = match op {
                BooleanOp::Union | BooleanOp::Intersection => same_orientation,
                BooleanOp::Difference => !same_orientation,
            };
            let invert = op == BooleanOp::Difference && !from_a;
            match strategy {
                CoplanarStrategy::Exclude => None,
                CoplanarStrategy::KeepBoth => Some(invert),
                CoplanarStrategy::Include => (keep_shared && from_a).then_some(false),
            }
        }
        FaceLocation::Inside => match op {
            BooleanOp::Union => None,
            BooleanOp::Intersection => Some(false),
            BooleanOp::Difference => (!from_a).then_some(true),
        },
        FaceLocation::Outside => match op {
            BooleanOp::Union => Some(false),
            BooleanOp::Intersection => None,
            BooleanOp::Difference => from_a.then_some(false),
        },
    }
}

fn push_fragment(result: &mut Mesh, fragment: &[Vertex; 3], invert: bool) {
    let base = result.vertices.len() as u32;
    if invert {
        result.vertices.extend([fragment[0].clone(), fragment[2].clone(), fragment[1].clone()]);
    } else {
        result.vertices.extend(fragment.iter().cloned());
    }
    result.faces.push([base, base + 1, base + 2]);
}

fn validate_operand(mesh: &Mesh, label: &str, op: BooleanOp) -> HoldResult<()> {
    if mesh.vertices.is_empty() || mesh.faces.is_empty() {
        return Err(HoldError::empty_mesh(format!("boolean operand {label} is empty")));
    }
    mesh.validate_indices()?;

    let adjacency = MeshAdjacency::build(&mesh.faces);
    if !adjacency.is_manifold() {
        return Err(HoldError::boolean_failed(
            op.name(),
            format!(
                "operand {label} has {} non-manifold edges",
                adjacency.non_manifold_edge_count()
            ),
        ));
    }
    if !adjacency.is_watertight() {
        return Err(HoldError::boolean_failed(
            op.name(),
            format!(
                "operand {label} is open ({} boundary edges)",
                adjacency.boundary_edge_count()
            ),
        ));
    }
    Ok(())
}

/// Perform a boolean operation on two closed meshes.
///
/// # Errors
/// - `EmptyMesh` when an operand has no faces
/// - `InvalidVertexIndex` for out-of-range faces
/// - `BooleanFailed` for open or non-manifold operands
pub fn boolean_operation(
    mesh_a: &Mesh,
    mesh_b: &Mesh,
    operation: BooleanOp,
    params: &BooleanParams,
) -> HoldResult<BooleanResult> {
    validate_operand(mesh_a, "A", operation)?;
    validate_operand(mesh_b, "B", operation)?;

    let a = Operand::new(mesh_a);
    let b = Operand::new(mesh_b);

    let (bbox_a, bbox_b) = (
        Aabb::from_points(&mesh_a.vertices.iter().map(|v| v.position).collect::<Vec<_>>()),
        Aabb::from_points(&mesh_b.vertices.iter().map(|v| v.position).collect::<Vec<_>>()),
    );
    if !bbox_a.intersects(&bbox_b, params.tolerance) {
        return Ok(handle_disjoint(mesh_a, mesh_b, operation));
    }

    let (fragments_a, split_a) = split_against(&a, &b, params);
    let (fragments_b, split_b) = split_against(&b, &a, params);
    let locations_a = classify(&fragments_a, &b, params);
    let locations_b = classify(&fragments_b, &a, params);

    let mut stats = BooleanStats {
        faces_split: split_a + split_b,
        coplanar_fragments: locations_a
            .iter()
            .chain(&locations_b)
            .filter(|l| matches!(l, FaceLocation::OnBoundary { .. }))
            .count(),
        ..Default::default()
    };

    let mut result = Mesh::new();
    for (fragment, location) in fragments_a.iter().zip(&locations_a) {
        if let Some(invert) = select(operation, *location, true, params.coplanar_strategy) {
            push_fragment(&mut result, fragment, invert);
        }
    }
    stats.faces_from_a = result.face_count();
    for (fragment, location) in fragments_b.iter().zip(&locations_b) {
        if let Some(invert) = select(operation, *location, false, params.coplanar_strategy) {
            push_fragment(&mut result, fragment, invert);
        }
    }
    stats.faces_from_b = result.face_count() - stats.faces_from_a;

    if params.cleanup {
        stats.vertices_welded = weld_vertices(&mut result, params.weld_tolerance);
        result.remove_degenerate_faces(0.0);
        stats.t_junctions_repaired = repair_t_junctions(&mut result, params.weld_tolerance);
        stats.non_manifold_edges_fixed = fix_non_manifold_edges(&mut result);
        result.remove_unreferenced_vertices();
    }

    debug!(
        op = operation.name(),
        faces = result.face_count(),
        split = stats.faces_split,
        coplanar = stats.coplanar_fragments,
        "Boolean operation complete"
    );

    Ok(BooleanResult { mesh: result, stats })
}

/// Operands whose bounding boxes do not meet.
fn handle_disjoint(mesh_a: &Mesh, mesh_b: &Mesh, operation: BooleanOp) -> BooleanResult {
    let mesh = match operation {
        BooleanOp::Union => {
            let mut result = mesh_a.clone();
            result.append(mesh_b);
            result
        }
        BooleanOp::Difference => mesh_a.clone(),
        BooleanOp::Intersection => Mesh::new(),
    };
    BooleanResult {
        stats: BooleanStats {
            faces_from_a: if operation == BooleanOp::Intersection { 0 } else { mesh_a.face_count() },
            faces_from_b: if operation == BooleanOp::Union { mesh_b.face_count() } else { 0 },
            ..Default::default()
        },
        mesh,
    }
}

/// Merge vertices closer than `tolerance` using a hash grid.
///
/// Faces that collapse are removed. Returns the number of merged vertices.
pub fn weld_vertices(mesh: &mut Mesh, tolerance: f64) -> usize {
    if mesh.vertices.is_empty() || tolerance <= 0.0 {
        return 0;
    }

    let cell = |p: &Point3<f64>| -> [i64; 3] {
        [
            (p.x / tolerance).floor() as i64,
            (p.y / tolerance).floor() as i64,
            (p.z / tolerance).floor() as i64,
        ]
    };
    let tol_sq = tolerance * tolerance;

    let mut grid: HashMap<[i64; 3], Vec<u32>> = HashMap::new();
    let mut remap: Vec<u32> = Vec::with_capacity(mesh.vertices.len());
    let mut kept: Vec<Vertex> = Vec::with_capacity(mesh.vertices.len());

    for v in &mesh.vertices {
        let c = cell(&v.position);
        let mut found = None;
        'search: for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if let Some(candidates) = grid.get(&[c[0] + dx, c[1] + dy, c[2] + dz]) {
                        for &k in candidates {
                            if (kept[k as usize].position - v.position).norm_squared() <= tol_sq {
                                found = Some(k);
                                break 'search;
                            }
                        }
                    }
                }
            }
        }

        let idx = found.unwrap_or_else(|| {
            let idx = kept.len() as u32;
            kept.push(v.clone());
            grid.entry(c).or_default().push(idx);
            idx
        });
        remap.push(idx);
    }

    let welded = mesh.vertices.len() - kept.len();
    for face in &mut mesh.faces {
        for i in face.iter_mut() {
            *i = remap[*i as usize];
        }
    }
    mesh.vertices = kept;
    mesh.faces.retain(|f| f[0] != f[1] && f[1] != f[2] && f[0] != f[2]);
    welded
}

/// Split faces whose boundary edge passes through another boundary vertex.
///
/// Fragments of neighbouring faces are cut at different points, which
/// leaves vertices in the middle of a neighbour's edge. Splitting the
/// neighbour at those vertices makes the result watertight by index.
/// Returns the number of faces split.
pub fn repair_t_junctions(mesh: &mut Mesh, tolerance: f64) -> usize {
    const MAX_PASSES: usize = 8;
    let tol_sq = tolerance * tolerance;
    let mut repaired = 0;

    for _ in 0..MAX_PASSES {
        let adjacency = MeshAdjacency::build(&mesh.faces);
        let boundary = adjacency.boundary_half_edges();
        if boundary.is_empty() {
            break;
        }
        let mut boundary_vertices: Vec<u32> = boundary.iter().flat_map(|&(a, b)| [a, b]).collect();
        boundary_vertices.sort_unstable();
        boundary_vertices.dedup();

        let mut owner: HashMap<(u32, u32), usize> = HashMap::new();
        for (fi, f) in mesh.faces.iter().enumerate() {
            for i in 0..3 {
                owner.insert((f[i], f[(i + 1) % 3]), fi);
            }
        }

        let mut splits: Vec<(usize, usize, Vec<u32>)> = Vec::new();
        for &(a, b) in boundary {
            let pa = mesh.vertices[a as usize].position;
            let edge = mesh.vertices[b as usize].position - pa;
            let len_sq = edge.norm_squared();
            if len_sq == 0.0 {
                continue;
            }

            let mut on_edge: Vec<(f64, u32)> = boundary_vertices
                .iter()
                .filter(|&&v| v != a && v != b)
                .filter_map(|&v| {
                    let offset = mesh.vertices[v as usize].position - pa;
                    let t = offset.dot(&edge) / len_sq;
                    let inside = t > 1e-9 && t < 1.0 - 1e-9;
                    (inside && (offset - edge * t).norm_squared() <= tol_sq).then_some((t, v))
                })
                .collect();
            if on_edge.is_empty() {
                continue;
            }
            on_edge.sort_by(|x, y| x.0.total_cmp(&y.0));

            if let Some(&fi) = owner.get(&(a, b)) {
                let corner = (0..3).find(|&i| mesh.faces[fi][i] == a).unwrap_or(0);
                splits.push((fi, corner, on_edge.into_iter().map(|(_, v)| v).collect()));
            }
        }
        if splits.is_empty() {
            break;
        }

        // One split per face per pass; later passes pick up the rest.
        splits.sort_by_key(|s| s.0);
        splits.dedup_by_key(|s| s.0);
        for (fi, corner, points) in splits {
            let f = mesh.faces[fi];
            let (a, b, c) = (f[corner], f[(corner + 1) % 3], f[(corner + 2) % 3]);
            let chain: Vec<u32> = std::iter::once(a).chain(points).chain(std::iter::once(b)).collect();
            mesh.faces[fi] = [chain[0], chain[1], c];
            for w in chain.windows(2).skip(1) {
                mesh.faces.push([w[0], w[1], c]);
            }
            repaired += 1;
        }
    }

    repaired
}

/// Keep at most two faces per edge, dropping exact duplicates first.
/// Returns the number of non-manifold edges repaired.
fn fix_non_manifold_edges(mesh: &mut Mesh) -> usize {
    let mut seen: hashbrown::HashSet<[u32; 3]> = hashbrown::HashSet::new();
    mesh.faces.retain(|f| {
        let mut key = *f;
        key.sort_unstable();
        seen.insert(key)
    });

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let bad = adjacency.non_manifold_edge_count();
    if bad == 0 {
        return 0;
    }

    let mut edge_uses: HashMap<(u32, u32), u8> = HashMap::new();
    mesh.faces.retain(|f| {
        let edges = [(f[0], f[1]), (f[1], f[2]), (f[2], f[0])].map(|(a, b)| (a.min(b), a.max(b)));
        if edges.iter().any(|e| edge_uses.get(e).copied().unwrap_or(0) >= 2) {
            return false;
        }
        for e in edges {
            *edge_uses.entry(e).or_insert(0) += 1;
        }
        true
    });
    bad
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cube(min: [f64; 3], size: f64) -> Mesh {
        let mut mesh = Mesh::new();
        for &(x, y, z) in &[
            (0.0, 0.0, 0.0),
            (1.0, 0.0, 0.0),
            (1.0, 1.0, 0.0),
            (0.0, 1.0, 0.0),
            (0.0, 0.0, 1.0),
            (1.0, 0.0, 1.0),
            (1.0, 1.0, 1.0),
            (0.0, 1.0, 1.0),
        ] {
            mesh.vertices.push(Vertex::from_coords(
                min[0] + x * size,
                min[1] + y * size,
                min[2] + z * size,
            ));
        }
        mesh.faces = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [1, 2, 6],
            [1, 6, 5],
            [3, 0, 4],
            [3, 4, 7],
        ];
        mesh
    }

    #[test]
    fn test_cube_is_valid_operand() {
        let mesh = cube([0.0; 3], 1.0);
        assert_relative_eq!(mesh.signed_volume(), 1.0, epsilon = 1e-12);
        assert!(validate_operand(&mesh, "A", BooleanOp::Union).is_ok());
    }

    #[test]
    fn test_overlapping_cubes() {
        let a = cube([0.0; 3], 1.0);
        let b = cube([0.5; 3], 1.0);
        let params = BooleanParams::default();

        let union = boolean_operation(&a, &b, BooleanOp::Union, &params).unwrap();
        assert_relative_eq!(union.mesh.signed_volume(), 1.875, epsilon = 1e-9);
        assert!(union.stats.faces_split > 0);

        let inter = boolean_operation(&a, &b, BooleanOp::Intersection, &params).unwrap();
        assert_relative_eq!(inter.mesh.signed_volume(), 0.125, epsilon = 1e-9);

        let diff = boolean_operation(&a, &b, BooleanOp::Difference, &params).unwrap();
        assert_relative_eq!(diff.mesh.signed_volume(), 0.875, epsilon = 1e-9);
    }

    #[test]
    fn test_result_indices_valid() {
        let a = cube([0.0; 3], 1.0);
        let b = cube([0.3, 0.2, 0.6], 1.0);
        for op in [BooleanOp::Union, BooleanOp::Intersection, BooleanOp::Difference] {
            let result = boolean_operation(&a, &b, op, &BooleanParams::default()).unwrap();
            assert!(result.mesh.validate_indices().is_ok());
        }
    }

    #[test]
    fn test_coplanar_faces_union() {
        // Side by side, sharing the x = 1 face
        let a = cube([0.0; 3], 1.0);
        let b = cube([1.0, 0.0, 0.0], 1.0);
        let result = boolean_operation(&a, &b, BooleanOp::Union, &BooleanParams::default()).unwrap();
        assert_relative_eq!(result.mesh.signed_volume(), 2.0, epsilon = 1e-9);
        assert!(result.stats.coplanar_fragments > 0);
    }

    #[test]
    fn test_coplanar_top_intersection() {
        // B shares A's top face plane and sticks out sideways
        let a = cube([0.0; 3], 1.0);
        let b = cube([0.5, 0.0, 0.0], 1.0);
        let result =
            boolean_operation(&a, &b, BooleanOp::Intersection, &BooleanParams::default()).unwrap();
        assert_relative_eq!(result.mesh.signed_volume(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_disjoint_operands() {
        let a = cube([0.0; 3], 1.0);
        let b = cube([5.0; 3], 1.0);
        let params = BooleanParams::default();

        let union = boolean_operation(&a, &b, BooleanOp::Union, &params).unwrap();
        assert_eq!(union.mesh.face_count(), 24);
        let inter = boolean_operation(&a, &b, BooleanOp::Intersection, &params).unwrap();
        assert!(inter.mesh.is_empty());
        let diff = boolean_operation(&a, &b, BooleanOp::Difference, &params).unwrap();
        assert_eq!(diff.mesh.face_count(), 12);
    }

    #[test]
    fn test_contained_operand() {
        let a = cube([0.0; 3], 1.0);
        let b = cube([0.25; 3], 0.5);
        let diff = boolean_operation(&a, &b, BooleanOp::Difference, &BooleanParams::default()).unwrap();
        assert_relative_eq!(diff.mesh.signed_volume(), 0.875, epsilon = 1e-9);
    }

    #[test]
    fn test_open_operand_fails() {
        let a = cube([0.0; 3], 1.0);
        let mut b = cube([0.5; 3], 1.0);
        b.faces.pop();
        let result = boolean_operation(&a, &b, BooleanOp::Union, &BooleanParams::default());
        assert!(matches!(result, Err(HoldError::BooleanFailed { .. })));
    }

    #[test]
    fn test_empty_operand() {
        let a = cube([0.0; 3], 1.0);
        let result = boolean_operation(&a, &Mesh::new(), BooleanOp::Union, &BooleanParams::default());
        assert!(matches!(result, Err(HoldError::EmptyMesh { .. })));
    }

    #[test]
    fn test_split_triangle_preserves_area() {
        let tri = [
            Vertex::from_coords(0.0, 0.0, 0.0),
            Vertex::from_coords(2.0, 0.0, 0.0),
            Vertex::from_coords(0.0, 2.0, 0.0),
        ];
        let pieces = split_triangle_by_plane(&tri, &Point3::new(0.5, 0.0, 0.0), &Vector3::x(), 1e-12);
        assert_eq!(pieces.len(), 3);
        let area: f64 = pieces
            .iter()
            .map(|p| {
                (p[1].position - p[0].position)
                    .cross(&(p[2].position - p[0].position))
                    .z
                    / 2.0
            })
            .sum();
        assert_relative_eq!(area, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_split_touching_plane_is_noop() {
        let tri = [
            Vertex::from_coords(0.0, 0.0, 0.0),
            Vertex::from_coords(1.0, 0.0, 0.0),
            Vertex::from_coords(0.0, 1.0, 0.0),
        ];
        let pieces = split_triangle_by_plane(&tri, &Point3::origin(), &Vector3::x(), 1e-12);
        assert_eq!(pieces.len(), 1);
    }

    #[test]
    fn test_repair_t_junction() {
        // Two triangles below one long edge, one triangle above it
        let mut mesh = Mesh::new();
        for p in [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, -1.0, 0.0]] {
            mesh.vertices.push(Vertex::from_coords(p[0], p[1], p[2]));
        }
        mesh.faces = vec![[0, 1, 3], [0, 4, 2], [2, 4, 1]];

        let repaired = repair_t_junctions(&mut mesh, 1e-9);
        assert_eq!(repaired, 1);
        assert_eq!(mesh.face_count(), 4);
        let adjacency = MeshAdjacency::build(&mesh.faces);
        assert_eq!(adjacency.faces_for_edge(0, 2).map(<[usize]>::len), Some(2));
        assert_eq!(adjacency.faces_for_edge(2, 1).map(<[usize]>::len), Some(2));
    }

    #[test]
    fn test_overlap_result_is_watertight() {
        let a = cube([0.0; 3], 1.0);
        let b = cube([0.5; 3], 1.0);
        let result = boolean_operation(&a, &b, BooleanOp::Intersection, &BooleanParams::default()).unwrap();
        assert!(MeshAdjacency::build(&result.mesh.faces).is_watertight());
    }

    #[test]
    fn test_weld_merges_duplicates() {
        let mut mesh = Mesh::new();
        for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 1e-9]] {
            mesh.vertices.push(Vertex::from_coords(p[0], p[1], p[2]));
        }
        mesh.faces = vec![[0, 1, 2], [3, 2, 0]];
        let welded = weld_vertices(&mut mesh, 1e-7);
        assert_eq!(welded, 1);
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [1, 2, 0]]);
    }
}
