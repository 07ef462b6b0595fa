//! Refinement of reconstructed hold meshes against the wall.
//!
//! A reconstructed hold is closed by the synthetic backing points added
//! before reconstruction, which leave a bumpy face against the wall. The
//! refiner cuts that face off at the wall plane and rebuilds it from the
//! convex hull of the remaining surface intersected with the wall mesh, so
//! the back of the final asset sits exactly on the wall.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adjacency::MeshAdjacency;
use crate::batch::{BatchReport, run_batch};
use crate::boolean::{BooleanOp, BooleanParams, boolean_operation, weld_vertices};
use crate::error::{HoldError, HoldResult};
use crate::holes::{DEFAULT_MAX_HOLE_EDGES, detect_holes, fill_holes, fill_loops};
use crate::hull::convex_hull_mesh;
use crate::plane::Plane;
use crate::tracing_ext::{OperationTimer, log_mesh_stats};
use crate::types::{Mesh, Rgb};

/// Parameters for [`refine_mesh`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Holes with more edges than this are left open.
    pub max_hole_edges: usize,

    /// Distance within which a vertex counts as lying on the wall plane.
    pub plane_tolerance: f64,

    /// Settings for the hull/wall intersection and the final union.
    pub boolean: BooleanParams,

    /// Color for new vertices on the rebuilt back face of colored meshes.
    pub cap_color: Rgb,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            max_hole_edges: DEFAULT_MAX_HOLE_EDGES,
            plane_tolerance: 1e-7,
            boolean: BooleanParams::for_scans(),
            cap_color: Rgb::WHITE,
        }
    }
}

impl RefineParams {
    pub fn with_max_hole_edges(mut self, max: usize) -> Self {
        self.max_hole_edges = max;
        self
    }

    pub fn with_cap_color(mut self, color: Rgb) -> Self {
        self.cap_color = color;
        self
    }
}

/// What the refiner did to one mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefineReport {
    /// Holes closed before clipping.
    pub holes_filled: usize,
    /// Faces removed or split by the plane.
    pub faces_clipped: usize,
    /// Triangles closing the cut at the plane.
    pub cut_faces: usize,
    /// Faces of the convex hull.
    pub hull_faces: usize,
    /// Faces of the hull/wall intersection.
    pub cap_faces: usize,
    /// Faces after the final union.
    pub merged_faces: usize,
    /// Set when a boolean step failed and the clipped surface was kept.
    pub boolean_error: Option<String>,
}

/// A refined mesh with its report.
#[derive(Debug, Clone)]
pub struct RefinedMesh {
    pub mesh: Mesh,
    pub report: RefineReport,
}

/// Result of [`clip_mesh_to_plane`].
#[derive(Debug, Clone)]
pub struct MeshClip {
    pub mesh: Mesh,
    /// Faces removed or split.
    pub faces_clipped: usize,
}

/// Keep the part of `mesh` on the non-positive side of `plane`.
///
/// Straddling triangles are split; vertices created on cut edges are
/// shared between neighbouring faces, interpolate color and normal, and lie
/// exactly on the plane.
pub fn clip_mesh_to_plane(mesh: &Mesh, plane: &Plane, tolerance: f64) -> HoldResult<MeshClip> {
    mesh.validate_indices()?;

    let distances: Vec<f64> = mesh
        .vertices
        .iter()
        .map(|v| plane.signed_distance(&v.position))
        .collect();
    let kept = |i: u32| distances[i as usize] <= tolerance;

    let mut out = Mesh {
        vertices: mesh.vertices.clone(),
        faces: Vec::with_capacity(mesh.faces.len()),
    };
    let mut cut_cache: HashMap<(u32, u32), u32> = HashMap::new();
    let mut faces_clipped = 0;

    let mut cut = |out: &mut Mesh, a: u32, b: u32| -> u32 {
        let key = if a < b { (a, b) } else { (b, a) };
        *cut_cache.entry(key).or_insert_with(|| {
            let (da, db) = (distances[key.0 as usize], distances[key.1 as usize]);
            let t = da / (da - db);
            let mut v = out.vertices[key.0 as usize].lerp(&out.vertices[key.1 as usize], t);
            v.position = plane.project(&v.position);
            out.vertices.push(v);
            (out.vertices.len() - 1) as u32
        })
    };

    for face in &mesh.faces {
        let inside = face.map(kept);
        match inside.iter().filter(|&&k| k).count() {
            3 => out.faces.push(*face),
            0 => faces_clipped += 1,
            1 => {
                faces_clipped += 1;
                let r = inside.iter().position(|&k| k).unwrap_or(0);
                let (a, b, c) = (face[r], face[(r + 1) % 3], face[(r + 2) % 3]);
                // A face touching the plane at one vertex contributes nothing
                if distances[a as usize] >= -tolerance {
                    continue;
                }
                let ab = cut(&mut out, a, b);
                let ac = cut(&mut out, a, c);
                out.faces.push([a, ab, ac]);
            }
            _ => {
                faces_clipped += 1;
                let r = inside.iter().position(|&k| !k).unwrap_or(0);
                let (c, a, b) = (face[r], face[(r + 1) % 3], face[(r + 2) % 3]);
                let bc = cut(&mut out, b, c);
                let ca = cut(&mut out, c, a);
                out.faces.push([a, b, bc]);
                out.faces.push([a, bc, ca]);
            }
        }
    }

    out.remove_degenerate_faces(tolerance * tolerance);
    out.remove_unreferenced_vertices();

    if out.faces.is_empty() {
        return Err(HoldError::geometry(
            "mesh clip",
            "no faces remain behind the wall plane",
        ));
    }
    debug!(faces_clipped, faces = out.face_count(), "Clipped mesh to plane");
    Ok(MeshClip {
        mesh: out,
        faces_clipped,
    })
}

/// Close boundary loops that lie on the plane. Returns the faces added.
fn close_cut(mesh: &mut Mesh, plane: &Plane, tolerance: f64) -> usize {
    let on_plane: Vec<_> = detect_holes(&MeshAdjacency::build(&mesh.faces))
        .into_iter()
        .filter(|l| {
            l.vertices
                .iter()
                .all(|&v| plane.signed_distance(&mesh.vertices[v as usize].position).abs() <= tolerance)
        })
        .collect();
    fill_loops(mesh, &on_plane, 0).faces_added
}

/// Refine one reconstructed mesh.
///
/// Steps: fill holes up to `max_hole_edges`, clip against `plane`, close
/// the cut, intersect the convex hull of the result with `wall`, and union
/// that cap back into the clipped mesh. A failed boolean step is logged and
/// the closed clipped mesh is returned instead, with the error recorded in
/// the report.
///
/// # Errors
/// `EmptyMesh` for an empty input, `Geometry` when nothing remains behind
/// the plane or the hull is degenerate.
pub fn refine_mesh(mesh: &Mesh, plane: &Plane, wall: &Mesh, params: &RefineParams) -> HoldResult<RefinedMesh> {
    let _timer = OperationTimer::new("refine");
    if mesh.is_empty() {
        return Err(HoldError::empty_mesh("cannot refine an empty mesh"));
    }

    let mut report = RefineReport::default();
    let mut filled = mesh.clone();
    report.holes_filled = fill_holes(&mut filled, params.max_hole_edges)?.filled;

    let clip = clip_mesh_to_plane(&filled, plane, params.plane_tolerance)?;
    report.faces_clipped = clip.faces_clipped;
    let mut clipped = clip.mesh;
    report.cut_faces = close_cut(&mut clipped, plane, params.plane_tolerance.max(1e-9));

    let hull = convex_hull_mesh(&clipped)?;
    report.hull_faces = hull.face_count();

    let merged = boolean_operation(&hull, wall, BooleanOp::Intersection, &params.boolean).and_then(|cap| {
        report.cap_faces = cap.mesh.face_count();
        if cap.mesh.is_empty() {
            return Err(HoldError::boolean_failed(
                BooleanOp::Intersection.name(),
                "hull does not reach the wall mesh",
            ));
        }
        boolean_operation(&clipped, &cap.mesh, BooleanOp::Union, &params.boolean)
    });

    let mut result = match merged {
        Ok(union) => union.mesh,
        Err(error) => {
            warn!(
                code = error.code().as_str(),
                "Boolean refinement failed, keeping clipped mesh: {}", error
            );
            report.boolean_error = Some(error.to_string());
            clipped.clone()
        }
    };

    if clipped.has_colors() {
        for vertex in &mut result.vertices {
            vertex.color.get_or_insert(params.cap_color);
        }
    }

    weld_vertices(&mut result, params.boolean.weld_tolerance);
    result.remove_degenerate_faces(0.0);
    fill_holes(&mut result, params.max_hole_edges)?;
    result.remove_unreferenced_vertices();
    result.compute_vertex_normals();
    report.merged_faces = result.face_count();

    info!(
        faces = result.face_count(),
        holes = report.holes_filled,
        clipped = report.faces_clipped,
        fallback = report.boolean_error.is_some(),
        "Refined mesh"
    );
    log_mesh_stats(&result, "refined");

    Ok(RefinedMesh { mesh: result, report })
}

/// Refine every named mesh against the same plane and wall.
pub fn refine_batch(
    meshes: Vec<(String, Mesh)>,
    plane: &Plane,
    wall: &Mesh,
    params: &RefineParams,
) -> BatchReport<RefinedMesh> {
    run_batch("refine", meshes, |_, mesh| refine_mesh(&mesh, plane, wall, params))
}
