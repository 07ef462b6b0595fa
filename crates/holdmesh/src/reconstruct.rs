//! Surface reconstruction of conditioned clusters.
//!
//! The default path runs Poisson reconstruction, prunes vertices whose
//! sample density falls in the lowest quantile, applies Taubin smoothing and
//! finally copies each vertex's color from its nearest source point.
//! Ball pivoting is available as an alternative for evenly sampled clusters.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::{BatchReport, run_batch};
use crate::error::{HoldError, HoldResult};
use crate::pointcloud::PointCloud;
use crate::poisson::{PoissonParams, poisson_reconstruct};
use crate::smooth::{TaubinParams, taubin_smooth};
use crate::spatial::{SpatialIndex, average_nearest_distance};
use crate::tracing_ext::{OperationTimer, log_mesh_stats};
use crate::types::{Mesh, Vertex};

/// Algorithm for surface reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionAlgorithm {
    /// Implicit indicator-function reconstruction; closes the surface.
    #[default]
    Poisson,
    /// Ball pivoting over several radii; interpolates the samples.
    BallPivoting,
}

impl ReconstructionAlgorithm {
    /// Output directory name conventionally used for this algorithm.
    pub fn stage_dir(&self) -> &'static str {
        match self {
            ReconstructionAlgorithm::Poisson => "poisson",
            ReconstructionAlgorithm::BallPivoting => "ball_pivoting",
        }
    }
}

/// Parameters for [`reconstruct_cluster`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructParams {
    pub algorithm: ReconstructionAlgorithm,

    /// Poisson grid and solver settings.
    pub poisson: PoissonParams,

    /// Vertices with density below this quantile are removed (Poisson only).
    pub density_quantile: f64,

    /// Smoothing applied after pruning.
    pub smoothing: TaubinParams,

    /// Ball radii for ball pivoting. Derived from the mean nearest-neighbour
    /// distance `d` as `d * 2^n` for n = 1..=4 when empty.
    pub ball_radii: Vec<f64>,

    /// Copy colors from the nearest source point.
    pub transfer_colors: bool,
}

impl Default for ReconstructParams {
    fn default() -> Self {
        Self {
            algorithm: ReconstructionAlgorithm::Poisson,
            poisson: PoissonParams::default(),
            density_quantile: 0.1,
            smoothing: TaubinParams::default(),
            ball_radii: Vec::new(),
            transfer_colors: true,
        }
    }
}

impl ReconstructParams {
    /// Coarser grid and lighter smoothing for quick previews.
    pub fn fast() -> Self {
        Self {
            poisson: PoissonParams::fast(),
            smoothing: TaubinParams::default().with_iterations(20),
            ..Default::default()
        }
    }

    /// Finer grid for final assets.
    pub fn high_quality() -> Self {
        Self {
            poisson: PoissonParams::high_quality(),
            ..Default::default()
        }
    }

    /// Ball pivoting with automatic radii.
    pub fn ball_pivoting() -> Self {
        Self {
            algorithm: ReconstructionAlgorithm::BallPivoting,
            smoothing: TaubinParams::disabled(),
            ..Default::default()
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.poisson.depth = depth;
        self
    }

    pub fn with_density_quantile(mut self, quantile: f64) -> Self {
        self.density_quantile = quantile;
        self
    }

    pub fn with_smoothing_iterations(mut self, iterations: usize) -> Self {
        self.smoothing.iterations = iterations;
        self
    }

    pub fn with_ball_radii(mut self, radii: Vec<f64>) -> Self {
        self.ball_radii = radii;
        self
    }
}

/// A reconstructed cluster.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub mesh: Mesh,
    pub algorithm: ReconstructionAlgorithm,
    /// Density cut used for pruning, if any.
    pub density_threshold: Option<f64>,
    /// Vertices removed by pruning.
    pub vertices_pruned: usize,
    /// Whether vertex colors were transferred.
    pub colored: bool,
}

/// Linearly interpolated quantile of `values` (`q` in [0, 1]).
///
/// Returns None for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Reconstruct one conditioned cluster.
///
/// # Errors
/// Returns `ReconstructionFailed` when the cloud lacks normals, the
/// algorithm produces no faces, or pruning leaves an empty mesh.
pub fn reconstruct_cluster(cloud: &PointCloud, params: &ReconstructParams) -> HoldResult<Reconstruction> {
    let _timer = OperationTimer::new("reconstruct");
    if cloud.is_empty() {
        return Err(HoldError::reconstruction_failed("cluster is empty"));
    }
    if !cloud.has_normals() {
        return Err(HoldError::reconstruction_failed(
            "cluster has no normals, condition it first",
        ));
    }

    let (mut mesh, density_threshold, vertices_pruned) = match params.algorithm {
        ReconstructionAlgorithm::Poisson => {
            let output = poisson_reconstruct(cloud, &params.poisson)?;
            let threshold = quantile(&output.densities, params.density_quantile)
                .ok_or_else(|| HoldError::reconstruction_failed("density array is empty"))?;
            let mut mesh = output.mesh;
            let mask: Vec<bool> = output.densities.iter().map(|&d| d < threshold).collect();
            let pruned = mesh.remove_vertices_by_mask(&mask);
            debug!(pruned, threshold, "Pruned low-density vertices");
            (mesh, Some(threshold), pruned)
        }
        ReconstructionAlgorithm::BallPivoting => {
            let radii = if params.ball_radii.is_empty() {
                let spacing = average_nearest_distance(&cloud.points).ok_or_else(|| {
                    HoldError::reconstruction_failed("ball pivoting needs at least two points")
                })?;
                (1..=4).map(|n| spacing * f64::from(1u32 << n)).collect()
            } else {
                params.ball_radii.clone()
            };
            (ball_pivot(cloud, &radii)?, None, 0)
        }
    };

    mesh.remove_unreferenced_vertices();
    if mesh.is_empty() {
        return Err(HoldError::reconstruction_failed(
            "no faces left after reconstruction",
        ));
    }

    taubin_smooth(&mut mesh, &params.smoothing);
    mesh.compute_vertex_normals();

    let colored = params.transfer_colors && transfer_colors(&mut mesh, cloud);

    info!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        pruned = vertices_pruned,
        colored,
        "Reconstructed cluster"
    );
    log_mesh_stats(&mesh, "reconstructed");

    Ok(Reconstruction {
        mesh,
        algorithm: params.algorithm,
        density_threshold,
        vertices_pruned,
        colored,
    })
}

/// Reconstruct every named cluster, isolating failures.
pub fn reconstruct_batch(
    clouds: Vec<(String, PointCloud)>,
    params: &ReconstructParams,
) -> BatchReport<Reconstruction> {
    run_batch("reconstruct", clouds, |_, cloud| reconstruct_cluster(&cloud, params))
}

/// Copy each vertex's color from its nearest point in `source`.
///
/// Returns false, leaving the mesh untouched, when `source` has no colors.
pub fn transfer_colors(mesh: &mut Mesh, source: &PointCloud) -> bool {
    let Some(colors) = source.colors.as_ref() else {
        warn!("Source cloud has no colors, skipping color transfer");
        return false;
    };
    let index = SpatialIndex::build(&source.points);
    let nearest: Vec<Option<usize>> = mesh
        .vertices
        .par_iter()
        .map(|v| index.nearest(&v.position).map(|n| n.index))
        .collect();
    for (vertex, idx) in mesh.vertices.iter_mut().zip(nearest) {
        vertex.color = idx.map(|i| colors[i]);
    }
    true
}

// ============================================================================
// Ball pivoting
// ============================================================================

/// Undirected edge key.
#[inline]
fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}

#[inline]
fn face_key(a: u32, b: u32, c: u32) -> [u32; 3] {
    let mut key = [a, b, c];
    key.sort_unstable();
    key
}

struct Pivoter<'a> {
    points: &'a [Point3<f64>],
    normals: &'a [Vector3<f64>],
    index: SpatialIndex,
    used: Vec<bool>,
    faces: Vec<[u32; 3]>,
    face_set: HashSet<[u32; 3]>,
    edge_faces: HashMap<(u32, u32), u8>,
}

impl<'a> Pivoter<'a> {
    fn new(points: &'a [Point3<f64>], normals: &'a [Vector3<f64>]) -> Self {
        Self {
            points,
            normals,
            index: SpatialIndex::build(points),
            used: vec![false; points.len()],
            faces: Vec::new(),
            face_set: HashSet::new(),
            edge_faces: HashMap::new(),
        }
    }

    /// Edges no longer than the ball diameter, a non-degenerate face whose
    /// normal agrees with the vertex normals, and no edge already shared by
    /// two faces.
    fn is_valid_triangle(&self, a: usize, b: usize, c: usize, radius: f64) -> bool {
        let (pa, pb, pc) = (self.points[a], self.points[b], self.points[c]);
        let max_edge = radius * 2.0;
        if (pb - pa).norm() > max_edge || (pc - pb).norm() > max_edge || (pa - pc).norm() > max_edge {
            return false;
        }

        let Some(face_normal) = (pb - pa).cross(&(pc - pa)).try_normalize(1e-12) else {
            return false;
        };
        let avg_normal = self.normals[a] + self.normals[b] + self.normals[c];
        if face_normal.dot(&avg_normal) <= 0.0 {
            return false;
        }

        let (a, b, c) = (a as u32, b as u32, c as u32);
        if self.face_set.contains(&face_key(a, b, c)) {
            return false;
        }
        [(a, b), (b, c), (c, a)]
            .iter()
            .all(|&(u, v)| self.edge_faces.get(&edge_key(u, v)).copied().unwrap_or(0) < 2)
    }

    fn add_face(&mut self, a: usize, b: usize, c: usize) {
        let (a, b, c) = (a as u32, b as u32, c as u32);
        self.faces.push([a, b, c]);
        self.face_set.insert(face_key(a, b, c));
        for (u, v) in [(a, b), (b, c), (c, a)] {
            *self.edge_faces.entry(edge_key(u, v)).or_insert(0) += 1;
        }
        for v in [a, b, c] {
            self.used[v as usize] = true;
        }
    }

    fn edge_is_open(&self, u: usize, v: usize) -> bool {
        self.edge_faces
            .get(&edge_key(u as u32, v as u32))
            .copied()
            .unwrap_or(0)
            == 1
    }

    fn find_seed(&self, radius: f64) -> Option<(usize, usize, usize)> {
        for i in 0..self.points.len() {
            if self.used[i] {
                continue;
            }
            let neighbors = self.index.within_radius(&self.points[i], radius * 2.0);
            for nj in &neighbors {
                let j = nj.index;
                if j == i || self.used[j] {
                    continue;
                }
                for nk in &neighbors {
                    let k = nk.index;
                    if k == i || k == j || self.used[k] {
                        continue;
                    }
                    if self.is_valid_triangle(i, j, k, radius) {
                        return Some((i, j, k));
                    }
                }
            }
        }
        None
    }

    /// Best third vertex for the face across front edge (v1, v2), preferring
    /// unused points and the smallest opening angle.
    fn find_pivot(&self, v1: usize, v2: usize, radius: f64) -> Option<usize> {
        let p1 = self.points[v1];
        let p2 = self.points[v2];
        let midpoint = Point3::from((p1.coords + p2.coords) / 2.0);

        let mut best: Option<(f64, usize)> = None;
        for nb in self.index.within_radius(&midpoint, radius * 2.0) {
            let idx = nb.index;
            if idx == v1 || idx == v2 || !self.is_valid_triangle(v2, v1, idx, radius) {
                continue;
            }
            let angle = (p1 - p2).angle(&(self.points[idx] - p2));
            let penalty = if self.used[idx] { 1000.0 } else { 0.0 };
            let score = angle + penalty;
            if best.is_none_or(|(s, _)| score < s) {
                best = Some((score, idx));
            }
        }
        best.map(|(_, idx)| idx)
    }

    fn pass(&mut self, radius: f64) {
        let max_iterations = self.points.len() * 10;
        let mut iterations = 0;

        while let Some((a, b, c)) = self.find_seed(radius) {
            self.add_face(a, b, c);
            let mut front = vec![(a, b), (b, c), (c, a)];

            while let Some((v1, v2)) = front.pop() {
                iterations += 1;
                if iterations > max_iterations {
                    return;
                }
                if !self.edge_is_open(v1, v2) {
                    continue;
                }
                if let Some(v3) = self.find_pivot(v1, v2, radius) {
                    self.add_face(v2, v1, v3);
                    if self.edge_is_open(v1, v3) {
                        front.push((v1, v3));
                    }
                    if self.edge_is_open(v3, v2) {
                        front.push((v3, v2));
                    }
                }
            }
        }
    }
}

/// Ball-pivoting reconstruction with one pass per radius, smallest first.
///
/// Output vertices are the input points; unreferenced ones are left for the
/// caller to drop.
pub fn ball_pivot(cloud: &PointCloud, radii: &[f64]) -> HoldResult<Mesh> {
    let normals = cloud
        .normals
        .as_ref()
        .ok_or_else(|| HoldError::reconstruction_failed("ball pivoting needs point normals"))?;
    if radii.is_empty() || radii.iter().any(|r| !(*r > 0.0)) {
        return Err(HoldError::invalid_parameter(
            "ball_radii",
            format!("radii must be positive, got {radii:?}"),
        ));
    }

    let mut sorted = radii.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut pivoter = Pivoter::new(&cloud.points, normals);
    for &radius in &sorted {
        pivoter.pass(radius);
        debug!(radius, faces = pivoter.faces.len(), "Ball pivoting pass");
    }

    let mut mesh = Mesh::with_capacity(cloud.len(), pivoter.faces.len());
    for (p, n) in cloud.points.iter().zip(normals) {
        let mut vertex = Vertex::new(*p);
        vertex.normal = Some(*n);
        mesh.vertices.push(vertex);
    }
    mesh.faces = pivoter.faces;
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rgb;
    use approx::assert_relative_eq;

    fn colored_sphere(n: usize) -> PointCloud {
        let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
        let mut points = Vec::with_capacity(n);
        let mut normals = Vec::with_capacity(n);
        let mut colors = Vec::with_capacity(n);
        for i in 0..n {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - y * y).sqrt();
            let theta = golden * i as f64;
            let dir = Vector3::new(r * theta.cos(), y, r * theta.sin());
            points.push(Point3::from(dir * 0.1));
            normals.push(dir);
            colors.push(if y > 0.0 { Rgb::new(1.0, 0.0, 0.0) } else { Rgb::new(0.0, 0.0, 1.0) });
        }
        let mut cloud = PointCloud::with_colors(points, colors).unwrap();
        cloud.set_normals(normals).unwrap();
        cloud
    }

    #[test]
    fn test_quantile_matches_linear_interpolation() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_relative_eq!(quantile(&values, 0.0).unwrap(), 1.0);
        assert_relative_eq!(quantile(&values, 0.5).unwrap(), 3.0);
        assert_relative_eq!(quantile(&values, 0.1).unwrap(), 1.4);
        assert_relative_eq!(quantile(&values, 1.0).unwrap(), 5.0);
        assert!(quantile(&[], 0.5).is_none());
    }

    #[test]
    fn test_poisson_cluster_is_colored() {
        let cloud = colored_sphere(1500);
        let params = ReconstructParams::fast();
        let result = reconstruct_cluster(&cloud, &params).unwrap();
        assert!(result.colored);
        assert!(result.vertices_pruned > 0);
        assert!(result.mesh.validate_indices().is_ok());
        assert!(result.mesh.has_colors());

        // Top of the sphere takes the color of the top samples
        let top = result
            .mesh
            .vertices
            .iter()
            .max_by(|a, b| a.position.y.total_cmp(&b.position.y))
            .unwrap();
        assert_eq!(top.color, Some(Rgb::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_missing_colors_skip_transfer() {
        let mut cloud = colored_sphere(800);
        cloud.colors = None;
        let result = reconstruct_cluster(&cloud, &ReconstructParams::fast()).unwrap();
        assert!(!result.colored);
        assert!(!result.mesh.has_colors());
    }

    #[test]
    fn test_requires_normals() {
        let mut cloud = colored_sphere(100);
        cloud.normals = None;
        assert!(matches!(
            reconstruct_cluster(&cloud, &ReconstructParams::default()),
            Err(HoldError::ReconstructionFailed { .. })
        ));
    }

    #[test]
    fn test_ball_pivoting_grid() {
        let mut points = Vec::new();
        for i in 0..8 {
            for j in 0..8 {
                points.push(Point3::new(i as f64 * 0.1, j as f64 * 0.1, 0.0));
            }
        }
        let n = points.len();
        let mut cloud = PointCloud::new(points);
        cloud.set_normals(vec![Vector3::z(); n]).unwrap();

        let mesh = ball_pivot(&cloud, &[0.08]).unwrap();
        assert!(mesh.face_count() > 0);
        assert!(mesh.validate_indices().is_ok());
        for tri in mesh.triangles() {
            assert!(tri.normal().unwrap().z > 0.0);
        }
    }

    #[test]
    fn test_ball_pivoting_rejects_bad_radii() {
        let cloud = colored_sphere(20);
        assert!(ball_pivot(&cloud, &[]).is_err());
        assert!(ball_pivot(&cloud, &[-1.0]).is_err());
    }
}
