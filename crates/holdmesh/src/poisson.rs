//! Poisson surface reconstruction on a dense grid.
//!
//! Oriented samples are splatted into a vector field on a regular grid
//! covering the padded bounding cube of the cloud. The indicator function
//! `chi` solves `laplace(chi) = div(V)` with `chi = 0` on the grid boundary,
//! so it grows along the (outward) normals and is lowest inside the
//! surface. The surface is the level set of `chi` at its mean value over the
//! samples, extracted with surface nets.
//!
//! The per-vertex density returned alongside the mesh is the smoothed
//! sample count around the vertex; low values flag surface that the
//! samples do not support.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{HoldError, HoldResult};
use crate::pointcloud::PointCloud;
use crate::types::{Mesh, Vertex};

/// Parameters for [`poisson_reconstruct`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoissonParams {
    /// The grid has `2^depth` nodes per axis.
    pub depth: u32,

    /// Margin added on each side of the bounding cube, as a fraction of its size.
    pub padding: f64,

    /// Passes of a [1, 2, 1] blur over the splatted fields.
    pub smoothing_passes: usize,

    /// Conjugate-gradient iteration cap.
    pub max_iterations: usize,

    /// Relative residual at which the solve stops.
    pub tolerance: f64,
}

impl Default for PoissonParams {
    fn default() -> Self {
        Self {
            depth: 6,
            padding: 0.1,
            smoothing_passes: 2,
            max_iterations: 500,
            tolerance: 1e-7,
        }
    }
}

impl PoissonParams {
    /// Smallest accepted depth.
    pub const MIN_DEPTH: u32 = 2;
    /// Largest accepted depth (256^3 nodes).
    pub const MAX_DEPTH: u32 = 8;

    /// Coarse grid for previews.
    pub fn fast() -> Self {
        Self {
            depth: 5,
            max_iterations: 300,
            ..Default::default()
        }
    }

    /// Fine grid for final assets.
    pub fn high_quality() -> Self {
        Self {
            depth: 7,
            max_iterations: 1000,
            ..Default::default()
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> HoldResult<()> {
        if !(Self::MIN_DEPTH..=Self::MAX_DEPTH).contains(&self.depth) {
            return Err(HoldError::invalid_parameter(
                "depth",
                format!(
                    "must be in {}..={}, got {}",
                    Self::MIN_DEPTH,
                    Self::MAX_DEPTH,
                    self.depth
                ),
            ));
        }
        if !(self.padding >= 0.0 && self.padding.is_finite()) {
            return Err(HoldError::invalid_parameter(
                "padding",
                format!("must be non-negative, got {}", self.padding),
            ));
        }
        if self.max_iterations == 0 {
            return Err(HoldError::invalid_parameter(
                "max_iterations",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Reconstructed surface with per-vertex sample density.
#[derive(Debug, Clone)]
pub struct PoissonOutput {
    /// Closed mesh with outward winding.
    pub mesh: Mesh,
    /// Density per vertex, index-aligned with `mesh.vertices`.
    pub densities: Vec<f64>,
    /// Level of `chi` the surface was extracted at.
    pub iso_level: f64,
    /// Nodes per grid axis.
    pub grid_size: usize,
    /// Conjugate-gradient iterations used.
    pub iterations: usize,
    /// Relative residual at exit.
    pub residual: f64,
}

/// Regular cubic grid with `n` nodes per axis, x fastest.
#[derive(Debug, Clone, Copy)]
struct Grid {
    n: usize,
    origin: Point3<f64>,
    h: f64,
}

impl Grid {
    #[inline]
    fn len(&self) -> usize {
        self.n * self.n * self.n
    }

    #[inline]
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.n * (j + self.n * k)
    }

    #[inline]
    fn coords(&self, idx: usize) -> (usize, usize, usize) {
        let n = self.n;
        (idx % n, (idx / n) % n, idx / (n * n))
    }

    #[inline]
    fn is_boundary(&self, idx: usize) -> bool {
        let (i, j, k) = self.coords(idx);
        let last = self.n - 1;
        i == 0 || j == 0 || k == 0 || i == last || j == last || k == last
    }

    /// Base node and trilinear weights of the cell containing `p`.
    fn cell(&self, p: &Point3<f64>) -> ([usize; 3], [f64; 3]) {
        let local = (p - self.origin) / self.h;
        let mut base = [0usize; 3];
        let mut t = [0.0; 3];
        for axis in 0..3 {
            let max_base = (self.n - 2) as f64;
            let f = local[axis].clamp(0.0, max_base + 1.0);
            let b = f.floor().min(max_base);
            base[axis] = b as usize;
            t[axis] = f - b;
        }
        (base, t)
    }

    /// The eight (node index, weight) pairs around `p`.
    fn trilinear(&self, p: &Point3<f64>) -> [(usize, f64); 8] {
        let (base, t) = self.cell(p);
        let mut out = [(0usize, 0.0); 8];
        for (c, slot) in out.iter_mut().enumerate() {
            let (dx, dy, dz) = (c & 1, (c >> 1) & 1, (c >> 2) & 1);
            let w = (if dx == 1 { t[0] } else { 1.0 - t[0] })
                * (if dy == 1 { t[1] } else { 1.0 - t[1] })
                * (if dz == 1 { t[2] } else { 1.0 - t[2] });
            *slot = (self.index(base[0] + dx, base[1] + dy, base[2] + dz), w);
        }
        out
    }

    fn sample(&self, field: &[f64], p: &Point3<f64>) -> f64 {
        self.trilinear(p)
            .iter()
            .map(|&(idx, w)| field[idx] * w)
            .sum()
    }
}

/// Reconstruct a closed surface from an oriented cloud.
///
/// # Errors
/// - `InvalidParameter` for out-of-range parameters
/// - `ReconstructionFailed` when the cloud has no normals, is empty or
///   degenerate, or the level set is empty
pub fn poisson_reconstruct(cloud: &PointCloud, params: &PoissonParams) -> HoldResult<PoissonOutput> {
    params.validate()?;
    let normals = cloud.normals.as_ref().ok_or_else(|| {
        HoldError::reconstruction_failed("Poisson reconstruction needs point normals")
    })?;
    let (min, max) = cloud
        .bounds()
        .ok_or_else(|| HoldError::reconstruction_failed("cloud is empty"))?;

    let extent = max - min;
    let size = extent.x.max(extent.y).max(extent.z);
    if size <= f64::EPSILON {
        return Err(HoldError::reconstruction_failed(
            "cloud has no spatial extent",
        ));
    }

    let n = 1usize << params.depth;
    let side = size * (1.0 + 2.0 * params.padding);
    let center = Point3::from((min.coords + max.coords) * 0.5);
    let grid = Grid {
        n,
        origin: center - Vector3::repeat(side * 0.5),
        h: side / (n - 1) as f64,
    };
    info!(
        points = cloud.len(),
        grid = n,
        cell = format!("{:.5}", grid.h),
        "Poisson reconstruction"
    );

    // Splat normals and sample counts
    let len = grid.len();
    let mut field = [vec![0.0; len], vec![0.0; len], vec![0.0; len]];
    let mut density = vec![0.0; len];
    for (p, normal) in cloud.points.iter().zip(normals) {
        for (idx, w) in grid.trilinear(p) {
            field[0][idx] += normal.x * w;
            field[1][idx] += normal.y * w;
            field[2][idx] += normal.z * w;
            density[idx] += w;
        }
    }

    for _ in 0..params.smoothing_passes {
        for f in field.iter_mut().chain(std::iter::once(&mut density)) {
            for axis in 0..3 {
                *f = blur_axis(f, &grid, axis);
            }
        }
    }

    let rhs = divergence_rhs(&field, &grid);
    let solve = conjugate_gradient(&rhs, &grid, params.max_iterations, params.tolerance)?;
    if solve.residual > params.tolerance {
        debug!(
            iterations = solve.iterations,
            residual = solve.residual,
            "Solver stopped at the iteration cap"
        );
    }

    let chi = solve.solution;
    let iso_level = cloud.points.iter().map(|p| grid.sample(&chi, p)).sum::<f64>()
        / cloud.len() as f64;

    let mut mesh = extract_level_set(&chi, iso_level, &grid)?;
    if mesh.signed_volume() < 0.0 {
        mesh.flip_faces();
    }
    let densities: Vec<f64> = mesh
        .vertices
        .iter()
        .map(|v| grid.sample(&density, &v.position))
        .collect();

    debug!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        iterations = solve.iterations,
        "Extracted Poisson surface"
    );

    Ok(PoissonOutput {
        mesh,
        densities,
        iso_level,
        grid_size: n,
        iterations: solve.iterations,
        residual: solve.residual,
    })
}

/// One [1, 2, 1] / 4 pass along `axis`, replicating edge values.
fn blur_axis(f: &[f64], grid: &Grid, axis: usize) -> Vec<f64> {
    let stride = match axis {
        0 => 1,
        1 => grid.n,
        _ => grid.n * grid.n,
    };
    (0..f.len())
        .into_par_iter()
        .map(|idx| {
            let (i, j, k) = grid.coords(idx);
            let pos = [i, j, k][axis];
            let prev = if pos > 0 { idx - stride } else { idx };
            let next = if pos + 1 < grid.n { idx + stride } else { idx };
            (f[prev] + 2.0 * f[idx] + f[next]) * 0.25
        })
        .collect()
}

/// Right-hand side `-h^2 div(V)` of the scaled system, zero on the boundary.
fn divergence_rhs(field: &[Vec<f64>; 3], grid: &Grid) -> Vec<f64> {
    let n = grid.n;
    let strides = [1, n, n * n];
    (0..grid.len())
        .into_par_iter()
        .map(|idx| {
            if grid.is_boundary(idx) {
                return 0.0;
            }
            let div: f64 = (0..3)
                .map(|axis| {
                    let s = strides[axis];
                    (field[axis][idx + s] - field[axis][idx - s]) / (2.0 * grid.h)
                })
                .sum();
            -div * grid.h * grid.h
        })
        .collect()
}

/// `A x` for the 7-point negative Laplacian (scaled by h^2) on interior
/// nodes; boundary nodes are pinned at zero.
fn apply_laplacian(x: &[f64], grid: &Grid) -> Vec<f64> {
    let n = grid.n;
    let strides = [1, n, n * n];
    (0..x.len())
        .into_par_iter()
        .map(|idx| {
            if grid.is_boundary(idx) {
                return 0.0;
            }
            let neighbors: f64 = strides.iter().map(|&s| x[idx - s] + x[idx + s]).sum();
            6.0 * x[idx] - neighbors
        })
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y).sum()
}

struct Solve {
    solution: Vec<f64>,
    iterations: usize,
    residual: f64,
}

fn conjugate_gradient(b: &[f64], grid: &Grid, max_iterations: usize, tolerance: f64) -> HoldResult<Solve> {
    let b_norm = dot(b, b).sqrt();
    if b_norm <= f64::EPSILON {
        return Err(HoldError::reconstruction_failed(
            "normals cancel out, the indicator field is flat",
        ));
    }

    let mut x = vec![0.0; b.len()];
    let mut r = b.to_vec();
    let mut p = r.clone();
    let mut rs = dot(&r, &r);
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;
        let ap = apply_laplacian(&p, grid);
        let p_ap = dot(&p, &ap);
        if p_ap <= 0.0 || !p_ap.is_finite() {
            warn!(iterations, "Conjugate gradient lost positive curvature");
            break;
        }
        let alpha = rs / p_ap;
        x.par_iter_mut()
            .zip(p.par_iter())
            .for_each(|(xi, pi)| *xi += alpha * pi);
        r.par_iter_mut()
            .zip(ap.par_iter())
            .for_each(|(ri, api)| *ri -= alpha * api);

        let rs_new = dot(&r, &r);
        if rs_new.sqrt() <= tolerance * b_norm {
            rs = rs_new;
            break;
        }
        let beta = rs_new / rs;
        p.par_iter_mut()
            .zip(r.par_iter())
            .for_each(|(pi, ri)| *pi = ri + beta * *pi);
        rs = rs_new;
    }

    Ok(Solve {
        solution: x,
        iterations,
        residual: rs.sqrt() / b_norm,
    })
}

/// Surface nets over `chi - iso`, negative inside.
fn extract_level_set(chi: &[f64], iso: f64, grid: &Grid) -> HoldResult<Mesh> {
    use fast_surface_nets::{SurfaceNetsBuffer, ndshape::RuntimeShape, surface_nets};

    let n = grid.n;
    let padded = n + 2;
    let mut values = vec![1.0f32; padded * padded * padded];
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let dst = (i + 1) + padded * ((j + 1) + padded * (k + 1));
                values[dst] = (chi[grid.index(i, j, k)] - iso) as f32;
            }
        }
    }

    let shape = RuntimeShape::<u32, 3>::new([padded as u32; 3]);
    let mut buffer = SurfaceNetsBuffer::default();
    surface_nets(
        &values,
        &shape,
        [0, 0, 0],
        [padded as u32 - 1; 3],
        &mut buffer,
    );

    if buffer.positions.is_empty() {
        return Err(HoldError::reconstruction_failed(
            "indicator level set is empty",
        ));
    }

    let mut mesh = Mesh::with_capacity(buffer.positions.len(), buffer.indices.len() / 3);
    for pos in &buffer.positions {
        mesh.vertices.push(Vertex::new(Point3::new(
            grid.origin.x + (pos[0] as f64 - 1.0) * grid.h,
            grid.origin.y + (pos[1] as f64 - 1.0) * grid.h,
            grid.origin.z + (pos[2] as f64 - 1.0) * grid.h,
        )));
    }
    for chunk in buffer.indices.chunks(3) {
        if chunk.len() == 3 {
            mesh.faces.push([chunk[0], chunk[1], chunk[2]]);
        }
    }
    Ok(mesh)
}
