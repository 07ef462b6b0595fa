//! Cloud conditioning: normal estimation, orientation and outlier removal.
//!
//! Surface reconstruction needs oriented normals. This stage estimates them
//! from local neighbourhoods, makes their signs agree across the cluster and
//! strips statistically isolated points.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::{Matrix3, Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::{BatchReport, run_batch};
use crate::error::{HoldError, HoldResult};
use crate::pointcloud::PointCloud;
use crate::spatial::SpatialIndex;
use crate::tracing_ext::{OperationTimer, log_cloud_stats};

/// Parameters for [`condition_cloud`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionParams {
    /// Search radius for normal estimation.
    pub normal_radius: f64,

    /// Maximum neighbours used for normal estimation.
    pub max_neighbors: usize,

    /// Neighbours per point in the orientation graph.
    pub orientation_neighbors: usize,

    /// Neighbours used for the outlier statistics.
    pub outlier_neighbors: usize,

    /// Points whose mean neighbour distance exceeds the cloud mean by more
    /// than this many standard deviations are removed.
    pub outlier_std_ratio: f64,

    /// Smallest cluster that can be conditioned.
    pub min_points: usize,
}

impl Default for ConditionParams {
    fn default() -> Self {
        Self {
            normal_radius: 0.1,
            max_neighbors: 30,
            orientation_neighbors: 100,
            outlier_neighbors: 20,
            outlier_std_ratio: 2.0,
            min_points: 3,
        }
    }
}

impl ConditionParams {
    /// Tighter neighbourhoods for small, dense clusters.
    pub fn dense() -> Self {
        Self {
            normal_radius: 0.02,
            max_neighbors: 20,
            orientation_neighbors: 30,
            ..Default::default()
        }
    }

    pub fn with_normal_radius(mut self, radius: f64) -> Self {
        self.normal_radius = radius;
        self
    }

    pub fn with_max_neighbors(mut self, max: usize) -> Self {
        self.max_neighbors = max;
        self
    }

    pub fn with_orientation_neighbors(mut self, k: usize) -> Self {
        self.orientation_neighbors = k;
        self
    }

    pub fn with_outlier_filter(mut self, neighbors: usize, std_ratio: f64) -> Self {
        self.outlier_neighbors = neighbors;
        self.outlier_std_ratio = std_ratio;
        self
    }
}

/// A conditioned cluster.
#[derive(Debug, Clone)]
pub struct ConditionedCloud {
    /// Cloud with oriented normals attached.
    pub cloud: PointCloud,
    /// Points removed as outliers.
    pub outliers_removed: usize,
    /// Points whose neighbourhood was too small for a fitted normal.
    pub fallback_normals: usize,
}

/// Estimate oriented normals and remove outliers from one cluster.
///
/// # Errors
/// Returns a `Geometry` error if the cluster has fewer than
/// `params.min_points` points before or after outlier removal.
pub fn condition_cloud(cloud: &PointCloud, params: &ConditionParams) -> HoldResult<ConditionedCloud> {
    let _timer = OperationTimer::new("condition");
    let min_points = params.min_points.max(3);
    if cloud.len() < min_points {
        return Err(HoldError::geometry(
            "normal estimation",
            format!("need at least {} points, got {}", min_points, cloud.len()),
        ));
    }

    let (mut normals, fallback_normals) =
        estimate_normals(&cloud.points, params.normal_radius, params.max_neighbors);
    if fallback_normals > 0 {
        warn!(
            points = fallback_normals,
            "Neighbourhoods too small for a normal fit, using a default direction"
        );
    }
    orient_normals_consistent(&cloud.points, &mut normals, params.orientation_neighbors);

    let mut conditioned = cloud.clone();
    conditioned.set_normals(normals)?;

    let keep = statistical_inlier_mask(
        &conditioned.points,
        params.outlier_neighbors,
        params.outlier_std_ratio,
    );
    let conditioned = conditioned.select_by_mask(&keep);
    let outliers_removed = cloud.len() - conditioned.len();

    if conditioned.len() < min_points {
        return Err(HoldError::geometry(
            "outlier removal",
            format!("only {} points survive", conditioned.len()),
        ));
    }

    debug!(
        points = conditioned.len(),
        outliers_removed,
        "Conditioned cluster"
    );
    log_cloud_stats(&conditioned, "conditioned");

    Ok(ConditionedCloud {
        cloud: conditioned,
        outliers_removed,
        fallback_normals,
    })
}

/// Condition every named cluster, isolating failures.
pub fn condition_batch(
    clouds: Vec<(String, PointCloud)>,
    params: &ConditionParams,
) -> BatchReport<ConditionedCloud> {
    run_batch("condition", clouds, |_, cloud| condition_cloud(&cloud, params))
}

/// PCA normals over hybrid neighbourhoods (at most `max_nn` points within
/// `radius`).
///
/// Points with fewer than three neighbours get +Z. Returns the normals and
/// the number of such fallbacks.
pub fn estimate_normals(
    points: &[Point3<f64>],
    radius: f64,
    max_nn: usize,
) -> (Vec<Vector3<f64>>, usize) {
    let index = SpatialIndex::build(points);
    let normals: Vec<Option<Vector3<f64>>> = points
        .par_iter()
        .map(|p| {
            let neighbors = index.hybrid(p, radius, max_nn);
            if neighbors.len() < 3 {
                return None;
            }
            let n = neighbors.len() as f64;
            let centroid = neighbors
                .iter()
                .fold(Vector3::zeros(), |acc, nb| acc + points[nb.index].coords)
                / n;
            let mut cov = Matrix3::zeros();
            for nb in &neighbors {
                let d = points[nb.index].coords - centroid;
                cov += d * d.transpose();
            }
            let eigen = cov.symmetric_eigen();
            let mut min_idx = 0;
            for i in 1..3 {
                if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
                    min_idx = i;
                }
            }
            eigen
                .eigenvectors
                .column(min_idx)
                .into_owned()
                .try_normalize(1e-12)
        })
        .collect();

    let fallbacks = normals.iter().filter(|n| n.is_none()).count();
    let normals = normals
        .into_iter()
        .map(|n| n.unwrap_or_else(Vector3::z))
        .collect();
    (normals, fallbacks)
}

/// Edge of the orientation graph, ordered for a min-heap on weight.
#[derive(Debug, Clone, Copy)]
struct OrientationEdge {
    weight: f64,
    from: usize,
    to: usize,
}

impl PartialEq for OrientationEdge {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrientationEdge {}

impl PartialOrd for OrientationEdge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrientationEdge {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the lightest edge pops first
        other.weight.total_cmp(&self.weight)
    }
}

/// Make normal signs agree by propagation along a minimum spanning tree.
///
/// The graph joins every point to its `k` nearest neighbours with weight
/// `1 - |n_i . n_j|`, so the tree prefers edges between near-parallel
/// normals. Each connected component is rooted at its point farthest from
/// the cloud centroid, whose normal is turned outward, and every child is
/// flipped to agree with its parent.
pub fn orient_normals_consistent(points: &[Point3<f64>], normals: &mut [Vector3<f64>], k: usize) {
    let n = points.len();
    if n == 0 {
        return;
    }
    debug_assert_eq!(normals.len(), n);

    let index = SpatialIndex::build(points);
    let knn: Vec<Vec<usize>> = points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            index
                .nearest_k(p, k + 1)
                .into_iter()
                .map(|nb| nb.index)
                .filter(|&j| j != i)
                .collect()
        })
        .collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, neighbors) in knn.iter().enumerate() {
        for &j in neighbors {
            adjacency[i].push(j);
            adjacency[j].push(i);
        }
    }

    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n as f64;
    let mut roots: Vec<usize> = (0..n).collect();
    roots.sort_by(|&a, &b| {
        let da = (points[a].coords - centroid).norm_squared();
        let db = (points[b].coords - centroid).norm_squared();
        db.total_cmp(&da)
    });

    let mut visited = vec![false; n];
    let mut heap = BinaryHeap::new();
    let mut components = 0;

    for root in roots {
        if visited[root] {
            continue;
        }
        components += 1;
        if normals[root].dot(&(points[root].coords - centroid)) < 0.0 {
            normals[root] = -normals[root];
        }
        visited[root] = true;
        push_edges(root, &adjacency, normals, &visited, &mut heap);

        while let Some(edge) = heap.pop() {
            if visited[edge.to] {
                continue;
            }
            visited[edge.to] = true;
            if normals[edge.from].dot(&normals[edge.to]) < 0.0 {
                normals[edge.to] = -normals[edge.to];
            }
            push_edges(edge.to, &adjacency, normals, &visited, &mut heap);
        }
    }

    debug!(points = n, components, "Oriented normals");
}

fn push_edges(
    from: usize,
    adjacency: &[Vec<usize>],
    normals: &[Vector3<f64>],
    visited: &[bool],
    heap: &mut BinaryHeap<OrientationEdge>,
) {
    for &to in &adjacency[from] {
        if !visited[to] {
            heap.push(OrientationEdge {
                weight: 1.0 - normals[from].dot(&normals[to]).abs(),
                from,
                to,
            });
        }
    }
}

/// Inlier mask for statistical outlier removal.
///
/// For each point the mean distance to its `k` nearest points (itself
/// included) is compared with the cloud-wide mean of these values; points
/// above `mean + std_ratio * std` are outliers. Clouds with fewer than two
/// points, or `k == 0`, keep everything.
pub fn statistical_inlier_mask(points: &[Point3<f64>], k: usize, std_ratio: f64) -> Vec<bool> {
    let n = points.len();
    if n < 2 || k == 0 {
        return vec![true; n];
    }

    let index = SpatialIndex::build(points);
    let mean_distances: Vec<f64> = points
        .par_iter()
        .map(|p| {
            let neighbors = index.nearest_k(p, k);
            neighbors.iter().map(|nb| nb.distance_sq.sqrt()).sum::<f64>()
                / neighbors.len().max(1) as f64
        })
        .collect();

    let mean = mean_distances.iter().sum::<f64>() / n as f64;
    let variance = mean_distances
        .iter()
        .map(|d| (d - mean).powi(2))
        .sum::<f64>()
        / (n - 1) as f64;
    let threshold = mean + std_ratio * variance.sqrt();

    mean_distances.iter().map(|&d| d <= threshold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sphere(n_lat: usize, n_lon: usize, radius: f64) -> Vec<Point3<f64>> {
        let mut points = Vec::new();
        for i in 1..n_lat {
            let theta = std::f64::consts::PI * i as f64 / n_lat as f64;
            for j in 0..n_lon {
                let phi = 2.0 * std::f64::consts::PI * j as f64 / n_lon as f64;
                points.push(Point3::new(
                    radius * theta.sin() * phi.cos(),
                    radius * theta.sin() * phi.sin(),
                    radius * theta.cos(),
                ));
            }
        }
        points
    }

    fn plane_grid(n: usize, spacing: f64) -> Vec<Point3<f64>> {
        (0..n)
            .flat_map(|i| (0..n).map(move |j| Point3::new(i as f64 * spacing, j as f64 * spacing, 0.0)))
            .collect()
    }

    #[test]
    fn test_planar_normals() {
        let points = plane_grid(10, 0.01);
        let (normals, fallbacks) = estimate_normals(&points, 0.05, 30);
        assert_eq!(fallbacks, 0);
        for n in &normals {
            assert_relative_eq!(n.z.abs(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_isolated_points_fall_back() {
        let points = vec![Point3::origin(), Point3::new(10.0, 0.0, 0.0)];
        let (normals, fallbacks) = estimate_normals(&points, 0.1, 30);
        assert_eq!(fallbacks, 2);
        assert_eq!(normals[0], Vector3::z());
    }

    #[test]
    fn test_sphere_normals_point_outward() {
        let points = sphere(16, 24, 1.0);
        let (mut normals, _) = estimate_normals(&points, 0.5, 20);
        orient_normals_consistent(&points, &mut normals, 10);
        for (p, n) in points.iter().zip(&normals) {
            assert!(n.dot(&p.coords) > 0.0, "normal at {p:?} points inward");
        }
    }

    #[test]
    fn test_outlier_removed() {
        let mut points = plane_grid(10, 0.01);
        points.push(Point3::new(0.05, 0.05, 1.0));
        let mask = statistical_inlier_mask(&points, 8, 2.0);
        assert!(!mask[points.len() - 1]);
        assert!(mask[..points.len() - 1].iter().all(|&k| k));
    }

    #[test]
    fn test_condition_cloud_attaches_normals() {
        let cloud = PointCloud::new(sphere(12, 16, 0.2));
        let result = condition_cloud(&cloud, &ConditionParams::default()).unwrap();
        assert!(result.cloud.has_normals());
        assert_eq!(
            result.cloud.normals.as_ref().map(Vec::len),
            Some(result.cloud.len())
        );
        assert_eq!(result.cloud.len() + result.outliers_removed, cloud.len());
    }

    #[test]
    fn test_tiny_cluster_fails() {
        let cloud = PointCloud::new(vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)]);
        assert!(matches!(
            condition_cloud(&cloud, &ConditionParams::default()),
            Err(HoldError::Geometry { .. })
        ));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let good = PointCloud::new(sphere(12, 16, 0.2));
        let bad = PointCloud::new(vec![Point3::origin()]);
        let report = condition_batch(
            vec![("A1".into(), good), ("B2".into(), bad)],
            &ConditionParams::default(),
        );
        assert_eq!(report.successes.len(), 1);
        assert_eq!(report.failures[0].name, "B2");
    }
}
