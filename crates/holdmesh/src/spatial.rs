//! Nearest-neighbour search over point sets.
//!
//! Thin wrapper around a `kiddo` k-d tree. Points are stored in a fixed,
//! generically rotated frame: scans and synthesized backing grids often put
//! hundreds of points on one axis-aligned plane, and kiddo cannot split a
//! bucket whose points share a coordinate on the split axis. Rotation keeps
//! distances unchanged.

use kiddo::SquaredEuclidean;
use nalgebra::{Point3, Rotation3};

/// Bucket size large enough for duplicate-heavy scans.
type PointTree = kiddo::float::kdtree::KdTree<f64, u64, 3, 256, u32>;

/// A neighbour returned by a query: index into the indexed slice and
/// squared Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance_sq: f64,
}

/// Static k-d tree over a slice of points.
pub struct SpatialIndex {
    tree: PointTree,
    frame: Rotation3<f64>,
    len: usize,
}

impl SpatialIndex {
    /// Build an index over `points`. Query results refer to positions in this slice.
    pub fn build(points: &[Point3<f64>]) -> Self {
        Self::build_from_iter(points.iter().copied().enumerate())
    }

    /// Build an index over a subset of points, keeping their original indices.
    pub fn build_subset(points: &[Point3<f64>], indices: &[usize]) -> Self {
        Self::build_from_iter(indices.iter().map(|&i| (i, points[i])))
    }

    fn build_from_iter(items: impl Iterator<Item = (usize, Point3<f64>)>) -> Self {
        let frame = Rotation3::from_euler_angles(0.613, 0.421, 0.977);
        let mut tree = PointTree::new();
        let mut len = 0;
        for (index, p) in items {
            let q = frame * p;
            tree.add(&[q.x, q.y, q.z], index as u64);
            len += 1;
        }
        Self { tree, frame, len }
    }

    /// Number of indexed points.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the index holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn query(&self, p: &Point3<f64>) -> [f64; 3] {
        let q = self.frame * p;
        [q.x, q.y, q.z]
    }

    /// Single nearest neighbour.
    pub fn nearest(&self, p: &Point3<f64>) -> Option<Neighbor> {
        if self.is_empty() {
            return None;
        }
        let nn = self.tree.nearest_one::<SquaredEuclidean>(&self.query(p));
        Some(Neighbor {
            index: nn.item as usize,
            distance_sq: nn.distance,
        })
    }

    /// Up to `k` nearest neighbours, closest first.
    pub fn nearest_k(&self, p: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        if self.is_empty() || k == 0 {
            return Vec::new();
        }
        self.tree
            .nearest_n::<SquaredEuclidean>(&self.query(p), k.min(self.len))
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance_sq: nn.distance,
            })
            .collect()
    }

    /// All neighbours within `radius`, closest first.
    pub fn within_radius(&self, p: &Point3<f64>, radius: f64) -> Vec<Neighbor> {
        if self.is_empty() {
            return Vec::new();
        }
        self.tree
            .within::<SquaredEuclidean>(&self.query(p), radius * radius)
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance_sq: nn.distance,
            })
            .collect()
    }

    /// Hybrid search: at most `max_nn` nearest neighbours, all within `radius`.
    pub fn hybrid(&self, p: &Point3<f64>, radius: f64, max_nn: usize) -> Vec<Neighbor> {
        let r_sq = radius * radius;
        let mut found = self.nearest_k(p, max_nn);
        found.retain(|n| n.distance_sq <= r_sq);
        found
    }
}

/// Mean distance from each point to its nearest other point.
///
/// Returns None for fewer than two points.
pub fn average_nearest_distance(points: &[Point3<f64>]) -> Option<f64> {
    use rayon::prelude::*;

    if points.len() < 2 {
        return None;
    }
    let index = SpatialIndex::build(points);
    let total: f64 = points
        .par_iter()
        .map(|p| {
            index
                .nearest_k(p, 2)
                .get(1)
                .map(|n| n.distance_sq.sqrt())
                .unwrap_or(0.0)
        })
        .sum();
    Some(total / points.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn planar_grid(n: usize) -> Vec<Point3<f64>> {
        let mut points = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                points.push(Point3::new(i as f64 * 0.1, j as f64 * 0.1, 0.0));
            }
        }
        points
    }

    #[test]
    fn test_nearest_on_axis_aligned_plane() {
        // 900 points sharing z = 0 would overflow a plain bucket
        let points = planar_grid(30);
        let index = SpatialIndex::build(&points);
        assert_eq!(index.len(), 900);

        let nn = index.nearest(&Point3::new(1.01, 0.99, 0.05)).unwrap();
        assert_eq!(points[nn.index], Point3::new(1.0, 1.0, 0.0));
        assert_relative_eq!(
            nn.distance_sq,
            0.01f64.powi(2) * 2.0 + 0.05f64.powi(2),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_nearest_k_sorted() {
        let points = planar_grid(5);
        let index = SpatialIndex::build(&points);
        let found = index.nearest_k(&Point3::new(0.0, 0.0, 0.0), 3);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].index, 0);
        assert!(found[0].distance_sq <= found[1].distance_sq);
        assert!(found[1].distance_sq <= found[2].distance_sq);
    }

    #[test]
    fn test_hybrid_respects_radius() {
        let points = planar_grid(5);
        let index = SpatialIndex::build(&points);
        let found = index.hybrid(&Point3::new(0.0, 0.0, 0.0), 0.12, 30);
        // Self plus the two axis neighbours at 0.1
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_subset_keeps_original_indices() {
        let points = planar_grid(4);
        let index = SpatialIndex::build_subset(&points, &[3, 7, 12]);
        let nn = index.nearest(&points[12]).unwrap();
        assert_eq!(nn.index, 12);
        assert_relative_eq!(nn.distance_sq, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_average_nearest_distance() {
        let points = planar_grid(6);
        let avg = average_nearest_distance(&points).unwrap();
        assert_relative_eq!(avg, 0.1, epsilon = 1e-9);
        assert!(average_nearest_distance(&points[..1]).is_none());
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.nearest(&Point3::origin()).is_none());
        assert!(index.nearest_k(&Point3::origin(), 4).is_empty());
    }
}
