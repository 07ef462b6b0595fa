//! Spatial segmentation of a wall scan into per-hold clusters.
//!
//! Each point is assigned to its nearest anchor: a single assignment step of
//! centroid clustering with the centers pinned to the lattice, which is the
//! Voronoi partition of the cloud by the anchors. Every point lands in
//! exactly one segment.

use nalgebra::Point3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::in_pool;
use crate::error::{HoldError, HoldResult};
use crate::lattice::AnchorLattice;
use crate::pointcloud::PointCloud;
use crate::spatial::SpatialIndex;
use crate::tracing_ext::OperationTimer;

/// Candidates re-ranked per point. A rectangular lattice has at most four
/// anchors equidistant from any point.
const TIE_CANDIDATES: usize = 4;

/// Segmenter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterParams {
    /// Worker threads for the assignment step. None uses the global pool.
    pub threads: Option<usize>,
}

impl SegmenterParams {
    /// Run the assignment on `threads` workers.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}

/// A named subset of the source cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Board name of the anchor.
    pub name: String,
    /// Lattice index of the anchor.
    pub anchor: usize,
    /// Indices into the source cloud, ascending.
    pub indices: Vec<usize>,
}

impl Segment {
    /// Number of points in the segment.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Copy the segment's points and colors out of `cloud`.
    pub fn materialize(&self, cloud: &PointCloud) -> PointCloud {
        cloud.select(&self.indices)
    }
}

/// Result of segmenting a cloud.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Nearest-anchor label of every source point.
    pub labels: Vec<usize>,
    /// Non-empty segments in lattice order.
    pub segments: Vec<Segment>,
    /// Names of anchors that received no points.
    pub empty: Vec<String>,
}

impl Segmentation {
    /// Segment called `name`, if it received any points.
    pub fn get(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    /// Materialize every non-empty segment as a named cloud.
    pub fn materialize_all(&self, cloud: &PointCloud) -> Vec<(String, PointCloud)> {
        self.segments
            .iter()
            .map(|s| (s.name.clone(), s.materialize(cloud)))
            .collect()
    }
}

/// Nearest-anchor segmenter.
#[derive(Debug, Clone, Default)]
pub struct SpatialSegmenter {
    params: SegmenterParams,
}

impl SpatialSegmenter {
    pub fn new(params: SegmenterParams) -> Self {
        Self { params }
    }

    /// Partition `cloud` by nearest anchor of `lattice`.
    ///
    /// Anchors that attract no points are reported in
    /// [`Segmentation::empty`] and logged; they are not an error.
    ///
    /// # Errors
    /// Returns `EmptyCloud` for an empty cloud and `InvalidParameter` for
    /// an empty lattice or an unusable thread count.
    pub fn segment(&self, cloud: &PointCloud, lattice: &AnchorLattice) -> HoldResult<Segmentation> {
        let _timer = OperationTimer::new("segment");

        if cloud.is_empty() {
            return Err(HoldError::empty_cloud("cannot segment an empty scan"));
        }
        if lattice.is_empty() {
            return Err(HoldError::invalid_parameter(
                "lattice",
                "lattice has no anchors",
            ));
        }

        let index = SpatialIndex::build(lattice.points());
        let labels: Vec<usize> = in_pool(self.params.threads, || {
            cloud
                .points
                .par_iter()
                .map(|p| nearest_anchor(&index, lattice.points(), p))
                .collect()
        })?;

        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); lattice.len()];
        for (i, &label) in labels.iter().enumerate() {
            buckets[label].push(i);
        }

        let mut segments = Vec::with_capacity(lattice.len());
        let mut empty = Vec::new();
        for (anchor, (indices, name)) in buckets.into_iter().zip(lattice.names()).enumerate() {
            if indices.is_empty() {
                warn!(cluster = %name, "Anchor received no points, skipping");
                empty.push(name.clone());
            } else {
                segments.push(Segment {
                    name: name.clone(),
                    anchor,
                    indices,
                });
            }
        }

        info!(
            points = cloud.len(),
            anchors = lattice.len(),
            segments = segments.len(),
            empty = empty.len(),
            "Segmented scan"
        );

        Ok(Segmentation {
            labels,
            segments,
            empty,
        })
    }
}

/// Index of the anchor closest to `p`, lowest index on exact ties.
///
/// Distances are recomputed in the scan frame, since the tree stores
/// rotated coordinates whose rounding can split an exact tie.
fn nearest_anchor(index: &SpatialIndex, anchors: &[Point3<f64>], p: &Point3<f64>) -> usize {
    index
        .nearest_k(p, TIE_CANDIDATES)
        .into_iter()
        .map(|n| ((anchors[n.index] - p).norm_squared(), n.index))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map_or(0, |(_, i)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::generate_lattice;
    use crate::types::Rgb;
    use nalgebra::Point3;

    fn unit_lattice() -> AnchorLattice {
        generate_lattice(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            2,
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_equidistant_points_take_lowest_anchor() {
        // Column-major: 0 = (0,0), 1 = (0,1), 2 = (1,0), 3 = (1,1).
        let lattice = unit_lattice();
        let cloud = PointCloud::new(vec![
            Point3::new(1.0, 0.5, 0.0),
            Point3::new(0.0, 0.5, 0.0),
            Point3::new(0.5, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 0.0),
            Point3::new(0.5, 0.5, 0.3),
        ]);
        let seg = SpatialSegmenter::default().segment(&cloud, &lattice).unwrap();
        assert_eq!(seg.labels, vec![2, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_corner_points_get_own_anchor() {
        let lattice = unit_lattice();
        let cloud = PointCloud::new(vec![
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ]);
        let seg = SpatialSegmenter::default().segment(&cloud, &lattice).unwrap();
        assert_eq!(seg.labels, vec![3, 0, 1, 2]);
        assert_eq!(seg.segments.len(), 4);
        assert_eq!(seg.get("A1").unwrap().indices, vec![0]);
        assert_eq!(seg.get("B2").unwrap().indices, vec![1]);
        assert!(seg.empty.is_empty());
    }

    #[test]
    fn test_empty_anchor_reported() {
        let lattice = unit_lattice();
        let cloud = PointCloud::new(vec![Point3::new(0.1, 0.1, 0.0), Point3::new(0.0, 0.2, 0.0)]);
        let seg = SpatialSegmenter::new(SegmenterParams::default().with_threads(2))
            .segment(&cloud, &lattice)
            .unwrap();
        assert_eq!(seg.segments.len(), 1);
        assert_eq!(seg.segments[0].name, "B2");
        assert_eq!(seg.empty, vec!["B1", "A2", "A1"]);
    }

    #[test]
    fn test_materialize_carries_colors() {
        let lattice = unit_lattice();
        let cloud = PointCloud::with_colors(
            vec![Point3::new(0.9, 0.9, 0.0), Point3::new(0.1, 0.0, 0.0)],
            vec![Rgb::new(1.0, 0.0, 0.0), Rgb::new(0.0, 0.0, 1.0)],
        )
        .unwrap();
        let seg = SpatialSegmenter::default().segment(&cloud, &lattice).unwrap();
        let clouds = seg.materialize_all(&cloud);
        assert_eq!(clouds.len(), 2);
        let (name, a1) = &clouds[1];
        assert_eq!(name, "A1");
        assert_eq!(a1.color(0), Some(Rgb::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_empty_cloud_rejected() {
        let result = SpatialSegmenter::default().segment(&PointCloud::default(), &unit_lattice());
        assert!(matches!(result, Err(HoldError::EmptyCloud { .. })));
    }
}
