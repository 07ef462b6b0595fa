//! Clipping clusters against the wall plane.
//!
//! A scanned hold is open on the side facing the wall. The clipper drops the
//! points in front of the plane, then synthesizes a flat grid of backing
//! points inside the footprint of the remaining points so that surface
//! reconstruction can close the volume.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::{BatchReport, run_batch};
use crate::error::{HoldError, HoldResult};
use crate::hull::{ConvexPolygon, convex_hull_2d};
use crate::plane::Plane;
use crate::pointcloud::PointCloud;
use crate::types::Rgb;

/// Parameters for [`clip_to_plane`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipParams {
    /// Spacing of the backing grid, in scan units.
    pub grid_spacing: f64,

    /// Color given to synthesized backing points.
    pub fill_color: Rgb,

    /// Upper bound on grid samples over the footprint's bounding box.
    pub max_backing_points: usize,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            grid_spacing: 0.01,
            fill_color: Rgb::WHITE,
            max_backing_points: 1_000_000,
        }
    }
}

impl ClipParams {
    /// Denser backing for small holds.
    pub fn fine() -> Self {
        Self {
            grid_spacing: 0.005,
            ..Default::default()
        }
    }

    /// Coarser backing for quick previews.
    pub fn coarse() -> Self {
        Self {
            grid_spacing: 0.02,
            ..Default::default()
        }
    }

    pub fn with_grid_spacing(mut self, spacing: f64) -> Self {
        self.grid_spacing = spacing;
        self
    }

    pub fn with_fill_color(mut self, color: Rgb) -> Self {
        self.fill_color = color;
        self
    }

    pub fn with_max_backing_points(mut self, max: usize) -> Self {
        self.max_backing_points = max;
        self
    }
}

/// Output of [`clip_to_plane`].
#[derive(Debug, Clone)]
pub struct ClipResult {
    /// Kept original points followed by the backing points.
    pub cloud: PointCloud,
    /// Number of original points kept.
    pub kept: usize,
    /// Number of original points discarded.
    pub discarded: usize,
    /// Number of synthesized backing points.
    pub backing: usize,
    /// Footprint of the projected kept points in plane coordinates.
    pub hull: ConvexPolygon,
}

/// Indices of a cloud on each side of a plane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HalfSpaceSplit {
    /// Points with `signed_distance <= 0`, ascending.
    pub kept: Vec<usize>,
    /// Points with `signed_distance > 0`, ascending.
    pub discarded: Vec<usize>,
}

impl HalfSpaceSplit {
    pub fn new(cloud: &PointCloud, plane: &Plane) -> Self {
        let mut split = Self::default();
        for (i, p) in cloud.points.iter().enumerate() {
            if plane.signed_distance(p) <= 0.0 {
                split.kept.push(i);
            } else {
                split.discarded.push(i);
            }
        }
        split
    }
}

/// Clip `cloud` to the wall side of `plane` and add a backing face.
///
/// Points with a signed distance of at most zero are kept unchanged. The
/// kept points are projected onto the plane to build their convex
/// footprint, and every grid point strictly inside that footprint is
/// lifted onto the plane and appended. Backing points are colored only when
/// the input cloud is colored. Normals are not carried over.
///
/// # Errors
/// - `InvalidParameter` for a non-positive grid spacing or a grid larger
///   than `max_backing_points`
/// - `Geometry` when fewer than three points survive or their footprint is
///   degenerate
pub fn clip_to_plane(cloud: &PointCloud, plane: &Plane, params: &ClipParams) -> HoldResult<ClipResult> {
    if !(params.grid_spacing > 0.0 && params.grid_spacing.is_finite()) {
        return Err(HoldError::invalid_parameter(
            "grid_spacing",
            format!("must be a positive number, got {}", params.grid_spacing),
        ));
    }

    let split = HalfSpaceSplit::new(cloud, plane);
    let kept_cloud = cloud.select(&split.kept);
    let kept = split.kept.len();
    let discarded = split.discarded.len();

    if kept < 3 {
        return Err(HoldError::geometry(
            "plane clip",
            format!("only {kept} points remain behind the plane"),
        ));
    }

    let frame = plane.frame();
    let footprint: Vec<Point2<f64>> = kept_cloud
        .points
        .iter()
        .map(|p| frame.to_plane_coords(&plane.project(p)))
        .collect();
    let hull = convex_hull_2d(&footprint)?;

    let backing_uv = backing_grid(&hull, params)?;
    let backing = backing_uv.len();

    let mut points = kept_cloud.points;
    points.reserve(backing);
    points.extend(backing_uv.iter().map(|q| frame.lift(q)));

    let colors = kept_cloud.colors.map(|mut colors| {
        colors.resize(colors.len() + backing, params.fill_color);
        colors
    });

    debug!(kept, discarded, backing, "Clipped cluster to wall plane");

    Ok(ClipResult {
        cloud: PointCloud {
            points,
            colors,
            normals: None,
        },
        kept,
        discarded,
        backing,
        hull,
    })
}

/// Clip every named cluster against the same plane.
pub fn clip_batch(
    clouds: Vec<(String, PointCloud)>,
    plane: &Plane,
    params: &ClipParams,
) -> BatchReport<ClipResult> {
    run_batch("clip", clouds, |_, cloud| clip_to_plane(&cloud, plane, params))
}

/// Grid samples at `grid_spacing` over the hull's bounding box that lie
/// strictly inside the hull.
fn backing_grid(hull: &ConvexPolygon, params: &ClipParams) -> HoldResult<Vec<Point2<f64>>> {
    let (min, max) = hull.bounding_box();
    let step = params.grid_spacing;
    let nu = ((max.x - min.x) / step).floor() as usize + 1;
    let nv = ((max.y - min.y) / step).floor() as usize + 1;

    let samples = nu.saturating_mul(nv);
    if samples > params.max_backing_points {
        return Err(HoldError::invalid_parameter(
            "grid_spacing",
            format!(
                "spacing {} needs {} grid samples, limit is {}",
                step, samples, params.max_backing_points
            ),
        ));
    }

    let mut grid = Vec::new();
    for i in 0..nu {
        let x = min.x + i as f64 * step;
        for j in 0..nv {
            let q = Point2::new(x, min.y + j as f64 * step);
            if hull.contains_strict(&q) {
                grid.push(q);
            }
        }
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};

    fn wall() -> Plane {
        Plane::new(Point3::origin(), Vector3::z()).unwrap()
    }

    fn dome_cloud() -> PointCloud {
        let mut points = Vec::new();
        let mut colors = Vec::new();
        for i in 0..=10 {
            for j in 0..=10 {
                let x = i as f64 * 0.01;
                let y = j as f64 * 0.01;
                points.push(Point3::new(x, y, -0.02 - 0.01 * (x + y)));
                colors.push(Rgb::new(0.2, 0.4, 0.6));
            }
        }
        // In front of the wall
        points.push(Point3::new(0.05, 0.05, 0.03));
        colors.push(Rgb::new(1.0, 0.0, 0.0));
        PointCloud::with_colors(points, colors).unwrap()
    }

    #[test]
    fn test_square_scenario() {
        let cloud = PointCloud::new(vec![
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, -1.0),
            Point3::new(1.0, 1.0, 0.5),
            Point3::new(0.0, 1.0, -0.5),
        ]);
        let split = HalfSpaceSplit::new(&cloud, &wall());
        assert_eq!(split.kept, vec![1, 3]);
        assert_eq!(split.discarded, vec![0, 2]);

        // Two kept points cannot form a footprint
        let result = clip_to_plane(&cloud, &wall(), &ClipParams::default());
        assert!(matches!(result, Err(HoldError::Geometry { .. })));
    }

    #[test]
    fn test_half_space_and_backing_on_plane() {
        let cloud = dome_cloud();
        let plane = wall();
        let result = clip_to_plane(&cloud, &plane, &ClipParams::default().with_grid_spacing(0.02))
            .unwrap();
        assert_eq!(result.kept, 121);
        assert_eq!(result.discarded, 1);
        assert_eq!(result.cloud.len(), result.kept + result.backing);
        assert!(result.backing > 0);

        for p in &result.cloud.points[..result.kept] {
            assert!(plane.signed_distance(p) <= 0.0);
        }
        for p in &result.cloud.points[result.kept..] {
            assert_relative_eq!(plane.signed_distance(p), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_backing_points_are_white() {
        let result = clip_to_plane(&dome_cloud(), &wall(), &ClipParams::default()).unwrap();
        let colors = result.cloud.colors.as_ref().unwrap();
        assert_eq!(colors.len(), result.cloud.len());
        assert_eq!(colors[0], Rgb::new(0.2, 0.4, 0.6));
        assert!(colors[result.kept..].iter().all(|c| *c == Rgb::WHITE));
    }

    #[test]
    fn test_uncolored_cloud_stays_uncolored() {
        let cloud = PointCloud::new(dome_cloud().points);
        let result = clip_to_plane(&cloud, &wall(), &ClipParams::default()).unwrap();
        assert!(!result.cloud.has_colors());
    }

    #[test]
    fn test_grid_limit() {
        let params = ClipParams::default()
            .with_grid_spacing(1e-5)
            .with_max_backing_points(1000);
        let result = clip_to_plane(&dome_cloud(), &wall(), &params);
        assert!(matches!(
            result,
            Err(HoldError::InvalidParameter { name: "grid_spacing", .. })
        ));
    }

    #[test]
    fn test_non_positive_spacing() {
        let params = ClipParams::default().with_grid_spacing(0.0);
        assert!(clip_to_plane(&dome_cloud(), &wall(), &params).is_err());
    }
}
