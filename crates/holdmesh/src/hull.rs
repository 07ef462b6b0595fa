//! Convex hulls: 2D footprints for the clipper and 3D hulls for the refiner.

use nalgebra::Point2;
use tracing::debug;

use crate::error::{HoldError, HoldResult};
use crate::types::{Mesh, Vertex};

/// A convex polygon with counter-clockwise vertices and no collinear runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvexPolygon {
    vertices: Vec<Point2<f64>>,
}

impl ConvexPolygon {
    /// Hull vertices in counter-clockwise order.
    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    /// Strict interior test: `q` lies on the inner side of every edge.
    ///
    /// Points on the boundary are outside.
    pub fn contains_strict(&self, q: &Point2<f64>) -> bool {
        let n = self.vertices.len();
        (0..n).all(|i| cross(&self.vertices[i], &self.vertices[(i + 1) % n], q) > 0.0)
    }

    /// Axis-aligned bounding box as (min, max).
    pub fn bounding_box(&self) -> (Point2<f64>, Point2<f64>) {
        let mut min = self.vertices[0];
        let mut max = self.vertices[0];
        for v in &self.vertices[1..] {
            min = min.inf(v);
            max = max.sup(v);
        }
        (min, max)
    }

    /// Enclosed area (shoelace formula).
    pub fn area(&self) -> f64 {
        let n = self.vertices.len();
        let twice: f64 = (0..n)
            .map(|i| {
                let a = self.vertices[i];
                let b = self.vertices[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum();
        twice * 0.5
    }
}

#[inline]
fn cross(o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull of a 2D point set (Andrew's monotone chain).
///
/// # Errors
/// Returns a `Geometry` error for fewer than three points or when all
/// points are collinear, since the footprint then has no interior.
pub fn convex_hull_2d(points: &[Point2<f64>]) -> HoldResult<ConvexPolygon> {
    if points.len() < 3 {
        return Err(HoldError::geometry(
            "convex hull",
            format!("need at least 3 points, got {}", points.len()),
        ));
    }

    let mut sorted: Vec<Point2<f64>> = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();

    let mut lower: Vec<Point2<f64>> = Vec::with_capacity(sorted.len());
    for p in &sorted {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0
        {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point2<f64>> = Vec::with_capacity(sorted.len());
    for p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0
        {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);

    if lower.len() < 3 {
        return Err(HoldError::geometry(
            "convex hull",
            format!("{} points are collinear", points.len()),
        ));
    }

    Ok(ConvexPolygon { vertices: lower })
}

/// Closed convex hull of a mesh's vertices, with outward winding.
///
/// # Errors
/// Returns `EmptyMesh` for fewer than four vertices and `Geometry` when the
/// vertices are coplanar or the hull computation fails.
pub fn convex_hull_mesh(mesh: &Mesh) -> HoldResult<Mesh> {
    if mesh.vertices.len() < 4 {
        return Err(HoldError::empty_mesh(format!(
            "convex hull needs at least 4 vertices, got {}",
            mesh.vertices.len()
        )));
    }

    let points: Vec<parry3d::math::Point<f32>> = mesh
        .vertices
        .iter()
        .map(|v| {
            parry3d::math::Point::new(
                v.position.x as f32,
                v.position.y as f32,
                v.position.z as f32,
            )
        })
        .collect();

    let (hull_points, hull_faces) = parry3d::transformation::try_convex_hull(&points)
        .map_err(|e| HoldError::geometry("convex hull", format!("{e:?}")))?;

    let mut hull = Mesh::with_capacity(hull_points.len(), hull_faces.len());
    for p in &hull_points {
        hull.vertices
            .push(Vertex::from_coords(p.x as f64, p.y as f64, p.z as f64));
    }
    hull.faces.extend(hull_faces.iter().copied());

    if hull.faces.len() < 4 {
        return Err(HoldError::geometry(
            "convex hull",
            "input vertices are coplanar",
        ));
    }
    if hull.signed_volume() < 0.0 {
        hull.flip_faces();
    }

    debug!(
        vertices = hull.vertex_count(),
        faces = hull.face_count(),
        "Computed convex hull"
    );
    Ok(hull)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square_with_interior() -> Vec<Point2<f64>> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.5, 0.5),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
            Point2::new(0.5, 0.0),
        ]
    }

    #[test]
    fn test_hull_drops_interior_and_collinear() {
        let hull = convex_hull_2d(&square_with_interior()).unwrap();
        assert_eq!(hull.vertices().len(), 4);
        assert_relative_eq!(hull.area(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_contains_strict_excludes_boundary() {
        let hull = convex_hull_2d(&square_with_interior()).unwrap();
        assert!(hull.contains_strict(&Point2::new(0.5, 0.5)));
        assert!(!hull.contains_strict(&Point2::new(0.0, 0.5)));
        assert!(!hull.contains_strict(&Point2::new(1.5, 0.5)));
    }

    #[test]
    fn test_too_few_points() {
        let points = [Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)];
        assert!(matches!(
            convex_hull_2d(&points),
            Err(HoldError::Geometry { .. })
        ));
    }

    #[test]
    fn test_collinear_points() {
        let points: Vec<_> = (0..5).map(|i| Point2::new(i as f64, i as f64)).collect();
        assert!(matches!(
            convex_hull_2d(&points),
            Err(HoldError::Geometry { .. })
        ));
    }

    #[test]
    fn test_bounding_box() {
        let hull = convex_hull_2d(&square_with_interior()).unwrap();
        let (min, max) = hull.bounding_box();
        assert_eq!(min, Point2::new(0.0, 0.0));
        assert_eq!(max, Point2::new(1.0, 1.0));
    }

    #[test]
    fn test_mesh_hull_of_cube_corners() {
        let mut mesh = Mesh::new();
        for i in 0..8 {
            mesh.vertices.push(Vertex::from_coords(
                (i & 1) as f64,
                ((i >> 1) & 1) as f64,
                ((i >> 2) & 1) as f64,
            ));
        }
        // Interior point must not appear in the hull
        mesh.vertices.push(Vertex::from_coords(0.5, 0.5, 0.5));
        let hull = convex_hull_mesh(&mesh).unwrap();
        assert!(hull.validate_indices().is_ok());
        assert_relative_eq!(hull.signed_volume(), 1.0, epsilon = 1e-5);
    }
}
