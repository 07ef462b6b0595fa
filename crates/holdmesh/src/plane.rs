//! Reference planes and in-plane coordinate frames.
//!
//! The wall plane is the reference every cluster is clipped against. Its
//! normal points away from the wall interior, so points with a non-positive
//! signed distance lie on the wall side.

use nalgebra::{Matrix3, Point2, Point3, Vector3};

use crate::error::{HoldError, HoldResult};
use crate::types::Mesh;

/// Threshold below which a cross product is treated as degenerate.
const DEGENERATE_CROSS: f64 = 1e-8;

/// An oriented plane: anchor point plus unit normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    anchor: Point3<f64>,
    normal: Vector3<f64>,
}

impl Plane {
    /// Create a plane, normalizing `normal`.
    ///
    /// # Errors
    /// Returns a `Geometry` error if the normal has (near) zero length or is not finite.
    pub fn new(anchor: Point3<f64>, normal: Vector3<f64>) -> HoldResult<Self> {
        let len = normal.norm();
        if !len.is_finite() || len < f64::EPSILON {
            return Err(HoldError::geometry(
                "plane",
                format!("normal {:?} has no direction", normal.as_slice()),
            ));
        }
        Ok(Self {
            anchor,
            normal: normal / len,
        })
    }

    /// Point on the plane.
    #[inline]
    pub fn anchor(&self) -> Point3<f64> {
        self.anchor
    }

    /// Unit normal.
    #[inline]
    pub fn normal(&self) -> Vector3<f64> {
        self.normal
    }

    /// Signed distance of `p`; positive on the side the normal points to.
    #[inline]
    pub fn signed_distance(&self, p: &Point3<f64>) -> f64 {
        (p - self.anchor).dot(&self.normal)
    }

    /// Orthogonal projection of `p` onto the plane.
    #[inline]
    pub fn project(&self, p: &Point3<f64>) -> Point3<f64> {
        p - self.normal * self.signed_distance(p)
    }

    /// Same plane with the opposite orientation.
    pub fn flipped(&self) -> Self {
        Self {
            anchor: self.anchor,
            normal: -self.normal,
        }
    }

    /// Derive the plane of a (roughly planar) wall mesh.
    ///
    /// The anchor is the area-weighted centroid of the faces and the normal
    /// is the normalized sum of area-weighted face normals, so the mesh's
    /// winding decides the orientation.
    ///
    /// # Errors
    /// Returns `EmptyMesh` for a mesh without faces and `Geometry` when the
    /// face normals cancel out.
    pub fn from_mesh(mesh: &Mesh) -> HoldResult<Self> {
        if mesh.is_empty() {
            return Err(HoldError::empty_mesh("wall mesh has no faces"));
        }
        mesh.validate_indices()?;

        let mut weighted_centroid = Vector3::zeros();
        let mut normal_sum = Vector3::zeros();
        let mut total_area = 0.0;
        for tri in mesh.triangles() {
            let area = tri.area();
            weighted_centroid += tri.centroid().coords * area;
            normal_sum += tri.normal_unnormalized();
            total_area += area;
        }
        if total_area <= f64::EPSILON {
            return Err(HoldError::geometry("plane", "wall mesh has zero area"));
        }

        Self::new(Point3::from(weighted_centroid / total_area), normal_sum)
    }

    /// Least-squares plane through `points`.
    ///
    /// The normal is the eigenvector of the smallest eigenvalue of the
    /// sample covariance; its sign is whatever the decomposition returns.
    ///
    /// # Errors
    /// Returns a `Geometry` error for fewer than three points.
    pub fn fit(points: &[Point3<f64>]) -> HoldResult<Self> {
        if points.len() < 3 {
            return Err(HoldError::geometry(
                "plane fit",
                format!("need at least 3 points, got {}", points.len()),
            ));
        }
        let (centroid, normal) = principal_normal(points);
        Self::new(centroid, normal)
    }

    /// In-plane orthonormal frame anchored at the plane anchor.
    pub fn frame(&self) -> PlaneFrame {
        PlaneFrame::new(self.anchor, self.normal)
    }
}

/// Centroid and smallest-variance direction of a point set.
///
/// Uses the unbiased covariance (divided by n - 1). Callers must pass at
/// least two points.
pub(crate) fn principal_normal(points: &[Point3<f64>]) -> (Point3<f64>, Vector3<f64>) {
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;

    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= (n - 1.0).max(1.0);

    let eigen = cov.symmetric_eigen();
    let mut min_idx = 0;
    for i in 1..3 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    let normal = eigen.eigenvectors.column(min_idx).into_owned();
    (Point3::from(centroid), normal)
}

/// Orthonormal (u, v, normal) frame spanning a plane.
///
/// `u = normalize(normal x X)`, falling back to `normal x Y` when the normal
/// is (nearly) parallel to the X axis, and `v = normal x u`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneFrame {
    pub origin: Point3<f64>,
    pub u: Vector3<f64>,
    pub v: Vector3<f64>,
    pub normal: Vector3<f64>,
}

impl PlaneFrame {
    /// Build the frame for a unit `normal`.
    pub fn new(origin: Point3<f64>, normal: Vector3<f64>) -> Self {
        let u = normal
            .cross(&Vector3::x())
            .try_normalize(DEGENERATE_CROSS)
            .or_else(|| normal.cross(&Vector3::y()).try_normalize(DEGENERATE_CROSS))
            .unwrap_or_else(Vector3::z);
        let v = normal.cross(&u);
        Self {
            origin,
            u,
            v,
            normal,
        }
    }

    /// Coordinates of `p` in the (u, v) basis, ignoring its normal offset.
    #[inline]
    pub fn to_plane_coords(&self, p: &Point3<f64>) -> Point2<f64> {
        let d = p - self.origin;
        Point2::new(d.dot(&self.u), d.dot(&self.v))
    }

    /// Lift in-plane coordinates back to 3D.
    #[inline]
    pub fn lift(&self, q: &Point2<f64>) -> Point3<f64> {
        self.origin + self.u * q.x + self.v * q.y
    }
}
