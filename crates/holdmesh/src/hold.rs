//! Hold orientation about the screw-hole axis.

use nalgebra::{Rotation3, Unit, Vector3};

use crate::error::{HoldError, HoldResult};
use crate::types::Mesh;

/// Rotate a hold mesh by `angle` radians about `screwhole_axis` through the
/// origin.
///
/// The axis is normalized first. Vertex normals are rotated along with the
/// positions. A zero angle leaves the mesh untouched.
pub fn orient_hold(mesh: &mut Mesh, screwhole_axis: Vector3<f64>, angle: f64) -> HoldResult<()> {
    let axis = Unit::try_new(screwhole_axis, f64::EPSILON).ok_or_else(|| {
        HoldError::geometry("orient_hold", "screw-hole axis has zero length")
    })?;
    if !angle.is_finite() {
        return Err(HoldError::invalid_parameter("angle", format!("{angle} is not finite")));
    }
    if angle == 0.0 {
        return Ok(());
    }

    let rotation = Rotation3::from_axis_angle(&axis, angle);
    for v in &mut mesh.vertices {
        v.position = rotation * v.position;
        if let Some(n) = v.normal.as_mut() {
            *n = rotation * *n;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn single_vertex(x: f64, y: f64, z: f64) -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(x, y, z));
        mesh
    }

    #[test]
    fn test_quarter_turn_about_z() {
        let mut mesh = single_vertex(1.0, 0.0, 0.5);
        mesh.vertices[0].normal = Some(Vector3::x());
        // Axis length does not matter
        orient_hold(&mut mesh, Vector3::new(0.0, 0.0, 3.0), FRAC_PI_2).unwrap();

        let p = mesh.vertices[0].position;
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.z, 0.5, epsilon = 1e-12);
        let n = mesh.vertices[0].normal.unwrap();
        assert_relative_eq!(n.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_angle_is_noop() {
        let mut mesh = single_vertex(0.3, -0.2, 0.9);
        let before = mesh.clone();
        orient_hold(&mut mesh, Vector3::new(1.0, 1.0, 0.0), 0.0).unwrap();
        assert_eq!(mesh, before);
    }

    #[test]
    fn test_zero_axis_is_rejected() {
        let mut mesh = single_vertex(1.0, 0.0, 0.0);
        let err = orient_hold(&mut mesh, Vector3::zeros(), 1.0).unwrap_err();
        assert!(matches!(err, HoldError::Geometry { .. }));
    }

    #[test]
    fn test_points_on_axis_stay_fixed() {
        let mut mesh = single_vertex(2.0, 2.0, 2.0);
        orient_hold(&mut mesh, Vector3::new(1.0, 1.0, 1.0), 1.234).unwrap();
        let p = mesh.vertices[0].position;
        assert_relative_eq!(p.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-12);
        assert_relative_eq!(p.z, 2.0, epsilon = 1e-12);
    }
}
