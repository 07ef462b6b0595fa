//! Colored point clouds.
//!
//! A [`PointCloud`] stores positions with optional colors and normals in
//! parallel, index-aligned arrays: point `i` owns `colors[i]` and
//! `normals[i]`. Every constructor that accepts attribute arrays checks that
//! their length matches the point count.

use nalgebra::{Point3, Vector3};

use crate::error::{HoldError, HoldResult};
use crate::types::Rgb;

/// An ordered set of 3D points with optional per-point attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    /// Point positions.
    pub points: Vec<Point3<f64>>,

    /// Per-point colors in [0, 1], index-aligned with `points`.
    pub colors: Option<Vec<Rgb>>,

    /// Per-point unit normals, index-aligned with `points`.
    pub normals: Option<Vec<Vector3<f64>>>,
}

impl PointCloud {
    /// Create a cloud from positions only.
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self {
            points,
            colors: None,
            normals: None,
        }
    }

    /// Create a cloud from positions and index-aligned colors.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if the arrays differ in length.
    pub fn with_colors(points: Vec<Point3<f64>>, colors: Vec<Rgb>) -> HoldResult<Self> {
        if colors.len() != points.len() {
            return Err(HoldError::invalid_parameter(
                "colors",
                format!(
                    "{} colors supplied for {} points",
                    colors.len(),
                    points.len()
                ),
            ));
        }
        Ok(Self {
            points,
            colors: Some(colors),
            normals: None,
        })
    }

    /// Attach index-aligned normals.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if the array length differs from the point count.
    pub fn set_normals(&mut self, normals: Vec<Vector3<f64>>) -> HoldResult<()> {
        if normals.len() != self.points.len() {
            return Err(HoldError::invalid_parameter(
                "normals",
                format!(
                    "{} normals supplied for {} points",
                    normals.len(),
                    self.points.len()
                ),
            ));
        }
        self.normals = Some(normals);
        Ok(())
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the cloud holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    #[inline]
    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    /// Color of point `i`, if the cloud is colored.
    #[inline]
    pub fn color(&self, i: usize) -> Option<Rgb> {
        self.colors.as_ref().and_then(|c| c.get(i).copied())
    }

    /// Normal of point `i`, if normals are attached.
    #[inline]
    pub fn normal(&self, i: usize) -> Option<Vector3<f64>> {
        self.normals.as_ref().and_then(|n| n.get(i).copied())
    }

    /// Axis-aligned bounding box, or None for an empty cloud.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.points.first()?;
        let mut min = first;
        let mut max = first;
        for p in &self.points[1..] {
            min = min.inf(p);
            max = max.sup(p);
        }
        Some((min, max))
    }

    /// Mean position, or None for an empty cloud.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords);
        Some(Point3::from(sum / self.points.len() as f64))
    }

    /// Copy the points at `indices` (and their attributes) into a new cloud.
    ///
    /// Indices must be in range.
    pub fn select(&self, indices: &[usize]) -> PointCloud {
        PointCloud {
            points: indices.iter().map(|&i| self.points[i]).collect(),
            colors: self
                .colors
                .as_ref()
                .map(|c| indices.iter().map(|&i| c[i]).collect()),
            normals: self
                .normals
                .as_ref()
                .map(|n| indices.iter().map(|&i| n[i]).collect()),
        }
    }

    /// Keep the points whose mask entry is `true`.
    pub fn select_by_mask(&self, mask: &[bool]) -> PointCloud {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        self.select(&indices)
    }

    /// Append another cloud.
    ///
    /// An attribute survives only when both clouds carry it.
    pub fn extend(&mut self, other: &PointCloud) {
        self.colors = match (self.colors.take(), &other.colors) {
            (Some(mut a), Some(b)) => {
                a.extend_from_slice(b);
                Some(a)
            }
            _ => None,
        };
        self.normals = match (self.normals.take(), &other.normals) {
            (Some(mut a), Some(b)) => {
                a.extend_from_slice(b);
                Some(a)
            }
            _ => None,
        };
        self.points.extend_from_slice(&other.points);
    }

    /// Rescale 8-bit colors stored as floats into [0, 1].
    ///
    /// Colors are divided by 255 when any component exceeds 1.
    /// Returns true if a rescale happened.
    pub fn normalize_colors(&mut self) -> bool {
        let Some(colors) = self.colors.as_mut() else {
            return false;
        };
        let max = colors
            .iter()
            .map(Rgb::max_component)
            .fold(f64::NEG_INFINITY, f64::max);
        if max > 1.0 {
            for c in colors.iter_mut() {
                *c = c.scaled(1.0 / 255.0);
            }
            true
        } else {
            false
        }
    }

    /// Translate every point.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for p in &mut self.points {
            *p += offset;
        }
    }
}
