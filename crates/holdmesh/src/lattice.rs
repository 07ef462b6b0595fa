//! Anchor lattices: the grid of screw-hole positions that seeds segmentation.
//!
//! A lattice spans the parallelogram defined by three corner screw-holes.
//! Anchors are stored column-major: anchor `k` sits at column `k / rows`
//! and row `k % rows`, at
//!
//! ```text
//! p1 + u[col] * (p2 - p1) + v[row] * (p3 - p1)
//! ```
//!
//! with `u` and `v` evenly spaced over [0, 1].
//!
//! # Naming
//!
//! Every anchor owns a board name such as `A1` or `K18`. Board names are
//! generated letter-major (`A1, A2, .., A18, B1, ..`) and then assigned in
//! reverse, so the last generated anchor gets `A1`. For anchor `k` this
//! gives letter `cols - 1 - col` and number `rows - row`. The mapping ties
//! clusters to the physical labels on the wall and must not change.
//!
//! # Example
//!
//! ```
//! use holdmesh::lattice::generate_lattice;
//! use nalgebra::Point3;
//!
//! let lattice = generate_lattice(
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//!     2,
//!     2,
//! )?;
//! assert_eq!(lattice.names(), ["B2", "B1", "A2", "A1"]);
//! # Ok::<(), holdmesh::HoldError>(())
//! ```

use nalgebra::Point3;
use tracing::debug;

use crate::error::{HoldError, HoldResult};

/// Rows on a standard board.
pub const BOARD_ROWS: usize = 18;

/// Columns on a standard board.
pub const BOARD_COLS: usize = 11;

const ALPHABET: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A named grid of anchor points.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorLattice {
    points: Vec<Point3<f64>>,
    names: Vec<String>,
    rows: usize,
    cols: usize,
}

impl AnchorLattice {
    /// Name an externally authored lattice.
    ///
    /// `points` must already be in column-major order.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for unsupported dimensions or when the
    /// point count does not equal `rows * cols`.
    pub fn from_points(points: Vec<Point3<f64>>, rows: usize, cols: usize) -> HoldResult<Self> {
        check_dimensions(rows, cols)?;
        if points.len() != rows * cols {
            return Err(HoldError::invalid_parameter(
                "lattice",
                format!(
                    "{} points do not fill a {}x{} lattice",
                    points.len(),
                    rows,
                    cols
                ),
            ));
        }
        let names = (0..points.len())
            .map(|k| anchor_name(k, rows, cols))
            .collect();
        Ok(Self {
            points,
            names,
            rows,
            cols,
        })
    }

    /// Anchor positions in lattice order.
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Anchor names, index-aligned with [`points`](Self::points).
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of anchors.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Lattice index of the anchor called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let mut chars = name.chars();
        let letter = chars.next()?;
        let letter_idx = ALPHABET.iter().position(|&c| c as char == letter)?;
        let number: usize = chars.as_str().parse().ok()?;
        if letter_idx >= self.cols || number == 0 || number > self.rows {
            return None;
        }
        let col = self.cols - 1 - letter_idx;
        let row = self.rows - number;
        Some(col * self.rows + row)
    }

    /// Position of the anchor called `name`.
    pub fn anchor(&self, name: &str) -> Option<Point3<f64>> {
        self.index_of(name).map(|k| self.points[k])
    }

    /// Iterate over (name, position) pairs in lattice order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Point3<f64>)> {
        self.names.iter().map(String::as_str).zip(self.points.iter())
    }
}

fn check_dimensions(rows: usize, cols: usize) -> HoldResult<()> {
    if rows < 2 || cols < 2 {
        return Err(HoldError::invalid_parameter(
            "lattice",
            format!("lattice must be at least 2x2, got {rows}x{cols}"),
        ));
    }
    if cols > ALPHABET.len() {
        return Err(HoldError::invalid_parameter(
            "lattice",
            format!("at most {} columns can be lettered, got {cols}", ALPHABET.len()),
        ));
    }
    Ok(())
}

/// Board name of lattice index `index` in a `rows x cols` lattice.
///
/// Callers must keep `index < rows * cols` and `cols <= 26`.
pub fn anchor_name(index: usize, rows: usize, cols: usize) -> String {
    let col = index / rows;
    let row = index % rows;
    let letter = ALPHABET[cols - 1 - col] as char;
    format!("{}{}", letter, rows - row)
}

/// Generate a `rows x cols` lattice over the parallelogram spanned by
/// `p2 - p1` (across columns) and `p3 - p1` (across rows).
///
/// Output is deterministic, and the corners reproduce `p1`, `p2` and `p3`
/// exactly.
///
/// # Errors
/// Returns a `Geometry` error when the corners coincide or are collinear,
/// and `InvalidParameter` for dimensions below 2x2 or above 26 columns.
pub fn generate_lattice(
    p1: Point3<f64>,
    p2: Point3<f64>,
    p3: Point3<f64>,
    rows: usize,
    cols: usize,
) -> HoldResult<AnchorLattice> {
    check_dimensions(rows, cols)?;

    let e1 = p2 - p1;
    let e2 = p3 - p1;
    let (l1, l2) = (e1.norm(), e2.norm());
    if l1 <= f64::EPSILON || l2 <= f64::EPSILON {
        return Err(HoldError::geometry(
            "lattice",
            "corner points coincide with the origin corner",
        ));
    }
    if e1.cross(&e2).norm() <= 1e-12 * l1 * l2 {
        return Err(HoldError::geometry("lattice", "corner points are collinear"));
    }

    let mut points = Vec::with_capacity(rows * cols);
    for col in 0..cols {
        let u = col as f64 / (cols - 1) as f64;
        for row in 0..rows {
            let v = row as f64 / (rows - 1) as f64;
            let w = 1.0 - u - v;
            points.push(Point3::from(p1.coords * w + p2.coords * u + p3.coords * v));
        }
    }

    debug!(rows, cols, anchors = points.len(), "Generated anchor lattice");
    AnchorLattice::from_points(points, rows, cols)
}
