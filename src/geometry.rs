//! Landmark points and paired correspondence sets

use serde::{Deserialize, Serialize};

use crate::error::{Result, WarpError};

/// Minimum number of pairs for an affine fit
pub const MIN_PAIRS: usize = 3;

/// Ratio of the scatter matrix eigenvalues below which a point cloud
/// counts as collinear
const COLLINEAR_RATIO: f64 = 1e-10;

/// A 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared euclidean distance to another point
    #[inline]
    pub fn distance_squared(&self, other: &Point2D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point2D {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Index-paired destination and source points.
///
/// Point `i` of `dest` corresponds to point `i` of `src`. A set can only be
/// built through [`CorrespondenceSet::new`], which enforces the cardinality
/// invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrespondenceSet {
    dest: Vec<Point2D>,
    src: Vec<Point2D>,
}

impl CorrespondenceSet {
    /// Validate and pair the two point lists.
    ///
    /// Cardinality is checked before anything else so that too few points
    /// never reach the numeric stages.
    pub fn new(dest: Vec<Point2D>, src: Vec<Point2D>) -> Result<Self> {
        validate(&dest, &src)?;

        if let Some(p) = dest.iter().chain(src.iter()).find(|p| !p.is_finite()) {
            return Err(WarpError::InvalidInput(format!(
                "non-finite point coordinate ({}, {})",
                p.x, p.y
            )));
        }

        Ok(Self { dest, src })
    }

    pub fn dest(&self) -> &[Point2D] {
        &self.dest
    }

    pub fn src(&self) -> &[Point2D] {
        &self.src
    }

    pub fn len(&self) -> usize {
        self.dest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dest.is_empty()
    }

    /// Iterate over `(dest, src)` pairs
    pub fn pairs(&self) -> impl Iterator<Item = (&Point2D, &Point2D)> {
        self.dest.iter().zip(self.src.iter())
    }
}

/// Check the cardinality invariant: equal lengths, at least three pairs
pub fn validate(dest: &[Point2D], src: &[Point2D]) -> Result<()> {
    if dest.len() != src.len() || dest.len() < MIN_PAIRS {
        return Err(WarpError::InsufficientPoints {
            dest: dest.len(),
            src: src.len(),
        });
    }
    Ok(())
}

/// Eigenvalues (larger, smaller) of the 2x2 scatter matrix of a point cloud
fn scatter_eigenvalues(points: &[Point2D]) -> (f64, f64) {
    let n = points.len() as f64;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (sx / n, sy / n);

    let (mut xx, mut xy, mut yy) = (0.0, 0.0, 0.0);
    for p in points {
        let dx = p.x - cx;
        let dy = p.y - cy;
        xx += dx * dx;
        xy += dx * dy;
        yy += dy * dy;
    }

    let half_trace = 0.5 * (xx + yy);
    let disc = (0.25 * (xx - yy) * (xx - yy) + xy * xy).sqrt();
    (half_trace + disc, (half_trace - disc).max(0.0))
}

/// True when all points coincide or lie on a single line
pub fn is_degenerate(points: &[Point2D]) -> bool {
    if points.len() < MIN_PAIRS {
        return true;
    }
    let (major, minor) = scatter_eigenvalues(points);
    major <= 0.0 || minor <= COLLINEAR_RATIO * major
}

/// Diagonal length of the axis-aligned bounding box
pub fn extent(points: &[Point2D]) -> f64 {
    let mut min = Point2D::new(f64::INFINITY, f64::INFINITY);
    let mut max = Point2D::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    if points.is_empty() {
        return 0.0;
    }
    min.distance_squared(&max).sqrt()
}
