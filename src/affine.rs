//! Affine pre-alignment
//!
//! Before the thin plate spline is fitted, the source landmarks are brought
//! onto the destination landmarks by the best affine transform. Three pairs
//! determine it exactly; more pairs are fitted by least squares and the
//! leftover residual is absorbed by the spline.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WarpError};
use crate::geometry::{is_degenerate, CorrespondenceSet, Point2D, MIN_PAIRS};

/// Rank tolerance for the least squares design matrix
const SVD_EPS: f64 = 1e-12;

/// Relative size of the determinant, against its two products, below which
/// the linear part counts as singular
const DET_RELATIVE_EPS: f64 = 1e-12;

/// A 2x3 affine matrix mapping source coordinates to destination coordinates
///
/// `[x', y'] = matrix * [x, y, 1]`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AffineModel {
    pub matrix: [[f64; 3]; 2],
}

impl Default for AffineModel {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineModel {
    pub fn new(matrix: [[f64; 3]; 2]) -> Self {
        Self { matrix }
    }

    pub fn identity() -> Self {
        Self {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    /// Map a single point
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.matrix;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    pub fn transform_point(&self, p: &Point2D) -> Point2D {
        let (x, y) = self.apply(p.x, p.y);
        Point2D::new(x, y)
    }

    pub fn transform_points(&self, points: &[Point2D]) -> Vec<Point2D> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    /// Determinant of the linear 2x2 part
    pub fn determinant(&self) -> f64 {
        let m = &self.matrix;
        m[0][0] * m[1][1] - m[0][1] * m[1][0]
    }

    /// The inverse transform, used to pull pixels from the source image
    pub fn inverse(&self) -> Result<Self> {
        let det = self.determinant();
        let m = &self.matrix;
        let magnitude = (m[0][0] * m[1][1]).abs().max((m[0][1] * m[1][0]).abs());
        if !det.is_finite() || det.abs() <= DET_RELATIVE_EPS * magnitude {
            return Err(WarpError::AffineEstimation(format!(
                "affine transform is not invertible (det = {:e})",
                det
            )));
        }

        let (a, b, c) = (m[0][0], m[0][1], m[0][2]);
        let (d, e, f) = (m[1][0], m[1][1], m[1][2]);
        let inv_det = 1.0 / det;

        let ia = e * inv_det;
        let ib = -b * inv_det;
        let id = -d * inv_det;
        let ie = a * inv_det;

        Ok(Self {
            matrix: [
                [ia, ib, -(ia * c + ib * f)],
                [id, ie, -(id * c + ie * f)],
            ],
        })
    }

    /// Root mean square distance between mapped source points and their
    /// destination partners
    pub fn rms_residual(&self, pairs: &CorrespondenceSet) -> f64 {
        let sum: f64 = pairs
            .pairs()
            .map(|(dst, src)| self.transform_point(src).distance_squared(dst))
            .sum();
        (sum / pairs.len() as f64).sqrt()
    }
}

/// Capability that fits an affine model to a correspondence set
pub trait AffineEstimator {
    fn estimate(&self, pairs: &CorrespondenceSet) -> Result<AffineModel>;
}

/// Exact solve for three pairs, SVD least squares for more
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastSquaresAffine;

impl AffineEstimator for LeastSquaresAffine {
    fn estimate(&self, pairs: &CorrespondenceSet) -> Result<AffineModel> {
        if is_degenerate(pairs.src()) {
            return Err(WarpError::AffineEstimation(
                "source points are collinear or coincident".into(),
            ));
        }
        if is_degenerate(pairs.dest()) {
            return Err(WarpError::AffineEstimation(
                "destination points are collinear or coincident".into(),
            ));
        }

        let model = if pairs.len() == MIN_PAIRS {
            solve_exact(pairs)?
        } else {
            solve_least_squares(pairs)?
        };

        if model.matrix.iter().flatten().any(|v| !v.is_finite()) {
            return Err(WarpError::AffineEstimation(
                "affine solve produced non-finite coefficients".into(),
            ));
        }
        Ok(model)
    }
}

/// Solve the fully determined 3-point system
fn solve_exact(pairs: &CorrespondenceSet) -> Result<AffineModel> {
    let s = pairs.src();
    let d = pairs.dest();

    let a = Matrix3::new(
        s[0].x, s[0].y, 1.0, //
        s[1].x, s[1].y, 1.0, //
        s[2].x, s[2].y, 1.0,
    );
    let lu = a.lu();

    let bx = Vector3::new(d[0].x, d[1].x, d[2].x);
    let by = Vector3::new(d[0].y, d[1].y, d[2].y);

    let (row_x, row_y) = lu
        .solve(&bx)
        .zip(lu.solve(&by))
        .ok_or_else(|| WarpError::AffineEstimation("3-point system is singular".into()))?;

    Ok(AffineModel::new([
        [row_x[0], row_x[1], row_x[2]],
        [row_y[0], row_y[1], row_y[2]],
    ]))
}

/// Minimise the point-to-point residual over all pairs
fn solve_least_squares(pairs: &CorrespondenceSet) -> Result<AffineModel> {
    let n = pairs.len();
    let a = DMatrix::from_fn(n, 3, |i, j| match j {
        0 => pairs.src()[i].x,
        1 => pairs.src()[i].y,
        _ => 1.0,
    });
    let bx = DVector::from_iterator(n, pairs.dest().iter().map(|p| p.x));
    let by = DVector::from_iterator(n, pairs.dest().iter().map(|p| p.y));

    let svd = a.svd(true, true);
    let max_sv = svd.singular_values.max();
    if svd.rank(SVD_EPS * max_sv.max(1.0)) < 3 {
        return Err(WarpError::AffineEstimation(
            "least squares design matrix is rank deficient".into(),
        ));
    }

    let eps = SVD_EPS * max_sv;
    let row_x = svd
        .solve(&bx, eps)
        .map_err(|e| WarpError::AffineEstimation(e.to_string()))?;
    let row_y = svd
        .solve(&by, eps)
        .map_err(|e| WarpError::AffineEstimation(e.to_string()))?;

    Ok(AffineModel::new([
        [row_x[0], row_x[1], row_x[2]],
        [row_y[0], row_y[1], row_y[2]],
    ]))
}
