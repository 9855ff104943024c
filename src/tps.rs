//! Regularized thin plate spline
//!
//! The spline maps destination landmarks onto the affine-aligned source
//! landmarks. Each output axis has its own model, but both share the same
//! system matrix, so it is factored once:
//!
//! ```text
//! | K + λI  P | | w |   | v |
//! | Pᵀ      0 | | a | = | 0 |
//! ```
//!
//! where `K[i][j] = U(|d_i - d_j|²)`, `P` rows are `[1, x_i, y_i]` and `v`
//! holds one coordinate of the aligned source points.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WarpError};
use crate::geometry::{validate, Point2D};

/// Largest single term of `L·x`, relative to the largest target, that a
/// solution may carry before the system counts as singular
const GROWTH_LIMIT: f64 = 1e12;

/// Radial basis `U(r²) = r² ln(r²)` with `U(0) = 0`
#[inline]
pub fn kernel(r2: f64) -> f64 {
    if r2 <= 0.0 {
        return 0.0;
    }
    let v = r2 * r2.ln();
    if v.is_nan() {
        0.0
    } else {
        v
    }
}

/// Regularization settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TpsParams {
    /// Added to the kernel diagonal, 0 gives an interpolating spline
    pub reg_lambda: f64,

    /// Rescale `reg_lambda` by the mean squared landmark distance
    pub adaptive: bool,

    /// Pairs closer than this are left out of the adaptive mean.
    /// 0 only skips exactly coincident points.
    pub min_pair_distance: f64,
}

impl Default for TpsParams {
    fn default() -> Self {
        Self {
            reg_lambda: 1e-3,
            adaptive: false,
            min_pair_distance: 0.0,
        }
    }
}

impl TpsParams {
    pub fn new(reg_lambda: f64, adaptive: bool) -> Self {
        Self {
            reg_lambda,
            adaptive,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.reg_lambda.is_finite() || self.reg_lambda < 0.0 {
            return Err(WarpError::InvalidInput(format!(
                "regularization must be a finite non-negative number, got {}",
                self.reg_lambda
            )));
        }
        if !self.min_pair_distance.is_finite() || self.min_pair_distance < 0.0 {
            return Err(WarpError::InvalidInput(format!(
                "min_pair_distance must be a finite non-negative number, got {}",
                self.min_pair_distance
            )));
        }
        Ok(())
    }
}

/// Spline parameters for one output axis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TpsModel {
    /// One radial weight per control point
    pub weights: Vec<f64>,
    /// Constant, x and y coefficients of the affine term
    pub poly_coeffs: [f64; 3],
}

impl TpsModel {
    fn from_solution(solution: &DVector<f64>, n: usize) -> Self {
        Self {
            weights: solution.rows(0, n).iter().copied().collect(),
            poly_coeffs: [solution[n], solution[n + 1], solution[n + 2]],
        }
    }

    /// Evaluate with kernel values already computed against every control point
    #[inline]
    pub fn evaluate_with(&self, kernels: &[f64], x: f64, y: f64) -> f64 {
        let [a0, ax, ay] = self.poly_coeffs;
        let radial: f64 = self
            .weights
            .iter()
            .zip(kernels)
            .map(|(w, u)| w * u)
            .sum();
        a0 + ax * x + ay * y + radial
    }

    /// `Σ w²`, shrinks as regularization grows
    pub fn bending_energy(&self) -> f64 {
        self.weights.iter().map(|w| w * w).sum()
    }
}

/// A fitted two-axis spline together with its control points
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TpsWarp {
    pub centers: Vec<Point2D>,
    pub x: TpsModel,
    pub y: TpsModel,
    /// Regularization actually used, after adaptive scaling
    pub lambda: f64,
}

impl TpsWarp {
    /// Kernel values of `(x, y)` against every control point
    #[inline]
    pub fn kernels_at(&self, x: f64, y: f64, out: &mut Vec<f64>) {
        let p = Point2D::new(x, y);
        out.clear();
        out.extend(self.centers.iter().map(|c| kernel(p.distance_squared(c))));
    }

    /// Map an output coordinate to the sampling coordinate
    pub fn evaluate(&self, x: f64, y: f64) -> (f64, f64) {
        let mut kernels = Vec::with_capacity(self.centers.len());
        self.kernels_at(x, y, &mut kernels);
        (
            self.x.evaluate_with(&kernels, x, y),
            self.y.evaluate_with(&kernels, x, y),
        )
    }
}

/// Builds and solves the augmented spline system
#[derive(Debug, Clone, Copy, Default)]
pub struct TpsSolver {
    params: TpsParams,
}

impl TpsSolver {
    pub fn new(params: TpsParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TpsParams {
        &self.params
    }

    /// The symmetric N×N kernel matrix, without regularization
    pub fn kernel_matrix(points: &[Point2D]) -> DMatrix<f64> {
        let n = points.len();
        let mut k = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            for j in (i + 1)..n {
                let u = kernel(points[i].distance_squared(&points[j]));
                k[(i, j)] = u;
                k[(j, i)] = u;
            }
        }
        k
    }

    /// Regularization after optional rescaling by the mean squared
    /// pairwise distance of `dest`
    pub fn effective_lambda(&self, dest: &[Point2D]) -> f64 {
        if !self.params.adaptive {
            return self.params.reg_lambda;
        }

        let cutoff = self.params.min_pair_distance * self.params.min_pair_distance;
        let mut sum = 0.0;
        let mut count = 0usize;
        for (i, a) in dest.iter().enumerate() {
            for (j, b) in dest.iter().enumerate() {
                if i == j {
                    continue;
                }
                let r2 = a.distance_squared(b);
                if r2 > cutoff {
                    sum += r2;
                    count += 1;
                }
            }
        }
        let mean = if count > 0 { sum / count as f64 } else { 1.0 };
        let lambda = self.params.reg_lambda * mean;
        tracing::debug!("Adaptive regularization: lambda = {} (mean r2 = {})", lambda, mean);
        lambda
    }

    /// Fit the spline mapping `dest` onto `aligned_src`
    pub fn solve(&self, dest: &[Point2D], aligned_src: &[Point2D]) -> Result<TpsWarp> {
        validate(dest, aligned_src)?;
        self.params.validate()?;

        let n = dest.len();
        let lambda = self.effective_lambda(dest);

        let mut l = DMatrix::<f64>::zeros(n + 3, n + 3);
        l.view_mut((0, 0), (n, n)).copy_from(&Self::kernel_matrix(dest));
        for (i, p) in dest.iter().enumerate() {
            l[(i, i)] += lambda;

            l[(i, n)] = 1.0;
            l[(i, n + 1)] = p.x;
            l[(i, n + 2)] = p.y;

            l[(n, i)] = 1.0;
            l[(n + 1, i)] = p.x;
            l[(n + 2, i)] = p.y;
        }

        let mut vx = DVector::<f64>::zeros(n + 3);
        let mut vy = DVector::<f64>::zeros(n + 3);
        for (i, p) in aligned_src.iter().enumerate() {
            vx[i] = p.x;
            vy[i] = p.y;
        }

        let lu = l.clone().lu();
        let params_x = solve_checked(&lu, &l, &vx, "x")?;
        let params_y = solve_checked(&lu, &l, &vy, "y")?;

        tracing::debug!("TPS system solved for {} control points", n);

        Ok(TpsWarp {
            centers: dest.to_vec(),
            x: TpsModel::from_solution(&params_x, n),
            y: TpsModel::from_solution(&params_y, n),
            lambda,
        })
    }
}

/// Solve one right-hand side and reject zero pivots, non-finite values and
/// solutions built from huge cancelling terms
fn solve_checked(
    lu: &nalgebra::LU<f64, nalgebra::Dyn, nalgebra::Dyn>,
    l: &DMatrix<f64>,
    rhs: &DVector<f64>,
    axis: &str,
) -> Result<DVector<f64>> {
    let solution = lu.solve(rhs).ok_or_else(|| {
        WarpError::SingularSystem(format!("zero pivot while solving the {} axis", axis))
    })?;

    if solution.iter().any(|v| !v.is_finite()) {
        return Err(WarpError::SingularSystem(format!(
            "non-finite coefficients on the {} axis",
            axis
        )));
    }

    let growth = term_growth(l, &solution, rhs);
    if growth > GROWTH_LIMIT {
        return Err(WarpError::SingularSystem(format!(
            "ill-conditioned system on the {} axis (coefficient growth {:e})",
            axis, growth
        )));
    }

    Ok(solution)
}

/// Largest `|L[i][j] * x[j]|` divided by the largest `|b[i]|`.
///
/// Stays small for well-spread landmarks at any pixel scale. Duplicate or
/// nearly duplicate landmarks without regularization push it far past
/// [`GROWTH_LIMIT`].
fn term_growth(l: &DMatrix<f64>, x: &DVector<f64>, rhs: &DVector<f64>) -> f64 {
    let largest = l
        .column_iter()
        .zip(x.iter())
        .map(|(col, xj)| col.amax() * xj.abs())
        .fold(0.0, f64::max);
    let scale = rhs.amax();
    if scale > 0.0 {
        largest / scale
    } else {
        largest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[(f64, f64)]) -> Vec<Point2D> {
        coords.iter().copied().map(Point2D::from).collect()
    }

    fn square_with_center(center: (f64, f64)) -> (Vec<Point2D>, Vec<Point2D>) {
        let dest = pts(&[
            (0.0, 0.0),
            (100.0, 0.0),
            (0.0, 100.0),
            (100.0, 100.0),
            (50.0, 50.0),
        ]);
        let src = pts(&[
            (0.0, 0.0),
            (100.0, 0.0),
            (0.0, 100.0),
            (100.0, 100.0),
            center,
        ]);
        (dest, src)
    }

    #[test]
    fn test_kernel_at_zero() {
        assert_eq!(kernel(0.0), 0.0);
        assert_eq!(kernel(-0.0), 0.0);
        assert_eq!(kernel(1.0), 0.0);
        assert!((kernel(std::f64::consts::E) - std::f64::consts::E).abs() < 1e-12);
        assert!(kernel(1e-300).is_finite());
    }

    #[test]
    fn test_kernel_matrix_symmetric() {
        let p = pts(&[(0.0, 0.0), (3.0, 7.0), (-2.5, 4.0), (10.0, -1.0), (3.0, 7.0)]);
        let k = TpsSolver::kernel_matrix(&p);
        for i in 0..p.len() {
            assert_eq!(k[(i, i)], 0.0);
            for j in 0..p.len() {
                assert_eq!(k[(i, j)], k[(j, i)]);
                assert!(k[(i, j)].is_finite());
            }
        }
        // coincident points 1 and 4
        assert_eq!(k[(1, 4)], 0.0);
    }

    #[test]
    fn test_three_points_have_zero_weights() {
        let dest = pts(&[(10.0, 10.0), (90.0, 15.0), (20.0, 80.0)]);
        let src = pts(&[(12.0, 9.0), (85.0, 20.0), (25.0, 77.0)]);
        let warp = TpsSolver::default().solve(&dest, &src).unwrap();
        for w in warp.x.weights.iter().chain(warp.y.weights.iter()) {
            assert!(w.abs() < 1e-9, "weight {} not zero", w);
        }
    }

    #[test]
    fn test_identity_solution() {
        let p = pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        let warp = TpsSolver::default().solve(&p, &p).unwrap();
        let [a0, ax, ay] = warp.x.poly_coeffs;
        assert!(a0.abs() < 1e-9 && (ax - 1.0).abs() < 1e-9 && ay.abs() < 1e-9);
        let (x, y) = warp.evaluate(37.0, -4.0);
        assert!((x - 37.0).abs() < 1e-6);
        assert!((y + 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_interpolates_without_regularization() {
        let (dest, src) = square_with_center((60.0, 45.0));
        let solver = TpsSolver::new(TpsParams::new(0.0, false));
        let warp = solver.solve(&dest, &src).unwrap();
        for (d, s) in dest.iter().zip(src.iter()) {
            let (x, y) = warp.evaluate(d.x, d.y);
            assert!((x - s.x).abs() < 1e-6, "{} vs {}", x, s.x);
            assert!((y - s.y).abs() < 1e-6, "{} vs {}", y, s.y);
        }
    }

    #[test]
    fn test_regularization_smooths() {
        let (dest, src) = square_with_center((60.0, 45.0));
        let loose = TpsSolver::new(TpsParams::new(1e-3, false))
            .solve(&dest, &src)
            .unwrap();
        let stiff = TpsSolver::new(TpsParams::new(1e4, false))
            .solve(&dest, &src)
            .unwrap();
        let loose_energy = loose.x.bending_energy() + loose.y.bending_energy();
        let stiff_energy = stiff.x.bending_energy() + stiff.y.bending_energy();
        assert!(loose_energy > 0.0);
        assert!(stiff_energy < loose_energy);
    }

    #[test]
    fn test_coincident_points_with_regularization() {
        let dest = pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (0.0, 0.0)]);
        let src = pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (1.0, 1.0)]);
        let warp = TpsSolver::default().solve(&dest, &src).unwrap();
        assert!(warp.x.weights.iter().all(|w| w.is_finite()));
        assert!(warp.y.weights.iter().all(|w| w.is_finite()));
    }

    #[test]
    fn test_coincident_points_without_regularization_are_singular() {
        let dest = pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (0.0, 0.0)]);
        let src = pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (1.0, 1.0)]);
        let err = TpsSolver::new(TpsParams::new(0.0, false))
            .solve(&dest, &src)
            .unwrap_err();
        assert!(matches!(err, WarpError::SingularSystem(_)));
    }

    #[test]
    fn test_near_duplicate_points_without_regularization_are_singular() {
        let dest = pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (1e-9, 0.0)]);
        let src = pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (1.0, 1.0)]);
        let err = TpsSolver::new(TpsParams::new(0.0, false))
            .solve(&dest, &src)
            .unwrap_err();
        assert!(matches!(err, WarpError::SingularSystem(_)));

        assert!(TpsSolver::default().solve(&dest, &src).is_ok());
    }

    #[test]
    fn test_interpolates_at_map_scale() {
        let dest = pts(&[
            (120.0, 80.0),
            (3900.0, 150.0),
            (200.0, 3850.0),
            (3950.0, 3900.0),
            (2000.0, 1900.0),
            (1000.0, 3000.0),
            (3100.0, 1200.0),
        ]);
        let src = pts(&[
            (130.0, 90.0),
            (3880.0, 160.0),
            (210.0, 3830.0),
            (3940.0, 3880.0),
            (2040.0, 1870.0),
            (980.0, 3030.0),
            (3120.0, 1180.0),
        ]);
        let warp = TpsSolver::new(TpsParams::new(0.0, false))
            .solve(&dest, &src)
            .unwrap();
        for (d, s) in dest.iter().zip(src.iter()) {
            let (x, y) = warp.evaluate(d.x, d.y);
            assert!((x - s.x).abs() < 1e-4, "{} vs {}", x, s.x);
            assert!((y - s.y).abs() < 1e-4, "{} vs {}", y, s.y);
        }
    }

    #[test]
    fn test_adaptive_lambda() {
        let dest = pts(&[(0.0, 0.0), (3.0, 4.0), (6.0, 8.0), (0.0, 0.0)]);
        // r2 per pair: 0-1 25, 0-2 100, 0-3 0, 1-2 25, 1-3 25, 2-3 100
        let solver = TpsSolver::new(TpsParams::new(1e-3, true));
        assert!((solver.effective_lambda(&dest) - 0.055).abs() < 1e-12);

        let fixed = TpsSolver::new(TpsParams::new(1e-3, false));
        assert_eq!(fixed.effective_lambda(&dest), 1e-3);

        let strict = TpsSolver::new(TpsParams {
            reg_lambda: 1e-3,
            adaptive: true,
            min_pair_distance: 6.0,
        });
        assert!((strict.effective_lambda(&dest) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_adaptive_lambda_all_coincident() {
        let dest = pts(&[(1.0, 1.0), (1.0, 1.0), (1.0, 1.0)]);
        let solver = TpsSolver::new(TpsParams::new(0.5, true));
        assert_eq!(solver.effective_lambda(&dest), 0.5);
    }

    #[test]
    fn test_invalid_lambda() {
        let p = pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let err = TpsSolver::new(TpsParams::new(bad, false))
                .solve(&p, &p)
                .unwrap_err();
            assert!(matches!(err, WarpError::InvalidInput(_)));
        }
    }
}
