//! Dense per-pixel sampling coordinates
//!
//! A [`DeformationField`] tells the resampler, for every output pixel, which
//! fractional coordinate of the input image to read. Rows are filled in
//! parallel; each cell depends only on the read-only model.

use rayon::prelude::*;

use crate::affine::AffineModel;
use crate::tps::TpsWarp;

/// Two row-major `height x width` coordinate grids
#[derive(Debug, Clone, PartialEq)]
pub struct DeformationField {
    width: u32,
    height: u32,
    map_x: Vec<f64>,
    map_y: Vec<f64>,
}

impl DeformationField {
    /// Fill a field from any per-pixel mapping `(x, y) -> (sx, sy)`.
    ///
    /// `make_row` is called once per row and returns the closure that maps
    /// the pixels of that row, so per-row scratch buffers stay thread-local.
    fn build_with<F, M>(width: u32, height: u32, make_row: M) -> Self
    where
        M: Fn() -> F + Sync,
        F: FnMut(f64, f64) -> (f64, f64),
    {
        let w = width as usize;
        let len = w * height as usize;
        let mut map_x = vec![0.0; len];
        let mut map_y = vec![0.0; len];

        if len > 0 {
            map_x
                .par_chunks_mut(w)
                .zip(map_y.par_chunks_mut(w))
                .enumerate()
                .for_each(|(row, (xs, ys))| {
                    let mut map = make_row();
                    let fy = row as f64;
                    for (col, (sx, sy)) in xs.iter_mut().zip(ys.iter_mut()).enumerate() {
                        let (mx, my) = map(col as f64, fy);
                        *sx = mx;
                        *sy = my;
                    }
                });
        }

        Self {
            width,
            height,
            map_x,
            map_y,
        }
    }

    /// Evaluate a fitted spline over every integer pixel of the output grid
    pub fn from_tps(warp: &TpsWarp, width: u32, height: u32) -> Self {
        let n = warp.centers.len();
        let field = Self::build_with(width, height, move || {
            let mut kernels = Vec::with_capacity(n);
            move |x, y| {
                warp.kernels_at(x, y, &mut kernels);
                (
                    warp.x.evaluate_with(&kernels, x, y),
                    warp.y.evaluate_with(&kernels, x, y),
                )
            }
        });
        tracing::debug!("Deformation field built: {}x{} from {} control points", width, height, n);
        field
    }

    /// Field that pulls each pixel through an affine transform.
    ///
    /// Pass the inverse of a forward warp to resample an image with it.
    pub fn from_affine(model: &AffineModel, width: u32, height: u32) -> Self {
        Self::build_with(width, height, move || move |x, y| model.apply(x, y))
    }

    /// Field that leaves every pixel where it is
    pub fn identity(width: u32, height: u32) -> Self {
        Self::from_affine(&AffineModel::identity(), width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Sampling coordinate for output pixel `(x, y)`
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> (f64, f64) {
        let i = y as usize * self.width as usize + x as usize;
        (self.map_x[i], self.map_y[i])
    }

    pub fn map_x(&self) -> &[f64] {
        &self.map_x
    }

    pub fn map_y(&self) -> &[f64] {
        &self.map_y
    }

    /// Both coordinate rows for output row `y`
    #[inline]
    pub fn row(&self, y: u32) -> (&[f64], &[f64]) {
        let w = self.width as usize;
        let start = y as usize * w;
        (&self.map_x[start..start + w], &self.map_y[start..start + w])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2D;
    use crate::tps::{TpsParams, TpsSolver};

    #[test]
    fn test_identity_field() {
        let field = DeformationField::identity(4, 3);
        assert_eq!(field.map_x().len(), 12);
        assert_eq!(field.get(3, 2), (3.0, 2.0));
        assert_eq!(field.get(0, 1), (0.0, 1.0));
    }

    #[test]
    fn test_affine_field() {
        let shift = AffineModel::new([[1.0, 0.0, 2.5], [0.0, 2.0, -1.0]]);
        let field = DeformationField::from_affine(&shift, 5, 5);
        assert_eq!(field.get(1, 3), (3.5, 5.0));
        let (xs, ys) = field.row(4);
        assert_eq!(xs[0], 2.5);
        assert_eq!(ys[0], 7.0);
    }

    #[test]
    fn test_identity_tps_field() {
        let p: Vec<Point2D> = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]
            .into_iter()
            .map(Point2D::from)
            .collect();
        let warp = TpsSolver::new(TpsParams::new(1e-3, false)).solve(&p, &p).unwrap();
        let field = DeformationField::from_tps(&warp, 16, 12);
        for y in 0..12 {
            for x in 0..16 {
                let (mx, my) = field.get(x, y);
                assert!((mx - x as f64).abs() < 1e-6, "map_x[{}][{}] = {}", y, x, mx);
                assert!((my - y as f64).abs() < 1e-6, "map_y[{}][{}] = {}", y, x, my);
            }
        }
    }

    #[test]
    fn test_field_matches_point_evaluation() {
        let dest: Vec<Point2D> = [(0.0, 0.0), (20.0, 0.0), (0.0, 20.0), (20.0, 20.0), (9.0, 11.0)]
            .into_iter()
            .map(Point2D::from)
            .collect();
        let mut src = dest.clone();
        src[4] = Point2D::new(12.0, 8.0);

        let warp = TpsSolver::default().solve(&dest, &src).unwrap();
        let field = DeformationField::from_tps(&warp, 21, 21);
        for &(x, y) in &[(0u32, 0u32), (9, 11), (20, 3), (7, 19)] {
            let expected = warp.evaluate(x as f64, y as f64);
            assert_eq!(field.get(x, y), expected);
        }
    }

    #[test]
    fn test_empty_field() {
        let field = DeformationField::identity(0, 7);
        assert!(field.map_x().is_empty());
        assert_eq!(field.height(), 7);
    }
}
