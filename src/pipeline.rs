//! The full warp: validate, align, fit, evaluate, resample
//!
//! Each stage only consumes what the previous one produced. Nothing is
//! shared between calls, so a [`Warper`] can be reused or run from several
//! threads at once.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::affine::{AffineEstimator, AffineModel, LeastSquaresAffine};
use crate::error::{Result, WarpError};
use crate::field::DeformationField;
use crate::geometry::{extent, CorrespondenceSet, Point2D};
use crate::raster::RasterImage;
use crate::resample::{BorderFill, Interpolation, KernelResampler, Resampler};
use crate::tps::{TpsParams, TpsSolver, TpsWarp};

/// Affine residual, relative to the landmark extent, that is worth a warning
const RESIDUAL_WARN_RATIO: f64 = 0.1;

/// Everything that tunes a warp besides the inputs themselves
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WarpOptions {
    #[serde(default)]
    pub tps: TpsParams,
    #[serde(default)]
    pub interpolation: Interpolation,
    #[serde(default)]
    pub border_fill: BorderFill,
}

impl WarpOptions {
    pub fn new(reg_lambda: f64, adaptive: bool) -> Self {
        Self {
            tps: TpsParams::new(reg_lambda, adaptive),
            ..Self::default()
        }
    }
}

/// Final image plus every intermediate model, for inspection and export
#[derive(Debug, Clone)]
pub struct WarpOutput {
    pub image: RasterImage,
    pub affine: AffineModel,
    pub tps: TpsWarp,
    pub aligned_src: Vec<Point2D>,
    pub aligned_image: RasterImage,
    pub field: DeformationField,
}

/// Pipeline with injectable affine estimation and resampling
#[derive(Debug, Clone)]
pub struct Warper<E = LeastSquaresAffine, R = KernelResampler> {
    estimator: E,
    resampler: R,
    options: WarpOptions,
}

impl Warper {
    /// Least squares affine fit and the built-in kernel resampler
    pub fn new(options: WarpOptions) -> Self {
        Self {
            estimator: LeastSquaresAffine,
            resampler: KernelResampler::new(options.interpolation),
            options,
        }
    }
}

impl Default for Warper {
    fn default() -> Self {
        Self::new(WarpOptions::default())
    }
}

impl<E: AffineEstimator, R: Resampler> Warper<E, R> {
    /// Pipeline with caller-supplied capabilities.
    ///
    /// `options.interpolation` only configures the built-in
    /// [`KernelResampler`] created by [`Warper::new`]; an injected
    /// resampler picks its own kernel and the field is ignored.
    pub fn with_capabilities(estimator: E, resampler: R, options: WarpOptions) -> Self {
        Self {
            estimator,
            resampler,
            options,
        }
    }

    pub fn options(&self) -> &WarpOptions {
        &self.options
    }

    /// Warp `image` so that the `src` landmarks land on the `dest` landmarks.
    ///
    /// `output_size` is `(width, height)` of the result. Either a complete
    /// image is returned or the whole call fails.
    pub fn run(
        &self,
        dest: &[Point2D],
        src: &[Point2D],
        image: &RasterImage,
        output_size: (u32, u32),
    ) -> Result<WarpOutput> {
        let pairs = CorrespondenceSet::new(dest.to_vec(), src.to_vec())?;
        self.options.tps.validate()?;

        if image.is_empty() {
            return Err(WarpError::InvalidInput("source image is empty".into()));
        }
        let (out_w, out_h) = output_size;
        if out_w == 0 || out_h == 0 {
            return Err(WarpError::InvalidInput(format!(
                "output size {}x{} has no pixels",
                out_w, out_h
            )));
        }

        debug!(
            "Warping {}x{} image to {}x{} with {} landmark pairs",
            image.width(),
            image.height(),
            out_w,
            out_h,
            pairs.len()
        );

        let affine = self.estimator.estimate(&pairs)?;
        let rms = affine.rms_residual(&pairs);
        debug!("Affine pre-alignment {:?}, rms residual {:.3}", affine.matrix, rms);
        let scale = extent(pairs.dest());
        if scale > 0.0 && rms > RESIDUAL_WARN_RATIO * scale {
            warn!(
                "Affine fit leaves a large residual ({:.1} px over a {:.1} px landmark extent)",
                rms, scale
            );
        }
        let inverse = affine.inverse()?;
        let aligned_src = affine.transform_points(pairs.src());

        // Fit before touching pixels so a singular system fails fast
        let tps = TpsSolver::new(self.options.tps).solve(pairs.dest(), &aligned_src)?;

        let fill = self.options.border_fill;
        let pre_field = DeformationField::from_affine(&inverse, image.width(), image.height());
        let aligned_image = self.resampler.resample(image, &pre_field, &fill)?;

        let field = DeformationField::from_tps(&tps, out_w, out_h);
        let warped = self.resampler.resample(&aligned_image, &field, &fill)?;
        debug!("Warp finished: {}x{}", warped.width(), warped.height());

        Ok(WarpOutput {
            image: warped,
            affine,
            tps,
            aligned_src,
            aligned_image,
            field,
        })
    }
}

/// Warp with default capabilities, bicubic sampling and a white border
pub fn warp(
    dest: &[Point2D],
    src: &[Point2D],
    image: &RasterImage,
    output_size: (u32, u32),
    reg_lambda: f64,
    adaptive: bool,
) -> Result<RasterImage> {
    Warper::new(WarpOptions::new(reg_lambda, adaptive))
        .run(dest, src, image, output_size)
        .map(|out| out.image)
}
