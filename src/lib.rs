//! KartenWarp - landmark-driven map warping
//!
//! Given matching landmarks clicked on a stylized game map (destination) and
//! on a real-world map (source), this crate warps the real-world map onto
//! the game map's geometry:
//!
//! 1. the landmark lists are validated,
//! 2. an affine transform pre-aligns the source image and landmarks,
//! 3. a regularized thin plate spline models the remaining deformation,
//! 4. the spline is evaluated over every output pixel,
//! 5. the pre-aligned image is resampled through that field.
//!
//! ```no_run
//! use kartenwarp::{warp, Point2D, RasterImage};
//!
//! # fn main() -> Result<(), kartenwarp::WarpError> {
//! let game = vec![Point2D::new(10.0, 10.0), Point2D::new(90.0, 12.0), Point2D::new(15.0, 85.0)];
//! let real = vec![Point2D::new(5.0, 8.0), Point2D::new(70.0, 5.0), Point2D::new(9.0, 66.0)];
//! let source = RasterImage::filled(100, 100, 3, [255, 255, 255, 255])?;
//! let warped = warp(&game, &real, &source, (100, 100), 1e-3, false)?;
//! assert_eq!(warped.dimensions(), (100, 100));
//! # Ok(())
//! # }
//! ```

pub mod affine;
pub mod config;
pub mod error;
pub mod field;
pub mod geometry;
pub mod pipeline;
pub mod raster;
pub mod resample;
pub mod tps;

pub use affine::{AffineEstimator, AffineModel, LeastSquaresAffine};
pub use error::WarpError;
pub use field::DeformationField;
pub use geometry::{CorrespondenceSet, Point2D};
pub use pipeline::{warp, WarpOptions, WarpOutput, Warper};
pub use raster::RasterImage;
pub use resample::{BorderFill, Interpolation, KernelResampler, Resampler};
pub use tps::{TpsModel, TpsParams, TpsSolver, TpsWarp};
