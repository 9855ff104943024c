//! Image resampling through a deformation field
//!
//! Every output pixel reads the input image at the fractional coordinate
//! stored in the field. Kernel taps that fall outside the input contribute
//! the border fill colour, so coordinates far outside the image come out as
//! exactly that colour and edges blend into it deterministically.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WarpError};
use crate::field::DeformationField;
use crate::raster::{RasterImage, MAX_CHANNELS};

/// Cubic convolution coefficient (Keys kernel)
const CUBIC_A: f64 = -0.75;

/// Interpolation kernel used when sampling between pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    Bilinear,
    #[default]
    Bicubic,
}

impl Interpolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interpolation::Nearest => "nearest",
            Interpolation::Bilinear => "bilinear",
            Interpolation::Bicubic => "bicubic",
        }
    }

    /// How far (in pixels) the kernel reaches past the sample coordinate
    fn support(&self) -> f64 {
        match self {
            Interpolation::Nearest => 0.5,
            Interpolation::Bilinear => 1.0,
            Interpolation::Bicubic => 2.0,
        }
    }
}

/// Constant colour for everything outside the input image.
///
/// Only the first `channels` entries are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BorderFill(pub [u8; MAX_CHANNELS]);

impl BorderFill {
    pub const WHITE: BorderFill = BorderFill([255, 255, 255, 255]);
    pub const BLACK: BorderFill = BorderFill([0, 0, 0, 255]);
}

impl Default for BorderFill {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Capability that samples an image at the coordinates of a field
pub trait Resampler {
    fn resample(
        &self,
        image: &RasterImage,
        field: &DeformationField,
        fill: &BorderFill,
    ) -> Result<RasterImage>;
}

/// Resampler backed by the built-in interpolation kernels
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelResampler {
    pub interpolation: Interpolation,
}

impl KernelResampler {
    pub fn new(interpolation: Interpolation) -> Self {
        Self { interpolation }
    }
}

impl Resampler for KernelResampler {
    fn resample(
        &self,
        image: &RasterImage,
        field: &DeformationField,
        fill: &BorderFill,
    ) -> Result<RasterImage> {
        if image.is_empty() {
            return Err(WarpError::InvalidInput("cannot resample an empty image".into()));
        }

        let (width, height) = (field.width(), field.height());
        let channels = image.channels();
        let stride = width as usize * channels;
        let mut data = vec![0u8; stride * height as usize];

        if !data.is_empty() {
            data.par_chunks_mut(stride)
                .enumerate()
                .for_each(|(y, row)| {
                    let (xs, ys) = field.row(y as u32);
                    for ((px, &sx), &sy) in row.chunks_exact_mut(channels).zip(xs).zip(ys) {
                        let value = sample(image, sx, sy, self.interpolation, fill);
                        px.copy_from_slice(&value[..channels]);
                    }
                });
        }

        RasterImage::new(width, height, channels, data)
    }
}

/// Sample one pixel with the given kernel
#[inline]
pub fn sample(
    image: &RasterImage,
    x: f64,
    y: f64,
    interpolation: Interpolation,
    fill: &BorderFill,
) -> [u8; MAX_CHANNELS] {
    let reach = interpolation.support();
    let (w, h) = (image.width() as f64, image.height() as f64);
    if !x.is_finite()
        || !y.is_finite()
        || x <= -1.0 - reach
        || y <= -1.0 - reach
        || x >= w + reach
        || y >= h + reach
    {
        return fill.0;
    }

    match interpolation {
        Interpolation::Nearest => nearest_sample(image, x, y, fill),
        Interpolation::Bilinear => bilinear_sample(image, x, y, fill),
        Interpolation::Bicubic => bicubic_sample(image, x, y, fill),
    }
}

/// Add `weight` times the pixel at `(ix, iy)`, or the fill colour outside
#[inline]
fn accumulate(
    image: &RasterImage,
    ix: i64,
    iy: i64,
    weight: f64,
    fill: &BorderFill,
    acc: &mut [f64; MAX_CHANNELS],
) {
    match image.pixel(ix, iy) {
        Some(px) => {
            for (a, &v) in acc.iter_mut().zip(px) {
                *a += weight * v as f64;
            }
        }
        None => {
            for (a, &v) in acc.iter_mut().zip(fill.0.iter()).take(image.channels()) {
                *a += weight * v as f64;
            }
        }
    }
}

#[inline]
fn finish(acc: [f64; MAX_CHANNELS]) -> [u8; MAX_CHANNELS] {
    acc.map(|v| v.round().clamp(0.0, 255.0) as u8)
}

/// Nearest-neighbour sampling
#[inline]
pub fn nearest_sample(image: &RasterImage, x: f64, y: f64, fill: &BorderFill) -> [u8; MAX_CHANNELS] {
    let mut result = [0u8; MAX_CHANNELS];
    match image.pixel(x.round() as i64, y.round() as i64) {
        Some(px) => result[..px.len()].copy_from_slice(px),
        None => result = fill.0,
    }
    result
}

/// Bilinear interpolation over the 2x2 neighbourhood
#[inline]
pub fn bilinear_sample(image: &RasterImage, x: f64, y: f64, fill: &BorderFill) -> [u8; MAX_CHANNELS] {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = [0.0f64; MAX_CHANNELS];
    accumulate(image, x0, y0, (1.0 - fx) * (1.0 - fy), fill, &mut acc);
    accumulate(image, x0 + 1, y0, fx * (1.0 - fy), fill, &mut acc);
    accumulate(image, x0, y0 + 1, (1.0 - fx) * fy, fill, &mut acc);
    accumulate(image, x0 + 1, y0 + 1, fx * fy, fill, &mut acc);
    finish(acc)
}

/// Cubic convolution weights for the taps at offsets -1, 0, 1, 2
#[inline]
fn cubic_weights(t: f64) -> [f64; 4] {
    let a = CUBIC_A;
    let near = |d: f64| ((a + 2.0) * d - (a + 3.0)) * d * d + 1.0;
    let far = |d: f64| ((a * d - 5.0 * a) * d + 8.0 * a) * d - 4.0 * a;
    [far(1.0 + t), near(t), near(1.0 - t), far(2.0 - t)]
}

/// Bicubic interpolation over the 4x4 neighbourhood
#[inline]
pub fn bicubic_sample(image: &RasterImage, x: f64, y: f64, fill: &BorderFill) -> [u8; MAX_CHANNELS] {
    let x0 = x.floor();
    let y0 = y.floor();
    let wx = cubic_weights(x - x0);
    let wy = cubic_weights(y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = [0.0f64; MAX_CHANNELS];
    for (j, wyj) in wy.iter().enumerate() {
        for (i, wxi) in wx.iter().enumerate() {
            let weight = wxi * wyj;
            if weight != 0.0 {
                accumulate(image, x0 + i as i64 - 1, y0 + j as i64 - 1, weight, fill, &mut acc);
            }
        }
    }
    finish(acc)
}
