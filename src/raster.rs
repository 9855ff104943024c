//! In-memory raster images
//!
//! The warping core works on interleaved 8-bit samples with one to four
//! channels. Channel order is whatever the caller put in; nothing in the
//! pipeline reorders channels.

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};

use crate::error::{Result, WarpError};

/// Largest supported channel count (RGBA)
pub const MAX_CHANNELS: usize = 4;

/// An interleaved 8-bit image, row-major, no padding between rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<u8>,
}

impl RasterImage {
    /// Wrap an existing pixel buffer
    pub fn new(width: u32, height: u32, channels: usize, data: Vec<u8>) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(WarpError::InvalidInput(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        let expected = width as usize * height as usize * channels;
        if data.len() != expected {
            return Err(WarpError::InvalidInput(format!(
                "pixel buffer holds {} bytes, {}x{}x{} needs {}",
                data.len(),
                width,
                height,
                channels,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// An image filled with a single colour; only the first `channels`
    /// entries of `color` are used
    pub fn filled(width: u32, height: u32, channels: usize, color: [u8; MAX_CHANNELS]) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(WarpError::InvalidInput(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        let pixels = width as usize * height as usize;
        let data = color[..channels].repeat(pixels);
        Self::new(width, height, channels, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bytes per row
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Samples of the pixel at `(x, y)`, or `None` outside the image
    #[inline]
    pub fn pixel(&self, x: i64, y: i64) -> Option<&[u8]> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * self.channels;
        Some(&self.data[offset..offset + self.channels])
    }

    /// Convert a decoded image, keeping grey, grey+alpha, RGB and RGBA
    /// layouts. Any other pixel format becomes RGB8 or RGBA8.
    pub fn from_dynamic(img: DynamicImage) -> Self {
        let (width, height, channels, data) = match img {
            DynamicImage::ImageLuma8(buf) => (buf.width(), buf.height(), 1, buf.into_raw()),
            DynamicImage::ImageLumaA8(buf) => (buf.width(), buf.height(), 2, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (buf.width(), buf.height(), 3, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (buf.width(), buf.height(), 4, buf.into_raw()),
            other if other.color().has_alpha() => {
                let buf = other.into_rgba8();
                (buf.width(), buf.height(), 4, buf.into_raw())
            }
            other => {
                let buf = other.into_rgb8();
                (buf.width(), buf.height(), 3, buf.into_raw())
            }
        };
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    /// Hand the pixels back to the `image` crate for encoding
    pub fn into_dynamic(self) -> Result<DynamicImage> {
        let (w, h) = (self.width, self.height);
        let img = match self.channels {
            1 => GrayImage::from_raw(w, h, self.data).map(DynamicImage::ImageLuma8),
            2 => GrayAlphaImage::from_raw(w, h, self.data).map(DynamicImage::ImageLumaA8),
            3 => RgbImage::from_raw(w, h, self.data).map(DynamicImage::ImageRgb8),
            4 => RgbaImage::from_raw(w, h, self.data).map(DynamicImage::ImageRgba8),
            _ => None,
        };
        img.ok_or_else(|| {
            WarpError::InvalidInput(format!("cannot build a {}x{} image buffer", w, h))
        })
    }
}

impl From<RgbImage> for RasterImage {
    fn from(buf: RgbImage) -> Self {
        Self::from_dynamic(DynamicImage::ImageRgb8(buf))
    }
}
