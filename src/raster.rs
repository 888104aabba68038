//! Decoded 8-bit luminance rasters.
//!
//! Decoding arbitrary formats is the caller's job; this module only holds the
//! intensity grid the signature generator works on, backed by
//! [`image::GrayImage`]. Pixels stay integral so that rotating or mirroring a
//! raster permutes its neighbourhood sums exactly, which keeps oriented
//! signatures bit-identical.

use image::{imageops, DynamicImage, ImageBuffer, Luma, RgbImage};

use crate::error::{Error, Result};

type LumaBuffer = image::GrayImage;

/// Grayscale image with non-zero area.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    buffer: LumaBuffer,
}

fn dimensions(width: usize, height: usize) -> Result<(u32, u32)> {
    if width == 0 || height == 0 {
        return Err(Error::invalid_image(format!(
            "zero-area image ({width}x{height})"
        )));
    }
    let w = u32::try_from(width);
    let h = u32::try_from(height);
    match (w, h) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(Error::invalid_image(format!(
            "image dimensions overflow ({width}x{height})"
        ))),
    }
}

impl GrayImage {
    /// Wrap a row-major luminance buffer.
    pub fn from_luma8(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        let (w, h) = dimensions(width, height)?;
        let expected = width.checked_mul(height).ok_or_else(|| {
            Error::invalid_image(format!("image dimensions overflow ({width}x{height})"))
        })?;
        if pixels.len() != expected {
            return Err(Error::invalid_image(format!(
                "buffer holds {} pixels, {width}x{height} needs {expected}",
                pixels.len()
            )));
        }
        let buffer = ImageBuffer::from_raw(w, h, pixels)
            .ok_or_else(|| Error::invalid_image("buffer does not fit image dimensions"))?;
        Ok(Self { buffer })
    }

    /// Convert an interleaved RGB buffer to luminance.
    pub fn from_rgb8(width: usize, height: usize, rgb: &[u8]) -> Result<Self> {
        let (w, h) = dimensions(width, height)?;
        if rgb.len() != width.saturating_mul(height).saturating_mul(3) {
            return Err(Error::invalid_image(format!(
                "RGB buffer length {} does not match {width}x{height}",
                rgb.len()
            )));
        }
        let rgb = RgbImage::from_raw(w, h, rgb.to_vec())
            .ok_or_else(|| Error::invalid_image("buffer does not fit image dimensions"))?;
        Self::from_dynamic(&DynamicImage::ImageRgb8(rgb))
    }

    /// Luminance of an already decoded image of any colour type.
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        Self::from_image(image.to_luma8())
    }

    pub fn from_image(buffer: LumaBuffer) -> Result<Self> {
        dimensions(buffer.width() as usize, buffer.height() as usize)?;
        Ok(Self { buffer })
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, usize) -> u8,
    {
        let (w, h) = dimensions(width, height)?;
        let buffer = ImageBuffer::from_fn(w, h, |x, y| Luma([f(x as usize, y as usize)]));
        Ok(Self { buffer })
    }

    pub fn as_image(&self) -> &LumaBuffer {
        &self.buffer
    }

    pub fn into_image(self) -> LumaBuffer {
        self.buffer
    }

    pub fn width(&self) -> usize {
        self.buffer.width() as usize
    }

    pub fn height(&self) -> usize {
        self.buffer.height() as usize
    }

    /// Row-major pixels.
    pub fn pixels(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.buffer.get_pixel(x as u32, y as u32)[0]
    }

    /// Rotate 90° counter-clockwise.
    pub fn rotate90(&self) -> Self {
        // imageops turns clockwise; 270° clockwise is one counter-clockwise quarter turn.
        Self {
            buffer: imageops::rotate270(&self.buffer),
        }
    }

    /// Mirror left to right.
    pub fn flip_horizontal(&self) -> Self {
        Self {
            buffer: imageops::flip_horizontal(&self.buffer),
        }
    }

    /// Photographic negative.
    pub fn invert(&self) -> Self {
        let mut buffer = self.buffer.clone();
        imageops::invert(&mut buffer);
        Self { buffer }
    }

    /// Sum and count of the pixels in `[x0, x1) x [y0, y1)`.
    pub(crate) fn window_sum(&self, x0: usize, x1: usize, y0: usize, y1: usize) -> (u64, u64) {
        let width = self.width();
        let raw = self.buffer.as_raw();
        let mut sum = 0u64;
        for y in y0..y1 {
            let row = &raw[y * width..(y + 1) * width];
            sum += row[x0..x1].iter().map(|&p| p as u64).sum::<u64>();
        }
        (sum, ((x1 - x0) * (y1 - y0)) as u64)
    }
}
