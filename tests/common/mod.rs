//! Synthetic test images.
//!
//! Images are rendered from a smooth function of normalized coordinates, so
//! rendering the same seed at another size behaves like a resampled copy.

#![allow(dead_code)]

use image::imageops::{self, FilterType};
use imagesig_retrieval::GrayImage;

/// Smooth, structured image for `seed`, rendered at `width` x `height`.
pub fn render(seed: u32, width: usize, height: usize) -> GrayImage {
    let s = seed as f64;
    let fx = 1.0 + (s * 1.7) % 3.0;
    let fy = 1.0 + (s * 2.3) % 2.5;
    let phase = s * 0.9;
    GrayImage::from_fn(width, height, |x, y| {
        let u = (x as f64 + 0.5) / width as f64;
        let v = (y as f64 + 0.5) / height as f64;
        let value = 128.0
            + 55.0 * (fx * u * std::f64::consts::TAU + phase).sin()
            + 45.0 * (fy * v * std::f64::consts::TAU - phase * 0.5).cos()
            + 20.0 * ((u * 2.0 + v * 1.5 + s * 0.37) * std::f64::consts::TAU).sin();
        value.round().clamp(0.0, 255.0) as u8
    })
    .expect("non-empty image")
}

/// The default-size rendering used by most tests.
pub fn image(seed: u32) -> GrayImage {
    render(seed, 160, 120)
}

/// A resampled copy of `image(seed)` with light deterministic pixel noise.
pub fn near_duplicate(seed: u32) -> GrayImage {
    let base = render(seed, 152, 114);
    let pixels = base
        .pixels()
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let noise = ((i * 7919) % 5) as i16 - 2;
            (p as i16 + noise).clamp(0, 255) as u8
        })
        .collect();
    GrayImage::from_luma8(base.width(), base.height(), pixels).expect("same dimensions")
}

/// `image(seed)` resampled to `1/factor` of its size with a box-like
/// filter, then coarsened to 64 grey levels like a lossy re-encode.
pub fn downsampled(seed: u32, factor: u32) -> GrayImage {
    let source = image(seed);
    let buffer = source.as_image();
    let mut small = imageops::resize(
        buffer,
        buffer.width() / factor,
        buffer.height() / factor,
        FilterType::Triangle,
    );
    for pixel in small.pixels_mut() {
        pixel.0[0] &= !3;
    }
    GrayImage::from_image(small).expect("non-empty image")
}

pub fn rotate180(image: &GrayImage) -> GrayImage {
    image.rotate90().rotate90()
}
