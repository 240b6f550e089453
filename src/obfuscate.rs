//! Obfuscation kernels (C4): blur, mosaic, and pixelate transforms applied
//! in place to a rectangular region of a frame buffer.
//!
//! All three operate only on the sub-rectangle of `pixels`; bytes outside
//! `bbox` are never touched. The `image` crate's blur/resize math is
//! channel-order agnostic, so the raw 3-channel buffer (BGR per the
//! encoder contract) is safely round-tripped through `image::RgbImage`
//! without any color-space conversion taking place.

use image::{imageops, RgbImage};

use crate::error::RvaError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObfuscationStyle {
    Blur,
    Mosaic,
    Pixelate,
}

impl ObfuscationStyle {
    pub fn parse(s: &str) -> Result<Self, RvaError> {
        match s {
            "blur" => Ok(Self::Blur),
            "mosaic" => Ok(Self::Mosaic),
            "pixelate" => Ok(Self::Pixelate),
            other => Err(RvaError::InvalidInput(format!(
                "unknown obfuscation style '{other}' (expected blur, mosaic, or pixelate)"
            ))),
        }
    }
}

/// Applies `style` to the rectangle `(x1, y1, x2, y2)` (half-open, clamped
/// to frame bounds by the caller) of a `width x height` BGR24 frame buffer,
/// in place. A zero-area rectangle is a no-op.
pub fn apply(
    pixels: &mut [u8],
    width: u32,
    height: u32,
    bbox: (u32, u32, u32, u32),
    style: ObfuscationStyle,
) {
    let (x1, y1, x2, y2) = bbox;
    if x2 <= x1 || y2 <= y1 {
        return;
    }
    let (rw, rh) = (x2 - x1, y2 - y1);

    let mut region = RgbImage::new(rw, rh);
    for y in 0..rh {
        for x in 0..rw {
            let src = pixel_offset(width, x1 + x, y1 + y);
            region.put_pixel(x, y, image::Rgb([pixels[src], pixels[src + 1], pixels[src + 2]]));
        }
    }

    let transformed = match style {
        ObfuscationStyle::Blur => blur(&region, rw, rh),
        ObfuscationStyle::Mosaic => mosaic(&region, rw, rh),
        ObfuscationStyle::Pixelate => pixelate(&region, rw, rh),
    };

    for y in 0..rh {
        for x in 0..rw {
            let dst = pixel_offset(width, x1 + x, y1 + y);
            let p = transformed.get_pixel(x, y);
            pixels[dst] = p[0];
            pixels[dst + 1] = p[1];
            pixels[dst + 2] = p[2];
        }
    }
}

fn pixel_offset(width: u32, x: u32, y: u32) -> usize {
    (y as usize * width as usize + x as usize) * 3
}

/// Gaussian blur with kernel `k = max(5, (min(h, w) / 2) * 2 + 1)`, i.e. odd
/// and at least 5. `image::imageops::blur` takes a sigma rather than a
/// kernel size; sigma is derived the way the reference blur auto-derives it
/// from a kernel size (`sigma = max(0.8, (k - 1) / 6.0)`).
fn blur(region: &RgbImage, w: u32, h: u32) -> RgbImage {
    let k = kernel_size(w, h);
    let sigma = ((k - 1) as f32 / 6.0).max(0.8);
    imageops::blur(region, sigma)
}

fn kernel_size(w: u32, h: u32) -> u32 {
    let half = w.min(h) / 2;
    (half * 2 + 1).max(5)
}

/// Downsample to `(max(1, w/14), max(1, h/14))` with bilinear interpolation,
/// then nearest-neighbour upsample back to `(w, h)`.
fn mosaic(region: &RgbImage, w: u32, h: u32) -> RgbImage {
    const CELL_SIZE: u32 = 14;
    let small_w = (w / CELL_SIZE).max(1);
    let small_h = (h / CELL_SIZE).max(1);
    let small = imageops::resize(region, small_w, small_h, imageops::FilterType::Triangle);
    imageops::resize(&small, w, h, imageops::FilterType::Nearest)
}

/// Downsample by linear scale `0.15`, then nearest-neighbour upsample back
/// to `(w, h)`.
fn pixelate(region: &RgbImage, w: u32, h: u32) -> RgbImage {
    const SCALE: f32 = 0.15;
    let small_w = ((w as f32 * SCALE).round() as u32).max(1);
    let small_h = ((h as f32 * SCALE).round() as u32).max(1);
    let small = imageops::resize(region, small_w, small_h, imageops::FilterType::Triangle);
    imageops::resize(&small, w, h, imageops::FilterType::Nearest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let mut buf = vec![0u8; (width * height * 3) as usize];
        for px in buf.chunks_mut(3) {
            px.copy_from_slice(&color);
        }
        buf
    }

    #[test]
    fn zero_area_bbox_is_noop() {
        let mut pixels = solid_frame(20, 20, [10, 20, 30]);
        let before = pixels.clone();
        apply(&mut pixels, 20, 20, (5, 5, 5, 9), ObfuscationStyle::Blur);
        assert_eq!(pixels, before);
    }

    #[test]
    fn outside_bbox_unchanged() {
        let mut pixels = solid_frame(40, 40, [100, 150, 200]);
        // poke a distinctive marker pixel outside the region to be touched
        let marker_offset = pixel_offset(40, 2, 2);
        pixels[marker_offset] = 7;
        pixels[marker_offset + 1] = 8;
        pixels[marker_offset + 2] = 9;

        apply(&mut pixels, 40, 40, (20, 20, 40, 40), ObfuscationStyle::Mosaic);

        assert_eq!(
            &pixels[marker_offset..marker_offset + 3],
            &[7u8, 8, 9],
            "pixels outside the obfuscated bbox must be untouched"
        );
    }

    #[test]
    fn blur_on_solid_color_stays_solid() {
        let mut pixels = solid_frame(30, 30, [50, 60, 70]);
        apply(&mut pixels, 30, 30, (0, 0, 30, 30), ObfuscationStyle::Blur);
        for px in pixels.chunks(3) {
            assert_eq!(px, &[50, 60, 70]);
        }
    }

    #[test]
    fn style_parse_rejects_unknown() {
        assert!(ObfuscationStyle::parse("swirl").is_err());
        assert_eq!(ObfuscationStyle::parse("pixelate").unwrap(), ObfuscationStyle::Pixelate);
    }
}
