// src/engine/pixels.rs
//
// RGBA8 pixel buffer shared by every stage, plus the optional max-width
// pre-scale applied before analysis.

use crate::engine::common::EngineResult;
use crate::error::LayeredImageError;
use fast_image_resize::{self as fir, MulDiv, PixelType, ResizeOptions};
use image::{imageops::FilterType, DynamicImage, RgbaImage};

/// Interleaved RGBA8 pixels, row-major, no padding.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    pub const CHANNELS: usize = 4;

    /// Wrap raw RGBA bytes. Fails if the length does not match the dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> EngineResult<Self> {
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(LayeredImageError::corrupted_image());
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// All-zero buffer (transparent black).
    pub fn zeroed(width: u32, height: u32) -> EngineResult<Self> {
        let len = expected_len(width, height)?;
        Ok(Self {
            width,
            height,
            data: vec![0; len],
        })
    }

    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> EngineResult<Self>
    where
        F: FnMut(u32, u32) -> [u8; 4],
    {
        let mut buf = Self::zeroed(width, height)?;
        for y in 0..height {
            for x in 0..width {
                let idx = (y as usize * width as usize + x as usize) * Self::CHANNELS;
                buf.data[idx..idx + 4].copy_from_slice(&f(x, y));
            }
        }
        Ok(buf)
    }

    pub fn from_dynamic(img: DynamicImage) -> Self {
        let rgba = match img {
            DynamicImage::ImageRgba8(rgba) => rgba,
            other => other.to_rgba8(),
        };
        let (width, height) = rgba.dimensions();
        Self {
            width,
            height,
            data: rgba.into_raw(),
        }
    }

    pub fn to_dynamic(&self) -> EngineResult<DynamicImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(LayeredImageError::corrupted_image)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// RGBA at a linear pixel index.
    pub fn pixel(&self, index: usize) -> [u8; 4] {
        let i = index * Self::CHANNELS;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Drop the alpha channel; codecs here only carry RGB.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.pixel_count() * 3);
        for px in self.data.chunks_exact(Self::CHANNELS) {
            rgb.extend_from_slice(&px[..3]);
        }
        rgb
    }

    pub fn from_rgb_bytes(width: u32, height: u32, rgb: &[u8]) -> EngineResult<Self> {
        let pixels = width as usize * height as usize;
        if rgb.len() != pixels * 3 {
            return Err(LayeredImageError::corrupted_image());
        }
        let mut data = Vec::with_capacity(pixels * Self::CHANNELS);
        for px in rgb.chunks_exact(3) {
            data.extend_from_slice(px);
            data.push(255);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }
}

fn expected_len(width: u32, height: u32) -> EngineResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(PixelBuffer::CHANNELS))
        .ok_or_else(|| LayeredImageError::pixel_count_exceeds_limit(u64::MAX, super::MAX_PIXELS))
}

/// Target dimensions for a max-width constraint. Never upscales; height
/// follows the aspect ratio, rounded, and never drops below one row.
pub fn calc_target_dimensions(orig_w: u32, orig_h: u32, max_width: Option<u32>) -> (u32, u32) {
    match max_width {
        Some(max) if max > 0 && orig_w > max => {
            let ratio = max as f64 / orig_w as f64;
            let h = ((orig_h as f64 * ratio).round() as u32).max(1);
            (max, h)
        }
        _ => (orig_w, orig_h),
    }
}

/// Apply the max-width pre-scale. Returns the input untouched when no
/// downscale is needed.
pub fn prescale(src: PixelBuffer, max_width: Option<u32>) -> EngineResult<PixelBuffer> {
    let (src_w, src_h) = src.dimensions();
    let (dst_w, dst_h) = calc_target_dimensions(src_w, src_h, max_width);
    if (dst_w, dst_h) == (src_w, src_h) {
        return Ok(src);
    }
    tracing::debug!(src_w, src_h, dst_w, dst_h, "prescale");
    resize_rgba(src, dst_w, dst_h)
}

fn default_resize_options() -> ResizeOptions {
    ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3))
}

fn resize_rgba(src: PixelBuffer, dst_w: u32, dst_h: u32) -> EngineResult<PixelBuffer> {
    let (src_w, src_h) = src.dimensions();
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return Err(LayeredImageError::resize_failed(
            (src_w, src_h),
            (dst_w, dst_h),
            "invalid dimensions for resize",
        ));
    }

    let mut pixels = src.into_raw();
    let primary = fir_resize(&mut pixels, src_w, src_h, dst_w, dst_h);
    match primary {
        Ok(buf) => Ok(buf),
        Err(err) => {
            tracing::warn!(%err, "fast resize failed, using image crate fallback");
            let rgba = RgbaImage::from_raw(src_w, src_h, pixels).ok_or_else(|| {
                LayeredImageError::resize_failed((src_w, src_h), (dst_w, dst_h), err.clone())
            })?;
            let resized = image::imageops::resize(&rgba, dst_w, dst_h, FilterType::Lanczos3);
            PixelBuffer::new(dst_w, dst_h, resized.into_raw())
        }
    }
}

fn fir_resize(
    pixels: &mut [u8],
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
) -> std::result::Result<PixelBuffer, String> {
    let mut src_image =
        fir::images::Image::from_slice_u8(src_w, src_h, pixels, PixelType::U8x4)
            .map_err(|e| format!("fir source image error: {e:?}"))?;
    let mut dst_image = fir::images::Image::new(dst_w, dst_h, PixelType::U8x4);

    // Premultiply so transparent pixels do not bleed color into neighbors.
    let needs_premultiply = src_image.buffer().iter().skip(3).step_by(4).any(|&a| a != 255);
    let mul_div = MulDiv::default();
    if needs_premultiply {
        mul_div
            .multiply_alpha_inplace(&mut src_image)
            .map_err(|e| format!("failed to premultiply alpha: {e}"))?;
    }

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, &default_resize_options())
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    if needs_premultiply {
        mul_div
            .divide_alpha_inplace(&mut dst_image)
            .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;
    }

    PixelBuffer::new(dst_w, dst_h, dst_image.into_vec()).map_err(|e| e.to_string())
}
