// src/engine/encoder.rs
//
// Encoder operations: JPEG (mozjpeg), PNG (image + oxipng), WebP (libwebp)
// from an RGBA pixel buffer at a given quality.

use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::engine::pixels::PixelBuffer;
use crate::engine::MAX_DIMENSION;
use crate::error::LayeredImageError;
use crate::ops::OutputFormat;
use image::{ImageFormat, RgbaImage};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::io::Cursor;

/// Single source of truth for mapping a 0-100 quality to codec knobs.
/// Bands:
/// - High (>=85): visual quality first
/// - Balanced (70-84)
/// - Fast (50-69)
/// - Fastest (<50)
/// WebP filter_strength keeps its own 80/60 thresholds.
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    quality: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QualityBand {
    High,
    Balanced,
    Fast,
    Fastest,
}

impl QualitySettings {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.min(100) as f32,
        }
    }

    fn band(&self) -> QualityBand {
        if self.quality >= 85.0 {
            QualityBand::High
        } else if self.quality >= 70.0 {
            QualityBand::Balanced
        } else if self.quality >= 50.0 {
            QualityBand::Fast
        } else {
            QualityBand::Fastest
        }
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// mozjpeg input smoothing; low qualities benefit from pre-blurring noise.
    pub fn jpeg_smoothing(&self) -> u8 {
        match self.band() {
            QualityBand::High if self.quality >= 90.0 => 0,
            QualityBand::High | QualityBand::Balanced => 5,
            QualityBand::Fast => 10,
            QualityBand::Fastest => 18,
        }
    }

    pub fn webp_method(&self) -> i32 {
        4
    }

    pub fn webp_sns_strength(&self) -> i32 {
        match self.band() {
            QualityBand::High => 50,
            QualityBand::Balanced => 70,
            QualityBand::Fast | QualityBand::Fastest => 80,
        }
    }

    pub fn webp_filter_strength(&self) -> i32 {
        if self.quality >= 80.0 {
            20
        } else if self.quality >= 60.0 {
            30
        } else {
            40
        }
    }

    pub fn webp_filter_sharpness(&self) -> i32 {
        match self.band() {
            QualityBand::High => 2,
            QualityBand::Balanced | QualityBand::Fast | QualityBand::Fastest => 0,
        }
    }
}

/// Encode the whole buffer in `format`. Quality is ignored for PNG.
pub fn encode_pixels(
    pixels: &PixelBuffer,
    format: OutputFormat,
    quality: u8,
) -> EngineResult<Vec<u8>> {
    validate_buffer(pixels, format)?;
    match format {
        OutputFormat::Jpeg => encode_jpeg(pixels, quality),
        OutputFormat::Png => encode_png(pixels),
        OutputFormat::WebP => encode_webp(pixels, quality),
    }
}

fn validate_buffer(pixels: &PixelBuffer, format: OutputFormat) -> EngineResult<()> {
    let (w, h) = pixels.dimensions();
    if w == 0 || h == 0 {
        return Err(LayeredImageError::encode_failed(
            format.as_str(),
            "width or height is zero",
        ));
    }
    if w > MAX_DIMENSION || h > MAX_DIMENSION {
        return Err(LayeredImageError::dimension_exceeds_limit(
            w.max(h),
            MAX_DIMENSION,
        ));
    }
    Ok(())
}

/// Encode to JPEG using mozjpeg: progressive, optimized Huffman, 4:2:0.
pub fn encode_jpeg(pixels: &PixelBuffer, quality: u8) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let settings = QualitySettings::new(quality);
        let (w, h) = pixels.dimensions();
        let rgb = pixels.to_rgb_bytes();

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.quality());
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        comp.set_smoothing_factor(settings.jpeg_smoothing());

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);
        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                LayeredImageError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to start compress: {e:?}"),
                )
            })?;
            for row in rgb.chunks(w as usize * 3) {
                writer.write_scanlines(row).map_err(|e| {
                    LayeredImageError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }
            writer.finish().map_err(|e| {
                LayeredImageError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }
        Ok(output)
    })
}

/// Encode to PNG with the image crate, then losslessly squeeze with oxipng.
pub fn encode_png(pixels: &PixelBuffer) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let (w, h) = pixels.dimensions();
        let rgba = RgbaImage::from_raw(w, h, pixels.as_raw().to_vec())
            .ok_or_else(LayeredImageError::corrupted_image)?;

        let mut buf = Vec::new();
        rgba.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| LayeredImageError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(2);
        options.strip = oxipng::StripChunks::Safe;
        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            LayeredImageError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Encode to lossy WebP without an alpha channel.
pub fn encode_webp(pixels: &PixelBuffer, quality: u8) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let (w, h) = pixels.dimensions();
        let rgb = pixels.to_rgb_bytes();
        let encoder = webp::Encoder::from_rgb(&rgb, w, h);

        let mut config = webp::WebPConfig::new()
            .map_err(|_| LayeredImageError::internal_panic("failed to create WebPConfig"))?;
        let settings = QualitySettings::new(quality);
        config.quality = settings.quality();
        config.method = settings.webp_method();
        config.pass = 1;
        config.preprocessing = 0;
        config.sns_strength = settings.webp_sns_strength();
        config.autofilter = 1;
        config.filter_strength = settings.webp_filter_strength();
        config.filter_sharpness = settings.webp_filter_sharpness();

        let mem = encoder.encode_advanced(&config).map_err(|e| {
            LayeredImageError::encode_failed("webp", format!("WebP encode failed: {e:?}"))
        })?;
        Ok(mem.to_vec())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_pixels(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_fn(width, height, |x, y| {
            [(x % 256) as u8, (y % 256) as u8, 128, 255]
        })
        .unwrap()
    }

    #[test]
    fn test_encode_jpeg_produces_valid_jpeg() {
        let px = create_test_pixels(64, 64);
        let out = encode_pixels(&px, OutputFormat::Jpeg, 80).unwrap();
        assert_eq!(&out[0..2], &[0xFF, 0xD8]);
        assert_eq!(&out[out.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_encode_png_produces_valid_png() {
        let px = create_test_pixels(32, 32);
        let out = encode_pixels(&px, OutputFormat::Png, 10).unwrap();
        assert_eq!(OutputFormat::sniff(&out), Some(OutputFormat::Png));
    }

    #[test]
    fn test_encode_webp_produces_valid_webp() {
        let px = create_test_pixels(32, 32);
        let out = encode_pixels(&px, OutputFormat::WebP, 75).unwrap();
        assert_eq!(&out[0..4], b"RIFF");
        assert_eq!(&out[8..12], b"WEBP");
    }

    #[test]
    fn test_jpeg_quality_affects_size() {
        let px = PixelBuffer::from_fn(128, 128, |x, y| {
            [((x * 7) ^ (y * 13)) as u8, (x * y) as u8, (x + y) as u8, 255]
        })
        .unwrap();
        let high = encode_jpeg(&px, 95).unwrap();
        let low = encode_jpeg(&px, 20).unwrap();
        assert!(high.len() > low.len());
    }

    #[test]
    fn test_quality_band_mapping_is_stable() {
        let high = QualitySettings::new(95);
        assert_eq!(high.jpeg_smoothing(), 0);
        assert_eq!(high.webp_sns_strength(), 50);
        assert_eq!(high.webp_filter_sharpness(), 2);

        let balanced = QualitySettings::new(75);
        assert_eq!(balanced.jpeg_smoothing(), 5);
        assert_eq!(balanced.webp_filter_strength(), 30);

        let fastest = QualitySettings::new(40);
        assert_eq!(fastest.jpeg_smoothing(), 18);
        assert_eq!(fastest.webp_sns_strength(), 80);
        assert_eq!(fastest.webp_filter_strength(), 40);
    }

    #[test]
    fn test_quality_clamped_to_100() {
        assert_eq!(QualitySettings::new(250).quality(), 100.0);
    }
}
