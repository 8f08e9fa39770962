// src/engine/decoder.rs
//
// Pixel source adapter: compressed bytes -> full-resolution RGBA buffer.
// JPEG goes through mozjpeg, PNG through zune-png, WebP through libwebp,
// anything else through the image crate.

use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::engine::pixels::PixelBuffer;
use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::LayeredImageError;
use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use mozjpeg::Decompress;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

/// Decoded source image plus what we learned about its container.
#[derive(Debug, Clone)]
pub struct DecodedSource {
    pub pixels: PixelBuffer,
    pub format: Option<ImageFormat>,
}

/// Decode source bytes into RGBA. Either the whole buffer is produced or an
/// error is returned; nothing is partially populated.
pub fn decode_source(bytes: &[u8]) -> EngineResult<DecodedSource> {
    if bytes.is_empty() {
        return Err(LayeredImageError::decode_failed("empty input"));
    }
    let format = detect_format(bytes);
    let img = match format {
        Some(ImageFormat::Jpeg) => decode_jpeg_mozjpeg(bytes)?,
        Some(ImageFormat::Png) => decode_png_zune(bytes)?,
        Some(ImageFormat::WebP) => decode_webp_libwebp(bytes)?,
        Some(_) => decode_with_image_crate(bytes)?,
        None => return Err(LayeredImageError::unsupported_format("unknown")),
    };
    check_dimensions(img.width(), img.height())?;
    Ok(DecodedSource {
        pixels: PixelBuffer::from_dynamic(img),
        format,
    })
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo)
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(LayeredImageError::decode_failed(
                "mozjpeg: missing JPEG EOI marker",
            ));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            LayeredImageError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;
        let mut decompress = decompress.rgb().map_err(|e| {
            LayeredImageError::decode_failed(format!("mozjpeg rgb conversion failed: {e:?}"))
        })?;

        let width = decompress.width();
        let height = decompress.height();
        if width > MAX_DIMENSION as usize || height > MAX_DIMENSION as usize {
            return Err(LayeredImageError::dimension_exceeds_limit(
                width.max(height) as u32,
                MAX_DIMENSION,
            ));
        }
        let (width, height) = (width as u32, height as u32);
        check_dimensions(width, height)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            LayeredImageError::decode_failed(format!("mozjpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat: Vec<u8> = pixels.into_iter().flatten().collect();

        RgbImage::from_raw(width, height, flat)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| {
                LayeredImageError::decode_failed("mozjpeg: failed to create image from raw data")
            })
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
pub fn decode_png_zune(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        let pixels = decoder
            .decode()
            .map_err(|e| LayeredImageError::decode_failed(format!("png: decode failed: {e}")))?;

        let info = decoder
            .info()
            .ok_or_else(|| LayeredImageError::decode_failed("png: missing header info"))?;
        let width = info.width as u32;
        let height = info.height as u32;
        check_dimensions(width, height)?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => {
                return Err(LayeredImageError::decode_failed(
                    "png: unexpected non-U8 pixel buffer",
                ))
            }
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| LayeredImageError::decode_failed("png: missing colorspace"))?;

        let built = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8),
            ColorSpace::RGBA => {
                RgbaImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba8)
            }
            ColorSpace::Luma => {
                GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8)
            }
            ColorSpace::LumaA => {
                GrayAlphaImage::from_raw(width, height, buf).map(DynamicImage::ImageLumaA8)
            }
            other => {
                return Err(LayeredImageError::decode_failed(format!(
                    "png: unsupported colorspace {other:?}"
                )))
            }
        };
        built.ok_or_else(|| LayeredImageError::decode_failed("png: pixel buffer size mismatch"))
    })
}

/// Decode WebP using libwebp. Animated WebP goes through the image crate.
pub fn decode_webp_libwebp(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            LayeredImageError::decode_failed("webp: failed to read bitstream features")
        })?;

        if features.has_animation() {
            return image::load_from_memory(data).map_err(|e| {
                LayeredImageError::decode_failed(format!("webp (animated) decode failed: {e}"))
            });
        }

        check_dimensions(features.width(), features.height())?;

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| LayeredImageError::decode_failed("webp: decode failed"))?;
        check_dimensions(decoded.width(), decoded.height())?;
        Ok(decoded.to_image())
    })
}

/// Decode everything else with the image crate.
pub fn decode_with_image_crate(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory(data)
            .map_err(|e| LayeredImageError::decode_failed(format!("decode failed: {e}")))
    })
}

/// Check if image dimensions are within safe limits (decompression bombs).
pub fn check_dimensions(width: u32, height: u32) -> EngineResult<()> {
    if width == 0 || height == 0 {
        return Err(LayeredImageError::decode_failed(format!(
            "image has empty dimensions {width}x{height}"
        )));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(LayeredImageError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(LayeredImageError::pixel_count_exceeds_limit(
            pixels, MAX_PIXELS,
        ));
    }
    Ok(())
}

/// Chroma subsampling reported by a baseline JPEG header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JpegSampling {
    Ycbcr420,
    Unknown,
}

/// Scan for a baseline SOF0 marker and report 4:2:0 when the luma sampling
/// factors are 2x2. Anything else (progressive, grayscale, 4:4:4) is Unknown.
pub fn detect_jpeg_sampling(data: &[u8]) -> JpegSampling {
    if data.len() < 12 {
        return JpegSampling::Unknown;
    }
    for i in 0..data.len() - 11 {
        if data[i] == 0xFF && data[i + 1] == 0xC0 {
            // length(2) precision(1) height(2) width(2) components(1) then
            // per component: id(1) factors(1) table(1)
            let components = data[i + 9];
            if components == 3 {
                let factors = data[i + 11];
                let h = (factors >> 4) & 0x0F;
                let v = factors & 0x0F;
                if h == 2 && v == 2 {
                    return JpegSampling::Ycbcr420;
                }
            }
        }
    }
    JpegSampling::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, _| Rgb([x as u8, 0, 0]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn encode_webp_lossless(width: u32, height: u32) -> Vec<u8> {
        let rgb: Vec<u8> = std::iter::repeat([10u8, 20u8, 30u8])
            .take((width * height) as usize)
            .flatten()
            .collect();
        webp::Encoder::from_rgb(&rgb, width, height)
            .encode_lossless()
            .to_vec()
    }

    fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 8, 7])))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn test_decode_png_to_rgba() {
        let png = encode_png(3, 2);
        let decoded = decode_source(&png).unwrap();
        assert_eq!(decoded.format, Some(ImageFormat::Png));
        assert_eq!(decoded.pixels.dimensions(), (3, 2));
        assert_eq!(decoded.pixels.pixel(2), [2, 0, 0, 255]);
    }

    #[test]
    fn test_decode_jpeg_routes_to_mozjpeg() {
        let jpeg = encode_jpeg(4, 4);
        let decoded = decode_source(&jpeg).unwrap();
        assert_eq!(decoded.format, Some(ImageFormat::Jpeg));
        assert_eq!(decoded.pixels.dimensions(), (4, 4));
    }

    #[test]
    fn test_decode_webp_lossless_exact() {
        let webp = encode_webp_lossless(3, 2);
        let decoded = decode_source(&webp).unwrap();
        assert_eq!(decoded.format, Some(ImageFormat::WebP));
        assert_eq!(decoded.pixels.pixel(0), [10, 20, 30, 255]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_source(&[]).is_err());
        let err = decode_source(b"definitely not an image").unwrap_err();
        assert!(err.is_source_decode_error());
    }

    #[test]
    fn test_truncated_jpeg_is_rejected() {
        let jpeg = encode_jpeg(16, 16);
        let truncated = &jpeg[..jpeg.len() / 2];
        assert!(decode_source(truncated).is_err());
    }

    #[test]
    fn test_check_dimensions_limits() {
        assert!(check_dimensions(100, 100).is_ok());
        assert!(matches!(
            check_dimensions(MAX_DIMENSION + 1, 1),
            Err(LayeredImageError::DimensionExceedsLimit { .. })
        ));
        assert!(matches!(
            check_dimensions(20_000, 20_000),
            Err(LayeredImageError::PixelCountExceedsLimit { .. })
        ));
        assert!(check_dimensions(0, 10).is_err());
    }

    #[test]
    fn test_detect_jpeg_sampling() {
        // Minimal SOF0 with three components, luma factors 0x22
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08, 0x00, 0x10, 0x00, 0x10, 0x03]);
        data.extend_from_slice(&[0x01, 0x22, 0x00, 0x02, 0x11, 0x01]);
        assert_eq!(detect_jpeg_sampling(&data), JpegSampling::Ycbcr420);

        data[15] = 0x11;
        assert_eq!(detect_jpeg_sampling(&data), JpegSampling::Unknown);
        assert_eq!(detect_jpeg_sampling(&[0xFF, 0xD8]), JpegSampling::Unknown);
    }
}
