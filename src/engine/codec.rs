// src/engine/codec.rs
//
// Codec primitive consumed by the layer encoder and the delivery encode.
// The trait is the seam: production uses native codecs on the blocking pool,
// tests inject deterministic in-memory codecs.

use crate::engine::common::EngineResult;
use crate::engine::decoder::{decode_jpeg_mozjpeg, decode_png_zune, decode_webp_libwebp};
use crate::engine::encoder::encode_pixels;
use crate::engine::pixels::PixelBuffer;
use crate::error::LayeredImageError;
use crate::ops::OutputFormat;
use async_trait::async_trait;
use std::sync::Arc;

/// Encoded bytes shared between the layer cache and in-flight recomputes.
pub type EncodedBytes = Arc<Vec<u8>>;

#[async_trait]
pub trait Codec: Send + Sync {
    /// Lossily encode the full buffer. `quality` is 1..=100 and is ignored by
    /// lossless formats.
    async fn encode(
        &self,
        pixels: Arc<PixelBuffer>,
        format: OutputFormat,
        quality: u8,
    ) -> EngineResult<EncodedBytes>;

    /// Decode bytes produced by `encode` back into RGBA.
    async fn decode(&self, bytes: EncodedBytes) -> EngineResult<PixelBuffer>;
}

/// Native codecs (mozjpeg, libwebp, oxipng) run on tokio's blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCodec;

impl ImageCodec {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Codec for ImageCodec {
    async fn encode(
        &self,
        pixels: Arc<PixelBuffer>,
        format: OutputFormat,
        quality: u8,
    ) -> EngineResult<EncodedBytes> {
        let encoded = tokio::task::spawn_blocking(move || encode_pixels(&pixels, format, quality))
            .await
            .map_err(|e| LayeredImageError::internal_panic(format!("encode task failed: {e}")))??;
        Ok(Arc::new(encoded))
    }

    async fn decode(&self, bytes: EncodedBytes) -> EngineResult<PixelBuffer> {
        tokio::task::spawn_blocking(move || decode_encoded(&bytes))
            .await
            .map_err(|e| LayeredImageError::internal_panic(format!("decode task failed: {e}")))?
    }
}

/// Decode our own encoder output, routed by the container magic.
pub fn decode_encoded(bytes: &[u8]) -> EngineResult<PixelBuffer> {
    let format = OutputFormat::sniff(bytes).ok_or_else(|| {
        LayeredImageError::layer_decode_failed("unknown", "unrecognized container")
    })?;
    let img = match format {
        OutputFormat::Jpeg => decode_jpeg_mozjpeg(bytes),
        OutputFormat::Png => decode_png_zune(bytes),
        OutputFormat::WebP => decode_webp_libwebp(bytes),
    }
    .map_err(|e| LayeredImageError::layer_decode_failed(format.as_str(), e.to_string()))?;
    Ok(PixelBuffer::from_dynamic(img))
}
