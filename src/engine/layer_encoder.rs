// src/engine/layer_encoder.rs
//
// Produce each layer's rendition: the whole source encoded at the layer's
// quality, then decoded back so the compositor can sample it.

use crate::engine::codec::{Codec, EncodedBytes};
use crate::engine::common::EngineResult;
use crate::engine::layers::Layer;
use crate::engine::pixels::PixelBuffer;
use crate::error::LayeredImageError;
use crate::ops::OutputFormat;
use std::sync::Arc;

/// A rendition ready for compositing.
#[derive(Debug)]
pub struct LayerRendition {
    pub encoded: EncodedBytes,
    pub decoded: PixelBuffer,
    /// True when the cached encoding was reused instead of re-encoding.
    pub reused: bool,
}

/// Render one layer. Empty layers yield `Ok(None)` without touching the
/// codec. A valid cached encoding is decoded again instead of re-encoded.
pub async fn render_layer(
    codec: &dyn Codec,
    source: &Arc<PixelBuffer>,
    layer: &Layer,
    format: OutputFormat,
) -> EngineResult<Option<LayerRendition>> {
    if layer.pixel_count() == 0 {
        return Ok(None);
    }

    let (encoded, reused) = match layer.encoded() {
        Some(cached) => (cached.clone(), true),
        None => (
            codec
                .encode(source.clone(), format, layer.quality())
                .await?,
            false,
        ),
    };
    let decoded = codec.decode(encoded.clone()).await?;
    Ok(Some(LayerRendition {
        encoded,
        decoded,
        reused,
    }))
}

/// Outcome of rendering every layer of an image.
#[derive(Debug, Default)]
pub struct RenderedLayers {
    /// Parallel to the layer list.
    pub decoded: Vec<Option<PixelBuffer>>,
    /// Encodings to cache back into the layers; None clears the cache.
    pub encoded: Vec<Option<EncodedBytes>>,
    pub failed: usize,
    pub rendered: usize,
}

impl RenderedLayers {
    pub fn any_rendered(&self) -> bool {
        self.rendered > 0
    }
}

/// Render all layers in order. A failing layer is logged and left out; it
/// never aborts the others. Lossless formats ignore quality, so a single
/// rendition is shared by every non-empty layer.
pub async fn render_layers(
    codec: &dyn Codec,
    source: &Arc<PixelBuffer>,
    layers: &[Layer],
    format: OutputFormat,
    image_id: &str,
) -> RenderedLayers {
    if format.is_lossless() {
        return render_shared(codec, source, layers, format, image_id).await;
    }
    let mut out = RenderedLayers {
        decoded: Vec::with_capacity(layers.len()),
        encoded: Vec::with_capacity(layers.len()),
        ..RenderedLayers::default()
    };
    for (index, layer) in layers.iter().enumerate() {
        match render_layer(codec, source, layer, format).await {
            Ok(Some(rendition)) => {
                tracing::debug!(
                    image_id,
                    layer = index,
                    quality = layer.quality(),
                    bytes = rendition.encoded.len(),
                    reused = rendition.reused,
                    "layer rendered"
                );
                out.rendered += 1;
                out.encoded.push(Some(rendition.encoded));
                out.decoded.push(Some(rendition.decoded));
            }
            Ok(None) => {
                out.encoded.push(None);
                out.decoded.push(None);
            }
            Err(err) => {
                tracing::warn!(
                    image_id,
                    layer = index,
                    quality = layer.quality(),
                    error = %err,
                    "layer render failed, excluding from composite"
                );
                out.failed += 1;
                out.encoded.push(None);
                out.decoded.push(None);
            }
        }
    }
    out
}

/// One encode and one decode for the whole layer set. Any non-empty layer's
/// cached encoding stands in for all of them.
async fn render_shared(
    codec: &dyn Codec,
    source: &Arc<PixelBuffer>,
    layers: &[Layer],
    format: OutputFormat,
    image_id: &str,
) -> RenderedLayers {
    let mut out = RenderedLayers {
        decoded: vec![None; layers.len()],
        encoded: vec![None; layers.len()],
        ..RenderedLayers::default()
    };
    let owners: Vec<usize> = layers
        .iter()
        .enumerate()
        .filter(|(_, layer)| layer.pixel_count() > 0)
        .map(|(index, _)| index)
        .collect();
    let Some(&first) = owners.first() else {
        return out;
    };

    let cached = owners.iter().find_map(|&i| layers[i].encoded().cloned());
    let reused = cached.is_some();
    let result = async {
        let encoded = match cached {
            Some(bytes) => bytes,
            None => {
                codec
                    .encode(source.clone(), format, layers[first].quality())
                    .await?
            }
        };
        let decoded = codec.decode(encoded.clone()).await?;
        Ok::<_, LayeredImageError>((encoded, decoded))
    }
    .await;

    match result {
        Ok((encoded, decoded)) => {
            tracing::debug!(
                image_id,
                %format,
                layers = owners.len(),
                bytes = encoded.len(),
                reused,
                "lossless rendition shared across layers"
            );
            for &i in &owners {
                out.encoded[i] = Some(encoded.clone());
                out.decoded[i] = Some(decoded.clone());
            }
            out.rendered = owners.len();
        }
        Err(err) => {
            tracing::warn!(
                image_id,
                %format,
                error = %err,
                "lossless rendition failed, excluding every layer"
            );
            out.failed = owners.len();
        }
    }
    out
}
