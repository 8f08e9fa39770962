// src/engine/compositor.rs
//
// Reassemble one image from the decoded layer renditions. Each output pixel
// is copied from the first layer that owns it and has a usable decode.

use crate::engine::common::EngineResult;
use crate::engine::layers::Layer;
use crate::engine::pixels::PixelBuffer;
use crate::engine::pool;
use rayon::prelude::*;

/// Build the composite for a `width x height` image.
///
/// `decoded[i]` is the decoded rendition of `layers[i]`, or None when that
/// layer was skipped or failed. Renditions with the wrong geometry are
/// treated as missing. Pixels no usable layer owns stay transparent black;
/// everything else is written with alpha forced to 255.
pub fn composite(
    width: u32,
    height: u32,
    layers: &[Layer],
    decoded: &[Option<PixelBuffer>],
) -> EngineResult<PixelBuffer> {
    let mut out = PixelBuffer::zeroed(width, height)?;

    let sources: Vec<(&[bool], &[u8])> = layers
        .iter()
        .zip(decoded.iter())
        .enumerate()
        .filter_map(|(index, (layer, rendition))| {
            let mask = layer.mask()?;
            let rendition = rendition.as_ref()?;
            if rendition.dimensions() != (width, height) || mask.len() != out.pixel_count() {
                tracing::warn!(
                    layer = index,
                    expected = ?(width, height),
                    actual = ?rendition.dimensions(),
                    "layer rendition geometry mismatch, ignoring"
                );
                return None;
            }
            Some((mask.as_slice(), rendition.as_raw()))
        })
        .collect();

    if sources.is_empty() {
        return Ok(out);
    }

    let row_bytes = width as usize * PixelBuffer::CHANNELS;
    pool::install(|| {
        out.as_raw_mut()
            .par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(y, row)| {
                let row_start = y * width as usize;
                for (x, px) in row.chunks_exact_mut(PixelBuffer::CHANNELS).enumerate() {
                    let i = row_start + x;
                    if let Some((_, data)) = sources.iter().find(|(mask, _)| mask[i]) {
                        let s = i * PixelBuffer::CHANNELS;
                        px[..3].copy_from_slice(&data[s..s + 3]);
                        px[3] = 255;
                    }
                }
            });
    });
    Ok(out)
}
