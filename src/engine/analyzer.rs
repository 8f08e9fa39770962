// src/engine/analyzer.rs
//
// Local-complexity analysis: score every pixel by gradient energy and bucket
// it into the first layer whose threshold admits it.

use crate::engine::layers::{LayerStore, Mask};
use crate::engine::pixels::PixelBuffer;
use crate::engine::pool;
use rayon::prelude::*;

/// Largest possible energy: 255 per channel, three channels, two neighbors,
/// halved.
pub const MAX_ENERGY: u16 = 765;

/// Doubled gradient energy at (x, y): summed absolute RGB difference to the
/// right neighbor and to the bottom neighbor. Missing neighbors contribute
/// zero. Alpha is ignored. Kept doubled so comparisons stay integral; the
/// real energy is this value / 2.
#[inline]
pub fn energy_x2(pixels: &PixelBuffer, x: u32, y: u32) -> u16 {
    let (w, h) = pixels.dimensions();
    let data = pixels.as_raw();
    let idx = (y as usize * w as usize + x as usize) * PixelBuffer::CHANNELS;
    let here = &data[idx..idx + 3];

    let mut sum = 0u16;
    if x + 1 < w {
        let right = &data[idx + 4..idx + 7];
        sum += channel_diff(here, right);
    }
    if y + 1 < h {
        let below = idx + w as usize * PixelBuffer::CHANNELS;
        sum += channel_diff(here, &data[below..below + 3]);
    }
    sum
}

/// Gradient energy as a float, for display and diagnostics.
pub fn energy(pixels: &PixelBuffer, x: u32, y: u32) -> f32 {
    energy_x2(pixels, x, y) as f32 / 2.0
}

#[inline]
fn channel_diff(a: &[u8], b: &[u8]) -> u16 {
    a.iter()
        .zip(b)
        .map(|(&p, &q)| (p as i16 - q as i16).unsigned_abs())
        .sum()
}

/// Layer index for a doubled energy. The last layer takes anything above
/// every threshold, so classification is total.
#[inline]
pub fn classify(energy_x2: u16, thresholds: &[u16]) -> usize {
    thresholds
        .iter()
        .position(|&t| u32::from(energy_x2) <= 2 * u32::from(t))
        .unwrap_or(thresholds.len().saturating_sub(1))
}

/// Per-pixel layer assignment, row-major. Rows are scored in parallel; the
/// result does not depend on scheduling.
pub fn assign_layers(pixels: &PixelBuffer, thresholds: &[u16]) -> Vec<u16> {
    let (w, h) = pixels.dimensions();
    let mut classes = vec![0u16; pixels.pixel_count()];
    if classes.is_empty() || thresholds.is_empty() {
        return classes;
    }
    pool::install(|| {
        classes
            .par_chunks_mut(w as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, slot) in row.iter_mut().enumerate() {
                    let e = energy_x2(pixels, x as u32, y as u32);
                    *slot = classify(e, thresholds) as u16;
                }
            });
    });
    debug_assert_eq!(classes.len(), w as usize * h as usize);
    classes
}

/// Analyze `pixels` and install one mask per layer. Overwrites any previous
/// masks and drops every cached encoding, since ownership may have moved.
pub fn analyze(pixels: &PixelBuffer, store: &mut LayerStore) {
    let thresholds = store.thresholds();
    let total = pixels.pixel_count();
    let classes = assign_layers(pixels, &thresholds);

    let mut masks: Vec<Mask> = (0..thresholds.len()).map(|_| Mask::new(total)).collect();
    for (i, &class) in classes.iter().enumerate() {
        masks[class as usize].set(i);
    }

    for (layer, mask) in store.layers_mut().iter_mut().zip(masks) {
        layer.assign_mask(mask);
        layer.invalidate();
    }
    store.mark_analyzed();

    tracing::debug!(
        width = pixels.width(),
        height = pixels.height(),
        layers = store.len(),
        counts = ?store.layers().iter().map(|l| l.pixel_count()).collect::<Vec<_>>(),
        "analysis complete"
    );
}
