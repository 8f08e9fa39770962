// src/engine/layers.rs
//
// Layer store: the ordered quality/threshold buckets of one image, their
// pixel masks and cached encodings.

use crate::config::{validate_layer_specs, LayerSpec};
use crate::engine::codec::EncodedBytes;
use crate::engine::common::EngineResult;
use crate::error::LayeredImageError;
use crate::ops::{validate_quality, OutputFormat};
use std::sync::Arc;

/// Name given to the surviving layer of a merge.
pub const MERGED_LAYER_NAME: &str = "Merged Layer";

/// One flag per pixel, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    bits: Vec<bool>,
}

impl Mask {
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self { bits }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        self.bits[index]
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        self.bits[index] = true;
    }

    pub fn count_ones(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn union_with(&mut self, other: &Mask) {
        debug_assert_eq!(self.len(), other.len());
        for (dst, &src) in self.bits.iter_mut().zip(other.bits.iter()) {
            *dst |= src;
        }
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    name: String,
    threshold: u16,
    quality: u8,
    mask: Option<Arc<Mask>>,
    pixel_count: usize,
    encoded: Option<EncodedBytes>,
}

impl Layer {
    pub fn from_spec(spec: &LayerSpec) -> Self {
        Self {
            name: spec.name.clone(),
            threshold: spec.threshold,
            quality: spec.quality,
            mask: None,
            pixel_count: 0,
            encoded: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_deref()
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    /// Cached encoding at the current quality; None means "needs re-encode".
    pub fn encoded(&self) -> Option<&EncodedBytes> {
        self.encoded.as_ref()
    }

    /// Install a freshly computed mask. The pixel count is always derived
    /// from the mask itself.
    pub(crate) fn assign_mask(&mut self, mask: Mask) {
        self.pixel_count = mask.count_ones();
        self.mask = Some(Arc::new(mask));
    }

    pub(crate) fn set_encoded(&mut self, encoded: Option<EncodedBytes>) {
        self.encoded = encoded;
    }

    pub(crate) fn invalidate(&mut self) {
        self.encoded = None;
    }
}

/// Per-layer data a renderer needs to paint a highlight overlay.
#[derive(Clone, Debug)]
pub struct LayerOverlay {
    pub name: String,
    pub threshold: u16,
    pub quality: u8,
    pub pixel_count: usize,
    pub coverage_percent: f64,
    pub mask: Option<Arc<Mask>>,
}

/// Ordered layers of one image. Cached masks and encodings are only valid
/// for the format they were produced for.
#[derive(Clone, Debug)]
pub struct LayerStore {
    layers: Vec<Layer>,
    format: OutputFormat,
    analysis_done: bool,
}

impl LayerStore {
    pub fn empty(format: OutputFormat) -> Self {
        Self {
            layers: Vec::new(),
            format,
            analysis_done: false,
        }
    }

    pub fn from_specs(specs: &[LayerSpec], format: OutputFormat) -> EngineResult<Self> {
        validate_layer_specs(specs)?;
        Ok(Self {
            layers: specs.iter().map(Layer::from_spec).collect(),
            format,
            analysis_done: false,
        })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn get(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn analysis_done(&self) -> bool {
        self.analysis_done
    }

    pub(crate) fn mark_analyzed(&mut self) {
        self.analysis_done = true;
    }

    pub fn thresholds(&self) -> Vec<u16> {
        self.layers.iter().map(|l| l.threshold).collect()
    }

    pub fn total_pixel_count(&self) -> usize {
        self.layers.iter().map(|l| l.pixel_count).sum()
    }

    /// Set one layer's quality and drop its cached encoding. Masks are kept.
    pub fn set_quality(&mut self, index: usize, quality: u8) -> EngineResult<()> {
        let len = self.layers.len();
        let quality = validate_quality("layer.quality", quality)?;
        let layer = self
            .layers
            .get_mut(index)
            .ok_or_else(|| LayeredImageError::layer_index_out_of_range(index, len))?;
        layer.quality = quality;
        layer.invalidate();
        Ok(())
    }

    /// Union the selected layers into the one with the largest index.
    ///
    /// The survivor keeps its threshold and quality, takes the OR of all
    /// selected masks, is renamed and loses its cached encoding. The other
    /// selected layers are removed. Returns the survivor's new index.
    /// All validation happens before anything is mutated.
    pub fn merge(&mut self, indices: &[usize]) -> EngineResult<usize> {
        if indices.len() < 2 {
            return Err(LayeredImageError::invalid_merge(format!(
                "at least two layers are required, got {}",
                indices.len()
            )));
        }
        let mut sorted = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(LayeredImageError::invalid_merge("duplicate layer index"));
        }
        if let Some(&bad) = sorted.iter().find(|&&i| i >= self.layers.len()) {
            return Err(LayeredImageError::invalid_merge(format!(
                "layer index {bad} out of range (image has {} layers)",
                self.layers.len()
            )));
        }
        if !self.analysis_done || self.layers.iter().any(|l| l.mask.is_none()) {
            return Err(LayeredImageError::invalid_merge(
                "layers have not been analyzed yet",
            ));
        }

        let target_index = sorted[0];
        let mut union = self.layers[target_index]
            .mask
            .as_deref()
            .cloned()
            .ok_or_else(|| LayeredImageError::invalid_merge("target layer has no mask"))?;
        for &source_index in &sorted[1..] {
            if let Some(mask) = self.layers[source_index].mask.as_deref() {
                union.union_with(mask);
            }
        }

        // Sources are all below the target, so removing them high-to-low
        // shifts the target down by exactly their count.
        for &source_index in &sorted[1..] {
            self.layers.remove(source_index);
        }
        let new_index = target_index - (sorted.len() - 1);
        let target = &mut self.layers[new_index];
        target.assign_mask(union);
        target.name = MERGED_LAYER_NAME.to_string();
        target.invalidate();
        Ok(new_index)
    }

    /// Coverage data for every layer of a `width x height` analysis.
    pub fn overlays(&self, width: u32, height: u32) -> Vec<LayerOverlay> {
        let total = width as usize * height as usize;
        self.layers
            .iter()
            .map(|layer| LayerOverlay {
                name: layer.name.clone(),
                threshold: layer.threshold,
                quality: layer.quality,
                pixel_count: layer.pixel_count,
                coverage_percent: if total == 0 {
                    0.0
                } else {
                    layer.pixel_count as f64 / total as f64 * 100.0
                },
                mask: layer.mask.clone(),
            })
            .collect()
    }

    /// Every pixel is owned by exactly one layer and counts match the masks.
    pub fn is_partition(&self, pixel_count: usize) -> bool {
        if !self.analysis_done {
            return false;
        }
        let masks: Option<Vec<&Mask>> = self.layers.iter().map(|l| l.mask()).collect();
        let Some(masks) = masks else {
            return false;
        };
        if masks.iter().any(|m| m.len() != pixel_count) {
            return false;
        }
        if self
            .layers
            .iter()
            .zip(masks.iter())
            .any(|(l, m)| l.pixel_count != m.count_ones())
        {
            return false;
        }
        (0..pixel_count).all(|i| masks.iter().filter(|m| m.get(i)).count() == 1)
    }
}
