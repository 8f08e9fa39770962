// src/engine/entity.rs
//
// Per-image state: the decoded source, the layer store, the current composite
// and the delivery artifact the user downloads.

use crate::config::{EngineConfig, LayerSpec};
use crate::engine::codec::EncodedBytes;
use crate::engine::layers::{LayerOverlay, LayerStore};
use crate::engine::pixels::PixelBuffer;
use crate::ops::{Mode, OutputFormat, QualityLabel};
use std::sync::Arc;

pub type ImageId = String;

/// Where the delivery bytes were encoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
    /// The layered composite (pro path).
    Composite,
    /// The pre-scaled original (simple path or pro fallback).
    Original,
}

/// The final artifact plus its size accounting.
#[derive(Debug, Clone)]
pub struct Delivery {
    bytes: EncodedBytes,
    format: OutputFormat,
    quality: u8,
    original_size: u64,
    source: DeliverySource,
}

impl Delivery {
    pub fn new(
        bytes: EncodedBytes,
        format: OutputFormat,
        quality: u8,
        original_size: u64,
        source: DeliverySource,
    ) -> Self {
        Self {
            bytes,
            format,
            quality,
            original_size,
            source,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> EncodedBytes {
        self.bytes.clone()
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Container actually produced; may differ from the requested format
    /// when a codec fell back.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn source(&self) -> DeliverySource {
        self.source
    }

    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    /// `100 - size / original * 100`. Negative when the output grew.
    pub fn savings_percent(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        100.0 - (self.size() as f64 / self.original_size as f64) * 100.0
    }

    /// "-12.3%" when smaller than the original, "+4.0%" when larger.
    pub fn savings_label(&self) -> String {
        let savings = self.savings_percent();
        if savings >= 0.0 {
            format!("-{savings:.1}%")
        } else {
            format!("+{:.1}%", savings.abs())
        }
    }

    pub fn is_larger_than_original(&self) -> bool {
        self.size() > self.original_size
    }

    pub fn quality_label(&self) -> QualityLabel {
        QualityLabel::for_format(self.format, self.quality)
    }
}

/// Coarse lifecycle of an entity, derived from what it currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No analysis yet.
    Unanalyzed,
    /// Masks are known but no composite exists.
    Analyzed,
    /// A composite exists; the delivery was not encoded from it.
    CompositeReady,
    /// The delivery was encoded from the current composite.
    DeliveryEncoded,
}

#[derive(Debug)]
pub struct ImageEntity {
    pub(crate) id: ImageId,
    pub(crate) name: String,
    pub(crate) original_size: u64,
    pub(crate) input_format: Option<OutputFormat>,
    pub(crate) is_420: bool,
    /// Full-resolution decode of the upload.
    pub(crate) original: Arc<PixelBuffer>,
    /// `original` after the max-width pre-scale; what every stage works on.
    pub(crate) source: Arc<PixelBuffer>,
    pub(crate) format: OutputFormat,
    pub(crate) max_width: Option<u32>,
    pub(crate) mode: Mode,
    pub(crate) quality: u8,
    pub(crate) simple_quality: u8,
    /// Set by the first successful layered run.
    pub(crate) pro_quality: Option<u8>,
    pub(crate) nominal_pro_quality: u8,
    pub(crate) layer_specs: Vec<LayerSpec>,
    pub(crate) layers: LayerStore,
    pub(crate) composite: Option<Arc<PixelBuffer>>,
    pub(crate) delivery: Option<Delivery>,
}

impl ImageEntity {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ImageId,
        name: String,
        original_size: u64,
        input_format: Option<OutputFormat>,
        is_420: bool,
        original: Arc<PixelBuffer>,
        source: Arc<PixelBuffer>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            id,
            name,
            original_size,
            input_format,
            is_420,
            original,
            source,
            format: config.format,
            max_width: config.max_width,
            mode: config.mode,
            quality: config.simple_quality,
            simple_quality: config.simple_quality,
            pro_quality: None,
            nominal_pro_quality: config.pro_quality,
            layer_specs: config.layers.clone(),
            layers: LayerStore::empty(config.format),
            composite: None,
            delivery: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    /// Container of the upload, when it is one of the output formats.
    pub fn input_format(&self) -> Option<OutputFormat> {
        self.input_format
    }

    /// Upload was a JPEG with 4:2:0 chroma subsampling.
    pub fn is_420(&self) -> bool {
        self.is_420
    }

    pub fn original_dimensions(&self) -> (u32, u32) {
        self.original.dimensions()
    }

    /// Dimensions every stage works at, after the max-width pre-scale.
    pub fn working_dimensions(&self) -> (u32, u32) {
        self.source.dimensions()
    }

    pub fn source(&self) -> &Arc<PixelBuffer> {
        &self.source
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn max_width(&self) -> Option<u32> {
        self.max_width
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Quality the delivery is (or will be) encoded at.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn simple_quality(&self) -> u8 {
        self.simple_quality
    }

    pub fn pro_quality(&self) -> Option<u8> {
        self.pro_quality
    }

    pub fn layers(&self) -> &LayerStore {
        &self.layers
    }

    pub fn composite(&self) -> Option<&Arc<PixelBuffer>> {
        self.composite.as_ref()
    }

    pub fn delivery(&self) -> Option<&Delivery> {
        self.delivery.as_ref()
    }

    pub fn overlays(&self) -> Vec<LayerOverlay> {
        let (w, h) = self.working_dimensions();
        self.layers.overlays(w, h)
    }

    pub fn state(&self) -> PipelineState {
        match (&self.composite, &self.delivery) {
            (Some(_), Some(d)) if d.source() == DeliverySource::Composite => {
                PipelineState::DeliveryEncoded
            }
            (Some(_), _) => PipelineState::CompositeReady,
            (None, _) if self.layers.analysis_done() => PipelineState::Analyzed,
            (None, _) => PipelineState::Unanalyzed,
        }
    }

    /// Layers must be (re)built when missing or produced for another format.
    pub(crate) fn layers_stale(&self) -> bool {
        self.layers.is_empty() || self.layers.format() != self.format
    }
}
