// src/engine/session.rs
//
// The set of images a user is working on. Each image lives in its own slot
// with a busy flag: at most one recompute runs per image, and a second
// request is rejected with `PipelineBusy` instead of being queued.

use crate::config::EngineConfig;
use crate::engine::codec::{Codec, ImageCodec};
use crate::engine::common::EngineResult;
use crate::engine::decoder::{decode_source, detect_jpeg_sampling, JpegSampling};
use crate::engine::entity::{Delivery, ImageEntity, ImageId};
use crate::engine::io::{file_name, Source};
use crate::engine::layers::LayerOverlay;
use crate::engine::orchestrator;
use crate::engine::pixels::prescale;
use crate::error::LayeredImageError;
use crate::ops::{Mode, OutputFormat};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One image plus its in-flight flag.
#[derive(Debug)]
pub struct ImageSlot {
    id: ImageId,
    busy: AtomicBool,
    entity: RwLock<ImageEntity>,
}

/// Claim on a slot's pipeline; released on drop, including on error paths.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl ImageSlot {
    fn new(entity: ImageEntity) -> Self {
        Self {
            id: entity.id.clone(),
            busy: AtomicBool::new(false),
            entity: RwLock::new(entity),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the pipeline or fail immediately.
    pub fn try_begin(&self) -> EngineResult<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard { flag: &self.busy })
            .map_err(|_| LayeredImageError::pipeline_busy(self.id.clone()))
    }
}

pub struct Session {
    config: EngineConfig,
    codec: Arc<dyn Codec>,
    slots: RwLock<Vec<Arc<ImageSlot>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("images", &self.slots.read().len())
            .finish()
    }
}

impl Session {
    /// Session backed by the native codecs.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_codec(config, Arc::new(ImageCodec::new()))
    }

    pub fn with_codec(config: EngineConfig, codec: Arc<dyn Codec>) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            codec,
            slots: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Ids in upload order.
    pub fn ids(&self) -> Vec<ImageId> {
        self.slots.read().iter().map(|s| s.id.clone()).collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<ImageId> {
        self.slots
            .read()
            .iter()
            .find(|s| s.entity.read().name == name)
            .map(|s| s.id.clone())
    }

    fn slot(&self, id: &str) -> EngineResult<Arc<ImageSlot>> {
        self.slots
            .read()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| LayeredImageError::image_not_found(id.to_string()))
    }

    /// Decode an upload and register it. No encoding happens yet.
    pub fn add_image(&self, name: impl Into<String>, bytes: &[u8]) -> EngineResult<ImageId> {
        let name = name.into();
        if self.find_by_name(&name).is_some() {
            return Err(LayeredImageError::invalid_argument(
                "name",
                name,
                "an image with this name is already loaded",
            ));
        }

        let decoded = decode_source(bytes)?;
        let input_format = OutputFormat::sniff(bytes);
        let is_420 = input_format == Some(OutputFormat::Jpeg)
            && detect_jpeg_sampling(bytes) == JpegSampling::Ycbcr420;
        let original = Arc::new(decoded.pixels);
        let source = if self.config.max_width.is_some() {
            Arc::new(prescale((*original).clone(), self.config.max_width)?)
        } else {
            original.clone()
        };

        let id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(
            image_id = %id,
            name = %name,
            bytes = bytes.len(),
            dims = ?original.dimensions(),
            is_420,
            "image added"
        );
        let entity = ImageEntity::new(
            id.clone(),
            name,
            bytes.len() as u64,
            input_format,
            is_420,
            original,
            source,
            &self.config,
        );
        let mut slots = self.slots.write();
        // Another upload with the same name may have landed while decoding.
        if slots.iter().any(|s| s.entity.read().name == entity.name) {
            return Err(LayeredImageError::invalid_argument(
                "name",
                entity.name,
                "an image with this name is already loaded",
            ));
        }
        slots.push(Arc::new(ImageSlot::new(entity)));
        Ok(id)
    }

    /// Register a file from disk, named after its final path component.
    pub fn add_image_from_path(&self, path: impl AsRef<Path>) -> EngineResult<ImageId> {
        let path = path.as_ref();
        let source = Source::open(path)?;
        self.add_image(file_name(path), source.as_bytes())
    }

    /// Register an upload and produce its first delivery per the configured
    /// mode. Decode failures leave the session unchanged.
    pub async fn submit(
        &self,
        name: impl Into<String>,
        bytes: &[u8],
    ) -> EngineResult<(ImageId, Delivery)> {
        let id = self.add_image(name, bytes)?;
        let slot = self.slot(&id)?;
        let _busy = slot.try_begin()?;
        let delivery = orchestrator::process(&slot.entity, self.codec.as_ref()).await?;
        Ok((id, delivery))
    }

    /// Drop an image. Rejected while its pipeline is running.
    pub fn remove(&self, id: &str) -> EngineResult<()> {
        let mut slots = self.slots.write();
        let pos = slots
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| LayeredImageError::image_not_found(id.to_string()))?;
        if slots[pos].is_busy() {
            return Err(LayeredImageError::pipeline_busy(id.to_string()));
        }
        slots.remove(pos);
        Ok(())
    }

    /// Drop every image. In-flight recomputes keep their own slot alive and
    /// finish into it; the result is simply discarded.
    pub fn clear(&self) {
        self.slots.write().clear();
    }

    /// Read-only access to an entity.
    pub fn with_entity<R>(&self, id: &str, f: impl FnOnce(&ImageEntity) -> R) -> EngineResult<R> {
        let slot = self.slot(id)?;
        let entity = slot.entity.read();
        Ok(f(&entity))
    }

    pub fn delivery(&self, id: &str) -> EngineResult<Option<Delivery>> {
        self.with_entity(id, |e| e.delivery().cloned())
    }

    pub fn overlays(&self, id: &str) -> EngineResult<Vec<LayerOverlay>> {
        self.with_entity(id, |e| e.overlays())
    }

    pub async fn optimize(&self, id: &str) -> EngineResult<Delivery> {
        let slot = self.slot(id)?;
        let _busy = slot.try_begin()?;
        orchestrator::optimize(&slot.entity, self.codec.as_ref()).await
    }

    pub async fn reanalyze(&self, id: &str) -> EngineResult<Delivery> {
        let slot = self.slot(id)?;
        let _busy = slot.try_begin()?;
        orchestrator::reanalyze(&slot.entity, self.codec.as_ref()).await
    }

    pub async fn update_layer_quality(
        &self,
        id: &str,
        index: usize,
        quality: u8,
    ) -> EngineResult<Delivery> {
        let slot = self.slot(id)?;
        let _busy = slot.try_begin()?;
        orchestrator::update_layer_quality(&slot.entity, self.codec.as_ref(), index, quality).await
    }

    pub async fn merge_layers(&self, id: &str, indices: &[usize]) -> EngineResult<Delivery> {
        let slot = self.slot(id)?;
        let _busy = slot.try_begin()?;
        orchestrator::merge_layers(&slot.entity, self.codec.as_ref(), indices).await
    }

    pub async fn switch_mode(&self, id: &str, mode: Mode) -> EngineResult<Delivery> {
        let slot = self.slot(id)?;
        let _busy = slot.try_begin()?;
        orchestrator::switch_mode(&slot.entity, self.codec.as_ref(), mode).await
    }

    pub async fn set_quality(&self, id: &str, quality: u8) -> EngineResult<Delivery> {
        let slot = self.slot(id)?;
        let _busy = slot.try_begin()?;
        orchestrator::set_quality(&slot.entity, self.codec.as_ref(), quality).await
    }

    pub async fn set_simple_quality(&self, id: &str, quality: u8) -> EngineResult<Option<Delivery>> {
        let slot = self.slot(id)?;
        let _busy = slot.try_begin()?;
        orchestrator::set_simple_quality(&slot.entity, self.codec.as_ref(), quality).await
    }

    pub async fn reset_quality(&self, id: &str) -> EngineResult<Delivery> {
        let slot = self.slot(id)?;
        let _busy = slot.try_begin()?;
        orchestrator::reset_quality(&slot.entity, self.codec.as_ref()).await
    }

    pub async fn set_format(&self, id: &str, format: OutputFormat) -> EngineResult<Delivery> {
        let slot = self.slot(id)?;
        let _busy = slot.try_begin()?;
        orchestrator::set_format(&slot.entity, self.codec.as_ref(), format).await
    }

    pub async fn set_max_width(&self, id: &str, max_width: Option<u32>) -> EngineResult<Delivery> {
        let slot = self.slot(id)?;
        let _busy = slot.try_begin()?;
        orchestrator::set_max_width(&slot.entity, self.codec.as_ref(), max_width).await
    }
}
