// src/engine/orchestrator.rs
//
// Drives one image through analysis -> per-layer render -> composite ->
// delivery encode, and owns the rules for what each user edit invalidates.
//
// Every operation works on a `Plan`: a snapshot of the entity with the edit
// applied. Nothing is written back until the plan has produced a delivery,
// so a failed recompute never leaves half-updated state behind. The entity
// lock is only taken for the snapshot and the commit, never across an await.

use crate::config::DEFAULT_SIMPLE_QUALITY;
use crate::engine::analyzer::analyze;
use crate::engine::codec::Codec;
use crate::engine::common::EngineResult;
use crate::engine::compositor::composite;
use crate::engine::entity::{Delivery, DeliverySource, ImageEntity};
use crate::engine::layer_encoder::render_layers;
use crate::engine::layers::LayerStore;
use crate::engine::pixels::{prescale, PixelBuffer};
use crate::error::LayeredImageError;
use crate::ops::{validate_quality, Mode, OutputFormat};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::JoinError;

/// The entity as it will look if the operation succeeds.
#[derive(Debug, Clone)]
struct Plan {
    image_id: String,
    original_size: u64,
    source: Arc<PixelBuffer>,
    layers: LayerStore,
    format: OutputFormat,
    quality: u8,
    simple_quality: u8,
    max_width: Option<u32>,
    mode: Mode,
    /// Source or format changed; the current composite no longer applies.
    rebuild: bool,
    /// Composite usable for a delivery-only re-encode.
    composite: Option<Arc<PixelBuffer>>,
}

impl Plan {
    fn snapshot(entity: &ImageEntity) -> EngineResult<Self> {
        let (layers, rebuild) = if entity.layers_stale() {
            (LayerStore::from_specs(&entity.layer_specs, entity.format)?, true)
        } else {
            (entity.layers.clone(), false)
        };
        Ok(Self {
            image_id: entity.id.clone(),
            original_size: entity.original_size,
            source: entity.source.clone(),
            composite: if rebuild { None } else { entity.composite.clone() },
            layers,
            format: entity.format,
            quality: entity.quality,
            simple_quality: entity.simple_quality,
            max_width: entity.max_width,
            mode: entity.mode,
            rebuild,
        })
    }

    /// Fresh, unanalyzed layers from the entity's layer specs.
    fn reset_layers(&mut self, entity: &ImageEntity) -> EngineResult<()> {
        self.layers = LayerStore::from_specs(&entity.layer_specs, self.format)?;
        self.composite = None;
        self.rebuild = true;
        Ok(())
    }
}

fn join_error(stage: &'static str, e: JoinError) -> LayeredImageError {
    LayeredImageError::internal_panic(format!("{stage} task failed: {e}"))
}

/// Encode the delivery artifact and sniff what the codec actually produced.
async fn encode_delivery(
    codec: &dyn Codec,
    pixels: Arc<PixelBuffer>,
    plan: &Plan,
    source: DeliverySource,
) -> EngineResult<Delivery> {
    let bytes = codec.encode(pixels, plan.format, plan.quality).await?;
    let produced = OutputFormat::sniff(&bytes).unwrap_or(plan.format);
    if produced != plan.format {
        tracing::warn!(
            image_id = %plan.image_id,
            requested = %plan.format,
            produced = %produced,
            "encoder produced a different container"
        );
    }
    tracing::debug!(
        image_id = %plan.image_id,
        quality = plan.quality,
        bytes = bytes.len(),
        ?source,
        "delivery encoded"
    );
    Ok(Delivery::new(
        bytes,
        produced,
        plan.quality,
        plan.original_size,
        source,
    ))
}

/// Analysis (when needed), layer renders and compositing.
async fn build_composite(
    codec: &dyn Codec,
    plan: &Plan,
) -> EngineResult<(LayerStore, Arc<PixelBuffer>)> {
    let mut layers = plan.layers.clone();
    if !layers.analysis_done() {
        let source = plan.source.clone();
        layers = tokio::task::spawn_blocking(move || {
            analyze(&source, &mut layers);
            layers
        })
        .await
        .map_err(|e| join_error("analysis", e))?;
    }

    let rendered = render_layers(
        codec,
        &plan.source,
        layers.layers(),
        plan.format,
        &plan.image_id,
    )
    .await;
    for (layer, encoded) in layers.layers_mut().iter_mut().zip(rendered.encoded.iter()) {
        layer.set_encoded(encoded.clone());
    }
    if !rendered.any_rendered() {
        return Err(LayeredImageError::encode_failed(
            plan.format.as_str(),
            format!("all {} non-empty layers failed", rendered.failed),
        ));
    }

    let (w, h) = plan.source.dimensions();
    let decoded = rendered.decoded;
    let (layers, composed) = tokio::task::spawn_blocking(move || {
        let composed = composite(w, h, layers.layers(), &decoded);
        (layers, composed)
    })
    .await
    .map_err(|e| join_error("composite", e))?;
    tracing::debug!(image_id = %plan.image_id, width = w, height = h, "composite ready");
    Ok((layers, Arc::new(composed?)))
}

/// Write back the settings every successful plan carries.
fn commit_settings(entity: &mut ImageEntity, plan: &Plan, delivery: &Delivery) {
    entity.source = plan.source.clone();
    entity.max_width = plan.max_width;
    entity.mode = plan.mode;
    entity.quality = plan.quality;
    entity.simple_quality = plan.simple_quality;
    entity.format = plan.format;
    if plan.rebuild {
        entity.layers = plan.layers.clone();
        entity.composite = None;
    }
    // Follow the container the encoder actually produced; the layer caches
    // then become stale and are rebuilt on the next optimize.
    if delivery.format() != plan.format {
        entity.format = delivery.format();
    }
    entity.delivery = Some(delivery.clone());
}

fn log_delivery(plan: &Plan, delivery: &Delivery) {
    tracing::info!(
        image_id = %plan.image_id,
        mode = ?plan.mode,
        format = %delivery.format(),
        quality = plan.quality,
        bytes = delivery.size(),
        original = plan.original_size,
        savings = %delivery.savings_label(),
        "image delivered"
    );
}

/// Full layered recompute. On total failure fall back to a single-pass
/// encode of the source; the previous composite is left in place.
///
/// Layers and composite are rebuilt in either mode, but only pro mode
/// delivers from the composite. Simple mode keeps delivering the source at
/// the manual quality.
async fn run_layered(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    mut plan: Plan,
) -> EngineResult<Delivery> {
    if plan.mode == Mode::Simple {
        plan.quality = plan.simple_quality;
    }
    let outcome = async {
        let (layers, composed) = build_composite(codec, &plan).await?;
        let delivery = match plan.mode {
            Mode::Pro => {
                encode_delivery(codec, composed.clone(), &plan, DeliverySource::Composite).await?
            }
            Mode::Simple => {
                encode_delivery(codec, plan.source.clone(), &plan, DeliverySource::Original)
                    .await?
            }
        };
        Ok::<_, LayeredImageError>((layers, composed, delivery))
    }
    .await;

    match outcome {
        Ok((layers, composed, delivery)) => {
            {
                let mut e = entity.write();
                commit_settings(&mut e, &plan, &delivery);
                e.layers = layers;
                e.composite = Some(composed);
                e.pro_quality = Some(e.nominal_pro_quality);
            }
            log_delivery(&plan, &delivery);
            Ok(delivery)
        }
        Err(err) => {
            tracing::warn!(
                image_id = %plan.image_id,
                error = %err,
                "layered recompute failed, falling back to single-pass encode"
            );
            let delivery =
                encode_delivery(codec, plan.source.clone(), &plan, DeliverySource::Original)
                    .await?;
            commit_settings(&mut entity.write(), &plan, &delivery);
            log_delivery(&plan, &delivery);
            Ok(delivery)
        }
    }
}

/// Encode the source directly (simple mode).
async fn run_simple(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    plan: Plan,
) -> EngineResult<Delivery> {
    let delivery =
        encode_delivery(codec, plan.source.clone(), &plan, DeliverySource::Original).await?;
    commit_settings(&mut entity.write(), &plan, &delivery);
    log_delivery(&plan, &delivery);
    Ok(delivery)
}

/// Re-encode only the delivery from the existing composite.
async fn run_delivery_only(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    plan: Plan,
    composed: Arc<PixelBuffer>,
) -> EngineResult<Delivery> {
    let delivery = encode_delivery(codec, composed, &plan, DeliverySource::Composite).await?;
    commit_settings(&mut entity.write(), &plan, &delivery);
    log_delivery(&plan, &delivery);
    Ok(delivery)
}

/// Route a plan through the path its mode calls for.
async fn dispatch(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    plan: Plan,
) -> EngineResult<Delivery> {
    match plan.mode {
        Mode::Pro => run_layered(entity, codec, plan).await,
        Mode::Simple => run_simple(entity, codec, plan).await,
    }
}

/// Run the layered pipeline. Installs the configured layer set when the
/// entity has none or they belong to another format. Reuses every cached
/// layer encoding that is still valid.
pub async fn optimize(entity: &RwLock<ImageEntity>, codec: &dyn Codec) -> EngineResult<Delivery> {
    let plan = Plan::snapshot(&entity.read())?;
    tracing::debug!(image_id = %plan.image_id, layers = plan.layers.len(), "optimize");
    run_layered(entity, codec, plan).await
}

/// Discard the masks and analyze again from scratch.
pub async fn reanalyze(entity: &RwLock<ImageEntity>, codec: &dyn Codec) -> EngineResult<Delivery> {
    let plan = {
        let e = entity.read();
        let mut plan = Plan::snapshot(&e)?;
        plan.reset_layers(&e)?;
        plan
    };
    run_layered(entity, codec, plan).await
}

/// Change one layer's quality. Only that layer is re-encoded; the others
/// reuse their cached encodings and the masks are untouched.
pub async fn update_layer_quality(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    index: usize,
    quality: u8,
) -> EngineResult<Delivery> {
    let plan = {
        let e = entity.read();
        if e.layers.is_empty() {
            return Err(LayeredImageError::layer_index_out_of_range(index, 0));
        }
        let mut plan = Plan::snapshot(&e)?;
        plan.layers.set_quality(index, quality)?;
        plan
    };
    tracing::debug!(image_id = %plan.image_id, layer = index, quality, "layer quality changed");
    run_layered(entity, codec, plan).await
}

/// Merge the selected layers into the one with the largest index, then
/// recompute. Invalid selections are rejected before any state changes.
pub async fn merge_layers(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    indices: &[usize],
) -> EngineResult<Delivery> {
    let plan = {
        let e = entity.read();
        let mut plan = Plan::snapshot(&e)?;
        let survivor = plan.layers.merge(indices)?;
        tracing::debug!(image_id = %plan.image_id, ?indices, survivor, "layers merged");
        plan
    };
    run_layered(entity, codec, plan).await
}

/// Switch delivery source.
///
/// Pro with an existing composite and a nominal pro quality only re-encodes
/// the delivery at that quality; otherwise the full pipeline runs. Simple
/// encodes the source at the manual quality.
pub async fn switch_mode(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    mode: Mode,
) -> EngineResult<Delivery> {
    let (mut plan, pro_quality) = {
        let e = entity.read();
        (Plan::snapshot(&e)?, e.pro_quality)
    };
    plan.mode = mode;
    match mode {
        Mode::Pro => match (plan.composite.clone(), pro_quality) {
            (Some(composed), Some(q)) => {
                plan.quality = q;
                run_delivery_only(entity, codec, plan, composed).await
            }
            _ => run_layered(entity, codec, plan).await,
        },
        Mode::Simple => {
            plan.quality = plan.simple_quality;
            run_simple(entity, codec, plan).await
        }
    }
}

/// Change the delivery quality. In simple mode this is also the manual
/// quality. Pro mode re-encodes the existing composite when there is one.
pub async fn set_quality(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    quality: u8,
) -> EngineResult<Delivery> {
    let quality = validate_quality("quality", quality)?;
    let mut plan = Plan::snapshot(&entity.read())?;
    plan.quality = quality;
    if plan.mode == Mode::Simple {
        plan.simple_quality = quality;
    }
    match (plan.mode, plan.composite.clone()) {
        (Mode::Pro, Some(composed)) => run_delivery_only(entity, codec, plan, composed).await,
        _ => dispatch(entity, codec, plan).await,
    }
}

/// Store the manual quality. Simple mode re-encodes right away and returns
/// the new delivery; pro mode only records it for the next switch.
pub async fn set_simple_quality(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    quality: u8,
) -> EngineResult<Option<Delivery>> {
    let quality = validate_quality("simple_quality", quality)?;
    let mut plan = Plan::snapshot(&entity.read())?;
    if plan.mode == Mode::Pro {
        entity.write().simple_quality = quality;
        return Ok(None);
    }
    plan.simple_quality = quality;
    plan.quality = quality;
    run_simple(entity, codec, plan).await.map(Some)
}

/// Restore the default quality and recompute.
pub async fn reset_quality(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
) -> EngineResult<Delivery> {
    set_quality(entity, codec, DEFAULT_SIMPLE_QUALITY).await
}

/// Change the output container. Every cached encoding belongs to the old
/// format, so the layer set is rebuilt from the configured specs.
pub async fn set_format(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    format: OutputFormat,
) -> EngineResult<Delivery> {
    let plan = {
        let e = entity.read();
        let mut plan = Plan::snapshot(&e)?;
        plan.format = format;
        plan.reset_layers(&e)?;
        plan
    };
    tracing::debug!(image_id = %plan.image_id, %format, "format changed");
    dispatch(entity, codec, plan).await
}

/// Change the max-width pre-scale. The source is re-derived from the
/// full-resolution decode and analysis starts over.
pub async fn set_max_width(
    entity: &RwLock<ImageEntity>,
    codec: &dyn Codec,
    max_width: Option<u32>,
) -> EngineResult<Delivery> {
    if max_width == Some(0) {
        return Err(LayeredImageError::invalid_argument(
            "max_width",
            "0",
            "must be positive when set",
        ));
    }
    let (mut plan, original) = {
        let e = entity.read();
        let mut plan = Plan::snapshot(&e)?;
        plan.reset_layers(&e)?;
        (plan, e.original.clone())
    };
    let scaled = tokio::task::spawn_blocking(move || prescale((*original).clone(), max_width))
        .await
        .map_err(|e| join_error("prescale", e))??;
    plan.source = Arc::new(scaled);
    plan.max_width = max_width;
    tracing::debug!(
        image_id = %plan.image_id,
        ?max_width,
        dims = ?plan.source.dimensions(),
        "max width changed"
    );
    dispatch(entity, codec, plan).await
}

/// Deliver per the entity's mode; used right after an upload.
pub async fn process(entity: &RwLock<ImageEntity>, codec: &dyn Codec) -> EngineResult<Delivery> {
    let plan = Plan::snapshot(&entity.read())?;
    dispatch(entity, codec, plan).await
}
