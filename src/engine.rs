// src/engine.rs
//
// The recompression engine:
// 1. Decode the upload (and pre-scale to the max width)
// 2. Analyze local gradient energy into per-layer masks
// 3. Encode + decode the whole image once per layer quality
// 4. Composite each pixel from the layer that owns it
// 5. Encode the composite once more for delivery
//
// This file is a facade over the modules in engine/.

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Larger images are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

pub mod analyzer;
pub mod codec;
mod common;
pub mod compositor;
pub mod decoder;
pub mod encoder;
mod entity;
pub mod io;
pub mod layer_encoder;
pub mod layers;
mod orchestrator;
pub mod pixels;
pub mod pool;
mod session;

pub use codec::{decode_encoded, Codec, EncodedBytes, ImageCodec};
pub use common::{run_with_panic_policy, EngineResult};
pub use decoder::{check_dimensions, decode_source, detect_jpeg_sampling, DecodedSource, JpegSampling};
pub use encoder::{encode_jpeg, encode_pixels, encode_png, encode_webp, QualitySettings};
pub use entity::{Delivery, DeliverySource, ImageEntity, ImageId, PipelineState};
pub use io::Source;
pub use layers::{Layer, LayerOverlay, LayerStore, Mask, MERGED_LAYER_NAME};
pub use pixels::{calc_target_dimensions, prescale, PixelBuffer};
pub use session::{BusyGuard, ImageSlot, Session};
