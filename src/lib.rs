// lib.rs
//
// layered-image: adaptive layered image recompression.
//
// Pixels are bucketed by local gradient energy into layers, each layer is
// encoded at its own quality, and the decoded renditions are stitched back
// into one composite that is encoded once more for delivery. Flat regions
// keep a high quality so banding never shows; busy regions hide artifacts
// and are squeezed hard.

// Memory allocator optimization - jemalloc for better performance.
// Not supported on Windows/MSVC, so excluded there.
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod config;
pub mod engine;
pub mod error;
pub mod ops;

pub use config::{default_layer_specs, EngineConfig, LayerSpec};
pub use engine::{
    Codec, Delivery, DeliverySource, EncodedBytes, ImageCodec, ImageEntity, ImageId, LayerOverlay,
    PipelineState, PixelBuffer, Session,
};
pub use error::{ErrorCategory, LayeredImageError, Result};
pub use ops::{Mode, OutputFormat, QualityLabel};
