// src/engine/common.rs
//
// Common utilities shared across engine modules.
// Provides unified result type and the panic policy around native codecs.

use crate::error::LayeredImageError;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Unified Result type for engine internals.
pub type EngineResult<T> = std::result::Result<T, LayeredImageError>;

/// Run a codec closure, turning a panic into `InternalPanic`.
///
/// mozjpeg reports fatal libjpeg errors by unwinding, so every call into a
/// native codec goes through here. The stage name ends up in the message.
pub fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            tracing::error!(stage, %detail, "codec panicked");
            Err(LayeredImageError::internal_panic(format!(
                "{stage}: {detail}"
            )))
        }
    }
}
