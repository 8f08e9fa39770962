// src/error.rs
//
// Error type shared by every stage. Per-layer codec failures are recovered
// inside the orchestrator; everything else reaches the caller.

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy used by callers to decide how to react.
///
/// - UserError: Invalid input, recoverable by the caller
/// - CodecError: Format/encoding issues
/// - ResourceLimit: Limits and contention (retry later)
/// - InternalBug: Library bugs (should not happen)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Invalid input, recoverable by user
    UserError,
    /// Format/encoding issues
    CodecError,
    /// Memory/dimension limits or a recompute already in flight
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }

    /// Stable LAYERED_IMAGE_* code string for this category
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "LAYERED_IMAGE_USER_ERROR",
            ErrorCategory::CodecError => "LAYERED_IMAGE_CODEC_ERROR",
            ErrorCategory::ResourceLimit => "LAYERED_IMAGE_RESOURCE_LIMIT",
            ErrorCategory::InternalBug => "LAYERED_IMAGE_INTERNAL_BUG",
        }
    }
}

/// layered-image error types
#[derive(Debug, Error)]
pub enum LayeredImageError {
    // File I/O Errors
    #[error("Failed to read file '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to memory-map file '{path}': {source}")]
    MmapFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Decode Errors (source image)
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Corrupted image data")]
    CorruptedImage,

    // Size Limit Errors
    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    // Codec Errors (per-layer round trip)
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Failed to decode {format} layer output: {message}")]
    LayerDecodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Pipeline Errors
    #[error("Image '{image_id}' already has a recompute in flight. Retry after it completes")]
    PipelineBusy { image_id: Cow<'static, str> },

    #[error("Invalid layer merge: {reason}")]
    InvalidMerge { reason: Cow<'static, str> },

    #[error("Layer index {index} out of range (image has {len} layers)")]
    LayerIndexOutOfRange { index: usize, len: usize },

    #[error("Image not found: {image_id}")]
    ImageNotFound { image_id: Cow<'static, str> },

    // Configuration Errors
    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

impl LayeredImageError {
    pub fn file_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn mmap_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::MmapFailed {
            path: path.into(),
            source,
        }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn corrupted_image() -> Self {
        Self::CorruptedImage
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn layer_decode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::LayerDecodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn pipeline_busy(image_id: impl Into<Cow<'static, str>>) -> Self {
        Self::PipelineBusy {
            image_id: image_id.into(),
        }
    }

    pub fn invalid_merge(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidMerge {
            reason: reason.into(),
        }
    }

    pub fn layer_index_out_of_range(index: usize, len: usize) -> Self {
        Self::LayerIndexOutOfRange { index, len }
    }

    pub fn image_not_found(image_id: impl Into<Cow<'static, str>>) -> Self {
        Self::ImageNotFound {
            image_id: image_id.into(),
        }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (caller can fix it or retry)
    ///
    /// Consistent with category():
    /// - UserError and ResourceLimit are recoverable
    /// - CodecError and InternalBug are not
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidMerge { .. }
            | Self::LayerIndexOutOfRange { .. }
            | Self::ImageNotFound { .. }
            | Self::InvalidArgument { .. } => ErrorCategory::UserError,

            Self::UnsupportedFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::CorruptedImage
            | Self::EncodeFailed { .. }
            | Self::LayerDecodeFailed { .. }
            | Self::ResizeFailed { .. } => ErrorCategory::CodecError,

            // Busy is a contention signal: the same request succeeds once the
            // in-flight recompute finishes.
            Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::PipelineBusy { .. }
            | Self::FileReadFailed { .. }
            | Self::MmapFailed { .. } => ErrorCategory::ResourceLimit,

            Self::InternalPanic { .. } => ErrorCategory::InternalBug,
        }
    }

    /// True for failures of the source image itself (fatal for that image only).
    pub fn is_source_decode_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat { .. }
                | Self::DecodeFailed { .. }
                | Self::CorruptedImage
                | Self::DimensionExceedsLimit { .. }
                | Self::PixelCountExceedsLimit { .. }
        )
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, LayeredImageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LayeredImageError::pipeline_busy("abc123");
        assert!(err.to_string().contains("abc123"));
        let err = LayeredImageError::layer_index_out_of_range(7, 4);
        assert!(err.to_string().contains('7'));
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn test_error_recoverable() {
        assert!(LayeredImageError::pipeline_busy("x").is_recoverable());
        assert!(LayeredImageError::invalid_merge("need two").is_recoverable());
        assert!(!LayeredImageError::decode_failed("test").is_recoverable());
        assert!(!LayeredImageError::encode_failed("jpeg", "test").is_recoverable());
        assert!(!LayeredImageError::internal_panic("test").is_recoverable());
    }

    #[test]
    fn test_error_category_user_error() {
        assert_eq!(
            LayeredImageError::invalid_merge("x").category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            LayeredImageError::layer_index_out_of_range(5, 2).category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            LayeredImageError::image_not_found("id").category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            LayeredImageError::invalid_argument("quality", "0", "must be 1-100").category(),
            ErrorCategory::UserError
        );
    }

    #[test]
    fn test_error_category_codec_error() {
        assert_eq!(
            LayeredImageError::decode_failed("x").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            LayeredImageError::layer_decode_failed("webp", "x").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            LayeredImageError::resize_failed((10, 10), (5, 5), "x").category(),
            ErrorCategory::CodecError
        );
    }

    #[test]
    fn test_error_category_resource_limit() {
        assert_eq!(
            LayeredImageError::pipeline_busy("x").category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            LayeredImageError::dimension_exceeds_limit(40000, 32768).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            LayeredImageError::file_read_failed(
                "a.jpg",
                std::io::Error::from(std::io::ErrorKind::NotFound)
            )
            .category(),
            ErrorCategory::ResourceLimit
        );
    }

    #[test]
    fn test_source_decode_classification() {
        assert!(LayeredImageError::corrupted_image().is_source_decode_error());
        assert!(LayeredImageError::unsupported_format("tiff").is_source_decode_error());
        assert!(!LayeredImageError::encode_failed("jpeg", "x").is_source_decode_error());
        assert!(!LayeredImageError::pipeline_busy("x").is_source_decode_error());
    }

    #[test]
    fn test_category_codes() {
        assert_eq!(ErrorCategory::UserError.code(), "LAYERED_IMAGE_USER_ERROR");
        assert_eq!(ErrorCategory::ResourceLimit.as_str(), "ResourceLimit");
    }
}
