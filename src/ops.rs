// src/ops.rs
//
// Small value types shared across the engine: output container, delivery
// mode and the quality label shown next to an artifact.

use crate::error::LayeredImageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest and highest quality accepted by the codec primitive.
pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;

/// Output container for every encode the engine performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    pub fn from_str(format: &str) -> Result<Self, LayeredImageError> {
        match format.to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::WebP),
            other => Err(LayeredImageError::unsupported_format(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }

    /// Lossless containers ignore the quality argument entirely.
    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Png)
    }

    /// Sniff the container of already-encoded bytes by magic number.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF {
            Some(Self::Jpeg)
        } else if bytes.len() >= 8 && bytes[..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]
        {
            Some(Self::Png)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::WebP)
        } else {
            None
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Jpeg
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which source feeds the delivery encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Original pixels, one global quality.
    Simple,
    /// Layered composite source.
    Pro,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Pro
    }
}

/// How the quality of a delivered artifact is presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QualityLabel {
    Percent(u8),
    Lossless,
}

impl QualityLabel {
    pub fn for_format(format: OutputFormat, quality: u8) -> Self {
        if format.is_lossless() {
            Self::Lossless
        } else {
            Self::Percent(quality)
        }
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent(q) => write!(f, "{q}%"),
            Self::Lossless => f.write_str("Lossless"),
        }
    }
}

/// Reject qualities outside 1..=100.
pub fn validate_quality(name: &'static str, quality: u8) -> Result<u8, LayeredImageError> {
    if (MIN_QUALITY..=MAX_QUALITY).contains(&quality) {
        Ok(quality)
    } else {
        Err(LayeredImageError::invalid_argument(
            name,
            quality.to_string(),
            "quality must be between 1 and 100",
        ))
    }
}
