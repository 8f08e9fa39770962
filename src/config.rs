// src/config.rs
//
// Engine configuration: the default layer set and the quality knobs that
// seed every new image entity.

use crate::error::LayeredImageError;
use crate::ops::{validate_quality, Mode, OutputFormat};
use serde::{Deserialize, Serialize};

/// Nominal quality the optimizer records for pro mode.
pub const DEFAULT_PRO_QUALITY: u8 = 80;

/// Manual quality used in simple mode until the user picks one.
pub const DEFAULT_SIMPLE_QUALITY: u8 = 75;

/// One bucket of the default layer set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    /// Upper bound (inclusive) of local gradient energy this layer accepts.
    pub threshold: u16,
    pub quality: u8,
}

impl LayerSpec {
    pub fn new(name: impl Into<String>, threshold: u16, quality: u8) -> Self {
        Self {
            name: name.into(),
            threshold,
            quality,
        }
    }
}

/// Default four-bucket set: flat areas get the highest quality so banding
/// never shows, busy edges hide artifacts and get squeezed hardest.
pub fn default_layer_specs() -> Vec<LayerSpec> {
    vec![
        LayerSpec::new("Smooth", 4, 95),
        LayerSpec::new("Soft Texture", 12, 80),
        LayerSpec::new("High Detail", 30, 60),
        LayerSpec::new("Sharp Edges", 255, 40),
    ]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub layers: Vec<LayerSpec>,
    pub pro_quality: u8,
    pub simple_quality: u8,
    pub format: OutputFormat,
    pub max_width: Option<u32>,
    pub mode: Mode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layers: default_layer_specs(),
            pro_quality: DEFAULT_PRO_QUALITY,
            simple_quality: DEFAULT_SIMPLE_QUALITY,
            format: OutputFormat::Jpeg,
            max_width: None,
            mode: Mode::Pro,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, LayeredImageError> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            LayeredImageError::invalid_argument("config", "json", e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LayeredImageError> {
        validate_layer_specs(&self.layers)?;
        validate_quality("pro_quality", self.pro_quality)?;
        validate_quality("simple_quality", self.simple_quality)?;
        if self.max_width == Some(0) {
            return Err(LayeredImageError::invalid_argument(
                "max_width",
                "0",
                "must be positive when set",
            ));
        }
        Ok(())
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_max_width(mut self, max_width: Option<u32>) -> Self {
        self.max_width = max_width;
        self
    }

    pub fn with_layers(mut self, layers: Vec<LayerSpec>) -> Self {
        self.layers = layers;
        self
    }
}

/// Thresholds must be strictly increasing so "first bucket that fits" is a
/// partition of the energy range.
pub fn validate_layer_specs(specs: &[LayerSpec]) -> Result<(), LayeredImageError> {
    if specs.is_empty() {
        return Err(LayeredImageError::invalid_argument(
            "layers",
            "[]",
            "at least one layer is required",
        ));
    }
    for spec in specs {
        validate_quality("layer.quality", spec.quality)?;
    }
    for pair in specs.windows(2) {
        if pair[1].threshold <= pair[0].threshold {
            return Err(LayeredImageError::invalid_argument(
                "layers.threshold",
                format!("{} after {}", pair[1].threshold, pair[0].threshold),
                "thresholds must be strictly increasing",
            ));
        }
    }
    Ok(())
}
