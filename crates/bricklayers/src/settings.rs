//! Transformer settings.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{BrickError, Result};

/// Lowest accepted extrusion multiplier.
pub const MIN_EXTRUSION_MULTIPLIER: f64 = 0.5;
/// Highest accepted extrusion multiplier.
pub const MAX_EXTRUSION_MULTIPLIER: f64 = 2.0;

/// Settings for one transformation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// When false the input is passed through untouched.
    pub enabled: bool,
    /// First layer index eligible for interlocking.
    pub start_layer: i64,
    /// Scale applied to the extrusion of relocated wall halves.
    pub extrusion_multiplier: f64,
    /// Layer indices left untouched; pairing never crosses them.
    pub ignored_layers: BTreeSet<i64>,
    /// Marker vocabulary of the input.
    pub dialect: Dialect,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            start_layer: 3,
            extrusion_multiplier: 1.05,
            ignored_layers: BTreeSet::new(),
            dialect: Dialect::default(),
        }
    }
}

impl Settings {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if self.start_layer < 0 {
            return Err(BrickError::settings(format!(
                "start_layer must not be negative (got {})",
                self.start_layer
            )));
        }
        if !self.extrusion_multiplier.is_finite()
            || self.extrusion_multiplier < MIN_EXTRUSION_MULTIPLIER
            || self.extrusion_multiplier > MAX_EXTRUSION_MULTIPLIER
        {
            return Err(BrickError::settings(format!(
                "extrusion_multiplier must be between {} and {} (got {})",
                MIN_EXTRUSION_MULTIPLIER, MAX_EXTRUSION_MULTIPLIER, self.extrusion_multiplier
            )));
        }
        if self.dialect.layer_marker.trim().is_empty() {
            return Err(BrickError::settings("dialect layer_marker is empty"));
        }
        if self.dialect.type_marker.trim().is_empty() {
            return Err(BrickError::settings("dialect type_marker is empty"));
        }
        if self.dialect.inner_wall.iter().all(|n| n.trim().is_empty()) {
            return Err(BrickError::settings("dialect names no inner wall type"));
        }
        Ok(())
    }

    /// Is the layer with this index eligible for interlocking?
    pub fn is_eligible(&self, layer: i64) -> bool {
        layer >= self.start_layer && !self.ignored_layers.contains(&layer)
    }

    /// Load settings from a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| BrickError::settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Settings =
            serde_json::from_str(text).map_err(|e| BrickError::settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Parse a free-text list of layer indices such as `"3, 4;7 9"`.
///
/// Tokens are separated by commas, semicolons or whitespace.
pub fn parse_layer_list(text: &str) -> Result<BTreeSet<i64>> {
    text.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<i64>().map_err(|_| {
                BrickError::settings(format!("`{}` is not a layer index", token))
            })
        })
        .collect()
}
