//! Adapter for slicers that run post-processing scripts.
//!
//! The host hands over the program as a list of layers, each a list of lines
//! without terminators, together with the raw values of the settings it
//! rendered from [`definition`]. [`execute`] runs the transformer and hands
//! back the same shape. On a fatal error the input comes back untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dialect::Dialect;
use crate::error::{BrickError, Result};
use crate::planner::PairingNotice;
use crate::settings::{
    parse_layer_list, Settings, MAX_EXTRUSION_MULTIPLIER, MIN_EXTRUSION_MULTIPLIER,
};
use crate::{transform, TransformStats};

/// Script name shown by the host.
pub const PLUGIN_NAME: &str = "BrickLayers";
/// Key the host stores the script's settings under.
pub const PLUGIN_KEY: &str = "BrickLayersCuraScript";

/// Settings document of a post-processing script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDefinition {
    /// Display name.
    pub name: String,
    /// Settings key.
    pub key: String,
    /// Script metadata.
    pub metadata: PluginMetadata,
    /// Definition format version.
    pub version: u32,
    /// Settings by key.
    pub settings: BTreeMap<String, SettingDefinition>,
}

/// Script metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Always `postprocessing`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// One user-facing setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDefinition {
    /// Field label.
    pub label: String,
    /// Tooltip.
    pub description: String,
    /// Value type: `bool`, `int`, `float` or `str`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Default value.
    pub default_value: Value,
    /// Lower bound, for numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_value: Option<f64>,
    /// Upper bound, for numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_value: Option<f64>,
}

impl SettingDefinition {
    fn new(label: &str, description: &str, kind: &str, default_value: Value) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
            kind: kind.into(),
            default_value,
            minimum_value: None,
            maximum_value: None,
        }
    }

    fn bounded(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum_value = minimum;
        self.maximum_value = maximum;
        self
    }
}

impl PluginDefinition {
    /// Serialize as the pretty-printed JSON the host expects.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// The settings definition announced to the host.
pub fn definition() -> PluginDefinition {
    let defaults = Settings::default();
    let mut settings = BTreeMap::new();
    settings.insert(
        "enabled".to_string(),
        SettingDefinition::new(
            "Enable BrickLayers",
            "If disabled, the G-code passes through without modification.",
            "bool",
            Value::from(defaults.enabled),
        ),
    );
    settings.insert(
        "start_at_layer".to_string(),
        SettingDefinition::new(
            "Start at layer",
            "0-based index of the first layer whose inner walls are interlocked.",
            "int",
            Value::from(defaults.start_layer),
        )
        .bounded(Some(0.0), None),
    );
    settings.insert(
        "extrusion_multiplier".to_string(),
        SettingDefinition::new(
            "Extrusion multiplier",
            "Scale applied to the extrusion of relocated wall halves.",
            "float",
            Value::from(defaults.extrusion_multiplier),
        )
        .bounded(
            Some(MIN_EXTRUSION_MULTIPLIER),
            Some(MAX_EXTRUSION_MULTIPLIER),
        ),
    );
    settings.insert(
        "layers_to_ignore".to_string(),
        SettingDefinition::new(
            "Layers to ignore",
            "Comma-separated 0-based layer indices left untouched.",
            "str",
            Value::from(""),
        ),
    );

    PluginDefinition {
        name: PLUGIN_NAME.into(),
        key: PLUGIN_KEY.into(),
        metadata: PluginMetadata {
            kind: "postprocessing".into(),
        },
        version: 2,
        settings,
    }
}

/// Setting values as the host supplies them: untyped strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostValues {
    /// `enabled`.
    pub enabled: String,
    /// `start_at_layer`.
    pub start_at_layer: String,
    /// `extrusion_multiplier`.
    pub extrusion_multiplier: String,
    /// `layers_to_ignore`.
    pub layers_to_ignore: String,
}

impl Default for HostValues {
    fn default() -> Self {
        let defaults = Settings::default();
        Self {
            enabled: defaults.enabled.to_string(),
            start_at_layer: defaults.start_layer.to_string(),
            extrusion_multiplier: defaults.extrusion_multiplier.to_string(),
            layers_to_ignore: String::new(),
        }
    }
}

impl HostValues {
    /// Interpret the values as settings for the given dialect.
    ///
    /// Booleans accept `true`, `1` and `yes` in any case; anything else is
    /// false.
    pub fn to_settings(&self, dialect: Dialect) -> Result<Settings> {
        let enabled = matches!(
            self.enabled.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes"
        );
        let start_layer = self.start_at_layer.trim().parse::<i64>().map_err(|_| {
            BrickError::settings(format!(
                "start_at_layer `{}` is not an integer",
                self.start_at_layer
            ))
        })?;
        let extrusion_multiplier =
            self.extrusion_multiplier.trim().parse::<f64>().map_err(|_| {
                BrickError::settings(format!(
                    "extrusion_multiplier `{}` is not a number",
                    self.extrusion_multiplier
                ))
            })?;

        let settings = Settings {
            enabled,
            start_layer,
            extrusion_multiplier,
            ignored_layers: parse_layer_list(&self.layers_to_ignore)?,
            dialect,
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// What [`execute`] hands back to the host.
#[derive(Debug, Clone)]
pub struct HostOutput {
    /// Layers of the rewritten program, or the input on error.
    pub layers: Vec<Vec<String>>,
    /// Layers and loops left untouched.
    pub notices: Vec<PairingNotice>,
    /// Run counters; default when nothing ran.
    pub stats: TransformStats,
    /// The fatal error that left the input unchanged.
    pub error: Option<BrickError>,
}

impl HostOutput {
    fn unchanged(layers: &[Vec<String>], error: Option<BrickError>) -> Self {
        Self {
            layers: layers.to_vec(),
            notices: Vec::new(),
            stats: TransformStats::default(),
            error,
        }
    }
}

/// Run the transformer on the host's layer lists.
pub fn execute(layers: &[Vec<String>], settings: &Settings) -> HostOutput {
    if !settings.enabled {
        return HostOutput::unchanged(layers, None);
    }

    let mut input = String::new();
    for line in layers.iter().flatten() {
        input.push_str(line);
        input.push('\n');
    }

    match transform(&input, settings) {
        Ok(result) => HostOutput {
            layers: regroup(&result.output),
            notices: result.notices,
            stats: result.stats,
            error: None,
        },
        Err(e) => HostOutput::unchanged(layers, Some(e)),
    }
}

/// Split a program into layers before every layer-change line of any known
/// slicer.
fn regroup(output: &str) -> Vec<Vec<String>> {
    let tokens = Dialect::boundary_tokens();
    let mut layers = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if tokens.iter().any(|t| trimmed.starts_with(t.as_str())) && !current.is_empty() {
            layers.push(std::mem::take(&mut current));
        }
        current.push(line.to_string());
    }
    if !current.is_empty() {
        layers.push(current);
    }
    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn host_layers() -> Vec<Vec<String>> {
        let mut layers = vec![vec![";FLAVOR:Marlin".to_string(), "M82".to_string()]];
        let mut e = 0.0;
        for (index, z) in [(0, 0.2), (1, 0.4)] {
            let mut lines = vec![
                format!(";LAYER:{}", index),
                format!("G0 X0 Y0 Z{}", z),
                ";TYPE:WALL-INNER".to_string(),
            ];
            for (x, y) in [(10, 0), (10, 10), (0, 10), (0, 0)] {
                e += 0.5;
                lines.push(format!("G1 X{} Y{} E{}", x, y, e));
            }
            layers.push(lines);
        }
        layers
    }

    fn settings() -> Settings {
        HostValues {
            start_at_layer: "0".into(),
            ..Default::default()
        }
        .to_settings(Dialect::cura())
        .unwrap()
    }

    #[test]
    fn test_definition_document() {
        let json = definition().to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "BrickLayers");
        assert_eq!(value["key"], "BrickLayersCuraScript");
        assert_eq!(value["metadata"]["type"], "postprocessing");
        assert_eq!(value["version"], 2);
        assert_eq!(value["settings"]["enabled"]["default_value"], true);
        assert_eq!(value["settings"]["start_at_layer"]["type"], "int");
        assert_eq!(value["settings"]["start_at_layer"]["default_value"], 3);
        assert_eq!(value["settings"]["extrusion_multiplier"]["maximum_value"], 2.0);
        assert!(value["settings"]["layers_to_ignore"]
            .get("minimum_value")
            .is_none());
    }

    #[test]
    fn test_host_values() {
        let values = HostValues {
            enabled: "Yes".into(),
            start_at_layer: " 5 ".into(),
            extrusion_multiplier: "1.2".into(),
            layers_to_ignore: "7, 9;12".into(),
        };
        let settings = values.to_settings(Dialect::cura()).unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.start_layer, 5);
        assert_eq!(settings.extrusion_multiplier, 1.2);
        assert_eq!(
            settings.ignored_layers.into_iter().collect::<Vec<_>>(),
            vec![7, 9, 12]
        );

        let values = HostValues {
            enabled: "false".into(),
            ..Default::default()
        };
        assert!(!values.to_settings(Dialect::cura()).unwrap().enabled);

        let values = HostValues {
            extrusion_multiplier: "lots".into(),
            ..Default::default()
        };
        let err = values.to_settings(Dialect::cura()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let values = HostValues {
            extrusion_multiplier: "2.5".into(),
            ..Default::default()
        };
        assert!(values.to_settings(Dialect::cura()).is_err());
    }

    #[test]
    fn test_execute_keeps_layer_shape() {
        let input = host_layers();
        let output = execute(&input, &settings());
        assert!(output.error.is_none());
        assert_eq!(output.stats.swapped_loops, 1);
        assert_eq!(output.layers.len(), 3);
        assert_eq!(output.layers[0], input[0]);
        assert_eq!(output.layers[1][0], ";LAYER:0");
        assert_eq!(output.layers[2][0], ";LAYER:1");
        assert!(output.layers[1]
            .iter()
            .any(|l| l == ";BRICKLAYERS:BEGIN layer=0 from=1"));
        assert!(output.layers.iter().flatten().all(|l| !l.contains('\n')));
    }

    #[test]
    fn test_execute_disabled() {
        let input = host_layers();
        let mut disabled = settings();
        disabled.enabled = false;
        let output = execute(&input, &disabled);
        assert_eq!(output.layers, input);
        assert_eq!(output.stats, TransformStats::default());
    }

    #[test]
    fn test_execute_error_returns_input() {
        let mut input = host_layers();
        input[1].push("G1 X1.2.3".to_string());
        let output = execute(&input, &settings());
        assert_eq!(output.layers, input);
        assert_eq!(output.error.map(|e| e.kind()), Some(ErrorKind::Parse));
    }

    #[test]
    fn test_regroup_other_dialects() {
        let layers = regroup("M82\n;LAYER_CHANGE\nG1 X1\n; CHANGE_LAYER\nG1 X2\n");
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[2], vec!["; CHANGE_LAYER", "G1 X2"]);
    }
}
