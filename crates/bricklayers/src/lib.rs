#![warn(missing_docs)]

//! Brick-style interlocking of inner wall seams in sliced G-code.
//!
//! Slicers start every inner wall loop of a part at roughly the same point,
//! so the seams stack into a vertical weak line. This crate pairs adjacent
//! layers, splits each inner wall loop in half and swaps the second halves
//! between the two layers, so the seams alternate like bricks in a wall.
//!
//! The pipeline is parse → model → plan → recalculate → serialize. Every
//! line outside a rewritten wall half is emitted exactly as read.
//!
//! # Example
//!
//! ```ignore
//! use bricklayers::{transform, Settings};
//!
//! let input = std::fs::read_to_string("part.gcode")?;
//! let settings = Settings {
//!     start_layer: 2,
//!     ..Default::default()
//! };
//! let result = transform(&input, &settings)?;
//!
//! for notice in &result.notices {
//!     eprintln!("skipped {}", notice);
//! }
//! println!("swapped {} loops", result.stats.swapped_loops);
//! std::fs::write("part.gcode", result.output)?;
//! ```

pub mod dialect;
pub mod error;
pub mod extrusion;
pub mod host;
pub mod model;
pub mod parse;
pub mod path;
pub mod planner;
pub mod serialize;
pub mod settings;

pub use dialect::{Dialect, WallKind};
pub use error::{BrickError, ErrorKind, Result};
pub use extrusion::{recalculate, Splice};
pub use model::{Layer, Segment, Toolpath};
pub use parse::{parse_commands, Command, CommandKind};
pub use planner::{plan, InterlockPlan, NoticeReason, PairingNotice, Planning};
pub use serialize::serialize;
pub use settings::{parse_layer_list, Settings};

use serde::Serialize;

/// Counters describing one transformation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformStats {
    /// Layers found in the input.
    pub layers: usize,
    /// Layer pairs planned.
    pub pairs: usize,
    /// Loop pairs whose second halves were swapped.
    pub swapped_loops: usize,
    /// Travel moves added around relocated halves.
    pub synthesized_moves: usize,
    /// Motion commands in the input.
    pub input_motions: usize,
    /// Motion commands in the output.
    pub output_motions: usize,
}

/// Output of [`transform`].
#[derive(Debug, Clone)]
pub struct Transformed {
    /// The rewritten program.
    pub output: String,
    /// Layers and loops left untouched, ordered by layer.
    pub notices: Vec<PairingNotice>,
    /// Run counters.
    pub stats: TransformStats,
}

/// Interlock the inner walls of a G-code program.
///
/// Disabled settings return the input unchanged without parsing it.
/// Otherwise the settings are validated first; any error aborts the run and
/// no output is produced.
pub fn transform(input: &str, settings: &Settings) -> Result<Transformed> {
    if !settings.enabled {
        return Ok(Transformed {
            output: input.to_string(),
            notices: Vec::new(),
            stats: TransformStats::default(),
        });
    }
    settings.validate()?;

    let commands = parse_commands(input, &settings.dialect)?;
    let toolpath = Toolpath::build(commands)?;
    let planning = plan(&toolpath, settings);

    let splices: Vec<Splice> = planning
        .plans
        .iter()
        .flat_map(|p| recalculate(&toolpath, p, settings.extrusion_multiplier))
        .collect();
    let output = serialize(&toolpath, &splices);

    let input_motions = toolpath.motion_count();
    let synthesized_moves: usize = splices.iter().map(Splice::synthesized_moves).sum();
    let replaced: usize = splices.iter().map(|s| s.replaced.len()).sum();
    let relocated: usize = splices.iter().map(|s| s.moves.len()).sum();

    let stats = TransformStats {
        layers: toolpath.layers.len(),
        pairs: planning.pairs.len(),
        swapped_loops: planning.plans.len(),
        synthesized_moves,
        input_motions,
        output_motions: input_motions - replaced + relocated + synthesized_moves,
    };

    Ok(Transformed {
        output,
        notices: planning.notices,
        stats,
    })
}

/// Per-layer overview of a program, as the model builder sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSummary {
    /// Layer index.
    pub index: i64,
    /// Nominal Z height.
    pub z: f64,
    /// Segment classifications in order.
    pub segments: Vec<WallKind>,
    /// Inner wall loops found.
    pub inner_loops: usize,
    /// Motion commands.
    pub motions: usize,
}

/// Summarize the layers of a program without transforming it.
pub fn inspect(input: &str, dialect: &Dialect) -> Result<Vec<LayerSummary>> {
    let toolpath = Toolpath::build(parse_commands(input, dialect)?)?;
    Ok(toolpath
        .layers
        .iter()
        .map(|layer| LayerSummary {
            index: layer.index,
            z: layer.z,
            segments: layer.segments.iter().map(|s| s.kind.clone()).collect(),
            inner_loops: layer.inner_walls().map(|(_, s)| s.loops().len()).sum(),
            motions: layer.motion_count(),
        })
        .collect())
}
