//! Extrusion recalculation for relocated wall halves.
//!
//! A relocated half is printed at another layer's Z, so its extrusion is not
//! copied. Each move gets `multiplier * rate * length`, where `rate` is the
//! filament per millimetre of the loop the half was taken from.

use std::ops::Range;

use crate::model::Toolpath;
use crate::path::{xy_distance, Move, Point3};
use crate::planner::{InterlockPlan, LoopRef};

/// Positions closer than this (mm) need no connecting travel.
pub const POSITION_TOLERANCE: f64 = 1e-4;

/// A move taken from one layer and printed in another.
#[derive(Debug, Clone, PartialEq)]
pub struct RelocatedMove {
    /// Command index of the source move.
    pub source: usize,
    /// Target position; Z is the displaced half's.
    pub to: Point3,
    /// Recomputed extrusion.
    pub e_delta: f64,
    /// Feedrate of the source move, or `None` when the destination has no
    /// modal feedrate.
    pub feedrate: Option<f64>,
}

/// Replacement of a displaced loop half by a relocated one.
#[derive(Debug, Clone, PartialEq)]
pub struct Splice {
    /// Index of the destination layer.
    pub layer: i64,
    /// Index of the layer the relocated half comes from.
    pub donor: i64,
    /// Commands of the displaced half.
    pub replaced: Range<usize>,
    /// Height the displaced half was printed at.
    pub z: f64,
    /// Travel to the relocated half's start, when the nozzle is elsewhere.
    pub entry: Option<Point3>,
    /// The relocated moves.
    pub moves: Vec<RelocatedMove>,
    /// Travel back to where the displaced half ended, with its feedrate.
    /// Its Z may differ from `z` when the half ended lifted.
    pub exit: Option<(Point3, Option<f64>)>,
    /// Extruder register value when the splice starts.
    pub e_start: f64,
    /// Register value to restore after the splice (absolute extrusion only).
    pub resync_e: Option<f64>,
    /// Destination extrudes in relative mode.
    pub relative_e: bool,
    /// Filament the displaced half would have used.
    pub displaced_extrusion: f64,
}

impl Splice {
    /// Filament used by the relocated moves.
    pub fn extrusion(&self) -> f64 {
        self.moves.iter().map(|m| m.e_delta).sum()
    }

    /// Travel moves added to keep the nozzle path continuous.
    pub fn synthesized_moves(&self) -> usize {
        usize::from(self.entry.is_some()) + usize::from(self.exit.is_some())
    }
}

fn loop_moves<'a>(toolpath: &'a Toolpath, layer: usize, loop_ref: &LoopRef) -> &'a [Move] {
    &toolpath.layers[layer].segments[loop_ref.segment].moves[loop_ref.moves.clone()]
}

/// Total extrusion and length of a run of moves.
fn measure(moves: &[Move]) -> (f64, f64) {
    moves
        .iter()
        .fold((0.0, 0.0), |(e, l), m| (e + m.e_delta, l + m.length()))
}

/// Recompute a relocated half so its filament follows its path length.
///
/// `source` is the whole loop the half is taken from; `split` the number of
/// moves that stay behind.
pub fn recompute_half(
    source: &[Move],
    split: usize,
    z: f64,
    multiplier: f64,
) -> Vec<RelocatedMove> {
    let (extrusion, length) = measure(source);
    let rate = if length > 0.0 { extrusion / length } else { 0.0 };
    source[split..]
        .iter()
        .map(|m| RelocatedMove {
            source: m.command,
            to: Point3::new(m.to.x, m.to.y, z),
            e_delta: multiplier * rate * m.length(),
            feedrate: m.feedrate,
        })
        .collect()
}

fn splice(
    toolpath: &Toolpath,
    dest: (usize, &LoopRef, usize),
    donor: (usize, &LoopRef, usize),
    multiplier: f64,
) -> Splice {
    let (dest_layer, dest_loop, dest_split) = dest;
    let (donor_layer, donor_loop, donor_split) = donor;

    let displaced = &loop_moves(toolpath, dest_layer, dest_loop)[dest_split..];
    // Both halves are non-empty: splits are interior vertices.
    let first = &displaced[0];
    let last = &displaced[displaced.len() - 1];
    // The layer's first Z word may be a lift; print where the wall was.
    let z = first.to.z;

    let source = loop_moves(toolpath, donor_layer, donor_loop);
    let mut moves = recompute_half(source, donor_split, z, multiplier);
    if last.feedrate.is_none() {
        for m in &mut moves {
            m.feedrate = None;
        }
    }
    let relocated_start = &source[donor_split].from;
    let relocated_end = &source[source.len() - 1].to;
    let end_feedrate = moves.last().and_then(|m| m.feedrate);

    let entry = (xy_distance(&first.from, relocated_start) > POSITION_TOLERANCE)
        .then(|| Point3::new(relocated_start.x, relocated_start.y, z));
    let exit = (xy_distance(&last.to, relocated_end) > POSITION_TOLERANCE
        || (last.to.z - z).abs() > POSITION_TOLERANCE
        || last.feedrate != end_feedrate)
        .then(|| (last.to, last.feedrate));

    let relative_e = first.relative_e;
    Splice {
        layer: toolpath.layers[dest_layer].index,
        donor: toolpath.layers[donor_layer].index,
        replaced: first.command..last.command + 1,
        z,
        entry,
        moves,
        exit,
        e_start: first.e_register - first.e_delta,
        resync_e: (!relative_e).then_some(last.e_register),
        relative_e,
        displaced_extrusion: measure(displaced).0,
    }
}

/// Build both splices of a plan: the upper loop's second half goes down into
/// the lower layer and the lower loop's second half goes up.
pub fn recalculate(toolpath: &Toolpath, plan: &InterlockPlan, multiplier: f64) -> [Splice; 2] {
    let lower = (plan.lower, &plan.lower_loop, plan.lower_split);
    let upper = (plan.upper, &plan.upper_loop, plan.upper_split);
    [
        splice(toolpath, lower, upper, multiplier),
        splice(toolpath, upper, lower, multiplier),
    ]
}
