//! Toolpath geometry: points, moves and wall loop measurements.

use std::ops::Range;

/// A nozzle position.
pub type Point3 = nalgebra::Point3<f64>;

/// Lengths and extrusions below this are treated as zero.
pub const EPSILON: f64 = 1e-9;

/// Distance between two positions in the XY plane.
pub fn xy_distance(a: &Point3, b: &Point3) -> f64 {
    (b.xy() - a.xy()).norm()
}

/// One interpreted `G0`/`G1` command.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    /// Index of the command in the toolpath's command list.
    pub command: usize,
    /// Nozzle position before the move.
    pub from: Point3,
    /// Nozzle position after the move.
    pub to: Point3,
    /// Filament pushed by this move (negative for retractions).
    pub e_delta: f64,
    /// Extruder register value after the move.
    pub e_register: f64,
    /// Effective feedrate during the move (explicit or modal).
    pub feedrate: Option<f64>,
    /// Extrusion was in relative mode (`M83`).
    pub relative_e: bool,
    /// Positioning was in relative mode (`G91`).
    pub relative_xyz: bool,
}

impl Move {
    /// XY length of the move.
    pub fn length(&self) -> f64 {
        xy_distance(&self.from, &self.to)
    }

    /// Does the move deposit material while travelling?
    pub fn is_extruding(&self) -> bool {
        self.e_delta > EPSILON && self.length() > EPSILON
    }
}

/// Find the wall loops in a run of moves: maximal runs of extruding moves.
pub fn find_loops(moves: &[Move]) -> Vec<Range<usize>> {
    let mut loops = Vec::new();
    let mut start: Option<usize> = None;
    for (i, mv) in moves.iter().enumerate() {
        match (mv.is_extruding(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                loops.push(s..i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        loops.push(s..moves.len());
    }
    loops
}

/// Measurements of one wall loop.
#[derive(Debug, Clone)]
pub struct LoopPath<'a> {
    moves: &'a [Move],
    /// `cumulative[k]` is the path length from the start to vertex `k`.
    cumulative: Vec<f64>,
}

impl<'a> LoopPath<'a> {
    /// Measure a run of moves.
    pub fn new(moves: &'a [Move]) -> Self {
        let mut cumulative = Vec::with_capacity(moves.len() + 1);
        cumulative.push(0.0);
        let mut total = 0.0;
        for mv in moves {
            total += mv.length();
            cumulative.push(total);
        }
        Self { moves, cumulative }
    }

    /// The moves of the loop.
    pub fn moves(&self) -> &'a [Move] {
        self.moves
    }

    /// Number of moves.
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    /// Check if the loop has no moves.
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Starting point.
    pub fn start(&self) -> Option<&Point3> {
        self.moves.first().map(|m| &m.from)
    }

    /// Total XY path length.
    pub fn length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// Path length of the moves in `range`.
    pub fn length_of(&self, range: Range<usize>) -> f64 {
        self.cumulative[range.end] - self.cumulative[range.start]
    }

    /// Total filament deposited along the loop.
    pub fn extrusion(&self) -> f64 {
        self.moves.iter().map(|m| m.e_delta).sum()
    }

    /// Filament per unit of path length.
    pub fn rate(&self) -> Option<f64> {
        let length = self.length();
        (length > EPSILON).then(|| self.extrusion() / length)
    }

    /// The interior vertex nearest to half the path length.
    ///
    /// Vertex `k` is the end of move `k` (1-based), so the first half is
    /// moves `0..k` and the second half moves `k..len`. Ties go to the lower
    /// vertex. Returns `None` for loops of fewer than two moves.
    pub fn split_vertex(&self) -> Option<usize> {
        if self.moves.len() < 2 {
            return None;
        }
        let half = self.length() / 2.0;
        let mut best = 1;
        let mut best_gap = f64::INFINITY;
        for k in 1..self.moves.len() {
            let gap = (self.cumulative[k] - half).abs();
            if gap < best_gap - EPSILON {
                best = k;
                best_gap = gap;
            }
        }
        Some(best)
    }
}
