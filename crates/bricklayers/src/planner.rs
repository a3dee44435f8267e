//! Interlocking planner.
//!
//! Eligible layers are paired bottom-up, two at a time. Within a pair every
//! inner wall loop of the lower layer is matched to the inner wall loop of
//! the upper layer whose start point is closest, and both loops are split
//! at the vertex nearest to half their length. The serializer later swaps
//! the second halves between the two layers, which staggers the seam.

use std::fmt;
use std::ops::Range;

use rayon::prelude::*;
use serde::Serialize;

use crate::model::{Layer, Toolpath};
use crate::path::{xy_distance, Point3, EPSILON};
use crate::settings::Settings;

/// Largest relative difference in length between two loops that may trade
/// halves.
pub const LOOP_LENGTH_TOLERANCE: f64 = 0.25;

/// Why a layer or loop was left untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NoticeReason {
    /// No layer above to pair with.
    NoUpperLayer,
    /// The layer above is below the start layer or ignored.
    UpperLayerExcluded {
        /// Index of the excluded layer.
        upper: i64,
    },
    /// The layer has no inner wall loops.
    NoInnerWalls,
    /// No unmatched inner wall loop in the paired layer.
    NoCounterpart,
    /// Fewer than two extruding moves; there is no interior vertex.
    LoopTooShort,
    /// The loop has no measurable length.
    ZeroLength,
    /// The wall was printed with relative positioning (`G91`).
    RelativePositioning,
    /// Loops in the paired layer differ too much in length or extrusion to
    /// trade halves.
    LoopMismatch,
}

impl fmt::Display for NoticeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeReason::NoUpperLayer => write!(f, "no layer above to pair with"),
            NoticeReason::UpperLayerExcluded { upper } => {
                write!(f, "layer {} above is excluded", upper)
            }
            NoticeReason::NoInnerWalls => write!(f, "no inner wall loops"),
            NoticeReason::NoCounterpart => write!(f, "no matching inner wall loop"),
            NoticeReason::LoopTooShort => write!(f, "loop has fewer than two moves"),
            NoticeReason::ZeroLength => write!(f, "loop has zero length"),
            NoticeReason::RelativePositioning => write!(f, "wall uses relative positioning"),
            NoticeReason::LoopMismatch => write!(f, "no inner wall loop of matching size"),
        }
    }
}

/// A non-fatal pairing problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairingNotice {
    /// Layer index.
    pub layer: i64,
    /// Ordinal of the inner wall loop within the layer, if the notice
    /// concerns a single loop.
    pub wall_loop: Option<usize>,
    /// What went wrong.
    pub reason: NoticeReason,
}

impl PairingNotice {
    fn layer(layer: i64, reason: NoticeReason) -> Self {
        Self {
            layer,
            wall_loop: None,
            reason,
        }
    }

    fn wall_loop(layer: i64, wall_loop: usize, reason: NoticeReason) -> Self {
        Self {
            layer,
            wall_loop: Some(wall_loop),
            reason,
        }
    }
}

impl fmt::Display for PairingNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.wall_loop {
            Some(l) => write!(f, "layer {}, inner loop {}: {}", self.layer, l, self.reason),
            None => write!(f, "layer {}: {}", self.layer, self.reason),
        }
    }
}

/// Location of a wall loop within a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopRef {
    /// Segment position in [`Layer::segments`].
    pub segment: usize,
    /// Range of the segment's moves.
    pub moves: Range<usize>,
}

/// One loop pair to be split and swapped.
#[derive(Debug, Clone, PartialEq)]
pub struct InterlockPlan {
    /// Position of the lower layer in [`Toolpath::layers`].
    pub lower: usize,
    /// Position of the upper layer in [`Toolpath::layers`].
    pub upper: usize,
    /// Loop in the lower layer.
    pub lower_loop: LoopRef,
    /// Loop in the upper layer.
    pub upper_loop: LoopRef,
    /// Moves of the lower loop that stay in the lower layer.
    pub lower_split: usize,
    /// Moves of the upper loop that stay in the upper layer.
    pub upper_split: usize,
}

/// Output of the planner.
#[derive(Debug, Clone, Default)]
pub struct Planning {
    /// Layer pairs, as positions in [`Toolpath::layers`].
    pub pairs: Vec<(usize, usize)>,
    /// Loop swaps, ordered by lower layer.
    pub plans: Vec<InterlockPlan>,
    /// Layers and loops left untouched, ordered by layer.
    pub notices: Vec<PairingNotice>,
}

/// Plan the interlocking of a whole toolpath.
pub fn plan(toolpath: &Toolpath, settings: &Settings) -> Planning {
    let (pairs, mut notices) = pair_layers(&toolpath.layers, settings);

    let planned: Vec<(Vec<InterlockPlan>, Vec<PairingNotice>)> = pairs
        .par_iter()
        .map(|&(lower, upper)| {
            plan_pair(
                &toolpath.layers[lower],
                &toolpath.layers[upper],
                lower,
                upper,
                settings.extrusion_multiplier,
            )
        })
        .collect();

    let mut plans = Vec::new();
    for (pair_plans, pair_notices) in planned {
        plans.extend(pair_plans);
        notices.extend(pair_notices);
    }
    notices.sort_by_key(|n| n.layer);

    Planning {
        pairs,
        plans,
        notices,
    }
}

/// Pair consecutive eligible layers bottom-up.
///
/// Returns the pairs and a notice for every eligible layer left unpaired.
pub fn pair_layers(
    layers: &[Layer],
    settings: &Settings,
) -> (Vec<(usize, usize)>, Vec<PairingNotice>) {
    let mut pairs = Vec::new();
    let mut notices = Vec::new();
    let mut i = 0;
    while i < layers.len() {
        let layer = &layers[i];
        if !settings.is_eligible(layer.index) {
            i += 1;
            continue;
        }
        match layers.get(i + 1) {
            Some(upper) if settings.is_eligible(upper.index) => {
                pairs.push((i, i + 1));
                i += 2;
            }
            Some(upper) => {
                notices.push(PairingNotice::layer(
                    layer.index,
                    NoticeReason::UpperLayerExcluded { upper: upper.index },
                ));
                i += 1;
            }
            None => {
                notices.push(PairingNotice::layer(layer.index, NoticeReason::NoUpperLayer));
                i += 1;
            }
        }
    }
    (pairs, notices)
}

/// A splittable inner wall loop.
struct Candidate {
    ordinal: usize,
    loop_ref: LoopRef,
    split: usize,
    start: Point3,
    length: f64,
    rate: f64,
    /// Length and extrusion of the half that leaves the layer.
    half_length: f64,
    half_extrusion: f64,
}

impl Candidate {
    /// Filament the other loop's half carries once moved here.
    fn received(&self, donor: &Candidate, multiplier: f64) -> f64 {
        multiplier * donor.rate * donor.half_length
    }
}

/// Can `a` and `b` trade halves without either layer losing more filament
/// than the multiplier accounts for?
fn compatible(a: &Candidate, b: &Candidate, multiplier: f64) -> bool {
    let longer = a.length.max(b.length);
    if (a.length - b.length).abs() > LOOP_LENGTH_TOLERANCE * longer {
        return false;
    }
    let floor = multiplier.min(1.0);
    a.received(b, multiplier) + EPSILON >= floor * a.half_extrusion
        && b.received(a, multiplier) + EPSILON >= floor * b.half_extrusion
}

fn candidates(layer: &Layer, notices: &mut Vec<PairingNotice>) -> Vec<Candidate> {
    let mut found = Vec::new();
    let mut ordinal = 0;
    for (segment_idx, segment) in layer.inner_walls() {
        let relative = segment.uses_relative_positioning();
        for range in segment.loops() {
            let path = segment.loop_path(range.clone());
            let reason = if relative {
                Some(NoticeReason::RelativePositioning)
            } else if path.length() <= EPSILON {
                Some(NoticeReason::ZeroLength)
            } else {
                None
            };
            let split = path.split_vertex();
            match (reason, split, path.start()) {
                (Some(reason), _, _) => {
                    notices.push(PairingNotice::wall_loop(layer.index, ordinal, reason))
                }
                (None, Some(split), Some(start)) => found.push(Candidate {
                    ordinal,
                    loop_ref: LoopRef {
                        segment: segment_idx,
                        moves: range,
                    },
                    split,
                    start: *start,
                    length: path.length(),
                    rate: path.rate().unwrap_or(0.0),
                    half_length: path.length_of(split..path.len()),
                    half_extrusion: path.moves()[split..].iter().map(|m| m.e_delta).sum(),
                }),
                (None, _, _) => notices.push(PairingNotice::wall_loop(
                    layer.index,
                    ordinal,
                    NoticeReason::LoopTooShort,
                )),
            }
            ordinal += 1;
        }
    }
    if ordinal == 0 {
        notices.push(PairingNotice::layer(layer.index, NoticeReason::NoInnerWalls));
    }
    found
}

/// Plan one layer pair. Reads both layers, writes neither.
///
/// A lower loop takes the nearest unused upper loop it is [`compatible`]
/// with; ties go to the earlier upper loop.
pub fn plan_pair(
    lower: &Layer,
    upper: &Layer,
    lower_pos: usize,
    upper_pos: usize,
    multiplier: f64,
) -> (Vec<InterlockPlan>, Vec<PairingNotice>) {
    let mut notices = Vec::new();
    let lower_loops = candidates(lower, &mut notices);
    let upper_loops = candidates(upper, &mut notices);

    let mut taken = vec![false; upper_loops.len()];
    let mut rejected = vec![false; upper_loops.len()];
    let mut plans = Vec::new();
    for a in &lower_loops {
        let mut nearest: Option<(usize, f64)> = None;
        let mut mismatched = false;
        for (j, b) in upper_loops.iter().enumerate().filter(|(j, _)| !taken[*j]) {
            if !compatible(a, b, multiplier) {
                rejected[j] = true;
                mismatched = true;
                continue;
            }
            let d = xy_distance(&a.start, &b.start);
            if nearest.map_or(true, |(_, best)| d < best) {
                nearest = Some((j, d));
            }
        }
        let Some((j, _)) = nearest else {
            let reason = if mismatched {
                NoticeReason::LoopMismatch
            } else {
                NoticeReason::NoCounterpart
            };
            notices.push(PairingNotice::wall_loop(lower.index, a.ordinal, reason));
            continue;
        };
        taken[j] = true;
        let b = &upper_loops[j];
        plans.push(InterlockPlan {
            lower: lower_pos,
            upper: upper_pos,
            lower_loop: a.loop_ref.clone(),
            upper_loop: b.loop_ref.clone(),
            lower_split: a.split,
            upper_split: b.split,
        });
    }

    for (j, b) in upper_loops.iter().enumerate().filter(|(j, _)| !taken[*j]) {
        let reason = if rejected[j] {
            NoticeReason::LoopMismatch
        } else {
            NoticeReason::NoCounterpart
        };
        notices.push(PairingNotice::wall_loop(upper.index, b.ordinal, reason));
    }
    (plans, notices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::parse::parse_commands;
    use std::fmt::Write;

    const SQUARE: [(f64, f64); 8] = [
        (5.0, 0.0),
        (10.0, 0.0),
        (10.0, 5.0),
        (10.0, 10.0),
        (5.0, 10.0),
        (0.0, 10.0),
        (0.0, 5.0),
        (0.0, 0.0),
    ];

    /// `count` layers, each with one inner wall square loop per origin.
    fn stacked(count: usize, origins: &[(f64, f64)]) -> Toolpath {
        let mut g = String::from("M82\nG92 E0\n");
        let mut e = 0.0;
        for layer in 0..count {
            let z = 0.2 * (layer + 1) as f64;
            writeln!(g, ";LAYER:{}", layer).unwrap();
            writeln!(g, "G0 X0 Y0 Z{:.1}", z).unwrap();
            writeln!(g, ";TYPE:WALL-INNER").unwrap();
            for (ox, oy) in origins {
                writeln!(g, "G0 X{} Y{}", ox, oy).unwrap();
                for (dx, dy) in SQUARE {
                    e += 0.25;
                    writeln!(g, "G1 X{} Y{} E{:.2}", ox + dx, oy + dy, e).unwrap();
                }
            }
        }
        Toolpath::build(parse_commands(&g, &Dialect::cura()).unwrap()).unwrap()
    }

    fn settings(start_layer: i64, ignored: &[i64]) -> Settings {
        Settings {
            start_layer,
            ignored_layers: ignored.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pairing_from_start_layer() {
        let toolpath = stacked(6, &[(0.0, 0.0)]);
        let planning = plan(&toolpath, &settings(3, &[]));
        assert_eq!(planning.pairs, vec![(3, 4)]);
        assert_eq!(planning.plans.len(), 1);
        assert_eq!(planning.plans[0].lower_split, 4);
        assert_eq!(planning.plans[0].upper_split, 4);
        assert_eq!(
            planning.notices,
            vec![PairingNotice::layer(5, NoticeReason::NoUpperLayer)]
        );
    }

    #[test]
    fn test_pairing_alternates() {
        let toolpath = stacked(8, &[(0.0, 0.0)]);
        let (pairs, notices) = pair_layers(&toolpath.layers, &settings(0, &[]));
        assert_eq!(pairs, vec![(0, 1), (2, 3), (4, 5), (6, 7)]);
        assert!(notices.is_empty());
    }

    #[test]
    fn test_pairing_skips_ignored() {
        let toolpath = stacked(8, &[(0.0, 0.0)]);
        let (pairs, notices) = pair_layers(&toolpath.layers, &settings(1, &[3]));
        // 1-2 pair, 3 ignored, 4-5 and 6-7 pair.
        assert_eq!(pairs, vec![(1, 2), (4, 5), (6, 7)]);
        assert!(notices.is_empty());

        let (pairs, notices) = pair_layers(&toolpath.layers, &settings(0, &[2]));
        assert_eq!(pairs, vec![(0, 1), (3, 4), (5, 6)]);
        assert_eq!(
            notices,
            vec![PairingNotice::layer(7, NoticeReason::NoUpperLayer)]
        );

        let (_, notices) = pair_layers(&toolpath.layers, &settings(2, &[3]));
        assert_eq!(
            notices[0],
            PairingNotice::layer(2, NoticeReason::UpperLayerExcluded { upper: 3 })
        );
    }

    #[test]
    fn test_loops_matched_by_start_point() {
        let toolpath = stacked(2, &[(0.0, 0.0), (40.0, 0.0)]);
        // Swap the upper layer's loops so matching cannot rely on order.
        let mut upper = toolpath.layers[1].clone();
        let mut moves = upper.segments[1].moves.clone();
        let second = moves.split_off(9);
        upper.segments[1].moves = second.into_iter().chain(moves).collect();

        let (plans, notices) = plan_pair(&toolpath.layers[0], &upper, 0, 1, 1.05);
        assert!(notices.is_empty());
        assert_eq!(plans.len(), 2);
        // Lower loop 0 starts at (0, 0): its counterpart is now second.
        assert_eq!(plans[0].lower_loop.moves, 1..9);
        assert_eq!(plans[0].upper_loop.moves, 10..18);
        assert_eq!(plans[1].lower_loop.moves, 10..18);
        assert_eq!(plans[1].upper_loop.moves, 1..9);
    }

    #[test]
    fn test_unmatched_loop_notice() {
        let lower = stacked(1, &[(0.0, 0.0), (40.0, 0.0)]);
        let upper = stacked(1, &[(0.0, 0.0)]);
        let (plans, notices) = plan_pair(&lower.layers[0], &upper.layers[0], 0, 1, 1.05);
        assert_eq!(plans.len(), 1);
        assert_eq!(
            notices,
            vec![PairingNotice::wall_loop(0, 1, NoticeReason::NoCounterpart)]
        );
    }

    /// Two layers with one inner wall square each, of side `lower` and `upper`.
    fn sized(lower: f64, upper: f64) -> Toolpath {
        let mut g = String::from("M83\n");
        for (layer, size) in [lower, upper].into_iter().enumerate() {
            writeln!(g, ";LAYER:{}\nG0 X0 Y0 Z0.{}", layer, 2 * (layer + 1)).unwrap();
            writeln!(g, ";TYPE:WALL-INNER").unwrap();
            for (x, y) in [(size, 0.0), (size, size), (0.0, size), (0.0, 0.0)] {
                writeln!(g, "G1 X{} Y{} E{}", x, y, 0.05 * size).unwrap();
            }
        }
        Toolpath::build(parse_commands(&g, &Dialect::cura()).unwrap()).unwrap()
    }

    #[test]
    fn test_mismatched_loops_left_alone() {
        let toolpath = sized(10.0, 4.0);
        let (plans, notices) =
            plan_pair(&toolpath.layers[0], &toolpath.layers[1], 0, 1, 1.0);
        assert!(plans.is_empty());
        assert_eq!(
            notices,
            vec![
                PairingNotice::wall_loop(0, 0, NoticeReason::LoopMismatch),
                PairingNotice::wall_loop(1, 0, NoticeReason::LoopMismatch),
            ]
        );
    }

    #[test]
    fn test_loop_compatibility() {
        // Within the length tolerance, but a low multiplier starves the layer
        // giving away the longer half.
        let toolpath = sized(10.0, 9.0);
        let planned = |m| plan_pair(&toolpath.layers[0], &toolpath.layers[1], 0, 1, m).0;
        assert_eq!(planned(1.05).len(), 0);
        assert_eq!(planned(1.15).len(), 1);

        let toolpath = sized(10.0, 9.8);
        assert_eq!(
            plan_pair(&toolpath.layers[0], &toolpath.layers[1], 0, 1, 1.05).0.len(),
            1
        );
    }

    #[test]
    fn test_layer_without_inner_walls() {
        let commands = parse_commands(
            ";LAYER:0\n;TYPE:FILL\nG1 X1 Y1 E1\n;LAYER:1\n;TYPE:FILL\nG1 X2 Y2 E2\n",
            &Dialect::cura(),
        )
        .unwrap();
        let toolpath = Toolpath::build(commands).unwrap();
        let planning = plan(&toolpath, &settings(0, &[]));
        assert!(planning.plans.is_empty());
        assert_eq!(planning.notices.len(), 2);
        assert!(planning
            .notices
            .iter()
            .all(|n| n.reason == NoticeReason::NoInnerWalls));
    }

    #[test]
    fn test_notice_display() {
        let notice = PairingNotice::wall_loop(4, 2, NoticeReason::LoopTooShort);
        assert_eq!(
            notice.to_string(),
            "layer 4, inner loop 2: loop has fewer than two moves"
        );
    }
}
