//! Layer and wall segment model built from the parsed command stream.

use std::ops::Range;

use crate::dialect::WallKind;
use crate::error::{BrickError, Result};
use crate::parse::{Command, CommandKind, ExtruderState, Motion};
use crate::path::{find_loops, LoopPath, Move, Point3};

/// A maximal run of consecutive moves sharing one classification.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Feature classification.
    pub kind: WallKind,
    /// The moves, in order. Their commands are consecutive.
    pub moves: Vec<Move>,
}

impl Segment {
    /// Command indices covered by the segment.
    pub fn commands(&self) -> Range<usize> {
        match (self.moves.first(), self.moves.last()) {
            (Some(first), Some(last)) => first.command..last.command + 1,
            _ => 0..0,
        }
    }

    /// Ranges of [`Self::moves`] forming wall loops.
    pub fn loops(&self) -> Vec<Range<usize>> {
        find_loops(&self.moves)
    }

    /// Measure the loop covering `range` of the moves.
    pub fn loop_path(&self, range: Range<usize>) -> LoopPath<'_> {
        LoopPath::new(&self.moves[range])
    }

    /// Total length of extruding moves.
    pub fn extrusion_length(&self) -> f64 {
        self.moves
            .iter()
            .filter(|m| m.is_extruding())
            .map(Move::length)
            .sum()
    }

    /// Were any moves issued in relative positioning?
    pub fn uses_relative_positioning(&self) -> bool {
        self.moves.iter().any(|m| m.relative_xyz)
    }
}

/// The commands between two layer markers.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Layer index from the marker.
    pub index: i64,
    /// Nominal Z height.
    pub z: f64,
    /// Command indices, starting with the layer marker.
    pub commands: Range<usize>,
    /// Segments in command order.
    pub segments: Vec<Segment>,
}

impl Layer {
    /// Inner wall segments with their position in [`Self::segments`].
    pub fn inner_walls(&self) -> impl Iterator<Item = (usize, &Segment)> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == WallKind::Inner)
    }

    /// Number of motion commands in the layer.
    pub fn motion_count(&self) -> usize {
        self.segments.iter().map(|s| s.moves.len()).sum()
    }
}

/// A whole program split into layers.
#[derive(Debug, Clone)]
pub struct Toolpath {
    /// Every source line, in order.
    pub commands: Vec<Command>,
    /// Commands before the first layer marker.
    pub preamble: Range<usize>,
    /// Layers in source order, with strictly increasing indices.
    pub layers: Vec<Layer>,
}

impl Toolpath {
    /// Group parsed commands into layers and segments.
    pub fn build(commands: Vec<Command>) -> Result<Self> {
        let mut builder = Builder::default();
        for (i, command) in commands.iter().enumerate() {
            builder.push(i, command)?;
        }
        let layers = builder.finish(commands.len())?;
        let preamble_end = layers.first().map_or(commands.len(), |l| l.commands.start);
        Ok(Self {
            commands,
            preamble: 0..preamble_end,
            layers,
        })
    }

    /// Find a layer by its marker index.
    pub fn layer(&self, index: i64) -> Option<&Layer> {
        self.layers.iter().find(|l| l.index == index)
    }

    /// Number of motion commands in the whole program.
    pub fn motion_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| c.motion().is_some())
            .count()
    }
}

/// Positioning and extrusion state of the machine.
#[derive(Debug, Clone)]
struct MachineState {
    position: Point3,
    relative_xyz: bool,
    relative_e: bool,
    e_register: f64,
    feedrate: Option<f64>,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            relative_xyz: false,
            relative_e: false,
            e_register: 0.0,
            feedrate: None,
        }
    }
}

impl MachineState {
    fn apply_motion(&mut self, command: usize, motion: &Motion) -> Move {
        let from = self.position;
        let axis = |value: Option<f64>, current: f64| match value {
            Some(v) if self.relative_xyz => current + v,
            Some(v) => v,
            None => current,
        };
        let to = Point3::new(
            axis(motion.x, from.x),
            axis(motion.y, from.y),
            axis(motion.z, from.z),
        );

        let e_delta = match motion.e {
            Some(e) if self.relative_e => e,
            Some(e) => e - self.e_register,
            None => 0.0,
        };
        if let Some(e) = motion.e {
            self.e_register = if self.relative_e {
                self.e_register + e
            } else {
                e
            };
        }
        if motion.f.is_some() {
            self.feedrate = motion.f;
        }
        self.position = to;

        Move {
            command,
            from,
            to,
            e_delta,
            e_register: self.e_register,
            feedrate: self.feedrate,
            relative_e: self.relative_e,
            relative_xyz: self.relative_xyz,
        }
    }

    fn apply_state(&mut self, state: &ExtruderState) {
        match *state {
            ExtruderState::AbsolutePositioning => {
                self.relative_xyz = false;
                self.relative_e = false;
            }
            ExtruderState::RelativePositioning => {
                self.relative_xyz = true;
                self.relative_e = true;
            }
            ExtruderState::AbsoluteExtrusion => self.relative_e = false,
            ExtruderState::RelativeExtrusion => self.relative_e = true,
            ExtruderState::SetPosition { x, y, z, e } => {
                if let Some(x) = x {
                    self.position.x = x;
                }
                if let Some(y) = y {
                    self.position.y = y;
                }
                if let Some(z) = z {
                    self.position.z = z;
                }
                if let Some(e) = e {
                    self.e_register = e;
                }
            }
        }
    }
}

#[derive(Debug)]
struct OpenLayer {
    index: i64,
    start: usize,
    z: Option<f64>,
    kind: WallKind,
    segments: Vec<Segment>,
    open: Option<Segment>,
}

impl OpenLayer {
    fn close_segment(&mut self) {
        if let Some(segment) = self.open.take() {
            self.segments.push(segment);
        }
    }
}

#[derive(Debug, Default)]
struct Builder {
    state: MachineState,
    layers: Vec<Layer>,
    current: Option<OpenLayer>,
    last_z: Option<f64>,
    /// Wall type marker not yet followed by any move: (line, kind).
    pending_wall: Option<(usize, WallKind)>,
}

impl Builder {
    fn push(&mut self, i: usize, command: &Command) -> Result<()> {
        match &command.kind {
            CommandKind::LayerMarker(marker) => {
                self.check_pending()?;
                let previous = self
                    .current
                    .as_ref()
                    .map(|l| l.index)
                    .or_else(|| self.layers.last().map(|l| l.index));
                let index = match (marker, previous) {
                    (Some(index), _) => *index,
                    (None, Some(previous)) => previous + 1,
                    (None, None) => 0,
                };
                if let Some(previous) = previous {
                    if index <= previous {
                        return Err(BrickError::LayerOrder {
                            line: command.line,
                            index,
                            previous,
                        });
                    }
                }
                self.close_layer(i);
                self.current = Some(OpenLayer {
                    index,
                    start: i,
                    z: None,
                    kind: WallKind::Unclassified,
                    segments: Vec::new(),
                    open: None,
                });
            }
            CommandKind::TypeMarker(kind) => {
                self.check_pending()?;
                if let Some(layer) = self.current.as_mut() {
                    layer.close_segment();
                    layer.kind = kind.clone();
                    if kind.is_wall() {
                        self.pending_wall = Some((command.line, kind.clone()));
                    }
                }
            }
            CommandKind::Motion(motion) => {
                let mv = self.state.apply_motion(i, motion);
                if let Some(layer) = self.current.as_mut() {
                    self.pending_wall = None;
                    if layer.z.is_none() && motion.z.is_some() {
                        layer.z = Some(mv.to.z);
                    }
                    match layer.open.as_mut() {
                        Some(segment) => segment.moves.push(mv),
                        None => {
                            layer.open = Some(Segment {
                                kind: layer.kind.clone(),
                                moves: vec![mv],
                            })
                        }
                    }
                }
            }
            CommandKind::ExtruderState(state) => {
                self.state.apply_state(state);
                self.close_open_segment();
            }
            CommandKind::Comment(_) | CommandKind::Other => self.close_open_segment(),
        }
        Ok(())
    }

    fn close_open_segment(&mut self) {
        if let Some(layer) = self.current.as_mut() {
            layer.close_segment();
        }
    }

    fn check_pending(&mut self) -> Result<()> {
        match self.pending_wall.take() {
            Some((line, kind)) => Err(BrickError::EmptySegment {
                line,
                kind: kind.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn close_layer(&mut self, end: usize) {
        if let Some(mut open) = self.current.take() {
            open.close_segment();
            let z = open.z.or(self.last_z).unwrap_or(0.0);
            self.last_z = Some(z);
            self.layers.push(Layer {
                index: open.index,
                z,
                commands: open.start..end,
                segments: open.segments,
            });
        }
    }

    fn finish(mut self, end: usize) -> Result<Vec<Layer>> {
        self.check_pending()?;
        self.close_layer(end);
        Ok(self.layers)
    }
}
