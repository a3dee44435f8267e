//! Re-emission of the command stream with splices applied.

use std::fmt::Write;

use crate::extrusion::{Splice, POSITION_TOLERANCE};
use crate::model::Toolpath;
use crate::path::Point3;

/// Prefix of the comment opening a rewritten region.
pub const BEGIN_MARKER: &str = ";BRICKLAYERS:BEGIN";
/// Comment closing a rewritten region.
pub const END_MARKER: &str = ";BRICKLAYERS:END";

/// Decimals for X, Y and Z words.
const POSITION_DECIMALS: usize = 3;
/// Decimals for E words.
const EXTRUSION_DECIMALS: usize = 5;

/// Format a number with fixed decimals, dropping trailing zeros.
pub fn format_number(value: f64, decimals: usize) -> String {
    let mut s = format!("{:.*}", decimals, value);
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".into();
    }
    s
}

/// Words of a generated move.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveWords {
    /// `G0` rather than `G1`.
    pub rapid: bool,
    /// X word.
    pub x: Option<f64>,
    /// Y word.
    pub y: Option<f64>,
    /// Z word.
    pub z: Option<f64>,
    /// E word.
    pub e: Option<f64>,
    /// F word.
    pub f: Option<f64>,
}

impl MoveWords {
    fn at(rapid: bool, to: &Point3, z: bool) -> Self {
        Self {
            rapid,
            x: Some(to.x),
            y: Some(to.y),
            z: z.then_some(to.z),
            ..Default::default()
        }
    }

    /// Format as a G-code line without terminator.
    pub fn format(&self) -> String {
        let mut line = String::from(if self.rapid { "G0" } else { "G1" });
        let words = [
            ('F', self.f, 0),
            ('X', self.x, POSITION_DECIMALS),
            ('Y', self.y, POSITION_DECIMALS),
            ('Z', self.z, POSITION_DECIMALS),
            ('E', self.e, EXTRUSION_DECIMALS),
        ];
        for (axis, value, decimals) in words {
            if let Some(v) = value {
                let _ = write!(line, " {}{}", axis, format_number(v, decimals));
            }
        }
        line
    }
}

/// Lines replacing one displaced half.
pub fn splice_lines(splice: &Splice) -> Vec<String> {
    let mut lines = Vec::with_capacity(splice.moves.len() + 5);
    lines.push(format!(
        "{} layer={} from={}",
        BEGIN_MARKER, splice.layer, splice.donor
    ));

    let mut z_pending = true;
    if let Some(entry) = &splice.entry {
        lines.push(MoveWords::at(true, entry, true).format());
        z_pending = false;
    }

    let mut register = splice.e_start;
    let mut feedrate = None;
    for mv in &splice.moves {
        let mut words = MoveWords::at(false, &mv.to, z_pending);
        z_pending = false;
        register += mv.e_delta;
        words.e = Some(if splice.relative_e {
            mv.e_delta
        } else {
            register
        });
        if mv.feedrate.is_some() && mv.feedrate != feedrate {
            words.f = mv.feedrate;
            feedrate = mv.feedrate;
        }
        lines.push(words.format());
    }

    if let Some((to, f)) = &splice.exit {
        let lifted = (to.z - splice.z).abs() > POSITION_TOLERANCE;
        let mut words = MoveWords::at(true, to, lifted);
        words.f = *f;
        lines.push(words.format());
    }
    // Exact register value as read, so later absolute E words line up.
    if let Some(e) = splice.resync_e {
        lines.push(format!("G92 E{}", e));
    }
    lines.push(END_MARKER.to_string());
    lines
}

/// Emit the program with `splices` applied.
///
/// Splices must not overlap. Every command outside them is emitted exactly
/// as read.
pub fn serialize(toolpath: &Toolpath, splices: &[Splice]) -> String {
    let mut ordered: Vec<&Splice> = splices.iter().collect();
    ordered.sort_by_key(|s| s.replaced.start);
    let mut pending = ordered.into_iter().peekable();

    let commands = &toolpath.commands;
    let mut out = String::with_capacity(commands.iter().map(|c| c.raw.len()).sum());
    let mut i = 0;
    while i < commands.len() {
        match pending.next_if(|s| s.replaced.start == i) {
            Some(splice) => {
                let newline = match commands[i].terminator() {
                    "" => "\n",
                    t => t,
                };
                let last = &commands[splice.replaced.end - 1];
                let lines = splice_lines(splice);
                for (n, line) in lines.iter().enumerate() {
                    out.push_str(line);
                    if n + 1 < lines.len() {
                        out.push_str(newline);
                    } else {
                        out.push_str(last.terminator());
                    }
                }
                i = splice.replaced.end;
            }
            None => {
                out.push_str(&commands[i].raw);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extrusion::RelocatedMove;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1.5, 3), "1.5");
        assert_eq!(format_number(2.0, 3), "2");
        assert_eq!(format_number(0.123456, 5), "0.12346");
        assert_eq!(format_number(-0.0001, 3), "0");
        assert_eq!(format_number(1800.0, 0), "1800");
    }

    #[test]
    fn test_move_words() {
        let words = MoveWords {
            rapid: false,
            x: Some(10.0),
            y: Some(2.25),
            e: Some(1.234567),
            f: Some(1500.0),
            ..Default::default()
        };
        assert_eq!(words.format(), "G1 F1500 X10 Y2.25 E1.23457");
    }

    fn splice(relative_e: bool) -> Splice {
        Splice {
            layer: 3,
            donor: 4,
            replaced: 1..3,
            z: 0.8,
            entry: Some(Point3::new(5.0, 5.0, 0.8)),
            moves: vec![
                RelocatedMove {
                    source: 9,
                    to: Point3::new(6.0, 5.0, 0.8),
                    e_delta: 0.1,
                    feedrate: Some(1200.0),
                },
                RelocatedMove {
                    source: 10,
                    to: Point3::new(6.0, 6.0, 0.8),
                    e_delta: 0.1,
                    feedrate: Some(1200.0),
                },
            ],
            exit: Some((Point3::new(4.0, 4.0, 0.8), Some(1500.0))),
            e_start: 2.0,
            resync_e: (!relative_e).then_some(2.3),
            relative_e,
            displaced_extrusion: 0.3,
        }
    }

    #[test]
    fn test_splice_lines_absolute() {
        assert_eq!(
            splice_lines(&splice(false)),
            vec![
                ";BRICKLAYERS:BEGIN layer=3 from=4",
                "G0 X5 Y5 Z0.8",
                "G1 F1200 X6 Y5 E2.1",
                "G1 X6 Y6 E2.2",
                "G0 F1500 X4 Y4",
                "G92 E2.3",
                ";BRICKLAYERS:END",
            ]
        );
    }

    #[test]
    fn test_splice_lines_relative() {
        let mut s = splice(true);
        s.entry = None;
        s.exit = None;
        assert_eq!(
            splice_lines(&s),
            vec![
                ";BRICKLAYERS:BEGIN layer=3 from=4",
                "G1 F1200 X6 Y5 Z0.8 E0.1",
                "G1 X6 Y6 E0.1",
                ";BRICKLAYERS:END",
            ]
        );
    }

    #[test]
    fn test_exit_restores_lifted_z() {
        let mut s = splice(false);
        s.exit = Some((Point3::new(4.0, 4.0, 1.0), Some(1500.0)));
        let lines = splice_lines(&s);
        assert_eq!(lines[4], "G0 F1500 X4 Y4 Z1");
    }
}
