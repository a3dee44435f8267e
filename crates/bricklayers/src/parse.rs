//! Line-oriented G-code command parser.
//!
//! Every line becomes one [`Command`] that keeps its exact source text, so
//! anything the transformer does not rewrite is re-emitted byte for byte.
//! Only a few lines are interpreted:
//! - `G0`/`G1` moves (`X`, `Y`, `Z`, `E`, `F` words)
//! - positioning and extrusion mode switches (`G90`, `G91`, `M82`, `M83`)
//! - position resets (`G92`)
//! - layer and feature-type marker comments, per [`Dialect`]

use crate::dialect::{Dialect, WallKind};
use crate::error::{BrickError, Result};

/// A parsed `G0`/`G1` move.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Motion {
    /// `G0` rather than `G1`.
    pub rapid: bool,
    /// Target X.
    pub x: Option<f64>,
    /// Target Y.
    pub y: Option<f64>,
    /// Target Z.
    pub z: Option<f64>,
    /// Extruder axis.
    pub e: Option<f64>,
    /// Feedrate (mm/min).
    pub f: Option<f64>,
    /// Inline comment, without the leading `;`.
    pub comment: Option<String>,
}

/// Machine state switches that change how moves are interpreted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtruderState {
    /// `G90`: absolute positioning (XYZ and E).
    AbsolutePositioning,
    /// `G91`: relative positioning (XYZ and E).
    RelativePositioning,
    /// `M82`: absolute extrusion.
    AbsoluteExtrusion,
    /// `M83`: relative extrusion.
    RelativeExtrusion,
    /// `G92`: set the current position of the given axes.
    SetPosition {
        /// New X.
        x: Option<f64>,
        /// New Y.
        y: Option<f64>,
        /// New Z.
        z: Option<f64>,
        /// New extruder register value.
        e: Option<f64>,
    },
}

/// What a line means to the transformer.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// Linear move.
    Motion(Motion),
    /// Comment line, without the leading `;`.
    Comment(String),
    /// Layer change; `None` when the dialect's marker carries no index.
    LayerMarker(Option<i64>),
    /// Feature type change.
    TypeMarker(WallKind),
    /// Positioning or extrusion mode change.
    ExtruderState(ExtruderState),
    /// Anything else, kept verbatim.
    Other,
}

/// One source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Line number (1-indexed).
    pub line: usize,
    /// Exact source text including the line terminator.
    pub raw: String,
    /// Interpretation of the line.
    pub kind: CommandKind,
}

impl Command {
    /// The parsed move, if this is one.
    pub fn motion(&self) -> Option<&Motion> {
        match &self.kind {
            CommandKind::Motion(m) => Some(m),
            _ => None,
        }
    }

    /// The line terminator of the source text (`""`, `"\n"` or `"\r\n"`).
    pub fn terminator(&self) -> &str {
        if self.raw.ends_with("\r\n") {
            "\r\n"
        } else if self.raw.ends_with('\n') {
            "\n"
        } else {
            ""
        }
    }
}

/// Parse a whole G-code stream.
pub fn parse_commands(input: &str, dialect: &Dialect) -> Result<Vec<Command>> {
    input
        .split_inclusive('\n')
        .enumerate()
        .map(|(i, raw)| parse_line(i + 1, raw, dialect))
        .collect()
}

/// Parse one line (`raw` may include its terminator).
pub fn parse_line(line: usize, raw: &str, dialect: &Dialect) -> Result<Command> {
    let text = raw.trim_end_matches(['\r', '\n']).trim();

    let kind = if text.starts_with(';') {
        if let Some(index) = dialect.layer_index(text) {
            CommandKind::LayerMarker(index)
        } else if let Some(kind) = dialect.type_of(text) {
            CommandKind::TypeMarker(kind)
        } else {
            CommandKind::Comment(text[1..].to_string())
        }
    } else {
        parse_code(line, raw, text)?
    };

    Ok(Command {
        line,
        raw: raw.to_string(),
        kind,
    })
}

fn parse_code(line: usize, raw: &str, text: &str) -> Result<CommandKind> {
    let (code, comment) = match text.split_once(';') {
        Some((code, comment)) => (code.trim(), Some(comment.to_string())),
        None => (text, None),
    };
    let mut words = code.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(CommandKind::Other);
    };

    let head = head.to_ascii_uppercase();
    let kind = match head.as_str() {
        "G0" | "G00" | "G1" | "G01" => {
            let rapid = matches!(head.as_str(), "G0" | "G00");
            let mut motion = Motion {
                rapid,
                comment,
                ..Default::default()
            };
            for word in words {
                let (axis, value) = split_word(word);
                let slot = match axis {
                    'X' => &mut motion.x,
                    'Y' => &mut motion.y,
                    'Z' => &mut motion.z,
                    'E' => &mut motion.e,
                    'F' => &mut motion.f,
                    _ => continue,
                };
                *slot = Some(parse_number(line, raw, axis, value)?);
            }
            CommandKind::Motion(motion)
        }
        "G90" => CommandKind::ExtruderState(ExtruderState::AbsolutePositioning),
        "G91" => CommandKind::ExtruderState(ExtruderState::RelativePositioning),
        "M82" => CommandKind::ExtruderState(ExtruderState::AbsoluteExtrusion),
        "M83" => CommandKind::ExtruderState(ExtruderState::RelativeExtrusion),
        "G92" => {
            let (mut x, mut y, mut z, mut e) = (None, None, None, None);
            for word in words {
                let (axis, value) = split_word(word);
                // Malformed G92 words are left to the firmware.
                let Ok(v) = value.parse::<f64>() else {
                    return Ok(CommandKind::Other);
                };
                match axis {
                    'X' => x = Some(v),
                    'Y' => y = Some(v),
                    'Z' => z = Some(v),
                    'E' => e = Some(v),
                    _ => {}
                }
            }
            CommandKind::ExtruderState(ExtruderState::SetPosition { x, y, z, e })
        }
        _ => CommandKind::Other,
    };
    Ok(kind)
}

fn split_word(word: &str) -> (char, &str) {
    let mut chars = word.chars();
    let axis = chars.next().map(|c| c.to_ascii_uppercase()).unwrap_or(' ');
    (axis, chars.as_str())
}

fn parse_number(line: usize, raw: &str, axis: char, value: &str) -> Result<f64> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(BrickError::parse(
            line,
            raw,
            format!("invalid {} value `{}`", axis, value),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cura_line(text: &str) -> Command {
        parse_line(1, text, &Dialect::cura()).unwrap()
    }

    #[test]
    fn test_motion() {
        let cmd = cura_line("G1 X10.5 Y-3 E0.12345 F1800 ; wall\n");
        let m = cmd.motion().unwrap();
        assert!(!m.rapid);
        assert_eq!(m.x, Some(10.5));
        assert_eq!(m.y, Some(-3.0));
        assert_eq!(m.z, None);
        assert_eq!(m.e, Some(0.12345));
        assert_eq!(m.f, Some(1800.0));
        assert_eq!(m.comment.as_deref(), Some(" wall"));
        assert_eq!(cmd.terminator(), "\n");
    }

    #[test]
    fn test_rapid_and_lowercase() {
        let m = cura_line("g0 x1 y2 z0.3").kind;
        assert_eq!(
            m,
            CommandKind::Motion(Motion {
                rapid: true,
                x: Some(1.0),
                y: Some(2.0),
                z: Some(0.3),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_markers() {
        assert_eq!(cura_line(";LAYER:4\n").kind, CommandKind::LayerMarker(Some(4)));
        assert_eq!(
            cura_line(";TYPE:WALL-INNER\r\n").kind,
            CommandKind::TypeMarker(WallKind::Inner)
        );
        assert_eq!(
            cura_line(";LAYER_COUNT:20").kind,
            CommandKind::Comment("LAYER_COUNT:20".into())
        );
    }

    #[test]
    fn test_extruder_state() {
        assert_eq!(
            cura_line("M83").kind,
            CommandKind::ExtruderState(ExtruderState::RelativeExtrusion)
        );
        assert_eq!(
            cura_line("G92 E0 ; reset").kind,
            CommandKind::ExtruderState(ExtruderState::SetPosition {
                x: None,
                y: None,
                z: None,
                e: Some(0.0)
            })
        );
    }

    #[test]
    fn test_other_verbatim() {
        let cmd = cura_line("M104 S210 ; heat\r\n");
        assert_eq!(cmd.kind, CommandKind::Other);
        assert_eq!(cmd.raw, "M104 S210 ; heat\r\n");
        assert_eq!(cmd.terminator(), "\r\n");
        assert_eq!(cura_line("").kind, CommandKind::Other);
    }

    #[test]
    fn test_bad_number() {
        let err = parse_commands("G1 X1\nG1 X1.2.3 Y4\n", &Dialect::cura()).unwrap_err();
        match err {
            BrickError::Parse { line, text, .. } => {
                assert_eq!(line, 2);
                assert_eq!(text, "G1 X1.2.3 Y4");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_text() {
        let input = "; header\nG28\nG1 X1 Y1\n;LAYER:0\nG1 X2 E1";
        let commands = parse_commands(input, &Dialect::cura()).unwrap();
        assert_eq!(commands.len(), 5);
        let joined: String = commands.iter().map(|c| c.raw.as_str()).collect();
        assert_eq!(joined, input);
        assert_eq!(commands[4].terminator(), "");
    }
}
