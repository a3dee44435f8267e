//! Marker vocabularies of the slicers that produce the input.

use serde::{Deserialize, Serialize};

/// Classification of a run of moves, as named by a type marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WallKind {
    /// Outermost perimeter.
    Outer,
    /// Inner perimeters; the only kind that is interlocked.
    Inner,
    /// Any other feature (infill, skin, support, ...), by its marker name.
    Other(String),
    /// Moves not preceded by any type marker in their layer.
    Unclassified,
}

impl WallKind {
    /// Is this an outer or inner wall?
    pub fn is_wall(&self) -> bool {
        matches!(self, WallKind::Outer | WallKind::Inner)
    }
}

impl std::fmt::Display for WallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WallKind::Outer => write!(f, "outer wall"),
            WallKind::Inner => write!(f, "inner wall"),
            WallKind::Other(name) => write!(f, "{}", name),
            WallKind::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// Comment tokens one slicer uses for layer changes and feature types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialect {
    /// Dialect name.
    pub name: String,
    /// Prefix of a layer-change comment, optionally followed by the index.
    pub layer_marker: String,
    /// Prefix of a feature-type comment; the remainder names the feature.
    pub type_marker: String,
    /// Feature names meaning "outer wall".
    pub outer_wall: Vec<String>,
    /// Feature names meaning "inner wall".
    pub inner_wall: Vec<String>,
}

impl Default for Dialect {
    fn default() -> Self {
        Self::cura()
    }
}

impl Dialect {
    /// Ultimaker Cura.
    pub fn cura() -> Self {
        Self {
            name: "cura".into(),
            layer_marker: ";LAYER:".into(),
            type_marker: ";TYPE:".into(),
            outer_wall: vec!["WALL-OUTER".into()],
            inner_wall: vec!["WALL-INNER".into()],
        }
    }

    /// PrusaSlicer and SuperSlicer.
    pub fn prusa() -> Self {
        Self {
            name: "prusa".into(),
            layer_marker: ";LAYER_CHANGE".into(),
            type_marker: ";TYPE:".into(),
            outer_wall: vec!["External perimeter".into(), "Overhang perimeter".into()],
            inner_wall: vec!["Perimeter".into()],
        }
    }

    /// OrcaSlicer and Bambu Studio.
    pub fn orca() -> Self {
        Self {
            name: "orca".into(),
            layer_marker: "; CHANGE_LAYER".into(),
            type_marker: "; FEATURE:".into(),
            outer_wall: vec!["Outer wall".into(), "Overhang wall".into()],
            inner_wall: vec!["Inner wall".into()],
        }
    }

    /// All built-in dialects.
    pub fn all_dialects() -> Vec<Self> {
        vec![Self::cura(), Self::prusa(), Self::orca()]
    }

    /// Look up a built-in dialect by name (case-insensitive).
    pub fn by_name(name: &str) -> Option<Self> {
        Self::all_dialects()
            .into_iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Layer-change tokens of every built-in dialect.
    ///
    /// Hosts split a flat output stream back into layers on these.
    pub fn boundary_tokens() -> Vec<String> {
        Self::all_dialects()
            .into_iter()
            .map(|d| d.layer_marker)
            .collect()
    }

    /// Classify a feature name taken from a type marker.
    pub fn classify(&self, name: &str) -> WallKind {
        let name = name.trim();
        if self.inner_wall.iter().any(|n| n == name) {
            WallKind::Inner
        } else if self.outer_wall.iter().any(|n| n == name) {
            WallKind::Outer
        } else {
            WallKind::Other(name.to_string())
        }
    }

    /// If `comment` is a layer marker, the index it carries (`None` inside
    /// `Some` when the marker has no number).
    pub fn layer_index(&self, comment: &str) -> Option<Option<i64>> {
        let rest = comment.strip_prefix(self.layer_marker.as_str())?;
        let rest = rest.trim();
        if rest.is_empty() {
            return Some(None);
        }
        rest.parse::<i64>().ok().map(Some)
    }

    /// If `comment` is a type marker, the wall kind it names.
    pub fn type_of(&self, comment: &str) -> Option<WallKind> {
        comment
            .strip_prefix(self.type_marker.as_str())
            .map(|rest| self.classify(rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialects() {
        for dialect in Dialect::all_dialects() {
            assert!(!dialect.layer_marker.is_empty());
            assert!(!dialect.type_marker.is_empty());
            assert!(!dialect.inner_wall.is_empty());
            assert_eq!(Dialect::by_name(&dialect.name), Some(dialect.clone()));
        }
        assert!(Dialect::by_name("simplify3d").is_none());
    }

    #[test]
    fn test_cura_markers() {
        let cura = Dialect::cura();
        assert_eq!(cura.layer_index(";LAYER:12"), Some(Some(12)));
        assert_eq!(cura.layer_index(";LAYER:-2"), Some(Some(-2)));
        assert_eq!(cura.layer_index(";LAYER_COUNT:40"), None);
        assert_eq!(cura.layer_index(";LAYER:abc"), None);
        assert_eq!(cura.type_of(";TYPE:WALL-INNER"), Some(WallKind::Inner));
        assert_eq!(cura.type_of(";TYPE:WALL-OUTER"), Some(WallKind::Outer));
        assert_eq!(
            cura.type_of(";TYPE:FILL"),
            Some(WallKind::Other("FILL".into()))
        );
    }

    #[test]
    fn test_unnumbered_markers() {
        let prusa = Dialect::prusa();
        assert_eq!(prusa.layer_index(";LAYER_CHANGE"), Some(None));
        assert_eq!(prusa.type_of(";TYPE:Perimeter"), Some(WallKind::Inner));

        let orca = Dialect::orca();
        assert_eq!(orca.layer_index("; CHANGE_LAYER"), Some(None));
        assert_eq!(orca.type_of("; FEATURE: Inner wall"), Some(WallKind::Inner));
    }

    #[test]
    fn test_boundary_tokens() {
        let tokens = Dialect::boundary_tokens();
        assert!(tokens.contains(&";LAYER:".to_string()));
        assert!(tokens.contains(&";LAYER_CHANGE".to_string()));
        assert!(tokens.contains(&"; CHANGE_LAYER".to_string()));
    }
}
