//! Error types for the interlocking transformer.

use thiserror::Error;

/// Fatal errors that abort a transformation.
///
/// Non-fatal problems (a layer that cannot be paired) are not errors; they
/// are reported as [`crate::PairingNotice`]s alongside the output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrickError {
    /// A motion command has a numeric field that does not parse.
    #[error("parse error at line {line}: {message}: `{text}`")]
    Parse {
        /// Line number (1-indexed).
        line: usize,
        /// The offending line, without its terminator.
        text: String,
        /// Error message.
        message: String,
    },

    /// A layer marker does not increase the layer index.
    #[error("layer marker {index} at line {line} does not follow layer {previous}")]
    LayerOrder {
        /// Line number of the offending marker (1-indexed).
        line: usize,
        /// Index carried by the offending marker.
        index: i64,
        /// Index of the preceding layer.
        previous: i64,
    },

    /// A wall type marker is followed by no motion at all.
    #[error("{kind} segment starting at line {line} has no moves")]
    EmptySegment {
        /// Line number of the type marker (1-indexed).
        line: usize,
        /// Wall kind named by the marker.
        kind: String,
    },

    /// Invalid transformer settings.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Coarse classification of a [`BrickError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input line.
    Parse,
    /// Input is well-formed line by line but structurally unusable.
    Structure,
    /// Settings rejected before processing.
    Config,
}

impl BrickError {
    /// Create a parse error for a line.
    pub fn parse(line: usize, text: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            text: text.trim_end_matches(['\r', '\n']).to_string(),
            message: message.into(),
        }
    }

    /// Create a settings error.
    pub fn settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings(message.into())
    }

    /// Which class of failure this is.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrickError::Parse { .. } => ErrorKind::Parse,
            BrickError::LayerOrder { .. } | BrickError::EmptySegment { .. } => {
                ErrorKind::Structure
            }
            BrickError::InvalidSettings(_) => ErrorKind::Config,
        }
    }
}

/// Result type for transformer operations.
pub type Result<T> = std::result::Result<T, BrickError>;
