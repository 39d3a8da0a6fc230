//! Error types for filter compilation.
//!
//! Compilation errors are validation-class failures: callers log them and
//! skip the offending workflow or segment rather than aborting a batch.

use std::fmt;

/// Error compiling a stored filter tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The input matches none of the accepted grammar shapes.
    UnrecognizedShape,
    /// A logic token was present but not one of the accepted values.
    InvalidLogic { found: String },
    /// A node of a recognized shape had the wrong structure.
    MalformedNode { reason: String },
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedShape => {
                write!(f, "filter tree does not match any accepted shape")
            }
            Self::InvalidLogic { found } => {
                write!(f, "invalid logic token: {found:?}")
            }
            Self::MalformedNode { reason } => {
                write!(f, "malformed filter node: {reason}")
            }
        }
    }
}

impl std::error::Error for FilterError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = FilterError::InvalidLogic {
            found: "xor".to_string(),
        };
        assert!(err.to_string().contains("xor"));

        let err = FilterError::MalformedNode {
            reason: "conditions must be an array".to_string(),
        };
        assert!(err.to_string().contains("conditions"));
    }
}
