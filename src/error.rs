//! Error types for qail-synth.

use thiserror::Error;

/// The main error type for query synthesis.
#[derive(Debug, Error)]
pub enum SynthError {
    /// The requested clause shape cannot be built from the visible columns.
    #[error("Infeasible shape in {stage}: {message}")]
    Infeasible {
        stage: &'static str,
        message: String,
    },

    /// Random sampling ran out of distinct candidates.
    #[error("Exhausted sample: {0}")]
    ExhaustedSample(String),

    /// A subquery was requested with no depth budget left.
    #[error("Depth budget violation: {0}")]
    DepthBudget(String),

    /// The specification itself is malformed.
    #[error("Malformed specification: {0}")]
    MalformedSpec(String),

    /// Schema lookup failed (unknown table, missing database).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SynthError {
    /// Create an infeasible-shape error for the given stage.
    pub fn infeasible(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Infeasible {
            stage,
            message: message.into(),
        }
    }

    /// Create a malformed specification error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedSpec(message.into())
    }

    /// Whether the orchestrator may discard the failing branch and carry on.
    ///
    /// Infeasible shapes and exhausted samples are expected outcomes of
    /// sampling. Everything else points at a broken specification or caller
    /// and is surfaced.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Infeasible { .. } | Self::ExhaustedSample(_))
    }
}

/// Result type alias for synthesis operations.
pub type SynthResult<T> = Result<T, SynthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SynthError::infeasible("WHERE", "no text column");
        assert_eq!(err.to_string(), "Infeasible shape in WHERE: no text column");
    }

    #[test]
    fn test_recoverable_split() {
        assert!(SynthError::infeasible("GROUP BY", "too few columns").is_recoverable());
        assert!(SynthError::ExhaustedSample("aliases".into()).is_recoverable());
        assert!(!SynthError::DepthBudget("max depth 0".into()).is_recoverable());
        assert!(!SynthError::malformed("unknown where_type").is_recoverable());
    }
}
