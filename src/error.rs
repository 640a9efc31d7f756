//! Error types for ulerl.

use thiserror::Error;

/// ulerl error types.
///
/// Configuration and structural errors abort a run. [`UlerlError::Divergence`]
/// is raised per rollout and only escapes the evaluator in strict mode.
#[derive(Error, Debug)]
pub enum UlerlError {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown variant name for a closed set of choices
    #[error("Unrecognized {kind} `{name}`")]
    UnknownVariant { kind: &'static str, name: String },

    /// Observation or vector of the wrong length
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    /// Non-finite controller output
    #[error("Non-finite controller output at step {step}: {output:?}")]
    Divergence { step: usize, output: Vec<f64> },

    /// Mean, covariance and controller disagree on the number of weights
    #[error(
        "Resize inconsistency: mean has {mean} dims, covariance {covariance}, controller {controller}"
    )]
    ResizeInconsistency {
        mean: usize,
        covariance: usize,
        controller: usize,
    },

    /// The codebook got smaller, which no compressor is allowed to do
    #[error("Codebook shrank from {old} to {new} prototypes")]
    Shrink { old: usize, new: usize },

    /// Failure reported by the simulation environment
    #[error("Environment error: {0}")]
    Environment(String),

    /// Snapshot file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UlerlError {
    /// Whether the error is isolated to a single rollout.
    pub fn is_rollout_local(&self) -> bool {
        matches!(self, UlerlError::Divergence { .. })
    }
}

/// Result type alias for ulerl operations.
pub type Result<T> = std::result::Result<T, UlerlError>;
