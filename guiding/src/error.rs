//! Errors

use crate::controller::CycleState;
use thiserror::Error;

/// Errors raised by the guiding core. Numeric guards and capacity clamps are
/// not errors; they are resolved in place and reported through logging.
#[derive(Debug, Error)]
pub enum GuidingError {
    /// Invalid or missing discretization parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external buffer does not match the configured table shape.
    #[error("buffer '{name}' has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A buffer required by the active configuration was registered empty.
    #[error("buffer '{0}' is not registered for this configuration")]
    MissingBuffer(&'static str),

    /// A tree read back from the external buffers is not well formed.
    #[error("invalid tree topology: {0}")]
    InvalidTopology(String),

    /// The external sampler failed a pass.
    #[error("sampling pass failed: {0}")]
    SamplingPass(String),

    /// A worker thread of a parallel update panicked.
    #[error("guiding update worker failed: {0}")]
    Worker(String),

    /// The guiding cycle was driven through a transition it does not allow.
    #[error("illegal guiding cycle transition {from:?} -> {to:?}")]
    IllegalTransition { from: CycleState, to: CycleState },
}

/// Result type of fallible guiding operations.
pub type Result<T> = std::result::Result<T, GuidingError>;
