//! # Warden Error Types
//!
//! All errors that can occur in the detection core.
//!
//! "Entity gone" and "key absent" are not errors: they are `Option::None` at
//! the point of use. Everything here is either a configuration mistake, a
//! programmer error, or evidence read with the wrong type.

use thiserror::Error;

use crate::sequence::SequenceState;

/// Errors that can occur in the detection core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WardenError {
    /// A sequence blueprint was built without any actions.
    #[error("sequence blueprint `{0}` has no actions")]
    EmptyBlueprint(String),

    /// Fewer stages passed the model filters than the model minimum.
    #[error("stage model `{model}` has {eligible} eligible stages, minimum is {min}")]
    StageModelUnderfilled {
        /// The stage model id.
        model: String,
        /// Stages that survived include/exclude/filter resolution.
        eligible: usize,
        /// Configured minimum.
        min: usize,
    },

    /// A stage model's minimum is larger than its maximum.
    #[error("stage model `{model}` has min {min} greater than max {max}")]
    InvertedStageBounds {
        /// The stage model id.
        model: String,
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The same id was registered twice in one registry.
    #[error("duplicate {kind} id: {id}")]
    DuplicateId {
        /// What kind of thing was registered.
        kind: &'static str,
        /// The offending id.
        id: String,
    },

    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `apply` was called on a sequence that already terminated.
    #[error("sequence {sequence} is {state:?}, not running")]
    SequenceNotRunning {
        /// The sequence id.
        sequence: u64,
        /// The terminal state it is in.
        state: SequenceState,
    },

    /// A value was read with a type other than the one it was stored with.
    #[error("type mismatch for `{key}`: stored {stored}, requested {requested}")]
    TypeMismatch {
        /// The key that was read.
        key: String,
        /// Type name of the stored value.
        stored: &'static str,
        /// Type name the caller asked for.
        requested: &'static str,
    },

    /// A registry lookup by id failed where presence was required.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of thing was looked up.
        kind: &'static str,
        /// The id that was looked up.
        id: String,
    },
}

/// Result type for detection core operations.
pub type WardenResult<T> = Result<T, WardenError>;

/// Failure raised by a condition or heuristic while evaluating evidence.
///
/// A condition error cancels the sequence that ran it and nothing else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// The event or capture data did not have the shape the condition expects.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Evidence was read with the wrong type.
    #[error(transparent)]
    Evidence(#[from] WardenError),

    /// Any other condition-defined failure.
    #[error("{0}")]
    Other(String),
}
