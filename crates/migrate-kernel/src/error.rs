//! Error types for the pipeline kernel
//!
//! - [`GraphError`]: malformed stage graph, fatal at startup
//! - [`StageFailure`]: a stage could not complete, fatal to the run
//! - [`ExecutorError`]: the code-execution collaborator could not run a block

use crate::types::Capability;

/// Graph construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A stage name was registered twice
    #[error("duplicate stage: {0}")]
    DuplicateStage(String),

    /// An edge references a stage that was never registered
    #[error("edge {from} -> {to} references unregistered stage {missing}")]
    DanglingEdge {
        /// Edge source
        from: String,
        /// Edge target
        to: String,
        /// The endpoint that is not registered
        missing: String,
    },

    /// The graph contains a cycle
    #[error("cycle detected through stage {0}")]
    Cycle(String),

    /// Zero or more than one stage without incoming edges
    #[error("expected exactly one entry stage, found {found:?}")]
    NoEntryPoint {
        /// Stages without incoming edges
        found: Vec<String>,
    },
}

/// Failure of a single stage
///
/// Any of these halts the run; the engine never retries a failed stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageFailure {
    /// The stage asked for a collaborator it did not declare
    #[error("capability not granted: {0}")]
    CapabilityNotGranted(Capability),

    /// A declared collaborator is not configured on the engine
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    /// A required check did not pass
    #[error("check failed: {0}")]
    CheckFailed(String),

    /// The model backend could not produce a response
    #[error("model failure: {0}")]
    Model(String),

    /// The stage exceeded its time budget
    #[error("stage timed out after {secs}s")]
    TimedOut {
        /// Budget in seconds
        secs: u64,
    },

    /// The stage handler panicked
    #[error("stage panicked: {0}")]
    Panicked(String),

    /// Any other fatal condition
    #[error("{0}")]
    Fatal(String),
}

impl StageFailure {
    /// Shorthand for [`StageFailure::Fatal`]
    #[inline]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Shorthand for [`StageFailure::CheckFailed`]
    #[inline]
    pub fn check_failed(message: impl Into<String>) -> Self {
        Self::CheckFailed(message.into())
    }
}

/// Code-execution collaborator errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// No interpreter is configured for the language
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The interpreter could not be started
    #[error("failed to spawn {program}: {reason}")]
    Spawn {
        /// Interpreter binary
        program: String,
        /// Underlying I/O error
        reason: String,
    },

    /// The block did not finish in time
    #[error("execution timed out after {secs}s")]
    TimedOut {
        /// Budget in seconds
        secs: u64,
    },
}
