//! Error types for the tool server
//!
//! [`ToolError`] is never surfaced as a Rust error to callers of
//! [`crate::ToolServer::dispatch`]; it is rendered into the
//! `ToolResult::Error` envelope. The guard variants render to fixed
//! phrases so callers can match on them; the detail goes to the log.

/// Tool dispatch and handler errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// No tool registered under the requested name
    #[error("unknown tool")]
    UnknownTool(String),

    /// A parameter is missing, unexpected or of the wrong type
    #[error("invalid parameters")]
    InvalidParameters(String),

    /// An identifier parameter failed the allow-list
    #[error("invalid identifier")]
    InvalidIdentifier(String),

    /// Connection configuration could not be resolved
    #[error("connection unavailable: {0}")]
    Connection(#[from] SecretError),

    /// Backend query failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// External process failed to run
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    /// Tool ran but could not produce a result
    #[error("{0}")]
    Failed(String),

    /// Handler panicked
    #[error("tool panicked: {0}")]
    Panicked(String),
}

impl ToolError {
    /// Shorthand for [`ToolError::Failed`]
    #[inline]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Detail for logs; guard variants keep it out of the envelope
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::UnknownTool(d) | Self::InvalidParameters(d) | Self::InvalidIdentifier(d) => {
                format!("{self}: {d}")
            }
            other => other.to_string(),
        }
    }
}

/// Secret / connection-configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    /// A variable holds an unusable value
    #[error("invalid value for {var}: {reason}")]
    Invalid {
        /// Variable name
        var: String,
        /// Why it was rejected
        reason: String,
    },

    /// A required secret is absent
    #[error("missing secret: {0}")]
    Missing(String),
}

/// Database backend errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    /// The server rejected the statement
    #[error("query failed: {0}")]
    Query(String),

    /// The client output could not be parsed
    #[error("unparseable result: {0}")]
    Parse(String),

    /// The client process could not run
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// External process errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    /// The binary could not be started
    #[error("failed to spawn {program}: {reason}")]
    Spawn {
        /// Binary
        program: String,
        /// Underlying I/O error
        reason: String,
    },

    /// The process did not finish in time and was killed
    #[error("{program} timed out after {secs}s")]
    TimedOut {
        /// Binary
        program: String,
        /// Budget in seconds
        secs: u64,
    },

    /// Output could not be collected
    #[error("i/o error: {0}")]
    Io(String),

    /// Producer output could not be handed to the consumer
    #[error("pipe setup failed: {0}")]
    Pipe(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_variants_render_fixed_phrases() {
        assert_eq!(ToolError::UnknownTool("drop_db".into()).to_string(), "unknown tool");
        assert_eq!(
            ToolError::InvalidParameters("missing table_name".into()).to_string(),
            "invalid parameters"
        );
        assert_eq!(
            ToolError::InvalidIdentifier("users;".into()).to_string(),
            "invalid identifier"
        );
    }

    #[test]
    fn detail_keeps_context() {
        let err = ToolError::InvalidParameters("missing table_name".into());
        assert_eq!(err.detail(), "invalid parameters: missing table_name");
    }

    #[test]
    fn nested_errors_convert() {
        let err: ToolError = DatabaseError::Query("table doesn't exist".into()).into();
        assert!(err.to_string().contains("table doesn't exist"));
    }
}
