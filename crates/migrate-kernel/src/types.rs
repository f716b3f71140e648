//! Core types for the pipeline kernel
//!
//! Defines:
//! - Run identifiers
//! - Stage capabilities
//! - Messages and the replies stages hand back to the engine

use crate::protocol::{CodeBlock, ExecutionOutput, ToolCall, ToolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A collaborator a stage may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// May dispatch calls to the tool server
    ToolAccess,
    /// May run code blocks through the code executor
    CodeExecution,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolAccess => write!(f, "tool access"),
            Self::CodeExecution => write!(f, "code execution"),
        }
    }
}

/// Origin of a message in the shared history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// The initial task message
    Seed,
    /// Output of a stage
    Stage,
    /// Failure summary appended by the engine
    Error,
}

/// One tool call and its outcome, as recorded in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// The request
    pub call: ToolCall,
    /// The envelope returned by the server
    pub result: ToolResult,
}

impl ToolRecord {
    /// One-line rendering used in transcripts
    #[must_use]
    pub fn summary(&self) -> String {
        let params = serde_json::to_string(&self.call.params).unwrap_or_default();
        match &self.result {
            ToolResult::Ok { .. } => format!("tool {} {params} -> ok", self.call.tool),
            ToolResult::Error { message } => {
                format!("tool {} {params} -> error: {message}", self.call.tool)
            }
        }
    }
}

/// One code block run and what came back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRecord {
    /// The block as requested
    pub block: CodeBlock,
    /// Captured output, or the executor's error text
    pub output: Result<ExecutionOutput, String>,
}

impl CodeRecord {
    /// One-line rendering used in transcripts
    #[must_use]
    pub fn summary(&self) -> String {
        let language = &self.block.language;
        match &self.output {
            Ok(out) if out.success() => format!("{language} block -> exit 0"),
            Ok(out) => {
                let code = out
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                let detail = out.stderr.trim().lines().last().unwrap_or_default();
                format!("{language} block -> exit {code}: {detail}")
            }
            Err(e) => format!("{language} block -> error: {e}"),
        }
    }
}

/// A message in the shared history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author (stage name, or `user` for the seed)
    pub author: String,
    /// Wall-clock time of the append
    pub timestamp: DateTime<Utc>,
    /// Origin
    pub kind: MessageKind,
    /// Free text
    pub content: String,
    /// Tool calls made while producing this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_records: Vec<ToolRecord>,
    /// Code blocks run while producing this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_records: Vec<CodeRecord>,
}

impl Message {
    /// Author name used for the seed message
    pub const SEED_AUTHOR: &'static str = "user";

    pub(crate) fn seed(content: impl Into<String>) -> Self {
        Self {
            author: Self::SEED_AUTHOR.to_string(),
            timestamp: Utc::now(),
            kind: MessageKind::Seed,
            content: content.into(),
            tool_records: Vec::new(),
            code_records: Vec::new(),
        }
    }

    pub(crate) fn from_reply(author: &str, reply: Reply) -> Self {
        Self {
            author: author.to_string(),
            timestamp: Utc::now(),
            kind: MessageKind::Stage,
            content: reply.content,
            tool_records: reply.tool_records,
            code_records: reply.code_records,
        }
    }

    pub(crate) fn error(author: &str, content: impl Into<String>) -> Self {
        Self {
            author: author.to_string(),
            timestamp: Utc::now(),
            kind: MessageKind::Error,
            content: content.into(),
            tool_records: Vec::new(),
            code_records: Vec::new(),
        }
    }

    /// Whether this message was produced by a stage
    #[inline]
    #[must_use]
    pub fn is_stage_output(&self) -> bool {
        self.kind == MessageKind::Stage
    }
}

/// What a stage hands back to the engine
///
/// The engine stamps author and time when appending, so a stage cannot
/// write under another stage's name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// Free text
    pub content: String,
    /// Tool calls made while producing the reply
    pub tool_records: Vec<ToolRecord>,
    /// Code blocks run while producing the reply
    pub code_records: Vec<CodeRecord>,
}

impl Reply {
    /// Text-only reply
    #[inline]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Attach tool records
    #[inline]
    #[must_use]
    pub fn with_tool_records(mut self, records: Vec<ToolRecord>) -> Self {
        self.tool_records = records;
        self
    }

    /// Attach code execution records
    #[inline]
    #[must_use]
    pub fn with_code_records(mut self, records: Vec<CodeRecord>) -> Self {
        self.code_records = records;
        self
    }
}
