//! Tool and code-execution protocol
//!
//! Stages reach external systems only through two collaborator traits:
//! - [`ToolDispatcher`]: request/response tool calls with [`ToolResult`] envelopes
//! - [`CodeExecutor`]: run a code block, capture output and exit code
//!
//! The envelope serializes as `{"status":"ok","payload":…}` or
//! `{"status":"error","message":…}`.

use crate::error::ExecutorError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A request parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
}

impl ParamValue {
    /// Text content, if this is a text value
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer value
    #[inline]
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A tool request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Registered tool name
    pub tool: String,
    /// Parameters in the order given
    #[serde(default)]
    pub params: IndexMap<String, ParamValue>,
}

impl ToolCall {
    /// Create a call without parameters
    #[inline]
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: IndexMap::new(),
        }
    }

    /// Add a parameter
    #[inline]
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// A database-cell-shaped value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
    /// Ordered list of values
    List(Vec<Scalar>),
}

impl Scalar {
    /// Integer view; text holding an integer is parsed
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Float view; integers widen
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text view
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// List view
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[Scalar]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

/// A flat, ordered mapping of column name to value
pub type Row = IndexMap<String, Scalar>;

/// Tool output: a scalar, one row, or a sequence of rows
///
/// Untagged decoding tries variants in order, so an empty array reads back
/// as `Rows` rather than an empty `Scalar::List`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Single flat mapping
    Map(Row),
    /// Ordered sequence of flat mappings
    Rows(Vec<Row>),
    /// Single value
    Scalar(Scalar),
}

impl Payload {
    /// Text payload
    #[inline]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Text(value.into()))
    }

    /// Integer payload
    #[inline]
    #[must_use]
    pub fn int(value: i64) -> Self {
        Self::Scalar(Scalar::Int(value))
    }

    /// Integer view of a scalar payload
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Scalar(s) => s.as_i64(),
            _ => None,
        }
    }

    /// Text view of a scalar payload
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => s.as_str(),
            _ => None,
        }
    }

    /// Row view of a mapping payload
    #[must_use]
    pub fn as_map(&self) -> Option<&Row> {
        match self {
            Self::Map(row) => Some(row),
            _ => None,
        }
    }

    /// Rows view of a sequence payload
    #[must_use]
    pub fn as_rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

/// Tagged success/error envelope returned by every dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResult {
    /// The tool produced a payload
    Ok {
        /// Tool output
        payload: Payload,
    },
    /// The call was rejected or the tool failed
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl ToolResult {
    /// Success envelope
    #[inline]
    #[must_use]
    pub fn ok(payload: Payload) -> Self {
        Self::Ok { payload }
    }

    /// Error envelope
    #[inline]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether the call succeeded
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Payload on success
    #[inline]
    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Ok { payload } => Some(payload),
            Self::Error { .. } => None,
        }
    }

    /// Message on error
    #[inline]
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { message } => Some(message),
        }
    }

    /// Convert to a `Result`, consuming the envelope
    ///
    /// # Errors
    /// Returns the error message for an `Error` envelope.
    pub fn into_result(self) -> Result<Payload, String> {
        match self {
            Self::Ok { payload } => Ok(payload),
            Self::Error { message } => Err(message),
        }
    }
}

/// Description of a registered tool, used to brief models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescription {
    /// Tool name
    pub name: String,
    /// What the tool does
    pub description: String,
    /// Parameters rendered as `name: kind`
    pub parameters: Vec<String>,
}

/// Request/response access to named tools
///
/// Implementations never fail: every fault is folded into
/// [`ToolResult::Error`].
#[async_trait::async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Dispatch one call
    async fn dispatch(&self, call: &ToolCall) -> ToolResult;

    /// Registered tools
    fn describe(&self) -> Vec<ToolDescription>;
}

/// A code block handed to the code executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Language tag (`sh`, `bash`, `python`)
    pub language: String,
    /// Source text
    pub source: String,
}

impl CodeBlock {
    /// Create a block
    #[inline]
    pub fn new(language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            source: source.into(),
        }
    }
}

/// Captured result of running a code block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl ExecutionOutput {
    /// Whether the block exited with code 0
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs code blocks as a single blocking external call
#[async_trait::async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Run a block to completion
    async fn execute(&self, block: &CodeBlock) -> Result<ExecutionOutput, ExecutorError>;
}
