//! Stage contract
//!
//! A stage is a named handler bound to a capability set. It reads the
//! shared history and returns replies; the engine appends them.

use crate::error::{ExecutorError, StageFailure};
use crate::protocol::{CodeBlock, CodeExecutor, ExecutionOutput, ToolCall, ToolDispatcher};
use crate::state::SharedState;
use crate::types::{Capability, Reply, ToolRecord};

/// One unit of work in the pipeline
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    /// Unique name within a graph
    fn name(&self) -> &str;

    /// Collaborators this stage may use
    fn capabilities(&self) -> &[Capability] {
        &[]
    }

    /// Produce zero or more replies from the current history
    ///
    /// # Errors
    /// Any [`StageFailure`] halts the run.
    async fn run(
        &self,
        state: &SharedState,
        ctx: &StageContext<'_>,
    ) -> Result<Vec<Reply>, StageFailure>;
}

/// Collaborators handed to a running stage
///
/// Only the collaborators named in the stage's capability set are
/// reachable; asking for anything else fails.
pub struct StageContext<'a> {
    stage: &'a str,
    granted: &'a [Capability],
    tools: Option<&'a dyn ToolDispatcher>,
    executor: Option<&'a dyn CodeExecutor>,
}

impl<'a> StageContext<'a> {
    /// Build a context for one stage invocation
    #[must_use]
    pub fn new(
        stage: &'a str,
        granted: &'a [Capability],
        tools: Option<&'a dyn ToolDispatcher>,
        executor: Option<&'a dyn CodeExecutor>,
    ) -> Self {
        Self {
            stage,
            granted,
            tools,
            executor,
        }
    }

    /// Name of the running stage
    #[inline]
    #[must_use]
    pub fn stage_name(&self) -> &str {
        self.stage
    }

    /// Whether a capability was declared
    #[inline]
    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }

    /// Tool server access
    ///
    /// # Errors
    /// `CapabilityNotGranted` if undeclared, `CollaboratorUnavailable` if
    /// the engine has no tool server.
    pub fn tools(&self) -> Result<&'a dyn ToolDispatcher, StageFailure> {
        if !self.has(Capability::ToolAccess) {
            return Err(StageFailure::CapabilityNotGranted(Capability::ToolAccess));
        }
        self.tools
            .ok_or_else(|| StageFailure::CollaboratorUnavailable("tool server".to_string()))
    }

    /// Code executor access
    ///
    /// # Errors
    /// `CapabilityNotGranted` if undeclared, `CollaboratorUnavailable` if
    /// the engine has no executor.
    pub fn executor(&self) -> Result<&'a dyn CodeExecutor, StageFailure> {
        if !self.has(Capability::CodeExecution) {
            return Err(StageFailure::CapabilityNotGranted(Capability::CodeExecution));
        }
        self.executor
            .ok_or_else(|| StageFailure::CollaboratorUnavailable("code executor".to_string()))
    }

    /// Dispatch a tool call and keep the record
    ///
    /// A tool-level error is returned inside the record, not as a failure.
    ///
    /// # Errors
    /// Only when tool access itself is unavailable.
    pub async fn call_tool(&self, call: ToolCall) -> Result<ToolRecord, StageFailure> {
        let tools = self.tools()?;
        tracing::debug!(stage = self.stage, tool = %call.tool, "dispatching tool call");
        let result = tools.dispatch(&call).await;
        Ok(ToolRecord { call, result })
    }

    /// Run a code block
    ///
    /// The inner `Result` carries executor errors (spawn failure,
    /// timeout) so the stage can decide whether they are fatal.
    ///
    /// # Errors
    /// Only when code execution itself is unavailable.
    pub async fn run_code(
        &self,
        block: &CodeBlock,
    ) -> Result<Result<ExecutionOutput, ExecutorError>, StageFailure> {
        let executor = self.executor()?;
        tracing::debug!(stage = self.stage, language = %block.language, "executing code block");
        Ok(executor.execute(block).await)
    }
}

impl std::fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("stage", &self.stage)
            .field("granted", &self.granted)
            .field("tools", &self.tools.is_some())
            .field("executor", &self.executor.is_some())
            .finish()
    }
}
