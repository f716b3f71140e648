//! Pipeline engine (execution phase)
//!
//! Walks a [`PipelineGraph`] in topological order, one stage at a time.
//!
//! # Invariants
//!
//! - The engine is the only writer of [`SharedState`]; each stage's replies
//!   are appended as one batch before the next stage starts.
//! - The termination policy is re-evaluated after every stage.
//! - A failed stage halts the run; there is no retry and no partial
//!   continuation past it.

use crate::error::StageFailure;
use crate::graph::PipelineGraph;
use crate::protocol::{CodeExecutor, ToolDispatcher};
use crate::stage::{Stage, StageContext};
use crate::state::SharedState;
use crate::termination::{SentinelScope, TerminationPolicy, TerminationReason, TerminationState};
use crate::types::{Message, Reply};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// External cancellation signal
///
/// Takes effect at the next stage boundary; an in-flight stage is not
/// interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    /// Create an unset signal
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The stage that halted a run and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Failed stage
    pub stage: String,
    /// Rendered failure
    pub error: String,
}

/// Result of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Full message history
    pub state: SharedState,
    /// Final termination state
    pub termination: TerminationState,
    /// Stages that returned successfully, in execution order
    pub completed: Vec<String>,
    /// Stages that never ran
    pub skipped: Vec<String>,
    /// Stage at which the run stopped early, if it did
    pub halted_at: Option<String>,
    /// Set when a stage failed
    pub failure: Option<FailureRecord>,
}

impl RunOutcome {
    /// Final reason; always set on a returned outcome
    #[inline]
    #[must_use]
    pub fn reason(&self) -> TerminationReason {
        self.termination.reason.unwrap_or(TerminationReason::Completed)
    }

    /// Natural termination: sentinel, ceiling, or graph exhausted
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(
            self.reason(),
            TerminationReason::StageFailure | TerminationReason::Cancelled
        )
    }
}

/// Single-threaded, cooperative stage executor
pub struct PipelineEngine {
    policy: TerminationPolicy,
    tools: Option<Arc<dyn ToolDispatcher>>,
    executor: Option<Arc<dyn CodeExecutor>>,
    stage_timeout: Option<Duration>,
    cancel: CancelSignal,
}

impl PipelineEngine {
    /// Create an engine without collaborators
    #[must_use]
    pub fn new(policy: TerminationPolicy) -> Self {
        Self {
            policy,
            tools: None,
            executor: None,
            stage_timeout: None,
            cancel: CancelSignal::new(),
        }
    }

    /// Provide the tool server handed to stages with tool access
    #[inline]
    #[must_use]
    pub fn with_tools(mut self, tools: Arc<dyn ToolDispatcher>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Provide the code executor handed to stages with code execution
    #[inline]
    #[must_use]
    pub fn with_code_executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Bound each stage invocation
    #[inline]
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    /// Share an externally owned cancellation signal
    #[inline]
    #[must_use]
    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for cancelling runs of this engine
    #[inline]
    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Termination policy in use
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &TerminationPolicy {
        &self.policy
    }

    /// Run a graph to termination
    ///
    /// Seeds the history with `initial_message`, then executes stages in
    /// topological order until the policy, a failure, cancellation, or the
    /// end of the graph stops it.
    pub async fn run(
        &self,
        graph: &PipelineGraph,
        initial_message: impl Into<String>,
        max_messages: usize,
    ) -> RunOutcome {
        let mut state = SharedState::seeded(initial_message);
        let run_id = state.run_id();
        tracing::info!(%run_id, stages = graph.len(), max_messages, entry = graph.entry(), "starting pipeline run");

        let order: Vec<&Arc<dyn Stage>> = graph.stages_in_order().collect();
        let mut completed: Vec<String> = Vec::with_capacity(order.len());
        let mut failure = None;
        let mut next = 0;

        let mut termination = self.policy.evaluate(&state, max_messages);

        while !termination.terminated && next < order.len() {
            let stage = order[next];
            let name = stage.name();
            next += 1;

            if self.cancel.is_cancelled() {
                tracing::warn!(%run_id, stage = name, "cancellation observed at stage boundary");
                next -= 1;
                termination =
                    TerminationState::stopped(state.appended_count(), TerminationReason::Cancelled);
                break;
            }

            let ready = graph
                .predecessors(name)
                .iter()
                .all(|p| completed.iter().any(|c| c == p));
            let result = if ready {
                tracing::info!(%run_id, stage = name, "running stage");
                self.invoke(stage.as_ref(), &state).await
            } else {
                Err(StageFailure::fatal("predecessors did not complete"))
            };

            match result {
                Ok(replies) => {
                    tracing::debug!(%run_id, stage = name, replies = replies.len(), "stage completed");
                    let batch = replies
                        .into_iter()
                        .map(|r| Message::from_reply(name, r))
                        .collect();
                    state.append(batch);
                    completed.push(name.to_string());
                }
                Err(err) => {
                    tracing::error!(%run_id, stage = name, error = %err, "stage failed; halting run");
                    state.append(vec![Message::error(
                        name,
                        format!("stage '{name}' failed: {err}"),
                    )]);
                    failure = Some(FailureRecord {
                        stage: name.to_string(),
                        error: err.to_string(),
                    });
                    termination = TerminationState::stopped(
                        state.appended_count(),
                        TerminationReason::StageFailure,
                    );
                    break;
                }
            }

            termination = self.policy.evaluate(&state, max_messages);
            if termination.reason == Some(TerminationReason::Sentinel)
                && self.policy.scope == SentinelScope::Stage
                && next < order.len()
            {
                tracing::debug!(%run_id, stage = name, "sentinel ends stage turn");
                let count = termination.message_count;
                termination = if count >= max_messages {
                    TerminationState::stopped(count, TerminationReason::MaxMessages)
                } else {
                    TerminationState::running(count)
                };
            }
        }

        if !termination.terminated {
            termination =
                TerminationState::stopped(state.appended_count(), TerminationReason::Completed);
        }

        let skipped: Vec<String> = order[next..].iter().map(|s| s.name().to_string()).collect();
        let halted_at = match &failure {
            Some(record) => Some(record.stage.clone()),
            None if !skipped.is_empty() => completed.last().cloned(),
            None => None,
        };
        tracing::info!(
            %run_id,
            reason = %termination.reason.unwrap_or(TerminationReason::Completed),
            messages = termination.message_count,
            "pipeline run finished"
        );

        RunOutcome {
            state,
            termination,
            completed,
            skipped,
            halted_at,
            failure,
        }
    }

    async fn invoke(&self, stage: &dyn Stage, state: &SharedState) -> Result<Vec<Reply>, StageFailure> {
        let ctx = StageContext::new(
            stage.name(),
            stage.capabilities(),
            self.tools.as_deref(),
            self.executor.as_deref(),
        );
        let guarded = AssertUnwindSafe(stage.run(state, &ctx)).catch_unwind();

        let outcome = match self.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .map_err(|_| StageFailure::TimedOut {
                    secs: limit.as_secs(),
                })?,
            None => guarded.await,
        };

        outcome.map_err(|panic| StageFailure::Panicked(panic_message(panic.as_ref())))?
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("policy", &self.policy)
            .field("tools", &self.tools.is_some())
            .field("executor", &self.executor.is_some())
            .field("stage_timeout", &self.stage_timeout)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineGraphBuilder;

    struct Says {
        name: &'static str,
        text: &'static str,
    }

    #[async_trait::async_trait]
    impl Stage for Says {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(
            &self,
            _state: &SharedState,
            _ctx: &StageContext<'_>,
        ) -> Result<Vec<Reply>, StageFailure> {
            Ok(vec![Reply::text(self.text)])
        }
    }

    struct Panics;

    #[async_trait::async_trait]
    impl Stage for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        async fn run(
            &self,
            _state: &SharedState,
            _ctx: &StageContext<'_>,
        ) -> Result<Vec<Reply>, StageFailure> {
            panic!("collaborator exploded")
        }
    }

    struct Sleeps;

    #[async_trait::async_trait]
    impl Stage for Sleeps {
        fn name(&self) -> &str {
            "sleeps"
        }

        async fn run(
            &self,
            _state: &SharedState,
            _ctx: &StageContext<'_>,
        ) -> Result<Vec<Reply>, StageFailure> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn panic_is_contained_as_stage_failure() {
        let mut b = PipelineGraphBuilder::new();
        b.add_stage(Says { name: "first", text: "ok" })
            .add_stage(Panics)
            .add_edge("first", "panics");
        let graph = b.build().unwrap();

        let outcome = PipelineEngine::new(TerminationPolicy::default())
            .run(&graph, "go", 10)
            .await;

        assert_eq!(outcome.reason(), TerminationReason::StageFailure);
        let failure = outcome.failure.as_ref().unwrap();
        assert_eq!(failure.stage, "panics");
        assert!(failure.error.contains("collaborator exploded"));
        assert_eq!(outcome.state.latest().kind, crate::types::MessageKind::Error);
    }

    #[tokio::test]
    async fn stage_timeout_halts() {
        let mut b = PipelineGraphBuilder::new();
        b.add_stage(Sleeps);
        let graph = b.build().unwrap();

        let outcome = PipelineEngine::new(TerminationPolicy::default())
            .with_stage_timeout(Duration::from_millis(20))
            .run(&graph, "go", 10)
            .await;

        assert_eq!(outcome.reason(), TerminationReason::StageFailure);
        assert!(outcome.failure.unwrap().error.contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_before_first_stage() {
        let mut b = PipelineGraphBuilder::new();
        b.add_stage(Says { name: "only", text: "never" });
        let graph = b.build().unwrap();

        let engine = PipelineEngine::new(TerminationPolicy::default());
        engine.cancel_signal().cancel();
        let outcome = engine.run(&graph, "go", 10).await;

        assert_eq!(outcome.reason(), TerminationReason::Cancelled);
        assert_eq!(outcome.skipped, vec!["only".to_string()]);
        assert_eq!(outcome.state.len(), 1);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn exhausted_graph_completes() {
        let mut b = PipelineGraphBuilder::new();
        b.add_stage(Says { name: "a", text: "one" })
            .add_stage(Says { name: "b", text: "two" })
            .add_edge("a", "b");
        let graph = b.build().unwrap();

        let outcome = PipelineEngine::new(TerminationPolicy::default())
            .run(&graph, "go", 10)
            .await;

        assert_eq!(outcome.reason(), TerminationReason::Completed);
        assert_eq!(outcome.completed, vec!["a".to_string(), "b".to_string()]);
        assert!(outcome.halted_at.is_none());
        assert!(outcome.is_success());
    }
}
