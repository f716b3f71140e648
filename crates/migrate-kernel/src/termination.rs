//! Termination policy
//!
//! Evaluated after every stage. Two independent conditions, either one
//! sufficient:
//! - message-count ceiling (bounds total work)
//! - sentinel token in the latest stage output (explicit completion)

use crate::state::SharedState;
use serde::{Deserialize, Serialize};

/// Default sentinel token
pub const DEFAULT_SENTINEL: &str = "TERMINATE";

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Latest stage output contained the sentinel
    Sentinel,
    /// Message ceiling reached
    MaxMessages,
    /// A stage failed
    StageFailure,
    /// External cancellation observed at a stage boundary
    Cancelled,
    /// Every stage ran without another condition firing
    Completed,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Sentinel => "sentinel",
            Self::MaxMessages => "max messages",
            Self::StageFailure => "stage failure",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        f.write_str(text)
    }
}

/// Derived termination state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationState {
    /// Messages appended after the seed
    pub message_count: usize,
    /// Whether the run must stop
    pub terminated: bool,
    /// Set whenever `terminated` is
    pub reason: Option<TerminationReason>,
}

impl TerminationState {
    /// Not terminated
    #[inline]
    #[must_use]
    pub fn running(message_count: usize) -> Self {
        Self {
            message_count,
            terminated: false,
            reason: None,
        }
    }

    /// Terminated with a reason
    #[inline]
    #[must_use]
    pub fn stopped(message_count: usize, reason: TerminationReason) -> Self {
        Self {
            message_count,
            terminated: true,
            reason: Some(reason),
        }
    }
}

/// What a sentinel ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelScope {
    /// The whole run
    #[default]
    Run,
    /// Only the emitting stage's turn; the run moves on
    Stage,
}

/// Termination policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationPolicy {
    /// Case-sensitive token searched in stage output
    pub sentinel: String,
    /// What the sentinel ends
    #[serde(default)]
    pub scope: SentinelScope,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
            scope: SentinelScope::Run,
        }
    }
}

impl TerminationPolicy {
    /// Policy with a custom sentinel
    #[inline]
    pub fn with_sentinel(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
            ..Self::default()
        }
    }

    /// Set the sentinel scope
    #[inline]
    #[must_use]
    pub fn scoped(mut self, scope: SentinelScope) -> Self {
        self.scope = scope;
        self
    }

    /// Whether text carries the sentinel
    #[inline]
    #[must_use]
    pub fn contains_sentinel(&self, text: &str) -> bool {
        !self.sentinel.is_empty() && text.contains(&self.sentinel)
    }

    /// Recompute the termination state from the history
    ///
    /// Only stage output is searched for the sentinel; the seed and
    /// engine error messages never count. When both conditions hold the
    /// reason is [`TerminationReason::Sentinel`].
    #[must_use]
    pub fn evaluate(&self, state: &SharedState, max_messages: usize) -> TerminationState {
        let count = state.appended_count();
        let latest = state.latest();

        if latest.is_stage_output() && self.contains_sentinel(&latest.content) {
            return TerminationState::stopped(count, TerminationReason::Sentinel);
        }
        if count >= max_messages {
            return TerminationState::stopped(count, TerminationReason::MaxMessages);
        }
        TerminationState::running(count)
    }
}
