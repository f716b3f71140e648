//! Migration pipeline kernel (migrate-kernel)
//!
//! Two-phase design:
//! 1. **Construction Phase**: register stages and edges, validate once
//! 2. **Execution Phase**: run the frozen graph against a shared,
//!    append-only message history
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use migrate_kernel::prelude::*;
//!
//! // Construction phase
//! let mut builder = PipelineGraph::builder();
//! builder.add_stage(environment).add_stage(schema);
//! builder.add_edge("environment_check", "schema_analysis");
//! let graph = builder.build()?;
//!
//! // Execution phase
//! let engine = PipelineEngine::new(TerminationPolicy::default()).with_tools(tools);
//! let outcome = engine.run(&graph, "migrate the employees database", 15).await;
//! println!("{}", outcome.reason());
//! ```

pub mod engine;
pub mod error;
pub mod graph;
pub mod protocol;
pub mod stage;
pub mod state;
pub mod termination;
pub mod types;

// Re-exports
pub use error::*;
pub use types::*;

/// Commonly used kernel types
pub mod prelude {
    pub use crate::engine::{CancelSignal, FailureRecord, PipelineEngine, RunOutcome};
    pub use crate::error::{ExecutorError, GraphError, StageFailure};
    pub use crate::graph::{PipelineGraph, PipelineGraphBuilder};
    pub use crate::protocol::{
        CodeBlock, CodeExecutor, ExecutionOutput, ParamValue, Payload, Row, Scalar, ToolCall,
        ToolDescription, ToolDispatcher, ToolResult,
    };
    pub use crate::stage::{Stage, StageContext};
    pub use crate::state::SharedState;
    pub use crate::termination::{
        SentinelScope, TerminationPolicy, TerminationReason, TerminationState, DEFAULT_SENTINEL,
    };
    pub use crate::types::{
        Capability, CodeRecord, Message, MessageKind, Reply, RunId, ToolRecord,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
