//! Six-stage migration pipeline
//!
//! Wires the configured collaborators into a linear [`PipelineGraph`]:
//!
//! ```text
//! environment_setup -> schema_conversion -> data_migration
//!     -> data_validation -> anomaly_detection -> performance_optimization
//! ```

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::model::LanguageModel;
use crate::report::{EncryptionPreference, RunReport};
use crate::stages::prompts::{self, names};
use crate::stages::{
    AgentStage, DataMigrationStage, DataValidationStage, EnvironmentCheckStage, ReportSlot,
};
use crate::strategy::{StrategyLock, StrategySelector};
use migrate_kernel::prelude::*;
use std::sync::Arc;

/// External collaborators a pipeline runs against
#[derive(Clone)]
pub struct PipelineCollaborators {
    /// Model behind the agent stages
    pub model: Arc<dyn LanguageModel>,
    /// Tools bound to the source database
    pub source_tools: Arc<dyn ToolDispatcher>,
    /// Tools bound to the target database
    pub target_tools: Arc<dyn ToolDispatcher>,
    /// Code runner; stages declaring code execution fail without one
    pub executor: Option<Arc<dyn CodeExecutor>>,
}

impl std::fmt::Debug for PipelineCollaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCollaborators")
            .field("model", &self.model.name())
            .field("executor", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}

/// A configured, single-use migration run
pub struct MigrationPipeline {
    graph: PipelineGraph,
    engine: PipelineEngine,
    encryption: EncryptionPreference,
    max_messages: usize,
    lock: Arc<StrategyLock>,
    slot: ReportSlot,
}

impl MigrationPipeline {
    /// Validate `config` and assemble the graph and engine
    ///
    /// # Errors
    /// Invalid configuration, or a graph that fails its checks.
    pub fn build(
        config: &AppConfig,
        encryption: EncryptionPreference,
        collaborators: PipelineCollaborators,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let sentinel = config.pipeline.sentinel.as_str();
        let selector = StrategySelector::new(config.migration_strategies)?;
        let lock = Arc::new(StrategyLock::new());
        let slot = ReportSlot::new();
        let llm = &config.llm_config;

        let agent = |name: &str, instructions: String| {
            AgentStage::new(name, instructions, Arc::clone(&collaborators.model))
                .with_max_rounds(llm.max_rounds)
                .with_temperature(llm.temperature)
        };

        let mut builder = PipelineGraph::builder();
        builder
            .add_stage(
                EnvironmentCheckStage::new(
                    names::ENVIRONMENT_SETUP,
                    config.pipeline.environment_checks.clone(),
                )
                .with_sentinel(sentinel),
            )
            .add_stage(
                agent(names::SCHEMA_CONVERSION, prompts::schema_conversion(sentinel))
                    .with_capabilities(vec![Capability::ToolAccess]),
            )
            .add_stage(
                DataMigrationStage::new(
                    names::DATA_MIGRATION,
                    selector,
                    Arc::clone(&lock),
                    config.export.clone(),
                )
                .with_encryption(encryption)
                .with_sentinel(sentinel),
            )
            .add_stage(
                DataValidationStage::new(
                    names::DATA_VALIDATION,
                    Arc::clone(&collaborators.target_tools),
                    slot.clone(),
                )
                .with_sentinel(sentinel),
            )
            .add_stage(agent(
                names::ANOMALY_DETECTION,
                prompts::anomaly_detection(sentinel),
            ))
            .add_stage(
                agent(
                    names::PERFORMANCE_OPTIMIZATION,
                    prompts::performance_optimization(sentinel),
                )
                .with_capabilities(vec![Capability::CodeExecution]),
            );
        for pair in names::ALL.windows(2) {
            builder.add_edge(pair[0], pair[1]);
        }
        let graph = builder.build()?;

        let mut engine = PipelineEngine::new(config.termination_policy())
            .with_tools(collaborators.source_tools);
        if let Some(executor) = collaborators.executor {
            engine = engine.with_code_executor(executor);
        }
        if let Some(timeout) = config.stage_timeout() {
            engine = engine.with_stage_timeout(timeout);
        }

        tracing::debug!(stages = graph.len(), %encryption, "migration pipeline assembled");
        Ok(Self {
            graph,
            engine,
            encryption,
            max_messages: config.pipeline.max_messages,
            lock,
            slot,
        })
    }

    /// Stage graph
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Signal that stops the run at the next stage boundary
    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        self.engine.cancel_signal()
    }

    /// Run once; the strategy lock makes a pipeline single-use
    pub async fn run(self, task: &str) -> RunReport {
        let seed = prompts::initial_task(task, self.encryption);
        tracing::info!(task, encryption = %self.encryption, "starting migration run");
        let outcome = self.engine.run(&self.graph, seed, self.max_messages).await;
        tracing::info!(
            reason = %outcome.reason(),
            messages = outcome.termination.message_count,
            "migration run finished"
        );
        RunReport::new(outcome, self.encryption, self.lock.get(), self.slot.get())
    }
}

impl std::fmt::Debug for MigrationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationPipeline")
            .field("stages", &self.graph.topological_order())
            .field("encryption", &self.encryption)
            .field("max_messages", &self.max_messages)
            .finish_non_exhaustive()
    }
}
