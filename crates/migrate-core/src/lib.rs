//! MySQL to Cloud SQL migration orchestrator (migrate-core)
//!
//! Builds on [`migrate_kernel`] (graph, engine, termination) and
//! [`migrate_tools`] (tool server over the source database):
//!
//! - [`strategy`]: size brackets to migration strategy, locked once per run
//! - [`validation`]: row count and checksum comparison
//! - [`stages`]: the six pipeline stages
//! - [`pipeline`]: assembly of the linear stage chain
//! - [`config`]: YAML/TOML configuration
//! - [`model`]: language model collaborator
//! - [`report`]: run report rendering
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use migrate_core::prelude::*;
//!
//! let config = AppConfig::load("config.yaml")?;
//! let pipeline = MigrationPipeline::build(&config, EncryptionPreference::Default, collaborators)?;
//! let report = pipeline.run("Migrate the employees database").await;
//! println!("{}", report.render_text());
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod stages;
pub mod strategy;
pub mod validation;

pub use error::*;

/// Commonly used orchestrator types
pub mod prelude {
    pub use crate::config::{AppConfig, LlmConfig, PipelineSettings, TargetSettings};
    pub use crate::error::{ConfigError, PipelineError, StrategyError};
    pub use crate::model::{ChatMessage, ChatRequest, ChatRole, LanguageModel, ModelError, OpenAiCompatibleModel};
    pub use crate::pipeline::{MigrationPipeline, PipelineCollaborators};
    pub use crate::report::{EncryptionPreference, RunReport, CMEK_NOTE};
    pub use crate::stages::{
        AgentStage, DataMigrationStage, DataValidationStage, EnvironmentCheckStage, ReportSlot,
    };
    pub use crate::strategy::{MigrationStrategy, StrategyLock, StrategySelector, Thresholds};
    pub use crate::validation::{
        Comparison, Measure, ValidationRecord, ValidationReport, ValidationStatus,
        ValidationSummary, Validator,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
