//! Pipeline stages
//!
//! - [`AgentStage`]: model-driven, for review and advice steps
//! - [`EnvironmentCheckStage`], [`DataMigrationStage`],
//!   [`DataValidationStage`]: deterministic steps over the tool server

mod agent;
mod environment;
mod migration;
pub mod prompts;
mod validation;

pub use agent::AgentStage;
pub use environment::EnvironmentCheckStage;
pub use migration::DataMigrationStage;
pub use validation::{DataValidationStage, ReportSlot};

use migrate_kernel::protocol::{Row, Scalar};

/// Table names listed in a `db_metadata` payload
fn metadata_tables(meta: &Row) -> Vec<String> {
    meta.get("tables")
        .and_then(Scalar::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(Scalar::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Size in GB from a `db_metadata` payload, unrounded
fn metadata_size_gb(meta: &Row) -> Option<f64> {
    meta.get("size_gb").and_then(Scalar::as_f64)
}
