//! Error types for the migration orchestrator
//!
//! - [`ConfigError`]: configuration could not be loaded or is inconsistent
//! - [`StrategyError`]: a run tried to change its locked strategy
//! - [`PipelineError`]: the migration pipeline could not be assembled

use crate::strategy::MigrationStrategy;
use migrate_kernel::error::GraphError;
use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML/TOML for the expected shape
    #[error("cannot parse {path}: {reason}")]
    Parse {
        /// Config path
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// Extension is neither YAML nor TOML
    #[error("unsupported config format: {0} (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(PathBuf),

    /// Strategy thresholds are not finite or not ordered
    #[error("invalid thresholds: gcs_import_threshold_gb={gcs} must be below dms_threshold_gb={dms}, both finite")]
    InvalidThresholds {
        /// GCS import upper bound
        gcs: f64,
        /// DMS upper bound
        dms: f64,
    },

    /// Any other inconsistent value
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Strategy lock errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    /// A different strategy is already locked for this run
    #[error("strategy already locked to {locked}, refusing {requested}")]
    AlreadyLocked {
        /// Locked strategy
        locked: MigrationStrategy,
        /// Rejected request
        requested: MigrationStrategy,
    },
}

/// Pipeline assembly errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stage graph is malformed
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_display_values() {
        let err = ConfigError::InvalidThresholds { gcs: 500.0, dms: 100.0 };
        assert!(err.to_string().contains("gcs_import_threshold_gb=500"));
    }

    #[test]
    fn lock_error_names_both() {
        let err = StrategyError::AlreadyLocked {
            locked: MigrationStrategy::GcsImport,
            requested: MigrationStrategy::GcpDms,
        };
        assert_eq!(
            err.to_string(),
            "strategy already locked to GCS_IMPORT, refusing GCP_DMS"
        );
    }
}
