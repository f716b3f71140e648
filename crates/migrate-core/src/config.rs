//! Application configuration
//!
//! Loaded once from YAML (`.yaml`, `.yml`) or TOML (`.toml`), picked by
//! extension. Every section except `llm_config` and `gcp_project_id` has
//! defaults.
//!
//! ```yaml
//! gcp_project_id: my-project
//! llm_config:
//!   model: gemini-1.5-pro
//!   endpoint: https://generativelanguage.googleapis.com/v1beta/openai
//!   api_key_env: GEMINI_API_KEY
//! migration_strategies:
//!   gcs_import_threshold_gb: 100
//!   dms_threshold_gb: 500
//! pipeline:
//!   max_messages: 15
//! export:
//!   bucket: migration-dumps
//! ```

use crate::error::ConfigError;
use crate::strategy::Thresholds;
use migrate_kernel::termination::{SentinelScope, TerminationPolicy, DEFAULT_SENTINEL};
use migrate_tools::database::EnvSecrets;
use migrate_tools::tools::export::ExportSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Model backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model name sent with every request
    pub model: String,
    /// Base URL of an OpenAI-compatible server
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the API key; unset means no auth header
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Per-request timeout
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Tool/code rounds an agent stage may take before it must answer
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_max_rounds() -> usize {
    5
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Appended-message ceiling
    pub max_messages: usize,
    /// Termination token
    pub sentinel: String,
    /// What the sentinel ends
    pub sentinel_scope: SentinelScope,
    /// Per-stage budget; `None` disables it
    pub stage_timeout_secs: Option<u64>,
    /// Shell commands the environment stage must see succeed
    pub environment_checks: Vec<String>,
    /// Working directory for code blocks
    pub code_work_dir: PathBuf,
    /// Budget for a single code block
    pub code_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_messages: 15,
            sentinel: DEFAULT_SENTINEL.to_string(),
            sentinel_scope: SentinelScope::Stage,
            stage_timeout_secs: Some(1800),
            environment_checks: Vec::new(),
            code_work_dir: PathBuf::from("coding"),
            code_timeout_secs: 600,
        }
    }
}

/// Target database used by the validation stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    /// Prefix of the `<PREFIX>_HOST|PORT|USER|PASSWORD|NAME` variables
    pub env_prefix: String,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            env_prefix: EnvSecrets::TARGET_PREFIX.to_string(),
        }
    }
}

/// Whole configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend
    pub llm_config: LlmConfig,
    /// Target cloud project
    pub gcp_project_id: String,
    /// Strategy brackets
    #[serde(default)]
    pub migration_strategies: Thresholds,
    /// Engine settings
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Export binaries and destinations
    #[serde(default)]
    pub export: ExportSettings,
    /// Target database
    #[serde(default)]
    pub target: TargetSettings,
}

impl AppConfig {
    /// Read, parse and validate a file
    ///
    /// # Errors
    /// I/O, parse, unsupported extension or validation failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = Format::of(path)?;
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = format.parse(&text).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            model = %config.llm_config.model,
            max_messages = config.pipeline.max_messages,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate YAML text
    ///
    /// # Errors
    /// Parse or validation failure.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Self::from_str_as(Format::Yaml, text)
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Parse or validation failure.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::from_str_as(Format::Toml, text)
    }

    fn from_str_as(format: Format, text: &str) -> Result<Self, ConfigError> {
        let config = format.parse(text).map_err(|reason| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            reason,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks
    ///
    /// # Errors
    /// The first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gcp_project_id.trim().is_empty() {
            return Err(ConfigError::Invalid("gcp_project_id must not be empty".into()));
        }
        if self.llm_config.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm_config.model must not be empty".into()));
        }
        self.migration_strategies.validate()?;
        if self.pipeline.max_messages == 0 {
            return Err(ConfigError::Invalid("pipeline.max_messages must be positive".into()));
        }
        if self.pipeline.sentinel.is_empty() {
            return Err(ConfigError::Invalid("pipeline.sentinel must not be empty".into()));
        }
        if self.export.threads == 0 || self.export.chunk_size_mb == 0 {
            return Err(ConfigError::Invalid(
                "export.threads and export.chunk_size_mb must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Termination policy for the engine
    #[must_use]
    pub fn termination_policy(&self) -> TerminationPolicy {
        TerminationPolicy::with_sentinel(self.pipeline.sentinel.clone())
            .scoped(self.pipeline.sentinel_scope)
    }

    /// Per-stage budget
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.pipeline.stage_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Yaml,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    fn parse(self, text: &str) -> Result<AppConfig, String> {
        match self {
            Self::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
            Self::Toml => toml::from_str(text).map_err(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = "gcp_project_id: demo\nllm_config:\n  model: gemini-1.5-pro\n";

    #[test]
    fn defaults_fill_optional_sections() {
        let config = AppConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.migration_strategies, Thresholds::default());
        assert_eq!(config.pipeline.max_messages, 15);
        assert_eq!(config.pipeline.sentinel_scope, SentinelScope::Stage);
        assert_eq!(config.export, ExportSettings::default());
        assert_eq!(config.target.env_prefix, "TARGET_DB");
        assert_eq!(config.llm_config.max_rounds, 5);
        assert_eq!(config.stage_timeout(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn toml_is_accepted() {
        let config = AppConfig::from_toml_str(
            r#"
gcp_project_id = "demo"

[llm_config]
model = "local"
endpoint = "http://127.0.0.1:8000"

[migration_strategies]
gcs_import_threshold_gb = 50
dms_threshold_gb = 200

[pipeline]
sentinel_scope = "run"
"#,
        )
        .unwrap();
        assert_eq!(config.migration_strategies, Thresholds::new(50.0, 200.0));
        assert_eq!(config.termination_policy().scope, SentinelScope::Run);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let text = format!(
            "{MINIMAL}migration_strategies:\n  gcs_import_threshold_gb: 500\n  dms_threshold_gb: 100\n"
        );
        assert!(matches!(
            AppConfig::from_yaml_str(&text),
            Err(ConfigError::InvalidThresholds { .. })
        ));
    }

    #[test]
    fn empty_project_and_zero_ceiling_rejected() {
        let text = "gcp_project_id: ''\nllm_config:\n  model: m\n";
        assert!(matches!(AppConfig::from_yaml_str(text), Err(ConfigError::Invalid(_))));

        let text = format!("{MINIMAL}pipeline:\n  max_messages: 0\n");
        assert!(matches!(AppConfig::from_yaml_str(&text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_model_is_parse_error() {
        assert!(matches!(
            AppConfig::from_yaml_str("gcp_project_id: demo\n"),
            Err(ConfigError::Parse { .. })
        ));
    }
}
