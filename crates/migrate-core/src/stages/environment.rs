//! Environment readiness checks
//!
//! The source database must answer `db_metadata`, and every configured
//! shell check must exit 0. The first failed check halts the run.

use super::{metadata_size_gb, metadata_tables};
use async_trait::async_trait;
use migrate_kernel::prelude::*;

/// Query source database metadata and run readiness commands
#[derive(Debug)]
pub struct EnvironmentCheckStage {
    name: String,
    checks: Vec<String>,
    capabilities: Vec<Capability>,
    sentinel: String,
}

impl EnvironmentCheckStage {
    /// Stage running the given shell checks after the metadata query
    pub fn new(name: impl Into<String>, checks: Vec<String>) -> Self {
        let mut capabilities = vec![Capability::ToolAccess];
        if !checks.is_empty() {
            capabilities.push(Capability::CodeExecution);
        }
        Self {
            name: name.into(),
            checks,
            capabilities,
            sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }

    /// Token closing the report
    #[must_use]
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = sentinel.into();
        self
    }
}

#[async_trait]
impl Stage for EnvironmentCheckStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn run(
        &self,
        _state: &SharedState,
        ctx: &StageContext<'_>,
    ) -> Result<Vec<Reply>, StageFailure> {
        let record = ctx.call_tool(ToolCall::new("db_metadata")).await?;
        let meta = match &record.result {
            ToolResult::Ok { payload } => payload.as_map().cloned().unwrap_or_default(),
            ToolResult::Error { message } => {
                return Err(StageFailure::check_failed(format!(
                    "source database unreachable: {message}"
                )))
            }
        };
        let field = |key: &str| meta.get(key).map_or_else(|| "?".to_string(), ToString::to_string);
        let size = metadata_size_gb(&meta).map_or_else(|| "?".to_string(), |gb| format!("{gb:.2}"));
        let mut lines = vec![format!(
            "[ok] source database {} (MySQL {}, {size} GB, {} tables)",
            field("name"),
            field("version"),
            metadata_tables(&meta).len(),
        )];

        for check in &self.checks {
            tracing::info!(stage = %self.name, check = %check, "running readiness check");
            let output = ctx
                .run_code(&CodeBlock::new("sh", check.as_str()))
                .await?
                .map_err(|e| StageFailure::check_failed(format!("`{check}`: {e}")))?;
            if !output.success() {
                let code = output
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                return Err(StageFailure::check_failed(format!(
                    "`{check}` exited {code}: {}",
                    output.stderr.trim()
                )));
            }
            lines.push(format!("[ok] {check}"));
        }

        lines.push(format!("Environment ready. {}", self.sentinel));
        Ok(vec![Reply::text(lines.join("\n")).with_tool_records(vec![record])])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_follow_checks() {
        let plain = EnvironmentCheckStage::new("environment_setup", Vec::new());
        assert_eq!(plain.capabilities(), &[Capability::ToolAccess]);

        let with_checks =
            EnvironmentCheckStage::new("environment_setup", vec!["gsutil ls gs://bucket".into()]);
        assert_eq!(
            with_checks.capabilities(),
            &[Capability::ToolAccess, Capability::CodeExecution]
        );
    }
}
