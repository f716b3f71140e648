//! Local code executor
//!
//! Runs `sh`, `bash` and `python` blocks as child processes in a fixed
//! working directory. Isolation beyond that is left to the deployment.

use crate::error::ProcessError;
use crate::process::{run_command, CommandSpec};
use migrate_kernel::error::ExecutorError;
use migrate_kernel::protocol::{CodeBlock, CodeExecutor, ExecutionOutput};
use std::path::PathBuf;
use std::time::Duration;

/// Executor spawning local interpreters
#[derive(Debug, Clone)]
pub struct LocalCodeExecutor {
    work_dir: PathBuf,
    timeout: Duration,
}

impl LocalCodeExecutor {
    /// Executor rooted at `work_dir`
    pub fn new(work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            work_dir: work_dir.into(),
            timeout,
        }
    }

    /// Interpreter for a language tag
    #[must_use]
    pub fn interpreter(language: &str) -> Option<&'static str> {
        match language.to_ascii_lowercase().as_str() {
            "sh" | "shell" => Some("sh"),
            "bash" => Some("bash"),
            "python" | "python3" | "py" => Some("python3"),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl CodeExecutor for LocalCodeExecutor {
    async fn execute(&self, block: &CodeBlock) -> Result<ExecutionOutput, ExecutorError> {
        let program = Self::interpreter(&block.language)
            .ok_or_else(|| ExecutorError::UnsupportedLanguage(block.language.clone()))?;

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| ExecutorError::Spawn {
                program: program.to_string(),
                reason: format!("work dir {}: {e}", self.work_dir.display()),
            })?;

        let spec = CommandSpec::new(program)
            .args(["-c", block.source.as_str()])
            .current_dir(&self.work_dir);

        tracing::info!(language = %block.language, bytes = block.source.len(), "executing code block");
        run_command(&spec, self.timeout).await.map_err(|e| match e {
            ProcessError::TimedOut { secs, .. } => ExecutorError::TimedOut { secs },
            ProcessError::Spawn { program, reason } => ExecutorError::Spawn { program, reason },
            other => ExecutorError::Spawn {
                program: program.to_string(),
                reason: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_tags() {
        assert_eq!(LocalCodeExecutor::interpreter("Python"), Some("python3"));
        assert_eq!(LocalCodeExecutor::interpreter("sh"), Some("sh"));
        assert_eq!(LocalCodeExecutor::interpreter("sql"), None);
    }

    #[tokio::test]
    async fn unsupported_language_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalCodeExecutor::new(dir.path(), Duration::from_secs(5));
        let err = exec
            .execute(&CodeBlock::new("sql", "SELECT 1"))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutorError::UnsupportedLanguage("sql".into()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalCodeExecutor::new(dir.path(), Duration::from_secs(5));
        let out = exec
            .execute(&CodeBlock::new("sh", "touch marker && echo done"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "done");
        assert!(dir.path().join("marker").exists());
    }
}
