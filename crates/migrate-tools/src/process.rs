//! External process execution
//!
//! Every process runs with an explicit timeout and `kill_on_drop`, so a
//! timed-out or abandoned child never outlives its caller.
//!
//! [`run_piped`] connects a producer's stdout to a consumer's stdin
//! (`mysqldump | gsutil cp - ...`). The parent keeps no copy of the pipe,
//! both stderr streams are drained, and both exit codes are reported.

use crate::error::ProcessError;
use migrate_kernel::protocol::ExecutionOutput;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

const REDACTED: &str = "***";

/// A command line plus environment, with secrets kept out of `Display`
#[derive(Clone, Default)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    secret_args: Vec<usize>,
    env: Vec<(String, String)>,
    secret_env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Start a command
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append an argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a secret argument; rendered as `***`
    #[must_use]
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set an environment variable whose value is never rendered
    #[must_use]
    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secret_env.push((key.into(), value.into()));
        self
    }

    /// Working directory
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Binary name
    #[inline]
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Raw arguments, secrets included
    #[inline]
    #[must_use]
    pub fn raw_args(&self) -> &[String] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .envs(self.secret_env.iter().map(|(k, v)| (k, v)))
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn spawn_error(&self, err: &std::io::Error) -> ProcessError {
        ProcessError::Spawn {
            program: self.program.clone(),
            reason: err.to_string(),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={value} ")?;
        }
        for (key, _) in &self.secret_env {
            write!(f, "{key}={REDACTED} ")?;
        }
        f.write_str(&self.program)?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&i) {
                write!(f, " {REDACTED}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandSpec({self})")
    }
}

/// Exit codes and output of a producer/consumer pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipedOutput {
    /// Producer result; `stdout` is empty since it fed the consumer
    pub producer: ExecutionOutput,
    /// Consumer result
    pub consumer: ExecutionOutput,
}

impl PipedOutput {
    /// Both sides exited with code 0
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.producer.success() && self.consumer.success()
    }

    /// Human-readable failure summary naming both exit codes
    #[must_use]
    pub fn failure_summary(&self) -> String {
        format!(
            "producer exit {}: {}; consumer exit {}: {}",
            exit_label(self.producer.exit_code),
            self.producer.stderr.trim(),
            exit_label(self.consumer.exit_code),
            self.consumer.stderr.trim()
        )
    }
}

/// Render an exit code, `signal` when killed
#[must_use]
pub fn exit_label(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

fn collect(output: std::process::Output) -> ExecutionOutput {
    ExecutionOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

fn spawn_captured(spec: &CommandSpec, stdin: Stdio) -> Result<Child, ProcessError> {
    spec.command()
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spec.spawn_error(&e))
}

/// Run one command to completion
///
/// # Errors
/// Spawn failure, timeout (the child is killed) or output collection
/// failure. A non-zero exit is not an error; inspect the output.
pub async fn run_command(
    spec: &CommandSpec,
    timeout: Duration,
) -> Result<ExecutionOutput, ProcessError> {
    tracing::debug!(command = %spec, timeout_secs = timeout.as_secs(), "running command");
    let child = spawn_captured(spec, Stdio::null())?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ProcessError::TimedOut {
            program: spec.program.clone(),
            secs: timeout.as_secs(),
        })?
        .map_err(|e| ProcessError::Io(e.to_string()))?;

    let output = collect(output);
    tracing::debug!(program = %spec.program, exit = %exit_label(output.exit_code), "command finished");
    Ok(output)
}

/// Run `producer | consumer`
///
/// # Errors
/// Spawn failure of either side, pipe setup failure, timeout (both
/// children are killed) or output collection failure.
pub async fn run_piped(
    producer: &CommandSpec,
    consumer: &CommandSpec,
    timeout: Duration,
) -> Result<PipedOutput, ProcessError> {
    tracing::debug!(producer = %producer, consumer = %consumer, "running pipeline");
    let mut first = spawn_captured(producer, Stdio::null())?;

    let pipe: Stdio = first
        .stdout
        .take()
        .ok_or_else(|| ProcessError::Pipe("producer stdout not captured".to_string()))?
        .try_into()
        .map_err(|e: std::io::Error| ProcessError::Pipe(e.to_string()))?;

    // the consumer's Command owns the pipe end; dropping it after spawn
    // leaves the child as the only reader
    let second = spawn_captured(consumer, pipe)?;

    let both = async { tokio::join!(first.wait_with_output(), second.wait_with_output()) };
    let (a, b) = tokio::time::timeout(timeout, both)
        .await
        .map_err(|_| ProcessError::TimedOut {
            program: format!("{} | {}", producer.program, consumer.program),
            secs: timeout.as_secs(),
        })?;

    let output = PipedOutput {
        producer: collect(a.map_err(|e| ProcessError::Io(e.to_string()))?),
        consumer: collect(b.map_err(|e| ProcessError::Io(e.to_string()))?),
    };
    tracing::debug!(
        producer_exit = %exit_label(output.producer.exit_code),
        consumer_exit = %exit_label(output.consumer.exit_code),
        "pipeline finished"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_redacts_secrets() {
        let spec = CommandSpec::new("mydumper")
            .args(["--user", "root"])
            .arg("--password")
            .secret_arg("hunter2")
            .env("TZ", "UTC")
            .secret_env("MYSQL_PWD", "hunter2");
        let shown = spec.to_string();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("MYSQL_PWD=***"));
        assert!(shown.contains("--password ***"));
        assert!(shown.contains("TZ=UTC"));
        assert_eq!(spec.raw_args().len(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let out = run_command(&spec, Duration::from_secs(10)).await.unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_child() {
        let spec = CommandSpec::new("sleep").arg("5");
        let err = run_command(&spec, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-7c1f");
        let err = run_command(&spec, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pipe_feeds_consumer_and_reports_both_codes() {
        let producer = CommandSpec::new("sh").args(["-c", "printf 'a\\nb\\nc\\n'; echo warn >&2"]);
        let consumer = CommandSpec::new("wc").arg("-l");
        let out = run_piped(&producer, &consumer, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.consumer.stdout.trim(), "3");
        assert_eq!(out.producer.stderr.trim(), "warn");
        assert!(out.producer.stdout.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pipe_failure_names_both_sides() {
        let producer = CommandSpec::new("sh").args(["-c", "echo denied >&2; exit 2"]);
        let consumer = CommandSpec::new("cat");
        let out = run_piped(&producer, &consumer, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!out.success());
        let summary = out.failure_summary();
        assert!(summary.contains("producer exit 2: denied"));
        assert!(summary.contains("consumer exit 0"));
    }
}
