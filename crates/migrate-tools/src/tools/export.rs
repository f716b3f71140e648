//! Export tools
//!
//! Both tools shell out; binaries come from [`ExportSettings`] so tests
//! and air-gapped hosts can substitute them.

use super::{ToolBackend, ToolHandler};
use crate::database::ConnectionConfig;
use crate::error::ToolError;
use crate::process::{exit_label, run_command, run_piped, CommandSpec};
use crate::schema::{ParamKind, ParamSpec, ToolSchema, ValidatedParams};
use migrate_kernel::protocol::Payload;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File a bulk export writes last; its presence marks completion
pub const COMPLETION_MARKER: &str = "metadata";

/// Export binaries, defaults and limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Object-store bucket for single-table exports
    pub bucket: Option<String>,
    /// Object prefix inside the bucket
    pub path: String,
    /// Local directory for bulk exports
    pub output_dir: PathBuf,
    /// Bulk export worker threads
    pub threads: u32,
    /// Bulk export chunk size in MB
    pub chunk_size_mb: u32,
    /// Logical dump binary
    pub dump_binary: String,
    /// Object-store upload binary (reads the dump from stdin)
    pub upload_binary: String,
    /// Parallel dump binary
    pub bulk_binary: String,
    /// SQL client binary
    pub client_binary: String,
    /// Budget for a single export
    pub timeout_secs: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            bucket: None,
            path: "exports".to_string(),
            output_dir: PathBuf::from("./mydumper_export"),
            threads: 4,
            chunk_size_mb: 64,
            dump_binary: "mysqldump".to_string(),
            upload_binary: "gsutil".to_string(),
            bulk_binary: "mydumper".to_string(),
            client_binary: "mysql".to_string(),
            timeout_secs: 7200,
        }
    }
}

impl ExportSettings {
    /// Export budget
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Object URL a table export lands at
#[must_use]
pub fn object_url(bucket: &str, path: &str, table: &str) -> String {
    let prefix = path.trim_matches('/');
    if prefix.is_empty() {
        format!("gs://{bucket}/{table}.sql")
    } else {
        format!("gs://{bucket}/{prefix}/{table}.sql")
    }
}

fn connection_args(connection: &ConnectionConfig) -> [String; 6] {
    [
        "--host".to_string(),
        connection.host.clone(),
        "--port".to_string(),
        connection.port.to_string(),
        "--user".to_string(),
        connection.user.clone(),
    ]
}

/// `export_to_object_store`: `dump db table | upload - gs://bucket/path/table.sql`
#[derive(Debug)]
pub struct ExportToObjectStore {
    schema: ToolSchema,
}

impl ExportToObjectStore {
    /// Create the tool
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new(
                "export_to_object_store",
                "Stream a logical dump of one table into object storage",
            )
            .param(ParamSpec::required("database", ParamKind::Identifier))
            .param(ParamSpec::required("table", ParamKind::Identifier))
            .param(ParamSpec::required("bucket", ParamKind::Identifier))
            .param(ParamSpec::required("path", ParamKind::Path)),
        }
    }
}

impl Default for ExportToObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolHandler for ExportToObjectStore {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(
        &self,
        params: &ValidatedParams,
        backend: &ToolBackend,
    ) -> Result<Payload, ToolError> {
        let database = params.text("database")?;
        let table = params.text("table")?;
        let url = object_url(params.text("bucket")?, params.text("path")?, table);
        let connection = backend.connection().await?;
        let settings = backend.export();

        let dump = CommandSpec::new(settings.dump_binary.as_str())
            .args(connection_args(connection))
            .args(["--single-transaction", database, table])
            .secret_env("MYSQL_PWD", connection.password.as_str());
        let upload = CommandSpec::new(settings.upload_binary.as_str()).args(["cp", "-", url.as_str()]);

        tracing::info!(database, table, destination = %url, "exporting table to object storage");
        let output = run_piped(&dump, &upload, settings.timeout()).await?;
        if output.success() {
            Ok(Payload::text(format!(
                "Export of {database}.{table} to {url} completed"
            )))
        } else {
            tracing::warn!(database, table, "object store export failed");
            Err(ToolError::failed(format!(
                "export of {database}.{table} to {url} failed ({})",
                output.failure_summary()
            )))
        }
    }
}

/// `bulk_export`: parallel dump into a local directory
///
/// Completion is judged by the [`COMPLETION_MARKER`] file, not the exit
/// code alone: a clean exit without the marker yields a "may have failed"
/// status text rather than an error.
#[derive(Debug)]
pub struct BulkExport {
    schema: ToolSchema,
}

impl BulkExport {
    /// Create the tool
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new(
                "bulk_export",
                "Parallel, compressed, consistent export of a database to a local directory",
            )
            .param(ParamSpec::required("database", ParamKind::Identifier))
            .param(ParamSpec::required("output_path", ParamKind::Path))
            .param(ParamSpec::optional("threads", ParamKind::Integer, 4_i64))
            .param(ParamSpec::optional("chunk_size_mb", ParamKind::Integer, 64_i64)),
        }
    }

    fn command(
        settings: &ExportSettings,
        connection: &ConnectionConfig,
        database: &str,
        output: &Path,
        threads: u64,
        chunk_size_mb: u64,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(settings.bulk_binary.as_str())
            .args(connection_args(connection));
        if !connection.password.is_empty() {
            spec = spec.arg("--password").secret_arg(connection.password.as_str());
        }
        spec.args([
            "--database".to_string(),
            database.to_string(),
            "--outputdir".to_string(),
            output.display().to_string(),
            "--threads".to_string(),
            threads.to_string(),
            "--chunk-filesize".to_string(),
            chunk_size_mb.to_string(),
            "--compress".to_string(),
            "--trx-consistency-only".to_string(),
        ])
    }
}

impl Default for BulkExport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolHandler for BulkExport {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(
        &self,
        params: &ValidatedParams,
        backend: &ToolBackend,
    ) -> Result<Payload, ToolError> {
        let database = params.text("database")?;
        let output = PathBuf::from(params.text("output_path")?);
        let threads = params.positive("threads")?;
        let chunk_size_mb = params.positive("chunk_size_mb")?;
        let connection = backend.connection().await?;
        let settings = backend.export();

        tokio::fs::create_dir_all(&output).await.map_err(|e| {
            ToolError::failed(format!("cannot create {}: {e}", output.display()))
        })?;

        let spec = Self::command(settings, connection, database, &output, threads, chunk_size_mb);
        tracing::info!(database, output = %output.display(), threads, chunk_size_mb, "starting bulk export");
        let result = run_command(&spec, settings.timeout()).await?;

        if !result.success() {
            return Err(ToolError::failed(format!(
                "bulk export of {database} exited {}: {}",
                exit_label(result.exit_code),
                result.stderr.trim()
            )));
        }

        let marker = output.join(COMPLETION_MARKER);
        if tokio::fs::try_exists(&marker).await.unwrap_or(false) {
            Ok(Payload::text(format!(
                "Bulk export of {database} completed successfully to {}",
                output.display()
            )))
        } else {
            tracing::warn!(database, marker = %marker.display(), "completion marker missing after bulk export");
            Ok(Payload::text(format!(
                "Bulk export of {database} to {} may have failed: completion marker '{COMPLETION_MARKER}' not found",
                output.display()
            )))
        }
    }
}
