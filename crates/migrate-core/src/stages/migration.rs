//! Data movement: assess, decide, lock, execute
//!
//! 1. `db_metadata` gives the database size and table list
//! 2. the selector maps the size to a strategy, which is locked for the run
//! 3. the strategy's export tools run; any export failure halts the stage

use crate::report::{EncryptionPreference, CMEK_NOTE};
use crate::strategy::{MigrationStrategy, StrategyLock, StrategySelector};
use super::{metadata_size_gb, metadata_tables};
use async_trait::async_trait;
use migrate_kernel::prelude::*;
use migrate_tools::tools::export::{ExportSettings, COMPLETION_MARKER};
use std::sync::Arc;

const CAPABILITIES: [Capability; 1] = [Capability::ToolAccess];

/// Deterministic migration conductor
#[derive(Debug)]
pub struct DataMigrationStage {
    name: String,
    selector: StrategySelector,
    lock: Arc<StrategyLock>,
    export: ExportSettings,
    encryption: EncryptionPreference,
    sentinel: String,
}

impl DataMigrationStage {
    /// Stage writing its decision into `lock`
    pub fn new(
        name: impl Into<String>,
        selector: StrategySelector,
        lock: Arc<StrategyLock>,
        export: ExportSettings,
    ) -> Self {
        Self {
            name: name.into(),
            selector,
            lock,
            export,
            encryption: EncryptionPreference::default(),
            sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }

    /// Encryption preference of the run
    #[must_use]
    pub fn with_encryption(mut self, encryption: EncryptionPreference) -> Self {
        self.encryption = encryption;
        self
    }

    /// Token closing the report
    #[must_use]
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = sentinel.into();
        self
    }

    async fn gcs_import(
        &self,
        ctx: &StageContext<'_>,
        database: &str,
        tables: &[String],
        records: &mut Vec<ToolRecord>,
    ) -> Result<Vec<String>, StageFailure> {
        let bucket = self.export.bucket.as_deref().ok_or_else(|| {
            StageFailure::check_failed("GCS import needs export.bucket to be configured")
        })?;
        let mut lines = Vec::with_capacity(tables.len());
        for table in tables {
            let call = ToolCall::new("export_to_object_store")
                .with_param("database", database)
                .with_param("table", table.as_str())
                .with_param("bucket", bucket)
                .with_param("path", self.export.path.as_str());
            let text = expect_text(ctx.call_tool(call).await?, records)?;
            lines.push(text);
        }
        lines.push(format!(
            "Import the dumped files with `gcloud sql import sql` from gs://{bucket}/{}.",
            self.export.path.trim_matches('/')
        ));
        Ok(lines)
    }

    async fn bulk_export(
        &self,
        ctx: &StageContext<'_>,
        database: &str,
        records: &mut Vec<ToolRecord>,
    ) -> Result<Vec<String>, StageFailure> {
        let output = self.export.output_dir.display().to_string();
        let call = ToolCall::new("bulk_export")
            .with_param("database", database)
            .with_param("output_path", output.as_str())
            .with_param("threads", i64::from(self.export.threads))
            .with_param("chunk_size_mb", i64::from(self.export.chunk_size_mb));
        let text = expect_text(ctx.call_tool(call).await?, records)?;
        if text.contains("may have failed") {
            return Err(StageFailure::check_failed(text));
        }
        let mut lines = vec![text];

        let marker = self.export.output_dir.join(COMPLETION_MARKER);
        let call = ToolCall::new("parse_log_position")
            .with_param("metadata_file_path", marker.display().to_string());
        let record = ctx.call_tool(call).await?;
        match &record.result {
            ToolResult::Ok { payload } => {
                let pos = payload.as_map();
                let get = |k: &str| {
                    pos.and_then(|m| m.get(k))
                        .map_or_else(|| "?".to_string(), ToString::to_string)
                };
                lines.push(format!(
                    "Replication starts at {}:{}. Load the dump with myloader, then start replication from that position.",
                    get("log_file"),
                    get("log_position")
                ));
            }
            ToolResult::Error { message } => {
                tracing::warn!(stage = %self.name, %message, "log position unavailable");
                lines.push(format!("Log position unavailable: {message}"));
            }
        }
        records.push(record);
        Ok(lines)
    }
}

fn expect_text(record: ToolRecord, records: &mut Vec<ToolRecord>) -> Result<String, StageFailure> {
    let outcome = match &record.result {
        ToolResult::Ok { payload } => Ok(payload
            .as_str()
            .map_or_else(|| format!("{payload:?}"), ToString::to_string)),
        ToolResult::Error { message } => Err(StageFailure::fatal(format!(
            "{} failed: {message}",
            record.call.tool
        ))),
    };
    records.push(record);
    outcome
}

#[async_trait]
impl Stage for DataMigrationStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &CAPABILITIES
    }

    async fn run(
        &self,
        _state: &SharedState,
        ctx: &StageContext<'_>,
    ) -> Result<Vec<Reply>, StageFailure> {
        let mut records = Vec::new();

        let meta_record = ctx.call_tool(ToolCall::new("db_metadata")).await?;
        let meta = match &meta_record.result {
            ToolResult::Ok { payload } => payload.as_map().cloned().unwrap_or_default(),
            ToolResult::Error { message } => {
                return Err(StageFailure::fatal(format!("db_metadata failed: {message}")))
            }
        };
        records.push(meta_record);

        let database = meta
            .get("name")
            .and_then(Scalar::as_str)
            .ok_or_else(|| StageFailure::fatal("db_metadata returned no database name"))?
            .to_string();
        let size_gb = metadata_size_gb(&meta).unwrap_or(f64::NAN);
        let tables = metadata_tables(&meta);

        let strategy = self
            .lock
            .lock(self.selector.choose(size_gb))
            .map_err(|e| StageFailure::fatal(e.to_string()))?;
        tracing::info!(stage = %self.name, database = %database, size_gb, %strategy, "executing migration strategy");

        let mut lines = vec![format!(
            "Database {database} is {size_gb:.2} GB across {} tables; selected strategy {strategy} ({}).",
            tables.len(),
            strategy.label()
        )];
        let executed = match strategy {
            MigrationStrategy::GcsImport => {
                self.gcs_import(ctx, &database, &tables, &mut records).await?
            }
            MigrationStrategy::GcpDms => vec![format!(
                "Create a Database Migration Service job for {database} targeting the Cloud SQL instance."
            )],
            MigrationStrategy::MydumperMyloader => {
                self.bulk_export(ctx, &database, &mut records).await?
            }
        };
        lines.extend(executed);

        if self.encryption == EncryptionPreference::Legacy {
            lines.push(CMEK_NOTE.to_string());
        }
        lines.push(format!("Migration step complete. {}", self.sentinel));
        Ok(vec![Reply::text(lines.join("\n")).with_tool_records(records)])
    }
}
