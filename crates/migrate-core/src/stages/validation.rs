//! Source/target validation stage
//!
//! Row counts and checksums come from the stage's own tool access
//! (source) and from a second tool server bound to the target database.

use crate::validation::{ValidationReport, ValidationSummary, Validator};
use super::metadata_tables;
use async_trait::async_trait;
use migrate_kernel::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

const CAPABILITIES: [Capability; 1] = [Capability::ToolAccess];

/// Where the validation stage leaves its report
#[derive(Debug, Clone, Default)]
pub struct ReportSlot(Arc<Mutex<Option<ValidationReport>>>);

impl ReportSlot {
    /// Empty slot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current report, if the stage ran
    #[must_use]
    pub fn get(&self) -> Option<ValidationReport> {
        self.0.lock().clone()
    }

    fn set(&self, report: ValidationReport) {
        *self.0.lock() = Some(report);
    }
}

/// Compares every source table against the target
pub struct DataValidationStage {
    name: String,
    target: Arc<dyn ToolDispatcher>,
    slot: ReportSlot,
    sentinel: String,
}

impl DataValidationStage {
    /// Stage reading the target through `target`
    pub fn new(name: impl Into<String>, target: Arc<dyn ToolDispatcher>, slot: ReportSlot) -> Self {
        Self {
            name: name.into(),
            target,
            slot,
            sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }

    /// Token closing the report
    #[must_use]
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = sentinel.into();
        self
    }

    async fn measure_target(&self, tool: &str, table: &str, records: &mut Vec<ToolRecord>) -> Option<u64> {
        let call = ToolCall::new(tool).with_param("table_name", table);
        let result = self.target.dispatch(&call).await;
        let value = measured(&result);
        records.push(ToolRecord { call, result });
        value
    }
}

impl std::fmt::Debug for DataValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataValidationStage")
            .field("name", &self.name)
            .field("sentinel", &self.sentinel)
            .finish_non_exhaustive()
    }
}

fn measured(result: &ToolResult) -> Option<u64> {
    result
        .payload()
        .and_then(Payload::as_i64)
        .and_then(|v| u64::try_from(v).ok())
}

async fn measure_source(
    ctx: &StageContext<'_>,
    tool: &str,
    table: &str,
    records: &mut Vec<ToolRecord>,
) -> Result<Option<u64>, StageFailure> {
    let record = ctx
        .call_tool(ToolCall::new(tool).with_param("table_name", table))
        .await?;
    let value = measured(&record.result);
    records.push(record);
    Ok(value)
}

fn summary_line(summary: &ValidationSummary) -> String {
    if summary.is_clean() {
        format!("All {} tables VALIDATED.", summary.validated_count)
    } else {
        format!(
            "{} of {} tables MISMATCH: {}.",
            summary.mismatched_count,
            summary.validated_count,
            summary.mismatched_tables.join(", ")
        )
    }
}

#[async_trait]
impl Stage for DataValidationStage {
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
        let meta = ctx.call_tool(ToolCall::new("db_metadata")).await?;
        let tables: Vec<String> = match &meta.result {
            ToolResult::Ok { payload } => payload.as_map().map(metadata_tables).unwrap_or_default(),
            ToolResult::Error { message } => {
                return Err(StageFailure::fatal(format!("db_metadata failed: {message}")))
            }
        };
        let mut records = vec![meta];

        let mut report = ValidationReport::new();
        for table in &tables {
            let src_rows = measure_source(ctx, "table_row_count", table, &mut records).await?;
            let tgt_rows = self.measure_target("table_row_count", table, &mut records).await;
            let src_sum = measure_source(ctx, "checksum", table, &mut records).await?;
            let tgt_sum = self.measure_target("checksum", table, &mut records).await;
            report.push(Validator::compare(table, src_rows, tgt_rows, src_sum, tgt_sum));
        }

        let summary = report.summary();
        tracing::info!(
            stage = %self.name,
            tables = summary.validated_count,
            mismatched = summary.mismatched_count,
            "validation finished"
        );

        let text = if tables.is_empty() {
            format!("No tables found to validate. {}", self.sentinel)
        } else {
            format!(
                "{}\n{}\n{}",
                report.render().trim_end(),
                summary_line(&summary),
                self.sentinel
            )
        };
        self.slot.set(report);
        Ok(vec![Reply::text(text).with_tool_records(records)])
    }
}
