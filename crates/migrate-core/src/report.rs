//! Run report: what happened, where it stopped, what was validated

use crate::strategy::MigrationStrategy;
use crate::validation::{ValidationReport, ValidationSummary};
use migrate_kernel::engine::RunOutcome;
use migrate_kernel::termination::TerminationReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Note added to reports when the legacy encryption preference is set
pub const CMEK_NOTE: &str =
    "Note: configure Customer-Managed Encryption Keys (CMEK) on the target Cloud SQL instance.";

/// Encryption preference given at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionPreference {
    /// Provider-managed keys
    #[default]
    #[serde(rename = "gcp-default", alias = "default")]
    Default,
    /// Legacy setup; the target needs customer-managed keys
    Legacy,
}

impl std::fmt::Display for EncryptionPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Default => "gcp-default",
            Self::Legacy => "legacy",
        })
    }
}

impl FromStr for EncryptionPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" | "gcp-default" => Ok(Self::Default),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!(
                "unknown encryption method '{other}' (expected default, gcp-default or legacy)"
            )),
        }
    }
}

/// Everything a caller needs after a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Engine outcome, including the full history
    pub outcome: RunOutcome,
    /// Encryption preference of the run
    pub encryption: EncryptionPreference,
    /// Strategy locked by the migration stage
    pub strategy: Option<MigrationStrategy>,
    /// Validation records, when the validation stage ran
    pub validation: Option<ValidationReport>,
}

impl RunReport {
    /// Assemble a report
    #[must_use]
    pub fn new(
        outcome: RunOutcome,
        encryption: EncryptionPreference,
        strategy: Option<MigrationStrategy>,
        validation: Option<ValidationReport>,
    ) -> Self {
        Self {
            outcome,
            encryption,
            strategy,
            validation,
        }
    }

    /// Natural termination
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Process exit code: 0 on natural termination, 1 otherwise
    #[inline]
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    /// Validation aggregate
    #[must_use]
    pub fn validation_summary(&self) -> Option<ValidationSummary> {
        self.validation.as_ref().map(ValidationReport::summary)
    }

    /// CMEK note when the preference calls for one
    #[must_use]
    pub fn cmek_note(&self) -> Option<&'static str> {
        (self.encryption == EncryptionPreference::Legacy).then_some(CMEK_NOTE)
    }

    /// Pretty JSON
    ///
    /// # Errors
    /// Serialization failure.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text rendering
    ///
    /// Halts include the history so the failing step can be read in
    /// context.
    #[must_use]
    pub fn render_text(&self) -> String {
        self.to_string()
    }

    /// Write the human-readable report
    ///
    /// # Errors
    /// Whatever the writer returns.
    pub fn write_report(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let o = &self.outcome;
        writeln!(out, "Run {}", o.state.run_id())?;
        writeln!(
            out,
            "Termination: {} after {} messages",
            o.reason(),
            o.termination.message_count
        )?;
        writeln!(out, "Completed stages: {}", join_or_none(&o.completed))?;
        if !o.skipped.is_empty() {
            writeln!(out, "Skipped stages: {}", o.skipped.join(", "))?;
        }
        if let Some(stage) = &o.halted_at {
            writeln!(out, "Halted at: {stage}")?;
        }
        if let Some(strategy) = self.strategy {
            writeln!(out, "Strategy: {strategy} ({})", strategy.label())?;
        }
        if let Some(report) = &self.validation {
            writeln!(out, "\nValidation:\n{}", report.render().trim_end())?;
        }
        if let Some(note) = self.cmek_note() {
            writeln!(out, "\n{note}")?;
        }
        if let Some(failure) = &o.failure {
            writeln!(out, "\nStage {} failed: {}", failure.stage, failure.error)?;
        }
        if o.reason() == TerminationReason::StageFailure || o.reason() == TerminationReason::Cancelled {
            writeln!(out, "\nHistory:\n{}", o.state.transcript())?;
        } else if let Some(last) = o.completed.last() {
            if let Some(msg) = o.state.by_author(last).last() {
                writeln!(out, "\nFinal message ({last}):\n{}", msg.content)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_report(f)
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}
