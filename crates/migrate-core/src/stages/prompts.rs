//! Stage names, model instructions and the seed message

use crate::report::EncryptionPreference;

/// Stage names in pipeline order
pub mod names {
    /// Environment readiness
    pub const ENVIRONMENT_SETUP: &str = "environment_setup";
    /// Schema review
    pub const SCHEMA_CONVERSION: &str = "schema_conversion";
    /// Data movement
    pub const DATA_MIGRATION: &str = "data_migration";
    /// Source/target comparison
    pub const DATA_VALIDATION: &str = "data_validation";
    /// Log review
    pub const ANOMALY_DETECTION: &str = "anomaly_detection";
    /// Post-migration advice
    pub const PERFORMANCE_OPTIMIZATION: &str = "performance_optimization";

    /// All six, in order
    pub const ALL: [&str; 6] = [
        ENVIRONMENT_SETUP,
        SCHEMA_CONVERSION,
        DATA_MIGRATION,
        DATA_VALIDATION,
        ANOMALY_DETECTION,
        PERFORMANCE_OPTIMIZATION,
    ];
}

/// Schema review instructions
#[must_use]
pub fn schema_conversion(sentinel: &str) -> String {
    format!(
        "You are a meticulous database schema analyst. Use the db_metadata tool to list all \
         tables, then call table_schema for each one.\n\
         Analyze the collected schemas for incompatibilities with the target Cloud SQL for \
         MySQL version: deprecated storage engines such as MyISAM, unsupported collations, \
         legacy character sets.\n\
         Produce a report of your findings with recommended DDL modifications. You are not \
         authorized to make any changes.\n\
         End your final answer with {sentinel}."
    )
}

/// Log review instructions
#[must_use]
pub fn anomaly_detection(sentinel: &str) -> String {
    format!(
        "You are a security and performance anomaly detector. The conversation so far is the \
         complete execution log of the migration.\n\
         Look for excessive connection errors, unusually long operations, repeated failed \
         dumps of a table, and security warnings. Report each anomaly with the log excerpt \
         that shows it.\n\
         End your report with {sentinel}."
    )
}

/// Post-migration advice instructions
#[must_use]
pub fn performance_optimization(sentinel: &str) -> String {
    format!(
        "You are a cost and performance optimization expert for Cloud SQL. Based on the \
         migration report and logs, give actionable recommendations for the production \
         environment: machine type sizing, SSD versus HDD storage, an automated backup \
         schedule, and a high-availability configuration.\n\
         You may run gcloud commands to inspect the current configuration.\n\
         End your recommendations with {sentinel}."
    )
}

/// Seed message for a run
#[must_use]
pub fn initial_task(task: &str, encryption: EncryptionPreference) -> String {
    format!(
        "Start the MySQL migration process.\nTask: {task}\nEncryption Preference: {encryption}\n\
         Follow the defined workflow precisely."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_end_with_sentinel() {
        for text in [
            schema_conversion("TERMINATE"),
            anomaly_detection("TERMINATE"),
            performance_optimization("TERMINATE"),
        ] {
            assert!(text.trim_end().ends_with("TERMINATE."));
        }
    }

    #[test]
    fn seed_names_preference() {
        let seed = initial_task("move employees", EncryptionPreference::Legacy);
        assert!(seed.starts_with("Start the MySQL migration process."));
        assert!(seed.contains("Task: move employees"));
        assert!(seed.contains("Encryption Preference: legacy"));
    }
}
