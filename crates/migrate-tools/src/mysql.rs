//! `mysql` command-line client backend
//!
//! Runs each statement in batch mode and parses the tab-separated output.
//! The password travels in `MYSQL_PWD`, never on the command line.

use crate::database::{ConnectionConfig, SourceDatabase};
use crate::error::DatabaseError;
use crate::process::{exit_label, run_command, CommandSpec};
use migrate_kernel::protocol::{Row, Scalar};
use std::time::Duration;

/// Backend driving the `mysql` client binary
#[derive(Debug, Clone)]
pub struct MysqlCliDatabase {
    binary: String,
    timeout: Duration,
}

impl MysqlCliDatabase {
    /// Backend using `binary` with a per-statement timeout
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn command(&self, connection: &ConnectionConfig, sql: &str) -> CommandSpec {
        CommandSpec::new(self.binary.as_str())
            .args([
                "--host",
                connection.host.as_str(),
                "--port",
                connection.port.to_string().as_str(),
                "--user",
                connection.user.as_str(),
                "--database",
                connection.database.as_str(),
                "--batch",
                "--execute",
                sql,
            ])
            .secret_env("MYSQL_PWD", connection.password.as_str())
    }
}

impl Default for MysqlCliDatabase {
    fn default() -> Self {
        Self::new("mysql", Duration::from_secs(300))
    }
}

#[async_trait::async_trait]
impl SourceDatabase for MysqlCliDatabase {
    async fn query(
        &self,
        connection: &ConnectionConfig,
        sql: &str,
    ) -> Result<Vec<Row>, DatabaseError> {
        tracing::debug!(endpoint = %connection.endpoint(), sql, "mysql query");
        let output = run_command(&self.command(connection, sql), self.timeout).await?;
        if !output.success() {
            return Err(DatabaseError::Query(format!(
                "exit {}: {}",
                exit_label(output.exit_code),
                output.stderr.trim()
            )));
        }
        parse_batch_output(&output.stdout)
    }
}

/// Parse `mysql --batch` output: a header line, then one line per row
///
/// # Errors
/// [`DatabaseError::Parse`] when a row has a different column count than
/// the header.
pub fn parse_batch_output(text: &str) -> Result<Vec<Row>, DatabaseError> {
    let mut lines = text.lines().filter(|l| !l.is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<&str> = header.split('\t').collect();

    lines
        .enumerate()
        .map(|(n, line)| {
            let cells: Vec<&str> = line.split('\t').collect();
            if cells.len() != columns.len() {
                return Err(DatabaseError::Parse(format!(
                    "row {} has {} cells, expected {}",
                    n + 1,
                    cells.len(),
                    columns.len()
                )));
            }
            Ok(columns
                .iter()
                .zip(cells)
                .map(|(c, v)| ((*c).to_string(), parse_cell(v)))
                .collect())
        })
        .collect()
}

fn parse_cell(raw: &str) -> Scalar {
    if raw == "NULL" {
        return Scalar::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Scalar::Int(i);
    }
    if raw.contains('.') {
        if let Ok(f) = raw.parse::<f64>() {
            return Scalar::Float(f);
        }
    }
    Scalar::Text(unescape(raw))
}

fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
