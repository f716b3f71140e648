//! Replication log position from a bulk export's metadata file

use super::{ToolBackend, ToolHandler};
use crate::error::ToolError;
use crate::schema::{ParamKind, ParamSpec, ToolSchema, ValidatedParams};
use migrate_kernel::protocol::{Payload, Row, Scalar};

/// Binary log coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPosition {
    /// Log file name
    pub file: String,
    /// Offset within the file
    pub position: u64,
}

/// Extract the first `Log:` and first `Pos:` lines
///
/// Returns `None` unless both are present and the position is numeric.
#[must_use]
pub fn parse_log_position(text: &str) -> Option<LogPosition> {
    let field = |key: &str| {
        text.lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix(key))
            .map(str::trim)
    };
    let file = field("Log:").filter(|f| !f.is_empty())?;
    let position = field("Pos:")?.parse().ok()?;
    Some(LogPosition {
        file: file.to_string(),
        position,
    })
}

/// `parse_log_position`: read `{log_file, log_position}` from a metadata file
#[derive(Debug)]
pub struct ParseLogPosition {
    schema: ToolSchema,
}

impl ParseLogPosition {
    /// Create the tool
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new(
                "parse_log_position",
                "Binary log file and position recorded by a bulk export",
            )
            .param(ParamSpec::required("metadata_file_path", ParamKind::Path)),
        }
    }
}

impl Default for ParseLogPosition {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolHandler for ParseLogPosition {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(
        &self,
        params: &ValidatedParams,
        _backend: &ToolBackend,
    ) -> Result<Payload, ToolError> {
        let path = params.text("metadata_file_path")?;
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::failed(format!("cannot read {path}: {e}")))?;

        let pos = parse_log_position(&text)
            .ok_or_else(|| ToolError::failed(format!("no log position found in {path}")))?;
        tracing::info!(file = %pos.file, position = pos.position, "parsed log position");

        let mut row = Row::new();
        row.insert("log_file".into(), Scalar::Text(pos.file));
        row.insert(
            "log_position".into(),
            Scalar::Int(i64::try_from(pos.position).unwrap_or(i64::MAX)),
        );
        Ok(Payload::Map(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = "Started dump at: 2024-03-01 10:00:00\n\
                            SHOW MASTER STATUS:\n\
                            \tLog: mysql-bin.000042\n\
                            \tPos: 157\n\
                            \tGTID:\n\
                            \n\
                            SHOW SLAVE STATUS:\n\
                            \tLog: relay-bin.000003\n\
                            \tPos: 9999\n\
                            Finished dump at: 2024-03-01 10:05:00\n";

    #[test]
    fn first_match_wins() {
        assert_eq!(
            parse_log_position(METADATA),
            Some(LogPosition {
                file: "mysql-bin.000042".into(),
                position: 157,
            })
        );
    }

    #[test]
    fn incomplete_coordinates_are_none() {
        assert_eq!(parse_log_position("Log: mysql-bin.000001\n"), None);
        assert_eq!(parse_log_position("Pos: 4\n"), None);
        assert_eq!(parse_log_position("Log: x\nPos: abc\n"), None);
        assert_eq!(parse_log_position("Log:\nPos: 4\n"), None);
    }
}
