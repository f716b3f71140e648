//! Read-only inspection tools

use super::{ToolBackend, ToolHandler};
use crate::error::ToolError;
use crate::identifier::check_identifier;
use crate::schema::{ParamKind, ParamSpec, ToolSchema, ValidatedParams};
use migrate_kernel::protocol::{Payload, Row, Scalar};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Statements issued by the inspection tools
///
/// Table names must already have passed the identifier allow-list.
pub mod sql {
    /// Server version
    #[must_use]
    pub fn version() -> String {
        "SELECT VERSION() AS version".to_string()
    }

    /// Tables of the current database
    #[must_use]
    pub fn show_tables() -> String {
        "SHOW TABLES".to_string()
    }

    /// Total data plus index bytes of a schema
    #[must_use]
    pub fn schema_size(database: &str) -> String {
        format!(
            "SELECT COALESCE(SUM(data_length + index_length), 0) AS size_bytes \
             FROM information_schema.tables WHERE table_schema = '{database}'"
        )
    }

    /// Column descriptors
    #[must_use]
    pub fn describe(table: &str) -> String {
        format!("DESCRIBE `{table}`")
    }

    /// Row count
    #[must_use]
    pub fn row_count(table: &str) -> String {
        format!("SELECT COUNT(*) AS row_count FROM `{table}`")
    }

    /// Table checksum
    #[must_use]
    pub fn checksum(table: &str) -> String {
        format!("CHECKSUM TABLE `{table}`")
    }
}

fn first_cell(rows: &[Row]) -> Option<&Scalar> {
    rows.first().and_then(|r| r.values().next())
}

fn table_param() -> ToolSchema {
    ToolSchema::new("", "").param(ParamSpec::required("table_name", ParamKind::Identifier))
}

/// `db_metadata`: name, unrounded size, tables and server version
#[derive(Debug)]
pub struct DbMetadata {
    schema: ToolSchema,
}

impl DbMetadata {
    /// Create the tool
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new(
                "db_metadata",
                "Database name, size in GB, table list and server version",
            ),
        }
    }
}

impl Default for DbMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolHandler for DbMetadata {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(
        &self,
        _params: &ValidatedParams,
        backend: &ToolBackend,
    ) -> Result<Payload, ToolError> {
        let database = backend.connection().await?.database.clone();
        check_identifier("database", &database)?;

        let version = backend
            .query(&sql::version())
            .await?
            .first()
            .and_then(|r| r.values().next())
            .map_or_else(|| "unknown".to_string(), ToString::to_string);

        let tables: Vec<String> = backend
            .query(&sql::show_tables())
            .await?
            .iter()
            .filter_map(|r| r.values().next().map(ToString::to_string))
            .collect();

        let size_rows = backend.query(&sql::schema_size(&database)).await?;
        let size_bytes = first_cell(&size_rows).and_then(Scalar::as_f64).unwrap_or(0.0);
        let size_gb = size_bytes / BYTES_PER_GB;

        tracing::info!(database = %database, size_gb, tables = tables.len(), "collected database metadata");

        let mut row = Row::new();
        row.insert("name".into(), Scalar::Text(database));
        row.insert("size_gb".into(), Scalar::Float(size_gb));
        row.insert(
            "table_count".into(),
            Scalar::Int(i64::try_from(tables.len()).unwrap_or(i64::MAX)),
        );
        row.insert(
            "tables".into(),
            Scalar::List(tables.into_iter().map(Scalar::Text).collect()),
        );
        row.insert("version".into(), Scalar::Text(version));
        Ok(Payload::Map(row))
    }
}

/// `table_schema`: column descriptors of one table
#[derive(Debug)]
pub struct TableSchema {
    schema: ToolSchema,
}

impl TableSchema {
    /// Create the tool
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: ToolSchema {
                name: "table_schema",
                description: "Column descriptors (field, type, null, key, default, extra)",
                ..table_param()
            },
        }
    }
}

impl Default for TableSchema {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolHandler for TableSchema {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(
        &self,
        params: &ValidatedParams,
        backend: &ToolBackend,
    ) -> Result<Payload, ToolError> {
        let table = params.text("table_name")?;
        let rows = backend.query(&sql::describe(table)).await?;
        if rows.is_empty() {
            return Err(ToolError::failed(format!("no columns found for {table}")));
        }
        Ok(Payload::Rows(rows))
    }
}

/// `table_row_count`: exact row count of one table
#[derive(Debug)]
pub struct TableRowCount {
    schema: ToolSchema,
}

impl TableRowCount {
    /// Create the tool
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: ToolSchema {
                name: "table_row_count",
                description: "Exact number of rows in a table",
                ..table_param()
            },
        }
    }
}

impl Default for TableRowCount {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolHandler for TableRowCount {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(
        &self,
        params: &ValidatedParams,
        backend: &ToolBackend,
    ) -> Result<Payload, ToolError> {
        let table = params.text("table_name")?;
        let rows = backend.query(&sql::row_count(table)).await?;
        first_cell(&rows)
            .and_then(Scalar::as_i64)
            .map(Payload::int)
            .ok_or_else(|| ToolError::failed(format!("row count unavailable for {table}")))
    }
}

/// `checksum`: server-side table checksum
#[derive(Debug)]
pub struct Checksum {
    schema: ToolSchema,
}

impl Checksum {
    /// Create the tool
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: ToolSchema {
                name: "checksum",
                description: "Server-computed checksum of a table's contents",
                ..table_param()
            },
        }
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolHandler for Checksum {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(
        &self,
        params: &ValidatedParams,
        backend: &ToolBackend,
    ) -> Result<Payload, ToolError> {
        let table = params.text("table_name")?;
        let rows = backend.query(&sql::checksum(table)).await?;
        // CHECKSUM TABLE returns (Table, Checksum); NULL for a missing table
        rows.first()
            .and_then(|r| r.get("Checksum").or_else(|| r.values().nth(1)))
            .and_then(Scalar::as_i64)
            .map(Payload::int)
            .ok_or_else(|| ToolError::failed(format!("checksum unavailable for {table}")))
    }
}
