//! Built-in tools and the backend they share
//!
//! - [`inspect`]: metadata, schema, row count and checksum queries
//! - [`export`]: piped dump to object storage, parallel bulk export
//! - [`binlog`]: replication log position from export metadata

pub mod binlog;
pub mod export;
pub mod inspect;

use crate::database::{ConnectionConfig, SecretProvider, SourceDatabase};
use crate::error::ToolError;
use crate::schema::{ToolSchema, ValidatedParams};
use export::ExportSettings;
use migrate_kernel::protocol::{Payload, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// A registered tool
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name, description and parameters
    fn schema(&self) -> &ToolSchema;

    /// Run with parameters that already passed validation
    ///
    /// # Errors
    /// Any [`ToolError`]; the server folds it into the envelope.
    async fn call(
        &self,
        params: &ValidatedParams,
        backend: &ToolBackend,
    ) -> Result<Payload, ToolError>;
}

/// Collaborators shared by all tools of one server
///
/// The connection configuration is resolved on first use and cached for
/// the lifetime of the server.
pub struct ToolBackend {
    database: Arc<dyn SourceDatabase>,
    secrets: Arc<dyn SecretProvider>,
    connection: OnceCell<ConnectionConfig>,
    export: ExportSettings,
}

impl ToolBackend {
    /// Backend over a database and a secret provider
    pub fn new(
        database: Arc<dyn SourceDatabase>,
        secrets: Arc<dyn SecretProvider>,
        export: ExportSettings,
    ) -> Self {
        Self {
            database,
            secrets,
            connection: OnceCell::new(),
            export,
        }
    }

    /// Cached connection configuration
    ///
    /// # Errors
    /// [`ToolError::Connection`] when the provider fails; a failure is not
    /// cached, the next call retries.
    pub async fn connection(&self) -> Result<&ConnectionConfig, ToolError> {
        self.connection
            .get_or_try_init(|| async {
                let cfg = self.secrets.connection()?;
                tracing::info!(endpoint = %cfg.endpoint(), "resolved connection configuration");
                Ok::<_, ToolError>(cfg)
            })
            .await
    }

    /// Run one statement against the configured database
    ///
    /// # Errors
    /// Connection or database failure.
    pub async fn query(&self, sql: &str) -> Result<Vec<Row>, ToolError> {
        let connection = self.connection().await?;
        Ok(self.database.query(connection, sql).await?)
    }

    /// Export binaries and limits
    #[inline]
    #[must_use]
    pub fn export(&self) -> &ExportSettings {
        &self.export
    }
}

impl std::fmt::Debug for ToolBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBackend")
            .field("connection", &self.connection.get())
            .field("export", &self.export)
            .finish()
    }
}

/// All built-in tools, in registration order
#[must_use]
pub fn builtin() -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(inspect::DbMetadata::new()),
        Arc::new(inspect::TableSchema::new()),
        Arc::new(inspect::TableRowCount::new()),
        Arc::new(inspect::Checksum::new()),
        Arc::new(export::ExportToObjectStore::new()),
        Arc::new(export::BulkExport::new()),
        Arc::new(binlog::ParseLogPosition::new()),
    ]
}
