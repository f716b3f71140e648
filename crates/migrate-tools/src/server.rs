//! Tool server
//!
//! Dispatch order for every call:
//! 1. unknown tool → `unknown tool`
//! 2. missing or ill-typed parameter → `invalid parameters`
//! 3. identifier failing the allow-list → `invalid identifier`
//! 4. handler → payload, or its error text
//!
//! Steps 1-3 never touch the backend. Nothing escapes as a Rust error or a
//! panic; every outcome is a [`ToolResult`].

use crate::database::{SecretProvider, SourceDatabase};
use crate::error::ToolError;
use crate::tools::export::ExportSettings;
use crate::tools::{builtin, ToolBackend, ToolHandler};
use futures::FutureExt;
use indexmap::IndexMap;
use migrate_kernel::protocol::{ToolCall, ToolDescription, ToolDispatcher, ToolResult};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Registry of tools over one database backend
pub struct ToolServer {
    tools: IndexMap<String, Arc<dyn ToolHandler>>,
    backend: ToolBackend,
}

impl ToolServer {
    /// Start a builder
    pub fn builder(
        database: Arc<dyn SourceDatabase>,
        secrets: Arc<dyn SecretProvider>,
    ) -> ToolServerBuilder {
        ToolServerBuilder {
            database,
            secrets,
            export: ExportSettings::default(),
            builtins: true,
            extra: Vec::new(),
        }
    }

    /// Server with all built-in tools and default export settings
    pub fn with_builtin_tools(
        database: Arc<dyn SourceDatabase>,
        secrets: Arc<dyn SecretProvider>,
    ) -> Self {
        Self::builder(database, secrets).build()
    }

    /// Registered tool names, in registration order
    pub fn tool_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.tools.keys().map(String::as_str)
    }

    /// Number of registered tools
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Shared backend
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &ToolBackend {
        &self.backend
    }

    /// Dispatch one call
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        match self.try_dispatch(call).await {
            Ok(payload) => {
                tracing::debug!(tool = %call.tool, "tool call succeeded");
                ToolResult::ok(payload)
            }
            Err(err) => {
                match &err {
                    ToolError::UnknownTool(_)
                    | ToolError::InvalidParameters(_)
                    | ToolError::InvalidIdentifier(_) => {
                        tracing::warn!(tool = %call.tool, reason = %err.detail(), "tool call rejected");
                    }
                    _ => tracing::error!(tool = %call.tool, error = %err, "tool call failed"),
                }
                ToolResult::error(err.to_string())
            }
        }
    }

    async fn try_dispatch(
        &self,
        call: &ToolCall,
    ) -> Result<migrate_kernel::protocol::Payload, ToolError> {
        let handler = self
            .tools
            .get(&call.tool)
            .ok_or_else(|| ToolError::UnknownTool(call.tool.clone()))?;
        let params = handler.schema().validate(&call.params)?;

        tracing::info!(tool = %call.tool, params = params.len(), "dispatching tool");
        AssertUnwindSafe(handler.call(&params, &self.backend))
            .catch_unwind()
            .await
            .map_err(|panic| {
                let text = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                ToolError::Panicked(text)
            })?
    }
}

#[async_trait::async_trait]
impl ToolDispatcher for ToolServer {
    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        ToolServer::dispatch(self, call).await
    }

    fn describe(&self) -> Vec<ToolDescription> {
        self.tools.values().map(|t| t.schema().describe()).collect()
    }
}

impl std::fmt::Debug for ToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServer")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("backend", &self.backend)
            .finish()
    }
}

/// Builder for [`ToolServer`]
pub struct ToolServerBuilder {
    database: Arc<dyn SourceDatabase>,
    secrets: Arc<dyn SecretProvider>,
    export: ExportSettings,
    builtins: bool,
    extra: Vec<Arc<dyn ToolHandler>>,
}

impl ToolServerBuilder {
    /// Export binaries and limits
    #[must_use]
    pub fn with_export(mut self, export: ExportSettings) -> Self {
        self.export = export;
        self
    }

    /// Skip the built-in tools
    #[must_use]
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    /// Register an additional tool; a later registration replaces an
    /// earlier one of the same name
    #[must_use]
    pub fn register(mut self, tool: Arc<dyn ToolHandler>) -> Self {
        self.extra.push(tool);
        self
    }

    /// Finish
    #[must_use]
    pub fn build(self) -> ToolServer {
        let mut tools: IndexMap<String, Arc<dyn ToolHandler>> = IndexMap::new();
        let builtins = if self.builtins { builtin() } else { Vec::new() };
        for tool in builtins.into_iter().chain(self.extra) {
            tools.insert(tool.schema().name.to_string(), tool);
        }
        tracing::debug!(tools = tools.len(), "tool server ready");
        ToolServer {
            tools,
            backend: ToolBackend::new(self.database, self.secrets, self.export),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ConnectionConfig, MockSourceDatabase};
    use crate::error::SecretError;
    use migrate_kernel::protocol::{Payload, Scalar};
    use pretty_assertions::assert_eq;

    struct Fixed;

    impl SecretProvider for Fixed {
        fn connection(&self) -> Result<ConnectionConfig, SecretError> {
            Ok(ConnectionConfig {
                host: "127.0.0.1".into(),
                port: 3306,
                user: "root".into(),
                password: String::new(),
                database: "employees".into(),
            })
        }
    }

    fn server(db: MockSourceDatabase) -> ToolServer {
        ToolServer::with_builtin_tools(Arc::new(db), Arc::new(Fixed))
    }

    fn count_row(n: i64) -> migrate_kernel::protocol::Row {
        let mut row = migrate_kernel::protocol::Row::new();
        row.insert("row_count".into(), Scalar::Int(n));
        row
    }

    #[tokio::test]
    async fn injection_never_reaches_backend() {
        let mut db = MockSourceDatabase::new();
        db.expect_query().times(0);
        let server = server(db);

        let call = ToolCall::new("table_row_count")
            .with_param("table_name", "employees; DROP TABLE users;");
        assert_eq!(server.dispatch(&call).await, ToolResult::error("invalid identifier"));

        let call = ToolCall::new("export_to_object_store")
            .with_param("database", "employees")
            .with_param("table", "salaries")
            .with_param("bucket", "bkt$(rm -rf /)")
            .with_param("path", "dumps");
        assert_eq!(server.dispatch(&call).await, ToolResult::error("invalid identifier"));
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_params() {
        let mut db = MockSourceDatabase::new();
        db.expect_query().times(0);
        let server = server(db);

        assert_eq!(
            server.dispatch(&ToolCall::new("drop_database")).await,
            ToolResult::error("unknown tool")
        );
        assert_eq!(
            server.dispatch(&ToolCall::new("checksum")).await,
            ToolResult::error("invalid parameters")
        );
        let call = ToolCall::new("checksum").with_param("table_name", 7_i64);
        assert_eq!(server.dispatch(&call).await, ToolResult::error("invalid parameters"));
    }

    #[tokio::test]
    async fn valid_call_reaches_backend_once() {
        let mut db = MockSourceDatabase::new();
        db.expect_query()
            .withf(|_, sql| sql == "SELECT COUNT(*) AS row_count FROM `employees`")
            .times(1)
            .returning(|_, _| Ok(vec![count_row(300_024)]));
        let server = server(db);

        let call = ToolCall::new("table_row_count").with_param("table_name", "employees");
        assert_eq!(server.dispatch(&call).await, ToolResult::ok(Payload::int(300_024)));
    }

    #[tokio::test]
    async fn backend_error_becomes_envelope() {
        let mut db = MockSourceDatabase::new();
        db.expect_query()
            .returning(|_, _| Err(crate::error::DatabaseError::Query("Table doesn't exist".into())));
        let server = server(db);

        let call = ToolCall::new("checksum").with_param("table_name", "ghost");
        let result = server.dispatch(&call).await;
        assert!(!result.is_ok());
        assert!(result.error_message().unwrap().contains("Table doesn't exist"));
    }

    #[tokio::test]
    async fn connection_is_resolved_once() {
        struct Counting(std::sync::atomic::AtomicUsize);
        impl SecretProvider for Counting {
            fn connection(&self) -> Result<ConnectionConfig, SecretError> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Fixed.connection()
            }
        }

        let mut db = MockSourceDatabase::new();
        db.expect_query().returning(|_, _| Ok(vec![count_row(1)]));
        let secrets = Arc::new(Counting(std::sync::atomic::AtomicUsize::new(0)));
        let server = ToolServer::with_builtin_tools(Arc::new(db), secrets.clone());

        for _ in 0..3 {
            let call = ToolCall::new("table_row_count").with_param("table_name", "dept_emp");
            assert!(server.dispatch(&call).await.is_ok());
        }
        assert_eq!(secrets.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn describe_lists_builtins_in_order() {
        let server = server(MockSourceDatabase::new());
        let names: Vec<_> = server.tool_names().collect();
        assert_eq!(
            names,
            vec![
                "db_metadata",
                "table_schema",
                "table_row_count",
                "checksum",
                "export_to_object_store",
                "bulk_export",
                "parse_log_position",
            ]
        );
        let described = ToolDispatcher::describe(&server);
        assert_eq!(described[1].parameters, vec!["table_name: identifier".to_string()]);
    }
}
