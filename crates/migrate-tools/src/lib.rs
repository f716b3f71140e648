//! Migration tool server (migrate-tools)
//!
//! Request/response tools over a source database, exposed to pipeline
//! stages through [`migrate_kernel::protocol::ToolDispatcher`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use migrate_tools::prelude::*;
//!
//! let server = ToolServer::builder(Arc::new(MysqlCliDatabase::default()), Arc::new(EnvSecrets::source()))
//!     .with_export(settings)
//!     .build();
//! let result = server.dispatch(&ToolCall::new("table_row_count").with_param("table_name", "employees")).await;
//! ```

pub mod code_exec;
pub mod database;
pub mod error;
pub mod identifier;
pub mod mysql;
pub mod process;
pub mod schema;
pub mod server;
pub mod tools;

pub use error::*;

/// Commonly used tool-server types
pub mod prelude {
    pub use crate::code_exec::LocalCodeExecutor;
    pub use crate::database::{ConnectionConfig, EnvSecrets, SecretProvider, SourceDatabase};
    pub use crate::error::{DatabaseError, ProcessError, SecretError, ToolError};
    pub use crate::identifier::{check_identifier, is_valid_identifier};
    pub use crate::mysql::MysqlCliDatabase;
    pub use crate::process::{run_command, run_piped, CommandSpec, PipedOutput};
    pub use crate::schema::{ParamKind, ParamSpec, ToolSchema, ValidatedParams};
    pub use crate::server::{ToolServer, ToolServerBuilder};
    pub use crate::tools::export::{ExportSettings, COMPLETION_MARKER};
    pub use crate::tools::{ToolBackend, ToolHandler};
}
