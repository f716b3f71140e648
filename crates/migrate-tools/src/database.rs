//! Database backend and connection secrets
//!
//! - [`SecretProvider`]: resolves a [`ConnectionConfig`]
//! - [`SourceDatabase`]: runs one SQL statement and returns flat rows
//!
//! Tools only ever hand the backend SQL built from identifiers that
//! passed the allow-list.

use crate::error::{DatabaseError, SecretError};
use migrate_kernel::protocol::Row;
use serde::{Deserialize, Serialize};

/// Connection parameters for a MySQL-compatible server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// User name
    pub user: String,
    /// Password; never logged
    #[serde(skip_serializing)]
    pub password: String,
    /// Default database
    pub database: String,
}

impl ConnectionConfig {
    /// `host:port/database`, for logs
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// Source of connection configuration
pub trait SecretProvider: Send + Sync {
    /// Resolve the connection configuration
    ///
    /// # Errors
    /// [`SecretError`] when a value is missing or malformed.
    fn connection(&self) -> Result<ConnectionConfig, SecretError>;
}

/// Reads `<PREFIX>_HOST`, `_PORT`, `_USER`, `_PASSWORD`, `_NAME`
///
/// `_PORT` falls back to 3306 and `_PASSWORD` to empty. The others are
/// required unless local defaults were enabled, which [`EnvSecrets::source`]
/// does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSecrets {
    prefix: String,
    local_defaults: bool,
}

impl EnvSecrets {
    /// Prefix of the source database variables
    pub const SOURCE_PREFIX: &'static str = "SOURCE_DB";
    /// Prefix of the target database variables
    pub const TARGET_PREFIX: &'static str = "TARGET_DB";

    /// Provider for an arbitrary prefix, with host, user and name required
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            local_defaults: false,
        }
    }

    /// Provider for the source database, defaulting to a local
    /// `root@127.0.0.1:3306/employees`
    #[must_use]
    pub fn source() -> Self {
        Self::new(Self::SOURCE_PREFIX).with_local_defaults()
    }

    /// Fall back to a local server for unset variables
    #[must_use]
    pub fn with_local_defaults(mut self) -> Self {
        self.local_defaults = true;
        self
    }

    /// Variable prefix
    #[inline]
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn optional(&self, suffix: &str, default: &str) -> (String, String) {
        let name = format!("{}_{suffix}", self.prefix);
        let value = std::env::var(&name).unwrap_or_else(|_| default.to_string());
        (name, value)
    }

    fn required(&self, suffix: &str, local_default: &str) -> Result<String, SecretError> {
        let name = format!("{}_{suffix}", self.prefix);
        match std::env::var(&name) {
            Ok(value) => Ok(value),
            Err(_) if self.local_defaults => Ok(local_default.to_string()),
            Err(_) => Err(SecretError::Missing(name)),
        }
    }
}

impl Default for EnvSecrets {
    fn default() -> Self {
        Self::source()
    }
}

impl SecretProvider for EnvSecrets {
    fn connection(&self) -> Result<ConnectionConfig, SecretError> {
        let host = self.required("HOST", "127.0.0.1")?;
        let (port_var, port) = self.optional("PORT", "3306");
        let user = self.required("USER", "root")?;
        let (_, password) = self.optional("PASSWORD", "");
        let database = self.required("NAME", "employees")?;

        let port = port.trim().parse().map_err(|e: std::num::ParseIntError| SecretError::Invalid {
            var: port_var,
            reason: e.to_string(),
        })?;

        Ok(ConnectionConfig {
            host,
            port,
            user,
            password,
            database,
        })
    }
}

/// A database that executes SQL and returns rows
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SourceDatabase: Send + Sync {
    /// Run one statement
    ///
    /// # Errors
    /// [`DatabaseError`] when the statement or the client fails.
    async fn query(
        &self,
        connection: &ConnectionConfig,
        sql: &str,
    ) -> Result<Vec<Row>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_password() {
        let cfg = ConnectionConfig {
            host: "db".into(),
            port: 3306,
            user: "root".into(),
            password: "s3cret".into(),
            database: "employees".into(),
        };
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("s3cret"));
        assert_eq!(cfg.endpoint(), "db:3306/employees");
    }

    #[test]
    fn local_defaults_apply_for_unset_prefix() {
        let cfg = EnvSecrets::new("MIGRATE_TEST_UNSET_PREFIX")
            .with_local_defaults()
            .connection()
            .unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 3306);
        assert_eq!(cfg.user, "root");
        assert_eq!(cfg.password, "");
        assert_eq!(cfg.database, "employees");
    }

    #[test]
    fn unset_required_variable_is_missing() {
        let err = EnvSecrets::new("MIGRATE_TEST_UNSET_TARGET").connection().unwrap_err();
        assert!(matches!(err, SecretError::Missing(ref var) if var == "MIGRATE_TEST_UNSET_TARGET_HOST"));
        assert_eq!(err.to_string(), "missing secret: MIGRATE_TEST_UNSET_TARGET_HOST");
    }

    #[test]
    fn source_provider_uses_local_defaults() {
        assert_eq!(EnvSecrets::source(), EnvSecrets::default());
        assert_eq!(EnvSecrets::source().prefix(), EnvSecrets::SOURCE_PREFIX);
    }
}
