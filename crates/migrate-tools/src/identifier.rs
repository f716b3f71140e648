//! Identifier allow-list
//!
//! Database, table and bucket names are interpolated into SQL and
//! command lines, so every one of them must match `^[A-Za-z0-9_-]+$`
//! before it reaches a backend.

use crate::error::ToolError;
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

/// Whether a value is a safe identifier
#[inline]
#[must_use]
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER.is_match(value)
}

/// Check a value, naming the parameter in the error detail
///
/// # Errors
/// [`ToolError::InvalidIdentifier`] when the value fails the pattern.
pub fn check_identifier(param: &str, value: &str) -> Result<(), ToolError> {
    if is_valid_identifier(value) {
        Ok(())
    } else {
        Err(ToolError::InvalidIdentifier(format!("{param}={value:?}")))
    }
}

/// Backtick-quote a checked identifier for SQL
///
/// # Errors
/// [`ToolError::InvalidIdentifier`] when the value fails the pattern.
pub fn quoted(param: &str, value: &str) -> Result<String, ToolError> {
    check_identifier(param, value)?;
    Ok(format!("`{value}`"))
}
