//! Tool parameter schemas
//!
//! Validation happens in two passes so the guard order holds:
//! 1. presence and type of every parameter (`invalid parameters`)
//! 2. identifier allow-list (`invalid identifier`)

use crate::error::ToolError;
use crate::identifier::check_identifier;
use indexmap::IndexMap;
use migrate_kernel::protocol::{ParamValue, ToolDescription};

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Free text
    Text,
    /// Integer; numeric text is accepted
    Integer,
    /// Name interpolated into SQL or a command line
    Identifier,
    /// Filesystem or object-store path
    Path,
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Identifier => "identifier",
            Self::Path => "path",
        };
        f.write_str(text)
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Parameter name
    pub name: &'static str,
    /// Declared type
    pub kind: ParamKind,
    /// Value used when the call omits the parameter
    pub default: Option<ParamValue>,
}

impl ParamSpec {
    /// Parameter that must be supplied
    #[inline]
    #[must_use]
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            default: None,
        }
    }

    /// Parameter with a default
    #[inline]
    #[must_use]
    pub fn optional(name: &'static str, kind: ParamKind, default: impl Into<ParamValue>) -> Self {
        Self {
            name,
            kind,
            default: Some(default.into()),
        }
    }

    fn coerce(&self, value: &ParamValue) -> Result<ParamValue, ToolError> {
        let mismatch = || {
            ToolError::InvalidParameters(format!("{} must be {}", self.name, self.kind))
        };
        match self.kind {
            ParamKind::Integer => match value {
                ParamValue::Int(i) => Ok(ParamValue::Int(*i)),
                ParamValue::Text(s) => s.trim().parse().map(ParamValue::Int).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ParamKind::Text | ParamKind::Identifier => match value {
                ParamValue::Text(s) => Ok(ParamValue::Text(s.clone())),
                _ => Err(mismatch()),
            },
            ParamKind::Path => match value {
                ParamValue::Text(s) if !s.is_empty() && !s.contains(['\0', '\n']) => {
                    Ok(ParamValue::Text(s.clone()))
                }
                _ => Err(mismatch()),
            },
        }
    }
}

/// Name, description and parameters of a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    /// Registered name
    pub name: &'static str,
    /// One-line description for model briefs
    pub description: &'static str,
    /// Declared parameters, in order
    pub params: Vec<ParamSpec>,
}

impl ToolSchema {
    /// Schema without parameters
    #[must_use]
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            params: Vec::new(),
        }
    }

    /// Add a parameter
    #[must_use]
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Validate raw call parameters
    ///
    /// # Errors
    /// [`ToolError::InvalidParameters`] for missing, unexpected or
    /// ill-typed values, then [`ToolError::InvalidIdentifier`] for
    /// identifiers failing the allow-list.
    pub fn validate(
        &self,
        raw: &IndexMap<String, ParamValue>,
    ) -> Result<ValidatedParams, ToolError> {
        if let Some(extra) = raw
            .keys()
            .find(|k| !self.params.iter().any(|p| p.name == k.as_str()))
        {
            return Err(ToolError::InvalidParameters(format!(
                "unexpected parameter {extra}"
            )));
        }

        let mut values = IndexMap::with_capacity(self.params.len());
        for spec in &self.params {
            let value = match (raw.get(spec.name), &spec.default) {
                (Some(v), _) => spec.coerce(v)?,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(ToolError::InvalidParameters(format!(
                        "missing {}",
                        spec.name
                    )))
                }
            };
            values.insert(spec.name.to_string(), value);
        }

        for spec in self.params.iter().filter(|p| p.kind == ParamKind::Identifier) {
            if let Some(ParamValue::Text(v)) = values.get(spec.name) {
                check_identifier(spec.name, v)?;
            }
        }

        Ok(ValidatedParams(values))
    }

    /// Description handed to models and the CLI
    #[must_use]
    pub fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters: self
                .params
                .iter()
                .map(|p| match &p.default {
                    Some(ParamValue::Int(d)) => format!("{}: {} = {d}", p.name, p.kind),
                    Some(ParamValue::Text(d)) => format!("{}: {} = {d:?}", p.name, p.kind),
                    _ => format!("{}: {}", p.name, p.kind),
                })
                .collect(),
        }
    }
}

/// Parameters that passed validation, defaults filled in
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidatedParams(IndexMap<String, ParamValue>);

impl ValidatedParams {
    /// Text value
    ///
    /// # Errors
    /// `InvalidParameters` when absent or not text.
    pub fn text(&self, name: &str) -> Result<&str, ToolError> {
        self.0
            .get(name)
            .and_then(ParamValue::as_str)
            .ok_or_else(|| ToolError::InvalidParameters(format!("missing {name}")))
    }

    /// Integer value
    ///
    /// # Errors
    /// `InvalidParameters` when absent or not an integer.
    pub fn integer(&self, name: &str) -> Result<i64, ToolError> {
        self.0
            .get(name)
            .and_then(ParamValue::as_i64)
            .ok_or_else(|| ToolError::InvalidParameters(format!("missing {name}")))
    }

    /// Positive integer value
    ///
    /// # Errors
    /// `InvalidParameters` when absent or not positive.
    pub fn positive(&self, name: &str) -> Result<u64, ToolError> {
        let value = self.integer(name)?;
        u64::try_from(value)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| ToolError::InvalidParameters(format!("{name} must be positive")))
    }

    /// Number of parameters
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
