//! Domain error types for the tenant records engine.

use std::collections::BTreeMap;

use tenant_records_sdk::{ConnectorError, TenantId};
use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::schema::SchemaError;

/// Per-field validation messages, keyed by field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Domain-level errors for the tenant records engine.
#[derive(Error, Debug)]
pub enum DomainError {
    /// No tenant returned a matching record.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// A single-record lookup resolved to several distinct records.
    #[error("Expected a single record, found {count} distinct records")]
    MultipleFound { count: usize },

    /// Arguments or field values were rejected before any remote call.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        fields: FieldErrors,
    },

    /// An endpoint could not be reached. Never downgraded to a skip.
    #[error("Connection failed for tenant {tenant}: {source}")]
    Connection {
        tenant: TenantId,
        #[source]
        source: ConnectorError,
    },

    /// A remote call failed and the failure could not be absorbed.
    #[error("Remote call failed in tenant {tenant}: {source}")]
    Transport {
        tenant: TenantId,
        #[source]
        source: ConnectorError,
    },

    /// The tenant directory could not be refreshed.
    #[error("Tenant discovery failed: {0}")]
    Discovery(String),

    /// A result set was accessed before any query populated it.
    #[error("Result set is empty; run get, filter or all first")]
    EmptyResult,

    /// The model does not declare the requested operation.
    #[error("Operation '{operation}' is not supported by {model}")]
    Unsupported { model: String, operation: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DomainError {
    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a `Validation` error without per-field detail.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: FieldErrors::new(),
        }
    }

    /// Creates a `Validation` error carrying per-field messages.
    #[must_use]
    pub fn invalid_fields(fields: FieldErrors) -> Self {
        let names: Vec<&str> = fields.keys().map(String::as_str).collect();
        Self::Validation {
            message: format!("invalid values for {}", names.join(", ")),
            fields,
        }
    }

    /// Creates an `Unsupported` error.
    #[must_use]
    pub fn unsupported(model: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            model: model.into(),
            operation: operation.into(),
        }
    }

    /// Attribute a connector failure to the tenant it happened in.
    #[must_use]
    pub fn from_connector(tenant: TenantId, source: ConnectorError) -> Self {
        match source {
            ConnectorError::Connection { .. } => Self::Connection { tenant, source },
            ConnectorError::NotFound => Self::NotFound(format!("no matching record in {tenant}")),
            other => Self::Transport {
                tenant,
                source: other,
            },
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns per-field messages if this is a `Validation` error.
    #[must_use]
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::Validation { fields, .. } => Some(fields),
            _ => None,
        }
    }
}
