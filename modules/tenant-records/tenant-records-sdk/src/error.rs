//! Error types returned by endpoint connectors.

use std::time::Duration;

use thiserror::Error;

/// Errors a connector may report for a single endpoint call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    /// The endpoint could not be reached or its address is invalid.
    ///
    /// This indicates misconfiguration and is never downgraded to a per-tenant skip.
    #[error("cannot connect to {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    /// The backend reported that no matching record exists.
    #[error("no matching record")]
    NotFound,

    /// The backend rejected the call (a SOAP fault or equivalent).
    #[error("backend fault: {0}")]
    Fault(String),

    /// The call failed in transit after the endpoint was reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the configured deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with a payload the engine cannot interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl ConnectorError {
    /// Create a connection error for the given endpoint address.
    #[must_use]
    pub fn connection(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure is confined to one tenant.
    ///
    /// Tenant-scoped failures are skipped during fan-out; everything else
    /// aborts the operation.
    #[must_use]
    pub fn is_tenant_scoped(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Fault(_) | Self::Transport(_) | Self::Timeout(_)
        )
    }

    /// Whether the failure is a missing-record signal rather than a transport problem.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
