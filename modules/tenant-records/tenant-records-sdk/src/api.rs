use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ConnectorError;
use crate::models::{Fields, RemoteResponse, ServiceMethod, TenantId, TransportOptions};

/// Everything a connector needs to open one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointRequest<'a> {
    /// Fully resolved endpoint address.
    pub url: &'a str,
    /// Page path relative to the tenant root, e.g. `Page/Customer`.
    pub page: &'a str,
    /// Tenant the endpoint is scoped to; `None` addresses the base endpoint.
    pub tenant: Option<&'a TenantId>,
    pub options: &'a TransportOptions,
}

/// Transport plugin that opens remote endpoints.
///
/// Implementations must be safe to call concurrently from many fan-out
/// workers.
#[async_trait]
pub trait EndpointConnector: Send + Sync {
    /// Open a handle to the endpoint described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Connection`] when the endpoint cannot be
    /// reached or its address is rejected.
    async fn connect(
        &self,
        request: EndpointRequest<'_>,
    ) -> Result<Arc<dyn RemoteHandle>, ConnectorError>;
}

/// An open endpoint bound to one page of one tenant.
#[async_trait]
pub trait RemoteHandle: Send + Sync + fmt::Debug {
    /// Address this handle talks to.
    fn endpoint(&self) -> &str;

    /// Invoke a named operation with named arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::NotFound`] when the backend signals a missing
    /// record and other variants for faults, transport failures and timeouts.
    async fn invoke(&self, method: &str, args: Fields) -> Result<RemoteResponse, ConnectorError>;

    /// List the operations the endpoint advertises.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when the description cannot be fetched.
    async fn describe(&self) -> Result<Vec<ServiceMethod>, ConnectorError>;
}
