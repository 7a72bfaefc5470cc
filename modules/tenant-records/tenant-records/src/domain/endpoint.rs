//! Endpoint addressing and connector access.

use std::sync::Arc;

use tenant_records_sdk::{
    ConnectorError, EndpointConnector, EndpointRequest, RemoteHandle, TenantId, TransportOptions,
};
use url::Url;

/// Resolve the address of `page` under `base`, scoped to `tenant` when given.
///
/// The tenant name is percent-encoded as one path segment, so
/// `CRONUS International Ltd.` becomes `CRONUS%20International%20Ltd.`.
///
/// # Errors
///
/// Returns [`url::ParseError`] when `base` is not an absolute URL or the
/// joined path cannot be parsed.
pub fn endpoint_url(base: &str, page: &str, tenant: Option<&str>) -> Result<Url, url::ParseError> {
    let base = Url::parse(base)?;
    let relative = match tenant {
        Some(tenant) => format!("{}/{page}", urlencoding::encode(tenant)),
        None => page.to_owned(),
    };
    base.join(&relative)
}

/// Base address, connector plugin and transport options of a session.
pub struct Endpoints {
    base_url: String,
    connector: Arc<dyn EndpointConnector>,
    options: TransportOptions,
}

impl Endpoints {
    /// # Errors
    ///
    /// Returns [`ConnectorError::Connection`] when `base_url` is malformed.
    pub fn new(
        base_url: impl Into<String>,
        connector: Arc<dyn EndpointConnector>,
        options: TransportOptions,
    ) -> Result<Self, ConnectorError> {
        let base_url = base_url.into();
        Url::parse(&base_url)
            .map_err(|e| ConnectorError::connection(base_url.clone(), e.to_string()))?;
        Ok(Self {
            base_url,
            connector,
            options,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Open `page` for `tenant`. The unscoped tenant addresses the base endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Connection`] when the address cannot be built
    /// and whatever the connector reports otherwise.
    pub async fn connect(
        &self,
        page: &str,
        tenant: &TenantId,
    ) -> Result<Arc<dyn RemoteHandle>, ConnectorError> {
        let url = endpoint_url(&self.base_url, page, tenant.scope())
            .map_err(|e| ConnectorError::connection(self.base_url.clone(), e.to_string()))?;
        tracing::trace!(%url, %tenant, "Opening endpoint");
        self.connector
            .connect(EndpointRequest {
                url: url.as_str(),
                page,
                tenant: (!tenant.is_unscoped()).then_some(tenant),
                options: &self.options,
            })
            .await
    }
}

impl std::fmt::Debug for Endpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoints")
            .field("base_url", &self.base_url)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
