//! Session: connector, tenant directory and fan-out limits shared by models.

use std::fmt;
use std::sync::Arc;

use tenant_records_sdk::{EndpointConnector, RemoteHandle, TenantId};
use tracing::{info, warn};

use crate::config::{SessionConfig, SessionMode};
use crate::domain::directory::TenantDirectory;
use crate::domain::endpoint::Endpoints;
use crate::domain::error::DomainError;
use crate::domain::fanout::FanoutPolicy;
use crate::domain::model::Model;
use crate::domain::registry::OperationRegistry;
use crate::domain::schema::ModelSchema;

/// Shared entry point of the engine. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    endpoints: Endpoints,
    directory: TenantDirectory,
    fanout: FanoutPolicy,
}

impl Session {
    /// Build a session and populate the tenant directory.
    ///
    /// A failed initial discovery is logged and leaves the directory empty;
    /// call [`Session::refresh`] to retry.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Config`] for inconsistent settings and
    /// [`DomainError::Connection`] when the base URL is malformed.
    #[tracing::instrument(skip_all, fields(base_url = %config.base_url, mode = ?config.mode))]
    pub async fn connect(
        config: &SessionConfig,
        connector: Arc<dyn EndpointConnector>,
    ) -> Result<Self, DomainError> {
        config.validate()?;
        let endpoints = Endpoints::new(
            config.base_url.clone(),
            connector,
            config.transport_options(),
        )
        .map_err(|source| DomainError::Connection {
            tenant: TenantId::unscoped(),
            source,
        })?;

        let session = Self {
            inner: Arc::new(SessionInner {
                endpoints,
                directory: TenantDirectory::new(config.mode, config.discovery.clone()),
                fanout: config.fanout_policy(),
            }),
        };

        if let Err(e) = session.refresh().await {
            warn!(error = %e, "Initial tenant discovery failed, directory stays empty until refreshed");
        }
        info!(tenants = session.tenants().len(), "Session ready");
        Ok(session)
    }

    /// Re-discover tenants and replace the directory snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Discovery`] when the system service fails; the
    /// previous snapshot is kept.
    pub async fn refresh(&self) -> Result<Arc<Vec<TenantId>>, DomainError> {
        self.inner.directory.refresh(&self.inner.endpoints).await
    }

    /// Current tenant snapshot.
    #[must_use]
    pub fn tenants(&self) -> Arc<Vec<TenantId>> {
        self.inner.directory.tenants()
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.inner.directory.mode()
    }

    #[must_use]
    pub fn fanout_policy(&self) -> FanoutPolicy {
        self.inner.fanout
    }

    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.inner.endpoints
    }

    /// Bind `schema` to this session and index the operations its pages
    /// advertise.
    #[tracing::instrument(skip_all, fields(model = %schema.name()))]
    pub async fn register(&self, schema: ModelSchema) -> Model {
        let mut pages = vec![schema.page().to_owned()];
        pages.extend(schema.codeunit_pages().iter().cloned());
        let operations = OperationRegistry::build(&self.inner.endpoints, &pages).await;
        Model::new(schema, self.clone(), operations)
    }

    pub(crate) async fn connect_page(
        &self,
        page: &str,
        tenant: &TenantId,
    ) -> Result<Arc<dyn RemoteHandle>, tenant_records_sdk::ConnectorError> {
        self.inner.endpoints.connect(page, tenant).await
    }

    /// Tenants an operation targets: the explicit list when given, the
    /// directory snapshot otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when an explicit list is given in
    /// single-endpoint mode or is empty.
    pub(crate) fn targets(&self, tenants: Option<&[TenantId]>) -> Result<Vec<TenantId>, DomainError> {
        match self.explicit(tenants)? {
            Some([]) => Err(DomainError::validation("at least one tenant is required")),
            Some(explicit) => Ok(dedup(explicit)),
            None => Ok(self.tenants().to_vec()),
        }
    }

    /// Validate an explicit tenant list against the session mode.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when tenants are given in
    /// single-endpoint mode.
    pub(crate) fn explicit<'a>(
        &self,
        tenants: Option<&'a [TenantId]>,
    ) -> Result<Option<&'a [TenantId]>, DomainError> {
        if tenants.is_some() && self.mode() == SessionMode::SingleEndpoint {
            return Err(DomainError::validation(
                "tenant scoping is not available in single-endpoint mode",
            ));
        }
        Ok(tenants)
    }
}

fn dedup(tenants: &[TenantId]) -> Vec<TenantId> {
    let mut unique: Vec<TenantId> = Vec::with_capacity(tenants.len());
    for tenant in tenants {
        if !unique.contains(tenant) {
            unique.push(tenant.clone());
        }
    }
    unique
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoints", &self.inner.endpoints)
            .field("tenants", &self.tenants())
            .field("fanout", &self.inner.fanout)
            .finish()
    }
}
