//! Tenant directory: the cached list of tenants every fan-out addresses.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tenant_records_sdk::{Fields, FieldValue, RemoteResponse, TenantId};
use tracing::{debug, info};

use crate::config::{DiscoveryConfig, SessionMode};
use crate::domain::endpoint::Endpoints;
use crate::domain::error::DomainError;

/// Ordered, deduplicated set of tenants reachable behind the base endpoint.
///
/// Readers get a consistent snapshot; a refresh swaps the whole list at once.
#[derive(Debug)]
pub struct TenantDirectory {
    mode: SessionMode,
    discovery: DiscoveryConfig,
    tenants: ArcSwap<Vec<TenantId>>,
}

impl TenantDirectory {
    #[must_use]
    pub fn new(mode: SessionMode, discovery: DiscoveryConfig) -> Self {
        let initial = match mode {
            SessionMode::SingleEndpoint => vec![TenantId::unscoped()],
            SessionMode::MultiTenant => Vec::new(),
        };
        Self {
            mode,
            discovery,
            tenants: ArcSwap::from_pointee(initial),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn tenants(&self) -> Arc<Vec<TenantId>> {
        self.tenants.load_full()
    }

    #[must_use]
    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.tenants.load().contains(tenant)
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Re-read the tenant list and replace the cached snapshot.
    ///
    /// The snapshot is left untouched when the refresh fails.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Discovery`] when the system service cannot be
    /// reached or answers with something other than a list of names.
    #[tracing::instrument(skip_all, fields(mode = ?self.mode))]
    pub async fn refresh(&self, endpoints: &Endpoints) -> Result<Arc<Vec<TenantId>>, DomainError> {
        let tenants = match self.mode {
            SessionMode::SingleEndpoint => vec![TenantId::unscoped()],
            SessionMode::MultiTenant if !self.discovery.enabled => {
                debug!("Discovery disabled, using configured tenants");
                normalize(
                    self.discovery.tenants.iter().cloned(),
                    &self.discovery.excluded,
                )
            }
            SessionMode::MultiTenant => {
                let names = self.discover(endpoints).await?;
                normalize(names, &self.discovery.excluded)
            }
        };

        info!(count = tenants.len(), "Tenant directory refreshed");
        let tenants = Arc::new(tenants);
        self.tenants.store(Arc::clone(&tenants));
        Ok(tenants)
    }

    async fn discover(&self, endpoints: &Endpoints) -> Result<Vec<String>, DomainError> {
        let handle = endpoints
            .connect(&self.discovery.system_page, &TenantId::unscoped())
            .await
            .map_err(|e| DomainError::Discovery(e.to_string()))?;
        let response = handle
            .invoke(&self.discovery.method, Fields::new())
            .await
            .map_err(|e| DomainError::Discovery(e.to_string()))?;
        tenant_names(response)
    }
}

fn tenant_names(response: RemoteResponse) -> Result<Vec<String>, DomainError> {
    let items = match response {
        RemoteResponse::Value(FieldValue::Array(items)) => items,
        RemoteResponse::Value(FieldValue::String(name)) => vec![FieldValue::String(name)],
        RemoteResponse::Empty => Vec::new(),
        RemoteResponse::Records(records) if records.is_empty() => Vec::new(),
        other => {
            return Err(DomainError::Discovery(format!(
                "expected a list of tenant names, got {other:?}"
            )));
        }
    };
    items
        .into_iter()
        .map(|item| match item {
            FieldValue::String(name) => Ok(name),
            other => Err(DomainError::Discovery(format!(
                "tenant name must be a string, got {other}"
            ))),
        })
        .collect()
}

/// Deduplicate preserving first occurrence, dropping empty and excluded names.
fn normalize(names: impl IntoIterator<Item = String>, excluded: &[String]) -> Vec<TenantId> {
    let mut tenants: Vec<TenantId> = Vec::new();
    for name in names {
        if name.is_empty() || excluded.contains(&name) {
            continue;
        }
        let tenant = TenantId::new(name);
        if !tenants.contains(&tenant) {
            tenants.push(tenant);
        }
    }
    tenants
}
