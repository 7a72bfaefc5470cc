//! Operations advertised by a model's pages.

use std::collections::BTreeMap;

use tenant_records_sdk::{Fields, ServiceMethod, TenantId};
use tracing::{debug, warn};

use crate::domain::endpoint::Endpoints;
use crate::domain::error::DomainError;

/// Case-insensitive index of the operations each page advertises.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    pages: Vec<(String, BTreeMap<String, ServiceMethod>)>,
}

impl OperationRegistry {
    /// Describe every page once through the unscoped endpoint.
    ///
    /// Pages whose description fails are logged and left out.
    #[tracing::instrument(skip_all, fields(pages = pages.len()))]
    pub async fn build(endpoints: &Endpoints, pages: &[String]) -> Self {
        let mut registry = Self::default();
        for page in pages {
            let described = match endpoints.connect(page, &TenantId::unscoped()).await {
                Ok(handle) => handle.describe().await,
                Err(e) => Err(e),
            };
            match described {
                Ok(methods) => {
                    debug!(%page, count = methods.len(), "Registered page operations");
                    registry.insert(page.clone(), methods);
                }
                Err(e) => warn!(%page, error = %e, "Failed to describe page"),
            }
        }
        registry
    }

    pub fn insert(&mut self, page: String, methods: Vec<ServiceMethod>) {
        let index = methods
            .into_iter()
            .map(|method| (method.name.to_lowercase(), method))
            .collect();
        match self.pages.iter_mut().find(|(p, _)| *p == page) {
            Some((_, existing)) => *existing = index,
            None => self.pages.push((page, index)),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[must_use]
    pub fn has_page(&self, page: &str) -> bool {
        self.pages.iter().any(|(p, _)| p == page)
    }

    /// Operation `name` on `page`, matched case-insensitively.
    #[must_use]
    pub fn method(&self, page: &str, name: &str) -> Option<&ServiceMethod> {
        self.pages
            .iter()
            .find(|(p, _)| p == page)
            .and_then(|(_, methods)| methods.get(&name.to_lowercase()))
    }

    /// First page among `pages` advertising `name`, with the canonical operation.
    #[must_use]
    pub fn find(&self, pages: &[String], name: &str) -> Option<(&str, &ServiceMethod)> {
        let key = name.to_lowercase();
        pages.iter().find_map(|wanted| {
            self.pages
                .iter()
                .find(|(p, _)| p == wanted)
                .and_then(|(p, methods)| methods.get(&key).map(|m| (p.as_str(), m)))
        })
    }

    /// Check named arguments against the advertised signature.
    ///
    /// Unknown pages and operations without declared parameters pass.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when more arguments are passed than
    /// the operation accepts or a declared parameter is missing.
    pub fn check_arguments(&self, page: &str, name: &str, args: &Fields) -> Result<(), DomainError> {
        let Some(method) = self.method(page, name) else {
            return Ok(());
        };
        if method.params.is_empty() {
            return Ok(());
        }
        if args.len() > method.params.len() {
            return Err(DomainError::validation(format!(
                "{} takes {} arguments ({} given)",
                method.name,
                method.params.len(),
                args.len()
            )));
        }
        if let Some(missing) = method.params.iter().find(|p| !args.contains_key(p.as_str())) {
            return Err(DomainError::validation(format!(
                "{} requires argument '{missing}'",
                method.name
            )));
        }
        Ok(())
    }
}
