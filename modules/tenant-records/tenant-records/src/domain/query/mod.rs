//! Query engine: fan-out reads, reconciling writes and their composites.
//!
//! Every operation fans out over tenants with bounded concurrency. Workers
//! only perform remote calls and hand their results back; merging into
//! records and the ledger happens afterwards on the calling task, in
//! tenant order, so no record is shared between workers.

mod compose;
pub mod read;
mod write;

use tenant_records_sdk::{ConnectorError, Fields, TenantId};
use tracing::{debug, warn};

use crate::domain::error::DomainError;
use crate::domain::model::Model;
use crate::domain::record::Record;
use crate::domain::result_set::ResultSet;

/// What happens to a tenant that drops out of a record's desired tenants.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DeletePolicy {
    /// Delete the remote record and drop the binding.
    #[default]
    Delete,
    /// Keep the remote record and the binding untouched.
    Retain,
    /// Update the remote record with these fields, then drop the binding.
    Deactivate(Fields),
}

/// Options of a reconciling update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Desired tenants. `None` keeps the current tenants.
    pub tenants: Option<Vec<TenantId>>,
    pub delete: DeletePolicy,
}

impl UpdateOptions {
    #[must_use]
    pub fn in_tenants(tenants: impl IntoIterator<Item = impl Into<TenantId>>) -> Self {
        Self {
            tenants: Some(tenants.into_iter().map(Into::into).collect()),
            delete: DeletePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_delete(mut self, delete: DeletePolicy) -> Self {
        self.delete = delete;
        self
    }
}

/// Result of a single-record lookup.
#[derive(Debug, Clone)]
pub enum GetOutcome {
    One(Record),
    /// Several distinct records matched; they are also loaded into the query set.
    Many(ResultSet),
}

impl GetOutcome {
    #[must_use]
    pub fn is_single(&self) -> bool {
        matches!(self, Self::One(_))
    }

    /// # Errors
    ///
    /// Returns [`DomainError::MultipleFound`] when several records matched.
    pub fn into_single(self) -> Result<Record, DomainError> {
        match self {
            Self::One(record) => Ok(record),
            Self::Many(set) => Err(DomainError::MultipleFound {
                count: set.len().unwrap_or_default(),
            }),
        }
    }
}

/// Engine over one model, holding the records of its last read.
#[derive(Debug, Clone)]
pub struct QuerySet {
    model: Model,
    results: ResultSet,
}

impl QuerySet {
    #[must_use]
    pub fn new(model: Model) -> Self {
        let results = ResultSet::unpopulated(model.clone());
        Self { model, results }
    }

    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Records of the last `get`, `filter` or `all`.
    #[must_use]
    pub fn results(&self) -> &ResultSet {
        &self.results
    }
}

/// Merge `candidate` into the first record of `records` with the same
/// identity, or append it.
fn merge_candidate(records: &mut Vec<Record>, candidate: Record) {
    match records.iter_mut().find(|r| r.same_identity(&candidate)) {
        Some(existing) => existing.absorb(candidate),
        None => records.push(candidate),
    }
}

/// Tenant failures absorbed during one fan-out.
#[derive(Debug, Default)]
struct Skipped {
    attempted: usize,
    failures: Vec<(TenantId, ConnectorError)>,
}

impl Skipped {
    fn new(attempted: usize) -> Self {
        Self {
            attempted,
            failures: Vec::new(),
        }
    }

    /// Downgrade a tenant-scoped failure to a skip; anything else is returned
    /// as the error to surface.
    fn absorb(
        &mut self,
        tenant: TenantId,
        error: ConnectorError,
        operation: &str,
    ) -> Result<(), DomainError> {
        if !error.is_tenant_scoped() {
            return Err(DomainError::from_connector(tenant, error));
        }
        if error.is_not_found() {
            debug!(%tenant, operation, "No matching record in tenant");
        } else {
            warn!(%tenant, operation, error = %error, "Skipping tenant after remote failure");
        }
        self.failures.push((tenant, error));
        Ok(())
    }

    fn count(&self) -> usize {
        self.failures.len()
    }

    fn all_skipped(&self) -> bool {
        self.attempted > 0 && self.failures.len() == self.attempted
    }

    /// Every tenant failed, and at least one of them for a reason other
    /// than a missing record.
    fn all_failed_in_transit(&self) -> bool {
        self.all_skipped() && self.failures.iter().any(|(_, e)| !e.is_not_found())
    }

    /// The first transport-class failure, attributed to its tenant.
    fn into_transport_error(self) -> Option<DomainError> {
        self.failures
            .into_iter()
            .find(|(_, e)| !e.is_not_found())
            .map(|(tenant, source)| DomainError::Transport { tenant, source })
    }
}

/// Keep the first fatal error while letting later results apply.
fn keep_first(fatal: &mut Option<DomainError>, error: DomainError) {
    if fatal.is_none() {
        *fatal = Some(error);
    }
}
