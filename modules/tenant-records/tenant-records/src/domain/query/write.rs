use std::sync::Arc;

use tenant_records_sdk::{
    ConnectorError, Fields, RemoteHandle, RemoteKey, RemoteRecord, RemoteResponse, TenantId,
};
use tracing::{debug, warn};

use super::{DeletePolicy, QuerySet, Skipped, UpdateOptions, keep_first};
use crate::domain::error::DomainError;
use crate::domain::fanout::fan_out;
use crate::domain::model::Model;
use crate::domain::partition::TenantPartition;
use crate::domain::record::{InstanceBinding, Record};

type Answer = Result<(Arc<dyn RemoteHandle>, RemoteResponse), ConnectorError>;

impl QuerySet {
    /// Create a record in `tenants`, or in every directory tenant.
    ///
    /// All target tenants are attempted. Tenants that succeeded are bound
    /// on the returned error path too, but the record itself is only
    /// returned when every tenant succeeded.
    ///
    /// # Errors
    ///
    /// - [`DomainError::Validation`] when `fields` fail cleaning, set the
    ///   default id, or no tenant is targeted
    /// - [`DomainError::Transport`] for the first tenant (in directory order) that failed
    /// - [`DomainError::Connection`] when an endpoint cannot be reached
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn create(
        &self,
        tenants: Option<&[TenantId]>,
        fields: &Fields,
    ) -> Result<Record, DomainError> {
        let targets = self.model.session().targets(tenants)?;
        if targets.is_empty() {
            return Err(DomainError::validation(
                "no tenant to create in; the tenant directory is empty",
            ));
        }
        let mut record = self.model.instantiate(fields.clone())?;
        record.clean(&[])?;
        record.claim_tenants(&targets);
        self.create_pending(&mut record, fields).await?;
        Ok(record)
    }

    /// Create `record` in each tenant whose binding has no key yet.
    ///
    /// The first created row populates the record; later tenants only add
    /// their bindings. Returns how many tenants were created.
    ///
    /// # Errors
    ///
    /// Returns the first failure in binding order after every pending
    /// tenant was attempted; successful tenants are bound regardless.
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn create_pending(
        &self,
        record: &mut Record,
        fields: &Fields,
    ) -> Result<usize, DomainError> {
        let pending: Vec<InstanceBinding> = record
            .bindings()
            .iter()
            .filter(|b| !b.is_materialized())
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let method = self.model.schema().methods().create.as_str();
        let results = dispatch(&self.model, pending, method, fields, false).await;

        let mut created = 0;
        let mut fatal = None;
        for (binding, outcome) in results {
            let tenant = binding.tenant().clone();
            match outcome.and_then(|(handle, response)| Ok((handle, single_record(response)?))) {
                Ok((handle, row)) => match self.model.key_of(&row) {
                    Some(key) => {
                        debug!(%tenant, %key, "Created record");
                        if created == 0 {
                            record.populate(&row);
                        }
                        record.upsert_binding(tenant, Some(key), Some(handle));
                        created += 1;
                    }
                    None => keep_first(
                        &mut fatal,
                        DomainError::from_connector(
                            tenant,
                            ConnectorError::Protocol("created record carries no key".to_owned()),
                        ),
                    ),
                },
                Err(e) => {
                    warn!(%tenant, error = %e, "Create failed in tenant");
                    keep_first(&mut fatal, DomainError::from_connector(tenant, e));
                }
            }
        }
        fatal.map_or(Ok(created), Err)
    }

    /// Reconcile `record` against the desired tenants in `options`.
    ///
    /// Tenants held and desired are updated with `fields`, tenants held but
    /// no longer desired are handled per [`DeletePolicy`], and desired tenants
    /// not held yet are created from the record's full payload with `fields`
    /// applied. Returns `false` when any tenant could not be reconciled.
    ///
    /// # Errors
    ///
    /// - [`DomainError::Validation`] when tenants are given in single-endpoint
    ///   mode or the record fails cleaning before a create
    /// - [`DomainError::Connection`] when an endpoint cannot be reached
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn update_record(
        &self,
        record: &mut Record,
        options: &UpdateOptions,
        fields: &Fields,
    ) -> Result<bool, DomainError> {
        let desired = self.model.session().explicit(options.tenants.as_deref())?;
        let partition = TenantPartition::compute(&record.tenants(), desired);
        self.reconcile(record, &partition, &options.delete, fields)
            .await
    }

    /// Reconcile every loaded record. A desired tenant already held by a
    /// sibling record is left to that sibling instead of being added.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::EmptyResult`] when nothing is loaded, otherwise
    /// as [`QuerySet::update_record`].
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn update_loaded(
        &mut self,
        options: &UpdateOptions,
        fields: &Fields,
    ) -> Result<bool, DomainError> {
        let desired = self.model.session().explicit(options.tenants.as_deref())?;
        let mut records = self.results.take()?;

        let mut success = true;
        let mut fatal = None;
        for index in 0..records.len() {
            let siblings: Vec<TenantId> = records
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .flat_map(|(_, r)| r.tenants())
                .collect();
            let partition = TenantPartition::compute(&records[index].tenants(), desired)
                .without_additions_held_by(&siblings);
            match self
                .reconcile(&mut records[index], &partition, &options.delete, fields)
                .await
            {
                Ok(reconciled) => success &= reconciled,
                Err(e) => {
                    success = false;
                    keep_first(&mut fatal, e);
                }
            }
        }

        self.results.replace(records);
        fatal.map_or(Ok(success), Err)
    }

    /// Update the record behind each keyed binding and assemble the result.
    ///
    /// # Errors
    ///
    /// - [`DomainError::Validation`] when no binding is given or one carries no key
    /// - [`DomainError::NotFound`] or [`DomainError::Transport`] when every binding failed
    #[tracing::instrument(skip_all, fields(model = %self.model.name(), bindings = bindings.len()))]
    pub async fn update_bindings(
        &self,
        bindings: &[InstanceBinding],
        fields: &Fields,
    ) -> Result<Record, DomainError> {
        if bindings.is_empty() {
            return Err(DomainError::validation("at least one binding is required"));
        }
        if let Some(pending) = bindings.iter().find(|b| !b.is_materialized()) {
            return Err(DomainError::validation(format!(
                "binding for {} carries no key",
                pending.tenant()
            )));
        }
        let (record, skipped) = self.update_each(bindings.to_vec(), fields).await?;
        match record {
            Some(record) => Ok(record),
            None => Err(if skipped.all_failed_in_transit() {
                skipped
                    .into_transport_error()
                    .unwrap_or_else(|| DomainError::not_found(self.model.name()))
            } else {
                DomainError::not_found(format!("no {} matches the given keys", self.model.name()))
            }),
        }
    }

    /// Update the record with `key` in `tenants`, or in every directory tenant.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] when every tenant was skipped.
    #[tracing::instrument(skip_all, fields(model = %self.model.name(), %key))]
    pub async fn update_by_key(
        &self,
        key: &RemoteKey,
        tenants: Option<&[TenantId]>,
        fields: &Fields,
    ) -> Result<Record, DomainError> {
        let bindings: Vec<InstanceBinding> = self
            .model
            .session()
            .targets(tenants)?
            .into_iter()
            .map(|tenant| InstanceBinding::keyed(tenant, key.clone()))
            .collect();
        let (record, _) = self.update_each(bindings, fields).await?;
        record.ok_or_else(|| {
            DomainError::not_found(format!("no {} with key {key} in any tenant", self.model.name()))
        })
    }

    /// Delete `record` in every tenant it is bound to. Deleted bindings are
    /// dropped from the record; bindings that were never created are
    /// dropped without a remote call.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Connection`] when an endpoint cannot be reached.
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn delete_record(&self, record: &mut Record) -> Result<bool, DomainError> {
        let (keyed, pending): (Vec<InstanceBinding>, Vec<InstanceBinding>) = record
            .bindings()
            .iter()
            .cloned()
            .partition(InstanceBinding::is_materialized);
        for binding in &pending {
            record.remove_binding(binding.tenant());
        }

        let method = self.model.schema().methods().delete.as_str();
        let results = dispatch(&self.model, keyed, method, &Fields::new(), true).await;

        let mut success = true;
        let mut fatal = None;
        for (binding, outcome) in results {
            match deleted(binding.tenant(), outcome) {
                Ok(true) => {
                    record.remove_binding(binding.tenant());
                }
                Ok(false) => success = false,
                Err(e) => {
                    success = false;
                    keep_first(&mut fatal, e);
                }
            }
        }
        fatal.map_or(Ok(success), Err)
    }

    /// Delete every loaded record. Records not deleted in all of their
    /// tenants stay loaded, holding only the bindings that survived.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::EmptyResult`] when nothing is loaded and
    /// [`DomainError::Connection`] when an endpoint cannot be reached.
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn delete_loaded(&mut self) -> Result<bool, DomainError> {
        let mut records = self.results.take()?;

        let mut work: Vec<(usize, InstanceBinding)> = Vec::new();
        for (index, record) in records.iter_mut().enumerate() {
            for binding in record.bindings().to_vec() {
                if binding.is_materialized() {
                    work.push((index, binding));
                } else {
                    record.remove_binding(binding.tenant());
                }
            }
        }

        let model = &self.model;
        let method = model.schema().methods().delete.as_str();
        let no_fields = Fields::new();
        let no_fields = &no_fields;
        let results = fan_out(
            model.session().fanout_policy(),
            work,
            |(_, binding)| async move { call_binding(model, &binding, method, no_fields, true).await },
        )
        .await;

        let mut failed = vec![false; records.len()];
        let mut fatal = None;
        for ((index, binding), outcome) in results {
            match deleted(binding.tenant(), outcome) {
                Ok(true) => {
                    records[index].remove_binding(binding.tenant());
                }
                Ok(false) => failed[index] = true,
                Err(e) => {
                    failed[index] = true;
                    keep_first(&mut fatal, e);
                }
            }
        }

        let success = !failed.contains(&true);
        let retained: Vec<Record> = records
            .into_iter()
            .zip(failed)
            .filter_map(|(record, failed)| failed.then_some(record))
            .collect();
        debug!(retained = retained.len(), "Deleted loaded records");
        self.results.replace(retained);
        fatal.map_or(Ok(success), Err)
    }

    /// Delete the record behind each keyed binding.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when a binding carries no key and
    /// [`DomainError::Connection`] when an endpoint cannot be reached.
    #[tracing::instrument(skip_all, fields(model = %self.model.name(), bindings = bindings.len()))]
    pub async fn delete_bindings(&self, bindings: &[InstanceBinding]) -> Result<bool, DomainError> {
        if let Some(pending) = bindings.iter().find(|b| !b.is_materialized()) {
            return Err(DomainError::validation(format!(
                "binding for {} carries no key",
                pending.tenant()
            )));
        }
        let method = self.model.schema().methods().delete.as_str();
        let results = dispatch(&self.model, bindings.to_vec(), method, &Fields::new(), true).await;

        let mut success = true;
        let mut fatal = None;
        for (binding, outcome) in results {
            match deleted(binding.tenant(), outcome) {
                Ok(flag) => success &= flag,
                Err(e) => {
                    success = false;
                    keep_first(&mut fatal, e);
                }
            }
        }
        fatal.map_or(Ok(success), Err)
    }

    /// Delete the record with `key` in `tenants`, or in every directory tenant.
    ///
    /// Tenants answering with a missing-record signal or a backend fault are
    /// skipped; skipping every tenant yields `false`. Refusals and transport
    /// failures also yield `false`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Connection`] when an endpoint cannot be reached.
    #[tracing::instrument(skip_all, fields(model = %self.model.name(), %key))]
    pub async fn delete_by_key(
        &self,
        key: &RemoteKey,
        tenants: Option<&[TenantId]>,
    ) -> Result<bool, DomainError> {
        let bindings: Vec<InstanceBinding> = self
            .model
            .session()
            .targets(tenants)?
            .into_iter()
            .map(|tenant| InstanceBinding::keyed(tenant, key.clone()))
            .collect();
        let attempted = bindings.len();
        let method = self.model.schema().methods().delete.as_str();
        let results = dispatch(&self.model, bindings, method, &Fields::new(), true).await;

        let mut success = true;
        let mut skipped = 0;
        let mut fatal = None;
        for (binding, outcome) in results {
            let tenant = binding.tenant().clone();
            match outcome {
                Ok((_, response)) => {
                    if response.as_flag() != Some(true) {
                        warn!(%tenant, "Delete refused");
                        success = false;
                    }
                }
                Err(e @ (ConnectorError::NotFound | ConnectorError::Fault(_))) => {
                    debug!(%tenant, error = %e, "Skipping tenant");
                    skipped += 1;
                }
                Err(e) if e.is_tenant_scoped() => {
                    warn!(%tenant, error = %e, "Delete failed in tenant");
                    success = false;
                }
                Err(e) => {
                    success = false;
                    keep_first(&mut fatal, DomainError::from_connector(tenant, e));
                }
            }
        }
        if skipped == attempted {
            success = false;
        }
        fatal.map_or(Ok(success), Err)
    }

    async fn update_each(
        &self,
        bindings: Vec<InstanceBinding>,
        fields: &Fields,
    ) -> Result<(Option<Record>, Skipped), DomainError> {
        let method = self.model.schema().methods().update.as_str();
        let mut skipped = Skipped::new(bindings.len());
        let results = dispatch(&self.model, bindings, method, fields, true).await;

        let mut record: Option<Record> = None;
        let mut fatal = None;
        for (binding, outcome) in results {
            let tenant = binding.tenant().clone();
            let answer =
                outcome.and_then(|(handle, response)| Ok((handle, single_record(response)?)));
            match answer {
                Ok((handle, row)) => {
                    let key = self.model.key_of(&row).or_else(|| binding.key().cloned());
                    let target = record.get_or_insert_with(|| Record::new(self.model.clone()));
                    target.populate(&row);
                    target.upsert_binding(tenant, key, Some(handle));
                }
                Err(e) => {
                    if let Err(fatal_error) = skipped.absorb(tenant, e, method) {
                        keep_first(&mut fatal, fatal_error);
                    }
                }
            }
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok((record, skipped)),
        }
    }

    async fn reconcile(
        &self,
        record: &mut Record,
        partition: &TenantPartition,
        policy: &DeletePolicy,
        fields: &Fields,
    ) -> Result<bool, DomainError> {
        let methods = self.model.schema().methods();
        let mut success = true;
        let mut fatal = None;

        for (name, value) in fields {
            record.set(name.clone(), value.clone());
        }
        if !partition.to_add.is_empty() || !record.is_fully_materialized() {
            record.clean(&[])?;
        }

        let updates = bindings_for(record, &partition.to_update);
        let (updates, pending): (Vec<_>, Vec<_>) =
            updates.into_iter().partition(InstanceBinding::is_materialized);
        if !pending.is_empty() {
            debug!(pending = pending.len(), "Pending tenants will be created");
        }
        for (binding, outcome) in dispatch(&self.model, updates, &methods.update, fields, true).await
        {
            let tenant = binding.tenant().clone();
            match outcome.and_then(|(handle, response)| Ok((handle, single_record(response)?))) {
                Ok((handle, row)) => {
                    record.populate(&row);
                    let key = self.model.key_of(&row);
                    record.upsert_binding(tenant, key, Some(handle));
                }
                Err(e) => {
                    success = false;
                    if e.is_tenant_scoped() {
                        warn!(%tenant, error = %e, "Update failed in tenant");
                    } else {
                        keep_first(&mut fatal, DomainError::from_connector(tenant, e));
                    }
                }
            }
        }

        if !partition.to_delete.is_empty() {
            success &= self
                .release(record, &partition.to_delete, policy, &mut fatal)
                .await;
        }

        record.claim_tenants(&partition.to_add);
        if !record.is_fully_materialized() {
            let mut payload = record.payload();
            payload.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            match self.create_pending(record, &payload).await {
                Ok(created) => debug!(created, "Added record to tenants"),
                Err(e @ (DomainError::Transport { .. } | DomainError::NotFound(_))) => {
                    warn!(error = %e, "Could not add record to every tenant");
                    success = false;
                }
                Err(e) => {
                    success = false;
                    keep_first(&mut fatal, e);
                }
            }
        }

        fatal.map_or(Ok(success), Err)
    }

    /// Apply `policy` to the bindings of `tenants`. Returns whether every
    /// tenant was released.
    async fn release(
        &self,
        record: &mut Record,
        tenants: &[TenantId],
        policy: &DeletePolicy,
        fatal: &mut Option<DomainError>,
    ) -> bool {
        let methods = self.model.schema().methods();
        let (keyed, pending): (Vec<_>, Vec<_>) = bindings_for(record, tenants)
            .into_iter()
            .partition(InstanceBinding::is_materialized);
        for binding in &pending {
            record.remove_binding(binding.tenant());
        }

        let (method, fields) = match policy {
            DeletePolicy::Retain => {
                debug!(tenants = keyed.len(), "Retaining records in dropped tenants");
                return true;
            }
            DeletePolicy::Delete => (methods.delete.as_str(), Fields::new()),
            DeletePolicy::Deactivate(fields) => (methods.update.as_str(), fields.clone()),
        };

        let mut success = true;
        for (binding, outcome) in dispatch(&self.model, keyed, method, &fields, true).await {
            let released = match policy {
                DeletePolicy::Deactivate(_) => settle(binding.tenant(), outcome.map(|_| true)),
                DeletePolicy::Delete | DeletePolicy::Retain => deleted(binding.tenant(), outcome),
            };
            match released {
                Ok(true) => {
                    record.remove_binding(binding.tenant());
                }
                Ok(false) => success = false,
                Err(e) => {
                    success = false;
                    keep_first(fatal, e);
                }
            }
        }
        success
    }
}

/// Bindings of `record` for `tenants`, in tenant order.
fn bindings_for(record: &Record, tenants: &[TenantId]) -> Vec<InstanceBinding> {
    tenants
        .iter()
        .filter_map(|t| record.binding(t).cloned())
        .collect()
}

/// Interpret a delete answer: `true` only for an explicit confirmation.
fn deleted(tenant: &TenantId, outcome: Answer) -> Result<bool, DomainError> {
    let confirmed = outcome.map(|(_, response)| response.as_flag() == Some(true));
    if matches!(confirmed, Ok(false)) {
        warn!(%tenant, "Delete refused");
    }
    settle(tenant, confirmed)
}

/// Downgrade tenant-scoped failures to `false`; anything else is an error.
fn settle(tenant: &TenantId, outcome: Result<bool, ConnectorError>) -> Result<bool, DomainError> {
    match outcome {
        Ok(flag) => Ok(flag),
        Err(e) if e.is_tenant_scoped() => {
            warn!(%tenant, error = %e, "Remote call failed in tenant");
            Ok(false)
        }
        Err(e) => Err(DomainError::from_connector(tenant.clone(), e)),
    }
}

fn single_record(response: RemoteResponse) -> Result<RemoteRecord, ConnectorError> {
    match response {
        RemoteResponse::Record(record) => Ok(record),
        RemoteResponse::Records(mut records) if records.len() == 1 => {
            records.pop().ok_or_else(|| ConnectorError::Protocol("empty answer".to_owned()))
        }
        other => Err(ConnectorError::Protocol(format!(
            "expected a single record, got {other:?}"
        ))),
    }
}

/// Fan `method` out over `bindings`, reusing each binding's handle when it
/// has one. Keyed calls add the binding's key to the arguments.
async fn dispatch(
    model: &Model,
    bindings: Vec<InstanceBinding>,
    method: &str,
    fields: &Fields,
    keyed: bool,
) -> Vec<(InstanceBinding, Answer)> {
    fan_out(model.session().fanout_policy(), bindings, |binding| async move {
        call_binding(model, &binding, method, fields, keyed).await
    })
    .await
}

async fn call_binding(
    model: &Model,
    binding: &InstanceBinding,
    method: &str,
    fields: &Fields,
    keyed: bool,
) -> Answer {
    let handle = match binding.connector() {
        Some(handle) => Arc::clone(handle),
        None => model.connect(binding.tenant()).await?,
    };
    let args = if keyed {
        let key = binding.key().ok_or_else(|| {
            ConnectorError::Protocol(format!("binding for {} carries no key", binding.tenant()))
        })?;
        model.keyed_args(fields, key)
    } else {
        fields.clone()
    };
    let response = handle.invoke(method, args).await?;
    Ok((handle, response))
}
