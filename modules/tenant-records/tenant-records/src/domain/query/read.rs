use std::sync::Arc;

use tenant_records_sdk::{
    ConnectorError, Fields, FieldValue, FilterCondition, RemoteHandle, RemoteResponse, TenantId,
};
use tracing::debug;

use super::{GetOutcome, QuerySet, Skipped, merge_candidate};
use crate::domain::error::DomainError;
use crate::domain::fanout::fan_out;
use crate::domain::record::Record;
use crate::domain::result_set::ResultSet;

/// Argument name carrying the conditions of a multi-record read.
pub const FILTER_ARGUMENT: &str = "filter";

impl QuerySet {
    /// Look up one logical record in every tenant.
    ///
    /// Responses from different tenants describing the same record merge
    /// into one [`Record`] with a binding per tenant. When distinct records
    /// match, all of them are loaded into the query set and returned as
    /// [`GetOutcome::Many`].
    ///
    /// # Errors
    ///
    /// - [`DomainError::Validation`] when `criteria` do not fit the advertised signature
    /// - [`DomainError::NotFound`] when no tenant returned a record
    /// - [`DomainError::MultipleFound`] when one tenant answered with several records
    /// - [`DomainError::Transport`] when every tenant failed in transit
    /// - [`DomainError::Connection`] when an endpoint cannot be reached
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn get(&mut self, criteria: &Fields) -> Result<GetOutcome, DomainError> {
        let method = self.model.schema().methods().read.clone();
        self.model
            .operations()
            .check_arguments(self.model.schema().page(), &method, criteria)?;

        let (records, skipped) = self.collect(&method, criteria, true).await?;
        match records.len() {
            0 => Err(if skipped.all_failed_in_transit() {
                skipped
                    .into_transport_error()
                    .unwrap_or_else(|| DomainError::not_found(self.model.name()))
            } else {
                DomainError::not_found(format!("no {} matches the criteria", self.model.name()))
            }),
            1 => {
                self.results.replace(records.clone());
                let record = records.into_iter().next().ok_or(DomainError::EmptyResult)?;
                Ok(GetOutcome::One(record))
            }
            count => {
                debug!(count, "Lookup matched several distinct records");
                self.results.replace(records);
                Ok(GetOutcome::Many(self.results.clone()))
            }
        }
    }

    /// Read every record matching `conditions` across all tenants.
    ///
    /// Tenants that fail are skipped; the read fails only when all of them did.
    ///
    /// # Errors
    ///
    /// - [`DomainError::Transport`] when every tenant failed in transit
    /// - [`DomainError::Connection`] when an endpoint cannot be reached
    #[tracing::instrument(skip_all, fields(model = %self.model.name(), conditions = conditions.len()))]
    pub async fn filter(&mut self, conditions: &[FilterCondition]) -> Result<ResultSet, DomainError> {
        let method = self.model.schema().methods().read_multiple.clone();
        let mut args = Fields::new();
        args.insert(
            FILTER_ARGUMENT.to_owned(),
            serde_json::to_value(conditions).map_err(|e| DomainError::validation(e.to_string()))?,
        );
        self.load(&method, &args).await
    }

    /// Equality filter over `criteria`.
    ///
    /// # Errors
    ///
    /// See [`QuerySet::filter`].
    pub async fn filter_by(&mut self, criteria: &Fields) -> Result<ResultSet, DomainError> {
        self.filter(&FilterCondition::from_criteria(criteria)).await
    }

    /// Read every record through the model's unfiltered listing operation.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Unsupported`] when the model declares no such
    /// operation, otherwise as [`QuerySet::filter`].
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn all(&mut self) -> Result<ResultSet, DomainError> {
        let method = self
            .model
            .schema()
            .methods()
            .all
            .clone()
            .ok_or_else(|| DomainError::unsupported(self.model.name(), "all"))?;
        self.load(&method, &Fields::new()).await
    }

    /// Invoke a custom operation advertised by one of the model's codeunit
    /// pages in every tenant. The name is matched case-insensitively.
    ///
    /// # Errors
    ///
    /// - [`DomainError::Unsupported`] when no codeunit page advertises `name`
    /// - [`DomainError::Validation`] when `args` do not fit the signature
    /// - [`DomainError::Transport`] when every tenant failed in transit
    #[tracing::instrument(skip_all, fields(model = %self.model.name(), operation = name))]
    pub async fn call(
        &self,
        name: &str,
        args: &Fields,
    ) -> Result<Vec<(TenantId, RemoteResponse)>, DomainError> {
        let schema = self.model.schema();
        let (page, method) = self
            .model
            .operations()
            .find(schema.codeunit_pages(), name)
            .ok_or_else(|| DomainError::unsupported(self.model.name(), name))?;
        self.model
            .operations()
            .check_arguments(page, &method.name, args)?;

        let session = self.model.session();
        let method = method.name.as_str();
        let results = fan_out(
            session.fanout_policy(),
            session.tenants().to_vec(),
            |tenant| async move {
                let handle = session.connect_page(page, &tenant).await?;
                handle.invoke(method, args.clone()).await
            },
        )
        .await;

        let mut skipped = Skipped::new(results.len());
        let mut responses = Vec::with_capacity(results.len());
        for (tenant, outcome) in results {
            match outcome {
                Ok(response) => responses.push((tenant, response)),
                Err(e) => skipped.absorb(tenant, e, method)?,
            }
        }
        if skipped.all_failed_in_transit()
            && let Some(error) = skipped.into_transport_error()
        {
            return Err(error);
        }
        Ok(responses)
    }

    async fn load(&mut self, method: &str, args: &Fields) -> Result<ResultSet, DomainError> {
        let (records, skipped) = self.collect(method, args, false).await?;
        debug!(count = records.len(), skipped = skipped.count(), "Loaded records");
        if records.is_empty()
            && skipped.all_failed_in_transit()
            && let Some(error) = skipped.into_transport_error()
        {
            return Err(error);
        }
        self.results.replace(records);
        Ok(self.results.clone())
    }

    /// Fan `method` out to every tenant and merge the answers by identity.
    async fn collect(
        &self,
        method: &str,
        args: &Fields,
        single: bool,
    ) -> Result<(Vec<Record>, Skipped), DomainError> {
        let model = &self.model;
        let session = model.session();
        let results = fan_out(
            session.fanout_policy(),
            session.tenants().to_vec(),
            |tenant| async move {
                let handle = model.connect(&tenant).await?;
                let response = handle.invoke(method, args.clone()).await?;
                Ok::<(Arc<dyn RemoteHandle>, RemoteResponse), ConnectorError>((handle, response))
            },
        )
        .await;

        let mut skipped = Skipped::new(results.len());
        let mut records: Vec<Record> = Vec::new();
        for (tenant, outcome) in results {
            let (handle, response) = match outcome {
                Ok(answer) => answer,
                Err(e) => {
                    skipped.absorb(tenant, e, method)?;
                    continue;
                }
            };
            let rows = response.into_records().ok_or_else(|| {
                DomainError::from_connector(
                    tenant.clone(),
                    ConnectorError::Protocol(format!("{method} did not return records")),
                )
            })?;
            if single && rows.len() > 1 {
                return Err(DomainError::MultipleFound { count: rows.len() });
            }
            debug!(%tenant, count = rows.len(), "Tenant answered");
            for row in &rows {
                let candidate = model
                    .materialize(tenant.clone(), Arc::clone(&handle), row)
                    .map_err(|e| DomainError::from_connector(tenant.clone(), e))?;
                merge_candidate(&mut records, candidate);
            }
        }
        Ok((records, skipped))
    }
}

/// Equality criteria from `(field, value)` pairs.
#[must_use]
pub fn criteria<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Fields
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
