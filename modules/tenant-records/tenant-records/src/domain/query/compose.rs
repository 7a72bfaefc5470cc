use tenant_records_sdk::{Fields, TenantId};
use tracing::warn;

use super::{GetOutcome, QuerySet, UpdateOptions};
use crate::domain::error::DomainError;

impl QuerySet {
    /// Return the record matching `criteria`, creating it from
    /// `criteria` and `defaults` when no tenant has it.
    ///
    /// The flag is `true` when the record was created.
    ///
    /// # Errors
    ///
    /// - [`DomainError::Validation`] when `defaults` are empty, repeat a
    ///   criterion, or name a field the model does not know
    /// - any error of [`QuerySet::get`] other than `NotFound`
    /// - any error of [`QuerySet::create`]
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn get_or_create(
        &mut self,
        criteria: &Fields,
        defaults: &Fields,
        tenants: Option<&[TenantId]>,
    ) -> Result<(GetOutcome, bool), DomainError> {
        self.prepare_defaults(criteria, defaults)?;
        self.model.session().explicit(tenants)?;

        match self.get(criteria).await {
            Ok(outcome) => Ok((outcome, false)),
            Err(e) if e.is_not_found() => {
                let record = self.create(tenants, &merged(criteria, defaults)).await?;
                Ok((GetOutcome::One(record), true))
            }
            Err(e) => Err(e),
        }
    }

    /// Reconcile the record matching `criteria` with `defaults` and the
    /// desired tenants in `options`, creating it when no tenant has it.
    ///
    /// When several distinct records match, every one of them is updated.
    /// The flag is `true` when the record was created.
    ///
    /// # Errors
    ///
    /// As [`QuerySet::get_or_create`], plus the errors of
    /// [`QuerySet::update_record`].
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn update_or_create(
        &mut self,
        criteria: &Fields,
        defaults: &Fields,
        options: &UpdateOptions,
    ) -> Result<(GetOutcome, bool), DomainError> {
        self.prepare_defaults(criteria, defaults)?;
        let tenants = self.model.session().explicit(options.tenants.as_deref())?;

        match self.get(criteria).await {
            Ok(GetOutcome::One(mut record)) => {
                if !self.update_record(&mut record, options, defaults).await? {
                    warn!("Record was not reconciled in every tenant");
                }
                self.results.replace(vec![record.clone()]);
                Ok((GetOutcome::One(record), false))
            }
            Ok(GetOutcome::Many(_)) => {
                if !self.update_loaded(options, defaults).await? {
                    warn!("Records were not reconciled in every tenant");
                }
                Ok((GetOutcome::Many(self.results.clone()), false))
            }
            Err(e) if e.is_not_found() => {
                let record = self.create(tenants, &merged(criteria, defaults)).await?;
                Ok((GetOutcome::One(record), true))
            }
            Err(e) => Err(e),
        }
    }

    /// Validate `defaults` before any remote call. A model without declared
    /// fields adopts the criteria and default names as its declared fields
    /// so later saves carry them; only models declaring fields reject
    /// unknown defaults. Lookup names the model does not know yet are
    /// registered as discovered, so a missing record can be created from them.
    fn prepare_defaults(&self, criteria: &Fields, defaults: &Fields) -> Result<(), DomainError> {
        if defaults.is_empty() {
            return Err(DomainError::validation("defaults are required"));
        }

        let duplicates: Vec<&str> = defaults
            .keys()
            .filter(|k| criteria.contains_key(k.as_str()))
            .map(String::as_str)
            .collect();
        if !duplicates.is_empty() {
            return Err(DomainError::validation(format!(
                "duplicate keywords in criteria and defaults: {}",
                duplicates.join(", ")
            )));
        }

        if self.model.declared_field_names().is_empty() {
            if !self.model.schema().exposes_all_fields() {
                let names: Vec<String> = criteria.keys().chain(defaults.keys()).cloned().collect();
                self.model.declare_field_names(&names)?;
            }
            return Ok(());
        }

        let unknown: Vec<&str> = defaults
            .keys()
            .filter(|k| self.model.field_origin(k).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(DomainError::validation(format!(
                "fields not known to {}: {}",
                self.model.name(),
                unknown.join(", ")
            )));
        }

        for name in criteria.keys() {
            if self.model.field_origin(name).is_none() {
                self.model.discover_field(name);
            }
        }
        Ok(())
    }
}

fn merged(criteria: &Fields, defaults: &Fields) -> Fields {
    let mut fields = criteria.clone();
    fields.extend(defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
    fields
}
