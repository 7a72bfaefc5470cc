//! Records and their identity ledger.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tenant_records_sdk::{FieldValue, Fields, RemoteHandle, RemoteKey, RemoteRecord, TenantId};

use crate::domain::error::{DomainError, FieldErrors};
use crate::domain::model::Model;
use crate::domain::query::UpdateOptions;

/// Where one logical record lives: a tenant, the key assigned there, and
/// the handle it was read or written through.
///
/// A binding without a key marks a tenant the record is meant to exist in
/// but has not been created in yet.
#[derive(Clone)]
pub struct InstanceBinding {
    tenant: TenantId,
    key: Option<RemoteKey>,
    connector: Option<Arc<dyn RemoteHandle>>,
}

impl InstanceBinding {
    #[must_use]
    pub fn pending(tenant: TenantId) -> Self {
        Self {
            tenant,
            key: None,
            connector: None,
        }
    }

    #[must_use]
    pub fn keyed(tenant: TenantId, key: RemoteKey) -> Self {
        Self {
            tenant,
            key: Some(key),
            connector: None,
        }
    }

    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    #[must_use]
    pub fn key(&self) -> Option<&RemoteKey> {
        self.key.as_ref()
    }

    #[must_use]
    pub fn connector(&self) -> Option<&Arc<dyn RemoteHandle>> {
        self.connector.as_ref()
    }

    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.key.is_some()
    }
}

impl fmt::Debug for InstanceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceBinding")
            .field("tenant", &self.tenant)
            .field("key", &self.key)
            .field("endpoint", &self.connector.as_ref().map(|c| c.endpoint()))
            .finish()
    }
}

/// One logical record, possibly replicated across several tenants.
///
/// Two records are the same logical record when every declared and
/// discovered field compares equal; a field missing on one side counts as
/// null. Keys and tenants take no part in identity.
#[derive(Clone)]
pub struct Record {
    model: Model,
    values: Fields,
    bindings: Vec<InstanceBinding>,
    unresolved: BTreeSet<String>,
}

impl Record {
    pub(crate) fn new(model: Model) -> Self {
        let values = model
            .declared_fields()
            .iter()
            .map(|f| (f.name().to_owned(), f.default().clone()))
            .collect();
        Self {
            model,
            values,
            bindings: Vec::new(),
            unresolved: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// Value of `field`, null when the record never saw it.
    #[must_use]
    pub fn value(&self, field: &str) -> &FieldValue {
        self.values.get(field).unwrap_or(&FieldValue::Null)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        let field = field.into();
        self.unresolved.remove(&field);
        self.values.insert(field, value.into());
    }

    #[must_use]
    pub fn values(&self) -> &Fields {
        &self.values
    }

    /// Declared fields the last response did not carry.
    #[must_use]
    pub fn unresolved_fields(&self) -> &BTreeSet<String> {
        &self.unresolved
    }

    #[must_use]
    pub fn bindings(&self) -> &[InstanceBinding] {
        &self.bindings
    }

    #[must_use]
    pub fn binding(&self, tenant: &TenantId) -> Option<&InstanceBinding> {
        self.bindings.iter().find(|b| &b.tenant == tenant)
    }

    #[must_use]
    pub fn tenants(&self) -> Vec<TenantId> {
        self.bindings.iter().map(|b| b.tenant.clone()).collect()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<RemoteKey> {
        self.bindings.iter().filter_map(|b| b.key.clone()).collect()
    }

    /// Every binding carries a key. Vacuously true without bindings.
    #[must_use]
    pub fn is_fully_materialized(&self) -> bool {
        self.bindings.iter().all(InstanceBinding::is_materialized)
    }

    /// Insert or refresh the binding for `tenant`. `None` arguments keep the
    /// existing key or handle.
    pub fn upsert_binding(
        &mut self,
        tenant: TenantId,
        key: Option<RemoteKey>,
        connector: Option<Arc<dyn RemoteHandle>>,
    ) {
        if let Some(existing) = self.bindings.iter_mut().find(|b| b.tenant == tenant) {
            if key.is_some() {
                existing.key = key;
            }
            if connector.is_some() {
                existing.connector = connector;
            }
        } else {
            self.bindings.push(InstanceBinding {
                tenant,
                key,
                connector,
            });
        }
    }

    pub fn remove_binding(&mut self, tenant: &TenantId) -> Option<InstanceBinding> {
        let index = self.bindings.iter().position(|b| &b.tenant == tenant)?;
        Some(self.bindings.remove(index))
    }

    /// Add pending bindings for tenants the record does not hold yet.
    pub fn claim_tenants(&mut self, tenants: &[TenantId]) {
        for tenant in tenants {
            if self.binding(tenant).is_none() {
                self.bindings.push(InstanceBinding::pending(tenant.clone()));
            }
        }
    }

    pub(crate) fn absorb(&mut self, other: Record) {
        for binding in other.bindings {
            self.upsert_binding(binding.tenant, binding.key, binding.connector);
        }
    }

    /// Copy a response into the record.
    ///
    /// The default id goes to the ledger, never to the values. Undeclared
    /// fields are registered as discovered. Declared fields absent from the
    /// response are marked unresolved and keep their current value, falling
    /// back to the declared default.
    pub fn populate(&mut self, response: &RemoteRecord) {
        let default_id = self.model.schema().default_id().to_owned();
        for (name, value) in response {
            if *name == default_id {
                continue;
            }
            self.values.insert(name.clone(), value.clone());
            self.model.discover_field(name);
        }

        self.unresolved.clear();
        for field in self.model.declared_fields() {
            if response.contains_key(field.name()) {
                continue;
            }
            self.unresolved.insert(field.name().to_owned());
            self.values
                .entry(field.name().to_owned())
                .or_insert_with(|| field.default().clone());
        }
    }

    #[must_use]
    pub fn same_identity(&self, other: &Record) -> bool {
        self.model
            .field_names()
            .iter()
            .all(|name| self.value(name) == other.value(name))
    }

    /// Validate declared fields, skipping `exclude` and unresolved fields.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] with every failing field's messages.
    pub fn clean(&self, exclude: &[&str]) -> Result<(), DomainError> {
        let mut errors = FieldErrors::new();
        for field in self.model.declared_fields() {
            if exclude.contains(&field.name()) || self.unresolved.contains(field.name()) {
                continue;
            }
            if let Err(messages) = field.clean(self.value(field.name())) {
                errors.insert(field.name().to_owned(), messages);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DomainError::invalid_fields(errors))
        }
    }

    /// Writable values: every known field the record holds, minus read-only ones.
    #[must_use]
    pub fn payload(&self) -> Fields {
        let schema = self.model.schema();
        self.model
            .field_names()
            .into_iter()
            .filter(|name| !schema.is_readonly(name))
            .filter_map(|name| self.values.get(&name).cloned().map(|value| (name, value)))
            .collect()
    }

    /// Persist the record.
    ///
    /// A fully materialized record is updated in every tenant it holds.
    /// Otherwise it is created in each tenant still pending; a record with
    /// no bindings at all claims the whole directory first.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when cleaning fails and the error
    /// of the underlying update or create otherwise.
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn save(&mut self) -> Result<bool, DomainError> {
        self.clean(&[])?;
        let payload = self.payload();
        let objects = self.model.objects();

        if self.bindings.is_empty() {
            let tenants = self.model.session().tenants();
            self.claim_tenants(&tenants);
            if self.bindings.is_empty() {
                return Err(DomainError::validation(
                    "no tenant to save into; the tenant directory is empty",
                ));
            }
        }

        if self.is_fully_materialized() {
            objects
                .update_record(self, &UpdateOptions::default(), &payload)
                .await
        } else {
            objects.create_pending(self, &payload).await?;
            Ok(true)
        }
    }

    /// Delete the record in every tenant it is bound to.
    ///
    /// # Errors
    ///
    /// See [`crate::QuerySet::delete_record`].
    pub async fn delete(&mut self) -> Result<bool, DomainError> {
        self.model.objects().delete_record(self).await
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.model.name())
            .field("values", &self.values)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}
