use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tenant_records_sdk::{
    ConnectorError, Fields, RemoteHandle, RemoteKey, RemoteRecord, TenantId,
};

use crate::domain::error::DomainError;
use crate::domain::query::QuerySet;
use crate::domain::record::Record;
use crate::domain::registry::OperationRegistry;
use crate::domain::schema::{FieldOrigin, FieldRegistry, FieldSpec, ModelSchema};
use crate::domain::session::Session;

/// A schema bound to a session. Cheap to clone; clones share the runtime
/// field registry.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

struct ModelInner {
    schema: ModelSchema,
    session: Session,
    operations: OperationRegistry,
    fields: RwLock<FieldRegistry>,
}

impl Model {
    pub(crate) fn new(schema: ModelSchema, session: Session, operations: OperationRegistry) -> Self {
        let fields = FieldRegistry::new(schema.declared_fields().to_vec());
        Self {
            inner: Arc::new(ModelInner {
                schema,
                session,
                operations,
                fields: RwLock::new(fields),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.schema.name()
    }

    #[must_use]
    pub fn schema(&self) -> &ModelSchema {
        &self.inner.schema
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    #[must_use]
    pub fn operations(&self) -> &OperationRegistry {
        &self.inner.operations
    }

    /// A fresh query set over this model.
    #[must_use]
    pub fn objects(&self) -> QuerySet {
        QuerySet::new(self.clone())
    }

    /// Declared and discovered field names.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.inner.fields.read().names()
    }

    #[must_use]
    pub fn declared_field_names(&self) -> Vec<String> {
        self.inner.fields.read().declared_names()
    }

    #[must_use]
    pub fn discovered_field_names(&self) -> Vec<String> {
        self.inner.fields.read().discovered_names()
    }

    #[must_use]
    pub fn field_origin(&self, name: &str) -> Option<FieldOrigin> {
        self.inner.fields.read().origin(name)
    }

    pub(crate) fn declared_fields(&self) -> Vec<FieldSpec> {
        self.inner.fields.read().declared().to_vec()
    }

    pub(crate) fn discover_field(&self, name: &str) {
        if name != self.inner.schema.default_id() {
            self.inner.fields.write().discover(name);
        }
    }

    pub(crate) fn declare_field_names(&self, names: &[String]) -> Result<(), DomainError> {
        self.inner
            .fields
            .write()
            .declare_names(names)
            .map_err(|duplicate| {
                DomainError::validation(format!("field '{duplicate}' is given more than once"))
            })
    }

    /// Build an unsaved record holding `fields` on top of declared defaults.
    ///
    /// A model without declared fields adopts the given names as declared.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when `fields` sets the default id,
    /// which only the ledger may carry, or names a field the model does not
    /// know.
    pub fn instantiate(&self, fields: Fields) -> Result<Record, DomainError> {
        let default_id = self.inner.schema.default_id();
        if fields.contains_key(default_id) {
            return Err(DomainError::validation(format!(
                "'{default_id}' is assigned by the backend and cannot be set"
            )));
        }

        if self.declared_field_names().is_empty() {
            if !self.inner.schema.exposes_all_fields() {
                let names: Vec<String> = fields.keys().cloned().collect();
                self.declare_field_names(&names)?;
            }
        } else {
            let unknown: Vec<&str> = fields
                .keys()
                .filter(|name| self.field_origin(name).is_none())
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                return Err(DomainError::validation(format!(
                    "{} got unexpected fields: {}",
                    self.name(),
                    unknown.join(", ")
                )));
            }
        }
        let mut record = Record::new(self.clone());
        for (name, value) in fields {
            record.set(name, value);
        }
        Ok(record)
    }

    pub(crate) fn key_of(&self, response: &RemoteRecord) -> Option<RemoteKey> {
        response
            .get(self.inner.schema.default_id())
            .and_then(RemoteKey::from_value)
    }

    /// Arguments of a keyed call: `fields` plus the default id.
    pub(crate) fn keyed_args(&self, fields: &Fields, key: &RemoteKey) -> Fields {
        let mut args = fields.clone();
        args.insert(
            self.inner.schema.default_id().to_owned(),
            key.clone().into(),
        );
        args
    }

    /// Turn one tenant's response into a single-binding record.
    pub(crate) fn materialize(
        &self,
        tenant: TenantId,
        handle: Arc<dyn RemoteHandle>,
        response: &RemoteRecord,
    ) -> Result<Record, ConnectorError> {
        let key = self.key_of(response).ok_or_else(|| {
            ConnectorError::Protocol(format!(
                "response for {} carries no '{}'",
                self.name(),
                self.inner.schema.default_id()
            ))
        })?;
        let mut record = Record::new(self.clone());
        record.populate(response);
        record.upsert_binding(tenant, Some(key), Some(handle));
        Ok(record)
    }

    pub(crate) async fn connect(
        &self,
        tenant: &TenantId,
    ) -> Result<Arc<dyn RemoteHandle>, ConnectorError> {
        self.inner
            .session
            .connect_page(self.inner.schema.page(), tenant)
            .await
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name())
            .field("page", &self.inner.schema.page())
            .finish_non_exhaustive()
    }
}
