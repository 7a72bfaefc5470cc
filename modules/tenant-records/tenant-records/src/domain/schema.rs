//! Model schemas: declared fields, method names and page addressing.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tenant_records_sdk::FieldValue;
use thiserror::Error;

/// Custom check run against a field value during cleaning.
pub type Validator = Arc<dyn Fn(&FieldValue) -> Result<(), String> + Send + Sync>;

/// Errors raised while assembling a [`ModelSchema`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Field '{field}' is declared more than once on {model}")]
    DuplicateField { model: String, field: String },

    #[error("Field '{field}' collides with the default id of {model}")]
    ReservedField { model: String, field: String },

    #[error("{model} exposes all fields and cannot declare custom fields")]
    FieldsWithAllFields { model: String },

    #[error("Model name must not be empty")]
    EmptyName,
}

/// Where a field of a model came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrigin {
    /// Declared in the schema.
    Declared,
    /// Observed in a remote response at runtime.
    Discovered,
}

/// A declared field with its validation rules.
#[derive(Clone)]
pub struct FieldSpec {
    name: String,
    min_length: Option<usize>,
    max_length: Option<usize>,
    validators: Vec<Validator>,
    default: FieldValue,
}

impl FieldSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_length: None,
            max_length: None,
            validators: Vec::new(),
            default: FieldValue::Null,
        }
    }

    #[must_use]
    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    #[must_use]
    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    #[must_use]
    pub fn validator<F>(mut self, check: F) -> Self
    where
        F: Fn(&FieldValue) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(check));
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = value.into();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn default(&self) -> &FieldValue {
        &self.default
    }

    /// Run length limits and custom validators, collecting every message.
    ///
    /// Null values are never length-checked.
    ///
    /// # Errors
    ///
    /// Returns all messages produced for `value`.
    pub fn clean(&self, value: &FieldValue) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let FieldValue::String(text) = value {
            let len = text.chars().count();
            if let Some(min) = self.min_length
                && len < min
            {
                errors.push(format!("ensure this value has at least {min} characters (it has {len})"));
            }
            if let Some(max) = self.max_length
                && len > max
            {
                errors.push(format!("ensure this value has at most {max} characters (it has {len})"));
            }
        }

        for check in &self.validators {
            if let Err(message) = check(value) {
                errors.push(message);
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("validators", &self.validators.len())
            .field("default", &self.default)
            .finish()
    }
}

/// Remote operation names used for each engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodNames {
    pub create: String,
    pub read: String,
    pub read_multiple: String,
    pub update: String,
    pub delete: String,
    /// Unfiltered listing; most pages do not offer one.
    pub all: Option<String>,
}

impl Default for MethodNames {
    fn default() -> Self {
        Self {
            create: "Create".to_owned(),
            read: "Read".to_owned(),
            read_multiple: "ReadMultiple".to_owned(),
            update: "Update".to_owned(),
            delete: "Delete".to_owned(),
            all: None,
        }
    }
}

/// Immutable description of a record type.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    name: String,
    page: String,
    codeunit_pages: Vec<String>,
    default_id: String,
    methods: MethodNames,
    readonly: BTreeSet<String>,
    all_fields: bool,
    declared: Vec<FieldSpec>,
}

impl ModelSchema {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ModelSchemaBuilder {
        ModelSchemaBuilder::new(name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Page path of the model, `Page/<Name>` unless overridden.
    #[must_use]
    pub fn page(&self) -> &str {
        &self.page
    }

    #[must_use]
    pub fn codeunit_pages(&self) -> &[String] {
        &self.codeunit_pages
    }

    #[must_use]
    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    #[must_use]
    pub fn methods(&self) -> &MethodNames {
        &self.methods
    }

    #[must_use]
    pub fn is_readonly(&self, field: &str) -> bool {
        self.readonly.contains(field)
    }

    #[must_use]
    pub fn exposes_all_fields(&self) -> bool {
        self.all_fields
    }

    #[must_use]
    pub fn declared_fields(&self) -> &[FieldSpec] {
        &self.declared
    }
}

/// Builder for [`ModelSchema`].
#[derive(Debug)]
pub struct ModelSchemaBuilder {
    name: String,
    page: Option<String>,
    codeunit_pages: Vec<String>,
    default_id: String,
    methods: MethodNames,
    readonly: BTreeSet<String>,
    all_fields: bool,
    parents: Vec<ModelSchema>,
    fields: Vec<FieldSpec>,
}

impl ModelSchemaBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page: None,
            codeunit_pages: Vec::new(),
            default_id: "Key".to_owned(),
            methods: MethodNames::default(),
            readonly: BTreeSet::new(),
            all_fields: false,
            parents: Vec::new(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn page(mut self, page: impl Into<String>) -> Self {
        self.page = Some(page.into());
        self
    }

    #[must_use]
    pub fn codeunit_page(mut self, page: impl Into<String>) -> Self {
        self.codeunit_pages.push(page.into());
        self
    }

    #[must_use]
    pub fn default_id(mut self, field: impl Into<String>) -> Self {
        self.default_id = field.into();
        self
    }

    #[must_use]
    pub fn methods(mut self, methods: MethodNames) -> Self {
        self.methods = methods;
        self
    }

    #[must_use]
    pub fn read_method(mut self, name: impl Into<String>) -> Self {
        self.methods.read = name.into();
        self
    }

    #[must_use]
    pub fn read_multiple_method(mut self, name: impl Into<String>) -> Self {
        self.methods.read_multiple = name.into();
        self
    }

    #[must_use]
    pub fn all_method(mut self, name: impl Into<String>) -> Self {
        self.methods.all = Some(name.into());
        self
    }

    #[must_use]
    pub fn readonly(mut self, field: impl Into<String>) -> Self {
        self.readonly.insert(field.into());
        self
    }

    /// Accept every field the backend returns instead of declaring them.
    #[must_use]
    pub fn all_fields(mut self) -> Self {
        self.all_fields = true;
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Inherit the declared fields of `parent`.
    #[must_use]
    pub fn extends(mut self, parent: &ModelSchema) -> Self {
        self.parents.push(parent.clone());
        self
    }

    /// Assemble the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when a field is declared twice across parents
    /// and body, when a field reuses the default id name, or when custom
    /// fields are combined with [`ModelSchemaBuilder::all_fields`].
    pub fn build(self) -> Result<ModelSchema, SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::EmptyName);
        }

        let mut declared: Vec<FieldSpec> = Vec::new();
        let is_declared =
            |declared: &[FieldSpec], name: &str| declared.iter().any(|f| f.name == name);

        for parent in &self.parents {
            for field in &parent.declared {
                if is_declared(&declared, &field.name) {
                    return Err(SchemaError::DuplicateField {
                        model: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
                declared.push(field.clone());
            }
        }

        for field in self.fields {
            if self.all_fields {
                return Err(SchemaError::FieldsWithAllFields { model: self.name });
            }
            if field.name == self.default_id {
                return Err(SchemaError::ReservedField {
                    model: self.name,
                    field: field.name,
                });
            }
            if is_declared(&declared, &field.name) {
                return Err(SchemaError::DuplicateField {
                    model: self.name,
                    field: field.name,
                });
            }
            declared.push(field);
        }

        let page = self.page.unwrap_or_else(|| format!("Page/{}", self.name));
        let mut codeunit_pages = self.codeunit_pages;
        if codeunit_pages.is_empty() {
            let object = page.rsplit('/').next().unwrap_or(&page);
            codeunit_pages.push(format!("Codeunit/{object}"));
        }

        Ok(ModelSchema {
            name: self.name,
            page,
            codeunit_pages,
            default_id: self.default_id,
            methods: self.methods,
            readonly: self.readonly,
            all_fields: self.all_fields,
            declared,
        })
    }
}

/// Runtime view of a model's fields: declared ones plus those discovered in
/// responses.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    declared: Vec<FieldSpec>,
    discovered: Vec<String>,
}

impl FieldRegistry {
    #[must_use]
    pub fn new(declared: Vec<FieldSpec>) -> Self {
        Self {
            declared,
            discovered: Vec::new(),
        }
    }

    #[must_use]
    pub fn declared(&self) -> &[FieldSpec] {
        &self.declared
    }

    #[must_use]
    pub fn declared_names(&self) -> Vec<String> {
        self.declared.iter().map(|f| f.name.clone()).collect()
    }

    #[must_use]
    pub fn discovered_names(&self) -> Vec<String> {
        self.discovered.clone()
    }

    /// Declared names followed by discovered names, without duplicates.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names = self.declared_names();
        names.extend(
            self.discovered
                .iter()
                .filter(|name| !self.declared.iter().any(|f| &f.name == *name))
                .cloned(),
        );
        names
    }

    #[must_use]
    pub fn origin(&self, name: &str) -> Option<FieldOrigin> {
        if self.declared.iter().any(|f| f.name == name) {
            Some(FieldOrigin::Declared)
        } else if self.discovered.iter().any(|d| d == name) {
            Some(FieldOrigin::Discovered)
        } else {
            None
        }
    }

    /// Record a field seen in a response. Known names are ignored.
    pub fn discover(&mut self, name: &str) {
        if self.origin(name).is_none() {
            self.discovered.push(name.to_owned());
        }
    }

    /// Declare plain fields from bare names.
    ///
    /// # Errors
    ///
    /// Returns the first duplicated name when `names` repeats itself.
    pub fn declare_names(&mut self, names: &[String]) -> Result<(), String> {
        let unique: BTreeSet<&String> = names.iter().collect();
        if unique.len() != names.len() {
            let duplicate = names
                .iter()
                .enumerate()
                .find(|(i, name)| names[..*i].contains(name))
                .map(|(_, name)| name.clone())
                .unwrap_or_default();
            return Err(duplicate);
        }
        for name in names {
            if !self.declared.iter().any(|f| &f.name == name) {
                self.declared.push(FieldSpec::new(name.clone()));
            }
        }
        Ok(())
    }
}
