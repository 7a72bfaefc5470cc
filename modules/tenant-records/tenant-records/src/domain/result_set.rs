use std::fmt;

use crate::domain::error::DomainError;
use crate::domain::model::Model;
use crate::domain::record::Record;

/// Records produced by the last read of a query set.
///
/// A result set that was never populated rejects every access with
/// [`DomainError::EmptyResult`]; a populated set may still hold zero records.
#[derive(Clone)]
pub struct ResultSet {
    model: Model,
    records: Option<Vec<Record>>,
}

impl ResultSet {
    #[must_use]
    pub fn unpopulated(model: Model) -> Self {
        Self {
            model,
            records: None,
        }
    }

    #[must_use]
    pub fn populated(model: Model, records: Vec<Record>) -> Self {
        Self {
            model,
            records: Some(records),
        }
    }

    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.records.is_some()
    }

    /// # Errors
    ///
    /// Returns [`DomainError::EmptyResult`] when nothing was loaded yet.
    pub fn len(&self) -> Result<usize, DomainError> {
        self.records().map(<[Record]>::len)
    }

    /// # Errors
    ///
    /// Returns [`DomainError::EmptyResult`] when nothing was loaded yet.
    pub fn is_empty(&self) -> Result<bool, DomainError> {
        self.records().map(<[Record]>::is_empty)
    }

    /// Record at `index`, or `None` past the end.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::EmptyResult`] when nothing was loaded yet.
    pub fn get(&self, index: usize) -> Result<Option<&Record>, DomainError> {
        self.records().map(|records| records.get(index))
    }

    /// # Errors
    ///
    /// Returns [`DomainError::EmptyResult`] when nothing was loaded yet.
    pub fn iter(&self) -> Result<std::slice::Iter<'_, Record>, DomainError> {
        self.records().map(<[Record]>::iter)
    }

    /// # Errors
    ///
    /// Returns [`DomainError::EmptyResult`] when nothing was loaded yet.
    pub fn records(&self) -> Result<&[Record], DomainError> {
        self.records.as_deref().ok_or(DomainError::EmptyResult)
    }

    /// # Errors
    ///
    /// Returns [`DomainError::EmptyResult`] when nothing was loaded yet.
    pub fn into_records(self) -> Result<Vec<Record>, DomainError> {
        self.records.ok_or(DomainError::EmptyResult)
    }

    pub(crate) fn replace(&mut self, records: Vec<Record>) {
        self.records = Some(records);
    }

    pub(crate) fn take(&mut self) -> Result<Vec<Record>, DomainError> {
        self.records.take().ok_or(DomainError::EmptyResult)
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("model", &self.model.name())
            .field("records", &self.records)
            .finish()
    }
}
