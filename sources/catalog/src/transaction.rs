//! Batches of row writes that a store applies all-or-nothing.

use serde_json::Value;
use snafu::ResultExt;

use super::{error, Record, Result, RowKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Insert a new row; the commit fails if the id is taken.
    Create,
    /// Insert or replace a row.
    Save,
}

/// A named set of pending row writes.  Nothing is visible in the store until the transaction is
/// passed to `CatalogStore::commit_transaction`.
#[derive(Debug, Clone)]
pub struct Transaction {
    name: String,
    rows: Vec<(Operation, RowKey, Value)>,
}

impl Transaction {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create<R: Record>(&mut self, record: &R) -> Result<()> {
        self.push(Operation::Create, record)
    }

    pub fn save<R: Record>(&mut self, record: &R) -> Result<()> {
        self.push(Operation::Save, record)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = &(Operation, RowKey, Value)> {
        self.rows.iter()
    }

    pub(crate) fn into_rows(self) -> Vec<(Operation, RowKey, Value)> {
        self.rows
    }

    fn push<R: Record>(&mut self, operation: Operation, record: &R) -> Result<()> {
        let value = serde_json::to_value(record).context(error::SerializeRowSnafu {
            table: R::TABLE,
            id: record.id(),
        })?;
        self.rows
            .push((operation, RowKey::new(R::TABLE, record.id()), value));
        Ok(())
    }
}
