/*!
# Background

The catalog is the control plane's record of clusters, instances, configuration groups and
datastore reference data.  Callers see it as a set of tables holding serde-serializable rows,
each identified by a string id, with find/create/save and soft-delete semantics.

# Library

This library provides the `CatalogStore` trait defining the exact requirements, along with basic
implementations for filesystem and memory catalogs.

Rows are stored as JSON objects so that `Filter` predicates can match on any serialized field,
for example a tenant id, a cluster id, or the soft-delete flag.

Multi-row changes go through a `Transaction`, which a store applies all-or-nothing: every row
it creates is checked for duplicates before anything is written.

# Current limitations

* The user (e.g. the API controllers) needs to handle locking.
* Rows are never physically removed; `delete` only marks them.
*/

pub mod error;
pub mod filesystem;
pub mod filter;
pub mod memory;
pub mod transaction;

pub use error::{Error, Result};
pub use filesystem::FilesystemCatalog;
pub use filter::Filter;
pub use memory::MemoryCatalog;
pub use transaction::{Operation, Transaction};

use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use snafu::{ensure, ResultExt};
use std::collections::HashSet;
use std::fmt;

/// A type that is stored as one row of a catalog table.
pub trait Record: Serialize + DeserializeOwned {
    /// Name of the table holding rows of this type.
    const TABLE: &'static str;

    fn id(&self) -> &str;
}

/// Records that are never physically removed, only marked as deleted.
pub trait SoftDelete: Record {
    fn is_deleted(&self) -> bool;
    fn mark_deleted(&mut self, at: DateTime<Utc>);
}

/// Identifies a single row by table and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub table: String,
    pub id: String,
}

impl RowKey {
    pub fn new<S1, S2>(table: S1, id: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.id)
    }
}

pub trait CatalogStore {
    /// Retrieve the raw row with the given id, if present.
    fn get_row(&self, table: &str, id: &str) -> Result<Option<Value>>;
    /// Returns every row of the given table, ordered by id.  Soft-deleted rows are included.
    fn list_rows(&self, table: &str) -> Result<Vec<Value>>;
    /// Applies all operations in the transaction, or none of them.  Returns the changed rows.
    fn commit_transaction(&mut self, transaction: Transaction) -> Result<HashSet<RowKey>>;

    /// The schema version last applied to this catalog; 0 for a fresh catalog.
    fn schema_version(&self) -> Result<u32>;
    fn set_schema_version(&mut self, version: u32) -> Result<()>;
    /// Removes all rows and the schema marker.
    fn drop_all(&mut self) -> Result<()>;

    /// Returns whether a row exists under the given key.
    fn row_exists(&self, key: &RowKey) -> Result<bool> {
        Ok(self.get_row(&key.table, &key.id)?.is_some())
    }

    /// Retrieve one typed record by id.
    fn get<R: Record>(&self, id: &str) -> Result<Option<R>> {
        match self.get_row(R::TABLE, id)? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Returns all records of the type whose fields match the filter, ordered by id.
    fn find_all<R: Record>(&self, filter: &Filter) -> Result<Vec<R>> {
        let rows = self.list_rows(R::TABLE)?;
        trace!("Filtering {} rows of {} with {}", rows.len(), R::TABLE, filter);
        rows.into_iter()
            .filter(|row| filter.matches(row))
            .map(from_row)
            .collect()
    }

    /// Returns the single record matching the filter.
    fn find_by<R: Record>(&self, filter: &Filter) -> Result<R> {
        let mut found = self.find_all::<R>(filter)?;
        ensure!(
            !found.is_empty(),
            error::NotFoundSnafu {
                table: R::TABLE,
                filter: filter.to_string(),
            }
        );
        ensure!(
            found.len() == 1,
            error::AmbiguousSnafu {
                table: R::TABLE,
                filter: filter.to_string(),
                count: found.len(),
            }
        );
        Ok(found.remove(0))
    }

    /// Inserts a new record; fails if a row with the same id exists.
    fn create<R: Record>(&mut self, record: &R) -> Result<()> {
        let mut tx = Transaction::new(format!("create-{}", R::TABLE));
        tx.create(record)?;
        self.commit_transaction(tx)?;
        Ok(())
    }

    /// Inserts or replaces a record.
    fn save<R: Record>(&mut self, record: &R) -> Result<()> {
        let mut tx = Transaction::new(format!("save-{}", R::TABLE));
        tx.save(record)?;
        self.commit_transaction(tx)?;
        Ok(())
    }

    /// Marks the record deleted at the given time and saves it.  The row is kept.
    fn delete<R: SoftDelete>(&mut self, record: &mut R, at: DateTime<Utc>) -> Result<()> {
        debug!("Soft-deleting {} row '{}'", R::TABLE, record.id());
        record.mark_deleted(at);
        self.save(record)
    }
}

/// Checks that no row the transaction creates already exists, either in the store or earlier in
/// the same transaction.  Implementations call this before writing anything.
pub(crate) fn check_creates<F>(transaction: &Transaction, exists: F) -> Result<()>
where
    F: Fn(&RowKey) -> Result<bool>,
{
    let mut seen = HashSet::new();
    for (operation, key, _) in transaction.rows() {
        if *operation != Operation::Create {
            continue;
        }
        ensure!(
            seen.insert(key) && !exists(key)?,
            error::DuplicateSnafu {
                table: &key.table,
                id: &key.id,
            }
        );
    }
    Ok(())
}

fn from_row<R: Record>(row: Value) -> Result<R> {
    serde_json::from_value(row).context(error::DeserializeRowSnafu { table: R::TABLE })
}
