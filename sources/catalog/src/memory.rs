//! In-memory catalog for use in testing other modules.
//!
//! Mimics the decisions made for FilesystemCatalog, e.g. duplicate checks before any write.

use log::trace;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{check_creates, CatalogStore, Result, RowKey, Transaction};

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    // Table name -> (row id -> row)
    tables: HashMap<String, BTreeMap<String, Value>>,
    schema_version: u32,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Default::default()
    }
}

impl CatalogStore for MemoryCatalog {
    fn get_row(&self, table: &str, id: &str) -> Result<Option<Value>> {
        Ok(self.tables.get(table).and_then(|t| t.get(id)).cloned())
    }

    fn list_rows(&self, table: &str) -> Result<Vec<Value>> {
        Ok(self
            .tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    fn commit_transaction(&mut self, transaction: Transaction) -> Result<HashSet<RowKey>> {
        check_creates(&transaction, |key| self.row_exists(key))?;

        trace!(
            "Committing transaction '{}' with {} rows",
            transaction.name(),
            transaction.len()
        );
        let mut changed = HashSet::new();
        for (_, key, value) in transaction.into_rows() {
            self.tables
                .entry(key.table.clone())
                .or_default()
                .insert(key.id.clone(), value);
            changed.insert(key);
        }
        Ok(changed)
    }

    fn schema_version(&self) -> Result<u32> {
        Ok(self.schema_version)
    }

    fn set_schema_version(&mut self, version: u32) -> Result<()> {
        self.schema_version = version;
        Ok(())
    }

    fn drop_all(&mut self) -> Result<()> {
        self.tables.clear();
        self.schema_version = 0;
        Ok(())
    }
}
