use catalog::{CatalogStore, Filter, SoftDelete, Transaction};
use chrono::Utc;
use log::info;
use model::{DatastoreConfigurationParameter, DatastoreVersion, ValidationRule, ValidationRules};
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::{effective_rules, RuleRegistry};
use crate::context::RequestContext;
use crate::datastore;
use crate::error::{self, Result};
use crate::{read_store, write_store, SharedStore};

/// The parameters each datastore version accepts in a configuration group.
pub struct ParameterCatalog<S> {
    store: SharedStore<S>,
    rules: Arc<RuleRegistry>,
}

impl<S: CatalogStore> ParameterCatalog<S> {
    pub fn new(store: SharedStore<S>, rules: Arc<RuleRegistry>) -> Self {
        Self { store, rules }
    }

    pub fn list_parameters(
        &self,
        datastore: &str,
        version: Option<&str>,
    ) -> Result<Vec<ValidationRule>> {
        let store = read_store(&self.store)?;
        let (_, version) = datastore::resolve(&*store, datastore, version)?;
        let rules = effective_rules(&*store, &self.rules, &version)?;
        Ok(rules.iter().cloned().collect())
    }

    pub fn show_parameter(
        &self,
        datastore: &str,
        version: Option<&str>,
        name: &str,
    ) -> Result<ValidationRule> {
        let store = read_store(&self.store)?;
        let (_, version) = datastore::resolve(&*store, datastore, version)?;
        let rules = effective_rules(&*store, &self.rules, &version)?;
        rules.get(name).cloned().context(error::ConfigKeyNotFoundSnafu {
            key: name,
            version: &version.name,
        })
    }

    /// Adds a parameter to the version's catalog.  A previously deleted parameter of the same
    /// name is brought back with the new rule.
    pub fn create_parameter(
        &self,
        ctx: &RequestContext,
        datastore: &str,
        version: Option<&str>,
        rule: &ValidationRule,
    ) -> Result<DatastoreConfigurationParameter> {
        require_admin(ctx, "create configuration parameters")?;
        let mut store = write_store(&self.store)?;
        let (_, version) = datastore::resolve(&*store, datastore, version)?;
        let param = match find_parameter(&*store, &version.id, &rule.name)? {
            Some(existing) if !existing.deleted => {
                return error::ParameterExistsSnafu {
                    name: &rule.name,
                    version: &version.name,
                }
                .fail()
            }
            Some(mut deleted) => {
                deleted.update_from(rule);
                deleted
            }
            None => DatastoreConfigurationParameter::from_rule(
                Uuid::new_v4().to_string(),
                version.id.clone(),
                rule,
            ),
        };
        store.save(&param).context(error::CatalogSnafu)?;
        info!(
            "Created parameter '{}' for datastore version '{}'",
            rule.name, version.name
        );
        Ok(param)
    }

    pub fn modify_parameter(
        &self,
        ctx: &RequestContext,
        datastore: &str,
        version: Option<&str>,
        rule: &ValidationRule,
    ) -> Result<DatastoreConfigurationParameter> {
        require_admin(ctx, "modify configuration parameters")?;
        let mut store = write_store(&self.store)?;
        let (_, version) = datastore::resolve(&*store, datastore, version)?;
        let mut param = live_parameter(&*store, &version, &rule.name)?;
        param.update_from(rule);
        store.save(&param).context(error::CatalogSnafu)?;
        info!(
            "Modified parameter '{}' for datastore version '{}'",
            rule.name, version.name
        );
        Ok(param)
    }

    pub fn delete_parameter(
        &self,
        ctx: &RequestContext,
        datastore: &str,
        version: Option<&str>,
        name: &str,
    ) -> Result<()> {
        require_admin(ctx, "delete configuration parameters")?;
        let mut store = write_store(&self.store)?;
        let (_, version) = datastore::resolve(&*store, datastore, version)?;
        let mut param = live_parameter(&*store, &version, name)?;
        store
            .delete(&mut param, Utc::now())
            .context(error::CatalogSnafu)?;
        info!(
            "Deleted parameter '{}' for datastore version '{}'",
            name, version.name
        );
        Ok(())
    }

    /// Loads every rule of a descriptor file into the version's catalog, creating, updating, or
    /// reviving parameters as needed, in one transaction.  Returns the number of rules loaded.
    pub fn load_parameters_file<P: AsRef<Path>>(
        &self,
        ctx: &RequestContext,
        datastore: &str,
        version: &str,
        path: P,
    ) -> Result<usize> {
        require_admin(ctx, "load configuration parameters")?;
        let path = path.as_ref();
        let data = fs::read_to_string(path).context(error::ReadFileSnafu { path })?;
        let rules = ValidationRules::from_json(&data).context(error::RulesParseSnafu { path })?;

        let mut store = write_store(&self.store)?;
        let (_, version) = datastore::resolve(&*store, datastore, Some(version))?;
        let mut tx = Transaction::new(format!("load-parameters-{}", version.id));
        for rule in rules.iter() {
            match find_parameter(&*store, &version.id, &rule.name)? {
                Some(mut existing) => {
                    existing.update_from(rule);
                    tx.save(&existing).context(error::CatalogSnafu)?;
                }
                None => {
                    let param = DatastoreConfigurationParameter::from_rule(
                        Uuid::new_v4().to_string(),
                        version.id.clone(),
                        rule,
                    );
                    tx.create(&param).context(error::CatalogSnafu)?;
                }
            }
        }
        store.commit_transaction(tx).context(error::CatalogSnafu)?;
        info!(
            "Loaded {} parameters for datastore version '{}' from {}",
            rules.len(),
            version.name,
            path.display()
        );
        Ok(rules.len())
    }
}

fn require_admin(ctx: &RequestContext, action: &str) -> Result<()> {
    ensure!(ctx.is_admin, error::AdminRequiredSnafu { action });
    Ok(())
}

/// The version's parameter row of that name, deleted or not.
fn find_parameter<S: CatalogStore>(
    store: &S,
    version_id: &str,
    name: &str,
) -> Result<Option<DatastoreConfigurationParameter>> {
    let mut found: Vec<DatastoreConfigurationParameter> = store
        .find_all(
            &Filter::new()
                .eq("datastore_version_id", version_id)
                .eq("name", name),
        )
        .context(error::CatalogSnafu)?;
    // Prefer a live row over deleted ones.
    found.sort_by_key(|p| p.is_deleted());
    Ok(found.into_iter().next())
}

fn live_parameter<S: CatalogStore>(
    store: &S,
    version: &DatastoreVersion,
    name: &str,
) -> Result<DatastoreConfigurationParameter> {
    find_parameter(store, &version.id, name)?
        .filter(|p| !p.deleted)
        .context(error::ConfigKeyNotFoundSnafu {
            key: name,
            version: &version.name,
        })
}
