//! Configuration groups and the parameter catalog they are validated against.

pub mod groups;
pub mod parameters;
pub mod rules;
pub mod validation;

pub use groups::{ConfigurationController, GroupDetail, Page};
pub use parameters::ParameterCatalog;
pub use rules::RuleRegistry;

use catalog::{CatalogStore, Filter};
use model::{DatastoreConfigurationParameter, DatastoreVersion, ValidationRules};
use snafu::ResultExt;
use std::sync::Arc;

use crate::error::{self, Result};

/// Rules for a datastore version: its catalog parameters when it has any, otherwise the
/// descriptor of its manager.
pub fn effective_rules<S: CatalogStore>(
    store: &S,
    registry: &RuleRegistry,
    version: &DatastoreVersion,
) -> Result<Arc<ValidationRules>> {
    let params = catalog_parameters(store, &version.id)?;
    if params.is_empty() {
        return registry.get_rules(&version.manager);
    }
    Ok(Arc::new(ValidationRules::new(
        params.iter().map(|p| p.to_rule()).collect(),
    )))
}

pub(crate) fn catalog_parameters<S: CatalogStore>(
    store: &S,
    version_id: &str,
) -> Result<Vec<DatastoreConfigurationParameter>> {
    store
        .find_all(&Filter::new().eq("datastore_version_id", version_id).live())
        .context(error::CatalogSnafu)
}
