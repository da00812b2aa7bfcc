//! Datastore and datastore version reference data.  Lookups accept either a name or an id.

use catalog::{CatalogStore, Filter};
use log::info;
use model::{Datastore, DatastoreVersion};
use snafu::{OptionExt, ResultExt};
use uuid::Uuid;

use crate::error::{self, Result};
use crate::{read_store, write_store, SharedStore};

/// Finds a datastore by name, falling back to id.
pub fn find_datastore<S: CatalogStore>(store: &S, name_or_id: &str) -> Result<Datastore> {
    let by_name: Vec<Datastore> = store
        .find_all(&Filter::new().eq("name", name_or_id))
        .context(error::CatalogSnafu)?;
    if let Some(datastore) = by_name.into_iter().next() {
        return Ok(datastore);
    }
    store
        .get(name_or_id)
        .context(error::CatalogSnafu)?
        .context(error::DatastoreNotFoundSnafu { name: name_or_id })
}

/// Finds a version of the datastore by name, falling back to id.
pub fn find_version<S: CatalogStore>(
    store: &S,
    datastore: &Datastore,
    name_or_id: &str,
) -> Result<DatastoreVersion> {
    let candidates: Vec<DatastoreVersion> = store
        .find_all(&Filter::new().eq("datastore_id", datastore.id.as_str()))
        .context(error::CatalogSnafu)?;
    candidates
        .iter()
        .find(|v| v.name == name_or_id)
        .or_else(|| candidates.iter().find(|v| v.id == name_or_id))
        .cloned()
        .context(error::DatastoreVersionNotFoundSnafu {
            datastore: &datastore.name,
            version: name_or_id,
        })
}

/// Resolves a datastore and one of its versions; without a version, the datastore's default.
pub fn resolve<S: CatalogStore>(
    store: &S,
    datastore: &str,
    version: Option<&str>,
) -> Result<(Datastore, DatastoreVersion)> {
    let found = find_datastore(store, datastore)?;
    let version = match version {
        Some(version) => version.to_string(),
        None => found
            .default_version_id
            .clone()
            .context(error::DatastoreVersionNotFoundSnafu {
                datastore,
                version: "(default)",
            })?,
    };
    let version = find_version(store, &found, &version)?;
    Ok((found, version))
}

pub fn version_by_id<S: CatalogStore>(store: &S, id: &str) -> Result<DatastoreVersion> {
    store
        .get(id)
        .context(error::CatalogSnafu)?
        .context(error::DatastoreVersionIdNotFoundSnafu { id })
}

/// Maintains datastores and their versions.  Used by the management tool to seed the catalog.
pub struct DatastoreCatalog<S> {
    store: SharedStore<S>,
}

impl<S: CatalogStore> DatastoreCatalog<S> {
    pub fn new(store: SharedStore<S>) -> Self {
        Self { store }
    }

    /// Creates the datastore if it doesn't exist, and sets its default version if one is given.
    pub fn update_datastore(&self, name: &str, default_version: Option<&str>) -> Result<Datastore> {
        let mut store = write_store(&self.store)?;
        let mut datastore = match find_datastore(&*store, name) {
            Ok(datastore) => datastore,
            Err(crate::Error::DatastoreNotFound { .. }) => Datastore {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                default_version_id: None,
            },
            Err(e) => return Err(e),
        };
        if let Some(version) = default_version {
            let version = find_version(&*store, &datastore, version)?;
            datastore.default_version_id = Some(version.id);
        }
        store.save(&datastore).context(error::CatalogSnafu)?;
        info!("Datastore '{}' updated", name);
        Ok(datastore)
    }

    /// Creates or replaces a version of an existing datastore.
    pub fn update_datastore_version(
        &self,
        datastore: &str,
        name: &str,
        manager: &str,
        image_id: &str,
        packages: Vec<String>,
        active: bool,
    ) -> Result<DatastoreVersion> {
        let mut store = write_store(&self.store)?;
        let found = find_datastore(&*store, datastore)?;
        let id = match find_version(&*store, &found, name) {
            Ok(existing) => existing.id,
            Err(crate::Error::DatastoreVersionNotFound { .. }) => Uuid::new_v4().to_string(),
            Err(e) => return Err(e),
        };
        let version = DatastoreVersion {
            id,
            datastore_id: found.id,
            name: name.to_string(),
            manager: manager.to_string(),
            image_id: image_id.to_string(),
            packages,
            active,
        };
        store.save(&version).context(error::CatalogSnafu)?;
        info!("Datastore version '{}' of '{}' updated", name, datastore);
        Ok(version)
    }

    pub fn resolve(
        &self,
        datastore: &str,
        version: Option<&str>,
    ) -> Result<(Datastore, DatastoreVersion)> {
        let store = read_store(&self.store)?;
        resolve(&*store, datastore, version)
    }

    pub fn list_versions(&self, datastore: &str) -> Result<Vec<DatastoreVersion>> {
        let store = read_store(&self.store)?;
        let found = find_datastore(&*store, datastore)?;
        store
            .find_all(&Filter::new().eq("datastore_id", found.id.as_str()))
            .context(error::CatalogSnafu)
    }
}
