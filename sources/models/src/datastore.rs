//! Datastores (e.g. "mysql", "redis") and their installable versions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datastore {
    pub id: String,
    pub name: String,
    pub default_version_id: Option<String>,
}

record_impls_for!(Datastore, "datastores");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreVersion {
    pub id: String,
    pub datastore_id: String,
    pub name: String,
    /// Selects the guest manager and the cluster strategy, e.g. "pxc".
    pub manager: String,
    pub image_id: String,
    #[serde(default)]
    pub packages: Vec<String>,
    pub active: bool,
}

record_impls_for!(DatastoreVersion, "datastore_versions");
