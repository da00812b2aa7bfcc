/*!
# Background

This library is the control plane of the database service.  It validates and records cluster and
configuration requests in the catalog, then hands long-running work to a task dispatcher.

# Clusters

`ClusterController` creates and grows clusters.  Each datastore manager that supports clustering
has a `ClusterStrategy`; the Percona XtraDB Cluster strategy is built in.  A request is validated,
its quota reserved, and its rows written in one catalog transaction before the dispatcher is
asked to build anything.  Operations on one cluster are serialized, and a cluster only accepts a
new operation while its task is `NONE`.

# Configuration groups

`ConfigurationController` manages named sets of datastore parameter values.  Values are checked
against the datastore's validation rules, which come from catalog parameter rows when an
administrator has loaded them, and from the manager's `validation-rules.json` otherwise.
Changing a group pushes the merged values to every instance attached to it.

`ParameterCatalog` lists the parameters a datastore version accepts and lets administrators
maintain them.

# Scheduled tasks

`ScheduledTaskController` records tasks tenants schedule against their instances.
*/

pub mod cluster;
pub mod compute;
pub mod config;
pub mod configuration;
pub mod context;
pub mod datastore;
pub mod error;
pub mod quota;
pub mod scheduled_tasks;

pub use cluster::{ClusterController, InstanceSpec};
pub use config::Config;
pub use configuration::{ConfigurationController, ParameterCatalog, RuleRegistry};
pub use context::RequestContext;
pub use datastore::DatastoreCatalog;
pub use scheduled_tasks::{ScheduledTaskController, ScheduledTaskRequest};
pub use error::{Error, ErrorKind, Result};
pub use taskmanager::SharedStore;

use catalog::CatalogStore;
use compute::ComputeClient;
use quota::QuotaService;
use snafu::OptionExt;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};
use taskmanager::TaskDispatcher;

pub(crate) fn read_store<S>(store: &SharedStore<S>) -> Result<RwLockReadGuard<'_, S>> {
    store.read().ok().context(error::StoreLockSnafu)
}

pub(crate) fn write_store<S>(store: &SharedStore<S>) -> Result<RwLockWriteGuard<'_, S>> {
    store.write().ok().context(error::StoreLockSnafu)
}

/// Every controller, wired to one catalog and one set of collaborators.
pub struct ControlPlane<S> {
    pub clusters: ClusterController<S>,
    pub configurations: ConfigurationController<S>,
    pub parameters: ParameterCatalog<S>,
    pub datastores: DatastoreCatalog<S>,
    pub scheduled_tasks: ScheduledTaskController<S>,
}

impl<S: CatalogStore> ControlPlane<S> {
    pub fn new(
        store: SharedStore<S>,
        config: Config,
        quotas: Arc<dyn QuotaService>,
        compute: Arc<dyn ComputeClient>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        let config = Arc::new(config);
        let rules = Arc::new(RuleRegistry::new(&config.validation_rules_dir));
        Self {
            clusters: ClusterController::new(
                store.clone(),
                config.clone(),
                quotas,
                compute,
                dispatcher.clone(),
            ),
            configurations: ConfigurationController::new(
                store.clone(),
                config,
                rules.clone(),
                dispatcher,
            ),
            parameters: ParameterCatalog::new(store.clone(), rules),
            datastores: DatastoreCatalog::new(store.clone()),
            scheduled_tasks: ScheduledTaskController::new(store),
        }
    }
}
