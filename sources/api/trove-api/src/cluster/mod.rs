//! Cluster lifecycle: creation and growth, with validation, quota reservation, and persistence
//! done before any work is dispatched.

pub mod locks;
pub mod pxc;
pub mod strategy;
pub mod validator;

pub use locks::ClusterLocks;
pub use strategy::{ClusterAction, ClusterStrategy, StrategyRegistry};
pub use validator::Validator;

use catalog::{CatalogStore, Filter, Transaction};
use chrono::Utc;
use log::{error, info, warn};
use model::{Cluster, ClusterTask, DatastoreVersion, Instance, InstanceTask, Nic, ResourceName};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt};
use std::sync::Arc;
use taskmanager::TaskDispatcher;
use uuid::Uuid;

use crate::compute::ComputeClient;
use crate::config::{Config, DatastoreClusterConfig};
use crate::context::RequestContext;
use crate::datastore;
use crate::error::{self, Result};
use crate::quota::{QuotaService, Reservation};
use crate::{read_store, write_store, SharedStore};

/// What the caller asked for one cluster member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub flavor_id: String,
    #[serde(default)]
    pub volume_size: Option<u32>,
    /// Ignored; members are always named after the cluster.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub nics: Vec<Nic>,
}

pub(crate) fn new_member(
    cluster: &Cluster,
    version: &DatastoreVersion,
    spec: &InstanceSpec,
    name: ResourceName,
    role: &str,
) -> Instance {
    let now = Utc::now();
    Instance {
        id: Uuid::new_v4().to_string(),
        name,
        tenant_id: cluster.tenant_id.clone(),
        flavor_id: spec.flavor_id.clone(),
        volume_size: validator::requested_volume(spec),
        cluster_id: Some(cluster.id.clone()),
        instance_type: Some(role.to_string()),
        availability_zone: spec.availability_zone.clone(),
        nics: spec.nics.clone(),
        datastore_version_id: version.id.clone(),
        configuration_id: None,
        task_status: InstanceTask::Building,
        task_description: None,
        created: now,
        updated: now,
        deleted: false,
        deleted_at: None,
    }
}

pub struct ClusterController<S> {
    store: SharedStore<S>,
    config: Arc<Config>,
    quotas: Arc<dyn QuotaService>,
    compute: Arc<dyn ComputeClient>,
    dispatcher: Arc<dyn TaskDispatcher>,
    strategies: StrategyRegistry,
    locks: ClusterLocks,
}

impl<S: CatalogStore> ClusterController<S> {
    pub fn new(
        store: SharedStore<S>,
        config: Arc<Config>,
        quotas: Arc<dyn QuotaService>,
        compute: Arc<dyn ComputeClient>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        let strategies = StrategyRegistry::from_config(&config);
        Self {
            store,
            config,
            quotas,
            compute,
            dispatcher,
            strategies,
            locks: ClusterLocks::new(),
        }
    }

    /// Replaces the strategies derived from the config.
    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    /// Validates and records a new cluster, then asks the dispatcher to build it.  Nothing is
    /// written if validation or the quota check fails.
    pub fn create(
        &self,
        ctx: &RequestContext,
        name: &str,
        datastore: &str,
        version: Option<&str>,
        specs: &[InstanceSpec],
    ) -> Result<Cluster> {
        let name = ResourceName::try_from(name).context(error::InvalidNameSnafu)?;
        let (_, version) = {
            let store = read_store(&self.store)?;
            datastore::resolve(&*store, datastore, version)?
        };
        ensure!(
            version.active,
            error::DatastoreVersionInactiveSnafu {
                version: &version.name
            }
        );
        let strategy = self.strategies.get(&version.manager)?;
        let settings = self.config.datastore(&version.manager);
        let validator = self.validator(&version.manager, &settings);

        let deltas = strategy.validate_create(&validator, specs)?;
        let reservation = validator.reserve(&ctx.tenant_id, &deltas)?;

        let cluster = Cluster::new(
            Uuid::new_v4().to_string(),
            name,
            ctx.tenant_id.clone(),
            version.id.clone(),
            ClusterTask::BuildingInitial,
        );
        let written = self.write_members(&cluster, |store| {
            let members = strategy.build_members(&cluster, &version, specs, 0)?;
            let mut tx = Transaction::new(format!("create-cluster-{}", cluster.id));
            tx.create(&cluster).context(error::CatalogSnafu)?;
            for member in &members {
                tx.create(member).context(error::CatalogSnafu)?;
            }
            store.commit_transaction(tx).context(error::CatalogSnafu)?;
            Ok(members)
        });
        let members = self.settle(&reservation, written)?;
        info!(
            "Created cluster '{}' ({}) with {} members",
            cluster.name,
            cluster.id,
            members.len()
        );

        if let Err(e) = self.dispatcher.create_cluster(&cluster.id) {
            return Err(self.dispatch_failed(&cluster.id, &members, "create_cluster", e));
        }
        Ok(cluster)
    }

    /// Adds members to an idle cluster and asks the dispatcher to install them.
    pub fn grow(
        &self,
        ctx: &RequestContext,
        cluster_id: &str,
        specs: &[InstanceSpec],
    ) -> Result<Cluster> {
        // Unknown ids fail here without taking a lock.
        self.load(ctx, cluster_id)?;
        self.locks
            .with_lock(cluster_id, || self.grow_locked(ctx, cluster_id, specs))
    }

    fn grow_locked(
        &self,
        ctx: &RequestContext,
        cluster_id: &str,
        specs: &[InstanceSpec],
    ) -> Result<Cluster> {
        let (mut cluster, version, existing, ever) = {
            let store = read_store(&self.store)?;
            let cluster = load_visible(&*store, ctx, cluster_id)?;
            ensure!(
                cluster.task_status.is_mutable(),
                error::ClusterNotAvailableSnafu {
                    id: cluster_id,
                    task: cluster.task_status,
                }
            );
            let version = datastore::version_by_id(&*store, &cluster.datastore_version_id)?;
            let all: Vec<Instance> = store
                .find_all(&Filter::new().eq("cluster_id", cluster_id))
                .context(error::CatalogSnafu)?;
            let ever = all.len();
            let existing: Vec<Instance> = all.into_iter().filter(|i| !i.deleted).collect();
            (cluster, version, existing, ever)
        };

        let strategy = self.strategies.get(&version.manager)?;
        ensure!(
            strategy.supports(ClusterAction::Grow),
            error::ClusterActionNotSupportedSnafu {
                manager: &version.manager,
                action: ClusterAction::Grow.to_string(),
            }
        );
        let settings = self.config.datastore(&version.manager);
        let validator = self.validator(&version.manager, &settings);
        let deltas = strategy.validate_grow(&validator, &existing, specs)?;
        let reservation = validator.reserve(&cluster.tenant_id, &deltas)?;

        cluster.set_task(ClusterTask::GrowingCluster);
        let written = self.write_members(&cluster, |store| {
            let members = strategy.build_members(&cluster, &version, specs, ever)?;
            let mut tx = Transaction::new(format!("grow-cluster-{}", cluster.id));
            tx.save(&cluster).context(error::CatalogSnafu)?;
            for member in &members {
                tx.create(member).context(error::CatalogSnafu)?;
            }
            store.commit_transaction(tx).context(error::CatalogSnafu)?;
            Ok(members)
        });
        let members = self.settle(&reservation, written)?;
        info!(
            "Growing cluster '{}' by {} members",
            cluster.id,
            members.len()
        );

        let ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
        if let Err(e) = self.dispatcher.grow_cluster(&cluster.id, &ids) {
            return Err(self.dispatch_failed(&cluster.id, &members, "grow_cluster", e));
        }
        Ok(cluster)
    }

    pub fn load(&self, ctx: &RequestContext, cluster_id: &str) -> Result<Cluster> {
        let store = read_store(&self.store)?;
        load_visible(&*store, ctx, cluster_id)
    }

    /// Clusters visible to the caller, ordered by id.
    pub fn list(&self, ctx: &RequestContext) -> Result<Vec<Cluster>> {
        let store = read_store(&self.store)?;
        let mut filter = Filter::new().live();
        if !ctx.is_admin {
            filter = filter.eq("tenant_id", ctx.tenant_id.as_str());
        }
        store.find_all(&filter).context(error::CatalogSnafu)
    }

    /// Live members of a cluster, oldest first.
    pub fn members(&self, ctx: &RequestContext, cluster_id: &str) -> Result<Vec<Instance>> {
        let store = read_store(&self.store)?;
        load_visible(&*store, ctx, cluster_id)?;
        let mut members: Vec<Instance> = store
            .find_all(&Filter::new().eq("cluster_id", cluster_id).live())
            .context(error::CatalogSnafu)?;
        members.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(members)
    }

    /// Returns the cluster to `NONE` so it accepts new operations.
    pub fn mark_task_complete(&self, cluster_id: &str) -> Result<()> {
        let exists = read_store(&self.store)?
            .get::<Cluster>(cluster_id)
            .context(error::CatalogSnafu)?
            .is_some();
        ensure!(exists, error::ClusterNotFoundSnafu { id: cluster_id });
        self.locks.with_lock(cluster_id, || {
            let mut store = write_store(&self.store)?;
            let mut cluster: Cluster = store
                .get(cluster_id)
                .context(error::CatalogSnafu)?
                .context(error::ClusterNotFoundSnafu { id: cluster_id })?;
            cluster.set_task(ClusterTask::None);
            store.save(&cluster).context(error::CatalogSnafu)
        })
    }

    fn validator<'a>(
        &'a self,
        manager: &'a str,
        settings: &'a DatastoreClusterConfig,
    ) -> Validator<'a> {
        Validator::new(
            &*self.compute,
            &*self.quotas,
            settings,
            manager,
            self.config.max_accepted_volume_size,
        )
    }

    fn write_members<F>(&self, cluster: &Cluster, write: F) -> Result<Vec<Instance>>
    where
        F: FnOnce(&mut S) -> Result<Vec<Instance>>,
    {
        let mut store = write_store(&self.store)?;
        write(&mut *store).map_err(|e| {
            error!("Failed to record cluster '{}': {}", cluster.id, e);
            e
        })
    }

    /// Commits the reservation if the rows were written, and releases it otherwise.
    fn settle(
        &self,
        reservation: &Reservation,
        written: Result<Vec<Instance>>,
    ) -> Result<Vec<Instance>> {
        match written {
            Ok(members) => {
                if let Err(e) = self.quotas.commit(reservation) {
                    warn!("Failed to commit quota reservation '{}': {}", reservation.id, e);
                }
                Ok(members)
            }
            Err(e) => {
                if let Err(rollback) = self.quotas.rollback(reservation) {
                    error!(
                        "Failed to roll back quota reservation '{}': {}",
                        reservation.id, rollback
                    );
                }
                Err(e)
            }
        }
    }

    /// Records a refused dispatch on the new members and frees the cluster for another attempt.
    fn dispatch_failed(
        &self,
        cluster_id: &str,
        members: &[Instance],
        command: &str,
        source: taskmanager::Error,
    ) -> error::Error {
        error!(
            "Dispatcher refused {} for cluster '{}': {}",
            command, cluster_id, source
        );
        let description = source.to_string();
        let marked = write_store(&self.store).and_then(|mut store| {
            let mut tx = Transaction::new(format!("dispatch-failed-{}", cluster_id));
            for member in members {
                let mut member = member.clone();
                member.set_task(InstanceTask::BuildingError, Some(description.clone()));
                tx.save(&member).context(error::CatalogSnafu)?;
            }
            if let Some(mut cluster) = store
                .get::<Cluster>(cluster_id)
                .context(error::CatalogSnafu)?
            {
                cluster.set_task(ClusterTask::None);
                tx.save(&cluster).context(error::CatalogSnafu)?;
            }
            store.commit_transaction(tx).context(error::CatalogSnafu)?;
            Ok(())
        });
        if let Err(e) = marked {
            error!("Failed to record dispatch failure for '{}': {}", cluster_id, e);
        }
        error::Error::Dispatch {
            command: command.to_string(),
            source,
        }
    }
}

fn load_visible<S: CatalogStore>(
    store: &S,
    ctx: &RequestContext,
    cluster_id: &str,
) -> Result<Cluster> {
    store
        .get::<Cluster>(cluster_id)
        .context(error::CatalogSnafu)?
        .filter(|c| !c.deleted && ctx.can_access(&c.tenant_id))
        .context(error::ClusterNotFoundSnafu { id: cluster_id })
}
