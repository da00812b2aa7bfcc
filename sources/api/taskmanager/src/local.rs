//! An in-process dispatcher running commands on a tokio runtime.

use catalog::{CatalogStore, Filter};
use log::{debug, error, info, warn};
use model::{Cluster, ClusterTask, Instance, InstanceTask, ParameterOverrides};
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::error::{self, Error, Result};
use crate::guest::{GuestAgent, GuestResult};
use crate::{SharedStore, TaskDispatcher};

/// Bounds on guest calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Installing the datastore on a cluster member.
    pub cluster_usage: Duration,
    /// Any other guest call.
    pub agent_call_high: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            cluster_usage: Duration::from_secs(36000),
            agent_call_high: Duration::from_secs(1200),
        }
    }
}

enum InstanceCommand {
    UpdateOverrides(ParameterOverrides),
}

// Instance id -> queue of that instance's worker.  One worker per instance keeps at most one
// command in flight for it.  A worker removes its entry once its queue runs dry, and commands are
// only sent while holding the map's lock, so nothing is sent to a worker that has stopped.
type Queues = Arc<Mutex<HashMap<String, UnboundedSender<InstanceCommand>>>>;

pub struct LocalDispatcher<S> {
    worker: Arc<Worker<S>>,
    runtime: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S> LocalDispatcher<S>
where
    S: CatalogStore + Send + Sync + 'static,
{
    pub fn new(
        runtime: Handle,
        store: SharedStore<S>,
        guest: Arc<dyn GuestAgent>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                store,
                guest,
                timeouts,
                queues: Arc::new(Mutex::new(HashMap::new())),
            }),
            runtime,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Waits for all accepted work to finish.  Instance workers stop on their own once they've
    /// run what was queued.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
                Ok(mut tasks) => tasks.drain(..).collect(),
                Err(_) => return,
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("Dispatched task did not complete: {}", e);
                }
            }
        }
    }

    fn spawn<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().ok().context(error::QueueLockSnafu)?;
        tasks.retain(|handle| !handle.is_finished());
        tasks.push(self.runtime.spawn(task));
        Ok(())
    }

    /// Queues a command for the instance, starting its worker if it has none.
    fn enqueue(&self, instance_id: &str, command: InstanceCommand) -> Result<()> {
        let mut queues = self
            .worker
            .queues
            .lock()
            .ok()
            .context(error::QueueLockSnafu)?;
        let command = match queues.get(instance_id) {
            Some(sender) => match sender.send(command) {
                Ok(()) => return Ok(()),
                // The worker is gone; start another below.
                Err(mpsc::error::SendError(command)) => command,
            },
            None => command,
        };

        debug!("Starting command worker for instance '{}'", instance_id);
        let (sender, receiver) = mpsc::unbounded_channel();
        sender.send(command).ok().context(error::ShutDownSnafu {
            command: "update_overrides",
        })?;
        let worker = self.worker.clone();
        let id = instance_id.to_string();
        self.spawn(async move { worker.run_instance_queue(id, receiver).await })?;
        queues.insert(instance_id.to_string(), sender);
        Ok(())
    }

    /// Number of instances with a running command worker.
    pub fn active_queues(&self) -> usize {
        self.worker.queues.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl<S> TaskDispatcher for LocalDispatcher<S>
where
    S: CatalogStore + Send + Sync + 'static,
{
    fn create_cluster(&self, cluster_id: &str) -> Result<()> {
        info!("Accepted create_cluster for '{}'", cluster_id);
        let worker = self.worker.clone();
        let id = cluster_id.to_string();
        self.spawn(async move {
            if let Err(e) = worker.create_cluster(&id).await {
                error!("Building cluster '{}' failed: {}", id, e);
            }
        })
    }

    fn grow_cluster(&self, cluster_id: &str, member_ids: &[String]) -> Result<()> {
        info!(
            "Accepted grow_cluster for '{}' with {} new members",
            cluster_id,
            member_ids.len()
        );
        let worker = self.worker.clone();
        let id = cluster_id.to_string();
        let member_ids = member_ids.to_vec();
        self.spawn(async move {
            if let Err(e) = worker.grow_cluster(&id, &member_ids).await {
                error!("Growing cluster '{}' failed: {}", id, e);
            }
        })
    }

    fn update_overrides(&self, instance_id: &str, overrides: &ParameterOverrides) -> Result<()> {
        debug!("Queueing update_overrides for instance '{}'", instance_id);
        self.enqueue(
            instance_id,
            InstanceCommand::UpdateOverrides(overrides.clone()),
        )
    }
}

/// The state shared by every dispatched task.
struct Worker<S> {
    store: SharedStore<S>,
    guest: Arc<dyn GuestAgent>,
    timeouts: Timeouts,
    queues: Queues,
}

impl<S> Worker<S>
where
    S: CatalogStore + Send + Sync + 'static,
{
    async fn run_instance_queue(
        &self,
        instance_id: String,
        mut receiver: UnboundedReceiver<InstanceCommand>,
    ) {
        loop {
            let command = {
                let mut queues = match self.queues.lock() {
                    Ok(queues) => queues,
                    Err(_) => {
                        error!("Queue table poisoned, stopping worker for '{}'", instance_id);
                        return;
                    }
                };
                match receiver.try_recv() {
                    Ok(command) => command,
                    Err(_) => {
                        queues.remove(&instance_id);
                        break;
                    }
                }
            };
            match command {
                InstanceCommand::UpdateOverrides(overrides) => {
                    if let Err(e) = self.update_overrides(&instance_id, &overrides).await {
                        error!(
                            "Updating overrides on instance '{}' failed: {}",
                            instance_id, e
                        );
                    }
                }
            }
        }
        debug!("Command worker for instance '{}' stopped", instance_id);
    }

    async fn create_cluster(&self, cluster_id: &str) -> Result<()> {
        let members = self.cluster_members(cluster_id)?;
        let result = self.install_members(&members, &members, true).await;
        self.finish_cluster(cluster_id, &result)?;
        result
    }

    async fn grow_cluster(&self, cluster_id: &str, member_ids: &[String]) -> Result<()> {
        let members = self.cluster_members(cluster_id)?;
        let new_members: Vec<Instance> = members
            .iter()
            .filter(|m| member_ids.contains(&m.id))
            .cloned()
            .collect();
        if new_members.len() != member_ids.len() {
            warn!(
                "Cluster '{}' has {} of the {} members to add",
                cluster_id,
                new_members.len(),
                member_ids.len()
            );
        }
        let result = self.install_members(&new_members, &members, false).await;
        self.finish_cluster(cluster_id, &result)?;
        result
    }

    async fn update_overrides(
        &self,
        instance_id: &str,
        overrides: &ParameterOverrides,
    ) -> Result<()> {
        let instance = self.set_instance_task(instance_id, InstanceTask::Updating, None)?;
        let result = self
            .guest_call(
                "update_overrides",
                &instance,
                self.timeouts.agent_call_high,
                self.guest.update_overrides(&instance, overrides),
            )
            .await;
        match &result {
            Ok(()) => {
                self.set_instance_task(instance_id, InstanceTask::None, None)?;
            }
            Err(e) => self.fail_instance(instance_id, InstanceTask::UpdateError, e)?,
        }
        result
    }

    /// Installs each target, then tells each target the cluster is complete.  Stops at the first
    /// failure, which is recorded on the failing instance.
    async fn install_members(
        &self,
        targets: &[Instance],
        members: &[Instance],
        bootstrap_first: bool,
    ) -> Result<()> {
        for (i, target) in targets.iter().enumerate() {
            let bootstrap = bootstrap_first && i == 0;
            debug!(
                "Installing cluster member '{}' (bootstrap: {})",
                target.name, bootstrap
            );
            let result = self
                .guest_call(
                    "install_cluster",
                    target,
                    self.timeouts.cluster_usage,
                    self.guest.install_cluster(target, members, bootstrap),
                )
                .await;
            if let Err(e) = result {
                self.fail_instance(&target.id, InstanceTask::BuildingError, &e)?;
                return Err(e);
            }
        }

        for target in targets {
            let result = self
                .guest_call(
                    "cluster_complete",
                    target,
                    self.timeouts.agent_call_high,
                    self.guest.cluster_complete(target),
                )
                .await;
            if let Err(e) = result {
                self.fail_instance(&target.id, InstanceTask::BuildingError, &e)?;
                return Err(e);
            }
            self.set_instance_task(&target.id, InstanceTask::None, None)?;
        }
        Ok(())
    }

    async fn guest_call<F>(
        &self,
        call: &str,
        instance: &Instance,
        limit: Duration,
        future: F,
    ) -> Result<()>
    where
        F: Future<Output = GuestResult<()>>,
    {
        match tokio::time::timeout(limit, future).await {
            Ok(result) => result.context(error::GuestCallSnafu {
                call,
                instance_id: &instance.id,
            }),
            Err(_) => error::GuestTimeoutSnafu {
                call,
                instance_id: &instance.id,
                seconds: limit.as_secs(),
            }
            .fail(),
        }
    }

    /// Members of the cluster in creation order.
    fn cluster_members(&self, cluster_id: &str) -> Result<Vec<Instance>> {
        let store = self.store.read().ok().context(error::StoreLockSnafu)?;
        let mut members: Vec<Instance> = store
            .find_all(&Filter::new().eq("cluster_id", cluster_id).live())
            .context(error::CatalogSnafu {
                action: "listing cluster members",
            })?;
        members.sort_by(|a, b| {
            a.created
                .cmp(&b.created)
                .then_with(|| (*a.name).cmp(&*b.name))
        });
        Ok(members)
    }

    fn set_instance_task(
        &self,
        instance_id: &str,
        task: InstanceTask,
        description: Option<String>,
    ) -> Result<Instance> {
        let mut store = self.store.write().ok().context(error::StoreLockSnafu)?;
        let mut instance: Instance = store
            .get(instance_id)
            .context(error::CatalogSnafu {
                action: "loading instance",
            })?
            .context(error::InstanceNotFoundSnafu { id: instance_id })?;
        instance.set_task(task, description);
        store.save(&instance).context(error::CatalogSnafu {
            action: "saving instance",
        })?;
        Ok(instance)
    }

    /// Records a failed guest call on the instance.  Timeouts get their own state.
    fn fail_instance(&self, instance_id: &str, task: InstanceTask, cause: &Error) -> Result<()> {
        let task = match cause {
            Error::GuestTimeout { .. } => InstanceTask::GuestTimeout,
            _ => task,
        };
        warn!("Marking instance '{}' as {:?}: {}", instance_id, task, cause);
        self.set_instance_task(instance_id, task, Some(cause.to_string()))?;
        Ok(())
    }

    /// Returns the cluster to NONE so it accepts new operations.  Member failures have already
    /// been recorded on the members.
    fn finish_cluster(&self, cluster_id: &str, result: &Result<()>) -> Result<()> {
        let mut store = self.store.write().ok().context(error::StoreLockSnafu)?;
        let mut cluster: Cluster = store
            .get(cluster_id)
            .context(error::CatalogSnafu {
                action: "loading cluster",
            })?
            .context(error::ClusterNotFoundSnafu { id: cluster_id })?;
        let previous = cluster.task_status;
        cluster.set_task(ClusterTask::None);
        store.save(&cluster).context(error::CatalogSnafu {
            action: "saving cluster",
        })?;
        match result {
            Ok(()) => info!("Cluster '{}' finished {}", cluster_id, previous),
            Err(_) => warn!(
                "Cluster '{}' finished {} with failed members",
                cluster_id, previous
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::guest::{self as guest_error, GuestError};
    use async_trait::async_trait;
    use catalog::MemoryCatalog;
    use chrono::{Duration as ChronoDuration, Utc};
    use maplit::btreemap;
    use model::{ParameterValue, ResourceName};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::RwLock;

    #[derive(Default)]
    struct RecordingGuest {
        calls: Mutex<Vec<String>>,
        fail_install_on: Option<String>,
        override_delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RecordingGuest {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl GuestAgent for RecordingGuest {
        async fn install_cluster(
            &self,
            instance: &Instance,
            members: &[Instance],
            bootstrap: bool,
        ) -> GuestResult<()> {
            self.record(format!(
                "install {} of {} bootstrap={}",
                instance.name,
                members.len(),
                bootstrap
            ));
            if self.fail_install_on.as_deref() == Some(&*instance.name) {
                return guest_error::FailedSnafu {
                    message: "disk full",
                }
                .fail();
            }
            Ok(())
        }

        async fn cluster_complete(&self, instance: &Instance) -> GuestResult<()> {
            self.record(format!("complete {}", instance.name));
            Ok(())
        }

        async fn update_overrides(
            &self,
            instance: &Instance,
            overrides: &ParameterOverrides,
        ) -> GuestResult<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.override_delay {
                tokio::time::sleep(delay).await;
            }
            let values: Vec<String> = overrides.values().map(|v| v.to_string()).collect();
            self.record(format!("overrides {} {}", instance.name, values.join(",")));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn member(id: &str, name: &str, cluster_id: &str, offset: i64) -> Instance {
        let created = Utc::now() + ChronoDuration::seconds(offset);
        Instance {
            id: id.to_string(),
            name: ResourceName::try_from(name).unwrap(),
            tenant_id: "tenant".to_string(),
            flavor_id: "7".to_string(),
            volume_size: Some(2),
            cluster_id: Some(cluster_id.to_string()),
            instance_type: Some("member".to_string()),
            availability_zone: None,
            nics: Vec::new(),
            datastore_version_id: "v1".to_string(),
            configuration_id: None,
            task_status: InstanceTask::Building,
            task_description: None,
            created,
            updated: created,
            deleted: false,
            deleted_at: None,
        }
    }

    fn seeded_store(task: ClusterTask, members: usize) -> SharedStore<MemoryCatalog> {
        let mut store = MemoryCatalog::new();
        store
            .create(&Cluster::new(
                "c1".to_string(),
                ResourceName::try_from("db").unwrap(),
                "tenant".to_string(),
                "v1".to_string(),
                task,
            ))
            .unwrap();
        for i in 1..=members {
            store
                .create(&member(
                    &format!("i{}", i),
                    &format!("db-member-{}", i),
                    "c1",
                    i as i64,
                ))
                .unwrap();
        }
        Arc::new(RwLock::new(store))
    }

    fn instance(store: &SharedStore<MemoryCatalog>, id: &str) -> Instance {
        store.read().unwrap().get(id).unwrap().unwrap()
    }

    fn cluster(store: &SharedStore<MemoryCatalog>) -> Cluster {
        store.read().unwrap().get("c1").unwrap().unwrap()
    }

    #[tokio::test]
    async fn create_cluster_installs_all_members() {
        let store = seeded_store(ClusterTask::BuildingInitial, 3);
        let guest = Arc::new(RecordingGuest::default());
        let dispatcher =
            LocalDispatcher::new(Handle::current(), store.clone(), guest.clone(), Timeouts::default());

        dispatcher.create_cluster("c1").unwrap();
        dispatcher.drain().await;

        assert_eq!(
            guest.calls(),
            vec![
                "install db-member-1 of 3 bootstrap=true",
                "install db-member-2 of 3 bootstrap=false",
                "install db-member-3 of 3 bootstrap=false",
                "complete db-member-1",
                "complete db-member-2",
                "complete db-member-3",
            ]
        );
        assert_eq!(cluster(&store).task_status, ClusterTask::None);
        for id in ["i1", "i2", "i3"] {
            assert_eq!(instance(&store, id).task_status, InstanceTask::None);
        }
    }

    #[tokio::test]
    async fn failed_install_is_recorded_on_the_member() {
        let store = seeded_store(ClusterTask::BuildingInitial, 3);
        let guest = Arc::new(RecordingGuest {
            fail_install_on: Some("db-member-2".to_string()),
            ..Default::default()
        });
        let dispatcher =
            LocalDispatcher::new(Handle::current(), store.clone(), guest.clone(), Timeouts::default());

        dispatcher.create_cluster("c1").unwrap();
        dispatcher.drain().await;

        let failed = instance(&store, "i2");
        assert_eq!(failed.task_status, InstanceTask::BuildingError);
        assert!(failed.task_description.unwrap().contains("disk full"));
        assert_eq!(instance(&store, "i3").task_status, InstanceTask::Building);
        assert_eq!(guest.calls().len(), 2);
        assert_eq!(cluster(&store).task_status, ClusterTask::None);
    }

    #[tokio::test]
    async fn grow_installs_only_new_members() {
        let store = seeded_store(ClusterTask::GrowingCluster, 4);
        let guest = Arc::new(RecordingGuest::default());
        let dispatcher =
            LocalDispatcher::new(Handle::current(), store.clone(), guest.clone(), Timeouts::default());

        dispatcher
            .grow_cluster("c1", &["i4".to_string()])
            .unwrap();
        dispatcher.drain().await;

        assert_eq!(
            guest.calls(),
            vec![
                "install db-member-4 of 4 bootstrap=false",
                "complete db-member-4"
            ]
        );
        assert_eq!(cluster(&store).task_status, ClusterTask::None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_guest_times_out() {
        let store = seeded_store(ClusterTask::None, 1);
        let guest = Arc::new(RecordingGuest {
            override_delay: Some(Duration::from_secs(7200)),
            ..Default::default()
        });
        let timeouts = Timeouts {
            cluster_usage: Duration::from_secs(60),
            agent_call_high: Duration::from_secs(60),
        };
        let dispatcher = LocalDispatcher::new(Handle::current(), store.clone(), guest, timeouts);

        let overrides = btreemap! { "maxmemory".to_string() => ParameterValue::Integer(1) };
        dispatcher.update_overrides("i1", &overrides).unwrap();
        dispatcher.drain().await;

        let timed_out = instance(&store, "i1");
        assert_eq!(timed_out.task_status, InstanceTask::GuestTimeout);
        assert!(timed_out.task_description.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn overrides_run_one_at_a_time_in_order() {
        let store = seeded_store(ClusterTask::None, 2);
        let guest = Arc::new(RecordingGuest {
            override_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let dispatcher =
            LocalDispatcher::new(Handle::current(), store.clone(), guest.clone(), Timeouts::default());

        for i in 1..=5 {
            let overrides = btreemap! { "n".to_string() => ParameterValue::Integer(i) };
            dispatcher.update_overrides("i1", &overrides).unwrap();
        }
        dispatcher.drain().await;

        let calls = guest.calls();
        assert_eq!(
            calls,
            (1..=5)
                .map(|i| format!("overrides db-member-1 {}", i))
                .collect::<Vec<_>>()
        );
        assert_eq!(guest.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(instance(&store, "i1").task_status, InstanceTask::None);
    }

    #[tokio::test]
    async fn idle_workers_stop() {
        let store = seeded_store(ClusterTask::None, 2);
        let guest = Arc::new(RecordingGuest::default());
        let dispatcher =
            LocalDispatcher::new(Handle::current(), store.clone(), guest.clone(), Timeouts::default());

        let overrides = btreemap! { "n".to_string() => ParameterValue::Integer(1) };
        dispatcher.update_overrides("i1", &overrides).unwrap();
        dispatcher.update_overrides("i2", &overrides).unwrap();
        dispatcher.drain().await;
        assert_eq!(dispatcher.active_queues(), 0);

        // A later command starts a fresh worker.
        dispatcher.update_overrides("i1", &overrides).unwrap();
        dispatcher.drain().await;
        assert_eq!(dispatcher.active_queues(), 0);
        assert_eq!(guest.calls().len(), 3);
        assert_eq!(instance(&store, "i1").task_status, InstanceTask::None);
    }

    #[tokio::test]
    async fn unknown_instance_is_logged_not_fatal() {
        let store = seeded_store(ClusterTask::None, 1);
        let guest = Arc::new(RecordingGuest::default());
        let dispatcher =
            LocalDispatcher::new(Handle::current(), store.clone(), guest.clone(), Timeouts::default());

        dispatcher
            .update_overrides("missing", &ParameterOverrides::new())
            .unwrap();
        dispatcher.drain().await;
        assert!(guest.calls().is_empty());
    }

    #[test]
    fn guest_error_display() {
        let err: GuestError = guest_error::UnreachableSnafu { message: "no route" }.build();
        assert_eq!(err.to_string(), "Guest agent unreachable: no route");
    }
}
