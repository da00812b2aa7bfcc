//! Clusters and the instances that make them up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::modeled_types::ResourceName;

/// The task a cluster is currently running.  `None` means no task is running, which is the only
/// state that accepts a new lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterTask {
    None,
    BuildingInitial,
    GrowingCluster,
    Deleting,
}

impl ClusterTask {
    pub fn is_mutable(self) -> bool {
        self == ClusterTask::None
    }
}

impl fmt::Display for ClusterTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterTask::None => "NONE",
            ClusterTask::BuildingInitial => "BUILDING_INITIAL",
            ClusterTask::GrowingCluster => "GROWING_CLUSTER",
            ClusterTask::Deleting => "DELETING",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: ResourceName,
    pub tenant_id: String,
    pub datastore_version_id: String,
    pub task_status: ClusterTask,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Cluster {
    pub fn new(
        id: String,
        name: ResourceName,
        tenant_id: String,
        datastore_version_id: String,
        task_status: ClusterTask,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            tenant_id,
            datastore_version_id,
            task_status,
            created: now,
            updated: now,
            deleted: false,
            deleted_at: None,
        }
    }

    pub fn set_task(&mut self, task: ClusterTask) {
        self.task_status = task;
        self.updated = Utc::now();
    }
}

record_impls_for!(Cluster, "clusters", soft_delete);

/// The task an instance is running, or the failure that ended its last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceTask {
    None,
    Building,
    Updating,
    BuildingError,
    UpdateError,
    GuestTimeout,
}

impl InstanceTask {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            InstanceTask::BuildingError | InstanceTask::UpdateError | InstanceTask::GuestTimeout
        )
    }
}

/// A network interface request for a new instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v4_fixed_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: ResourceName,
    pub tenant_id: String,
    pub flavor_id: String,
    pub volume_size: Option<u32>,
    /// Set for cluster members only.
    pub cluster_id: Option<String>,
    /// Role of a cluster member, e.g. "member".
    pub instance_type: Option<String>,
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub nics: Vec<Nic>,
    pub datastore_version_id: String,
    pub configuration_id: Option<String>,
    pub task_status: InstanceTask,
    pub task_description: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn set_task(&mut self, task: InstanceTask, description: Option<String>) {
        self.task_status = task;
        self.task_description = description;
        self.updated = Utc::now();
    }
}

record_impls_for!(Instance, "instances", soft_delete);
