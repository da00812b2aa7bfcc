//! Tasks that tenants schedule against their instances.  Only the records are kept here; running
//! them is up to whatever consumes the catalog.

use catalog::{CatalogStore, Filter};
use chrono::Utc;
use log::info;
use model::{Instance, ResourceName, ScheduledTask};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{self, Result};
use crate::{read_store, write_store, SharedStore};

/// The fields a caller supplies for a new task.  All of them are required; they are optional here
/// so a missing one is reported by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScheduledTaskRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
}

fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str> {
    value
        .as_deref()
        .context(error::ScheduledTaskCreationSnafu {
            reason: format!("Required element/key - {} was not specified", key),
        })
}

pub struct ScheduledTaskController<S> {
    store: SharedStore<S>,
}

impl<S: CatalogStore> ScheduledTaskController<S> {
    pub fn new(store: SharedStore<S>) -> Self {
        Self { store }
    }

    /// Records a new, enabled task for one of the caller's instances.
    pub fn create(
        &self,
        ctx: &RequestContext,
        instance_id: &str,
        request: &ScheduledTaskRequest,
    ) -> Result<ScheduledTask> {
        let name = required(&request.name, "name")?;
        let description = required(&request.description, "description")?;
        let task_type = required(&request.task_type, "type")?;
        let name = ResourceName::try_from(name).map_err(|e| error::Error::ScheduledTaskCreation {
            reason: e.to_string(),
        })?;

        let mut store = write_store(&self.store)?;
        store
            .get::<Instance>(instance_id)
            .context(error::CatalogSnafu)?
            .filter(|i| !i.deleted && ctx.can_access(&i.tenant_id))
            .context(error::InstanceNotFoundSnafu { id: instance_id })?;

        let now = Utc::now();
        let task = ScheduledTask {
            id: Uuid::new_v4().to_string(),
            name,
            description: description.to_string(),
            tenant_id: ctx.tenant_id.clone(),
            instance_id: instance_id.to_string(),
            task_type: task_type.to_string(),
            enabled: true,
            created: now,
            updated: now,
            deleted: false,
            deleted_at: None,
        };
        store.create(&task).context(error::CatalogSnafu)?;
        info!(
            "Scheduled {} task '{}' ({}) on instance '{}'",
            task.task_type, task.name, task.id, instance_id
        );
        Ok(task)
    }

    pub fn show(&self, ctx: &RequestContext, id: &str) -> Result<ScheduledTask> {
        let store = read_store(&self.store)?;
        load_task(&*store, ctx, id)
    }

    /// The caller's live tasks across all instances.
    pub fn list(&self, ctx: &RequestContext) -> Result<Vec<ScheduledTask>> {
        let store = read_store(&self.store)?;
        store
            .find_all(&Filter::new().eq("tenant_id", ctx.tenant_id.as_str()).live())
            .context(error::CatalogSnafu)
    }

    pub fn list_for_instance(
        &self,
        ctx: &RequestContext,
        instance_id: &str,
    ) -> Result<Vec<ScheduledTask>> {
        let store = read_store(&self.store)?;
        store
            .find_all(
                &Filter::new()
                    .eq("tenant_id", ctx.tenant_id.as_str())
                    .eq("instance_id", instance_id)
                    .live(),
            )
            .context(error::CatalogSnafu)
    }

    /// Soft-deletes the task; it no longer shows up in listings.
    pub fn delete(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        let mut store = write_store(&self.store)?;
        let mut task = load_task(&*store, ctx, id)?;
        store
            .delete(&mut task, Utc::now())
            .context(error::CatalogSnafu)?;
        info!("Deleted scheduled task '{}'", id);
        Ok(())
    }
}

fn load_task<S: CatalogStore>(store: &S, ctx: &RequestContext, id: &str) -> Result<ScheduledTask> {
    store
        .get::<ScheduledTask>(id)
        .context(error::CatalogSnafu)?
        .filter(|t| !t.deleted && ctx.can_access(&t.tenant_id))
        .context(error::ScheduledTaskNotFoundSnafu { id })
}
