use catalog::{CatalogStore, Filter, SoftDelete, Transaction};
use chrono::Utc;
use log::{debug, info, warn};
use model::{
    ConfigurationGroup, ConfigurationParameter, Datastore, DatastoreVersion, Instance,
    InstanceTask, ParameterOverrides, ResourceName,
};
use snafu::{ensure, OptionExt, ResultExt};
use std::sync::Arc;
use taskmanager::TaskDispatcher;
use uuid::Uuid;

use super::validation::{resolve_values, validate_values};
use super::{effective_rules, RuleRegistry};
use crate::config::Config;
use crate::context::RequestContext;
use crate::datastore;
use crate::error::{self, Result};
use crate::{read_store, write_store, SharedStore};

/// A configuration group with its resolved values.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDetail {
    pub group: ConfigurationGroup,
    pub values: ParameterOverrides,
    /// Number of live instances attached to the group.
    pub instance_count: usize,
    /// Attached instances the dispatcher refused to update.  Each is marked `UpdateError`.
    pub refused: Vec<String>,
}

/// One page of a listing.  `next_marker` is set when more items follow; pass it back as the
/// marker to continue.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_marker: Option<String>,
}

pub struct ConfigurationController<S> {
    store: SharedStore<S>,
    config: Arc<Config>,
    rules: Arc<RuleRegistry>,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl<S: CatalogStore> ConfigurationController<S> {
    pub fn new(
        store: SharedStore<S>,
        config: Arc<Config>,
        rules: Arc<RuleRegistry>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            store,
            config,
            rules,
            dispatcher,
        }
    }

    pub fn create(
        &self,
        ctx: &RequestContext,
        name: &str,
        description: Option<&str>,
        datastore: &str,
        version: Option<&str>,
        values: &ParameterOverrides,
    ) -> Result<GroupDetail> {
        let name = ResourceName::try_from(name).context(error::InvalidNameSnafu)?;
        let mut store = write_store(&self.store)?;
        let (datastore, version) = datastore::resolve(&*store, datastore, version)?;
        let rules = effective_rules(&*store, &self.rules, &version)?;
        validate_values(&rules, &datastore.name, values)?;

        let now = Utc::now();
        let group = ConfigurationGroup {
            id: Uuid::new_v4().to_string(),
            name,
            description: description.map(str::to_string),
            tenant_id: ctx.tenant_id.clone(),
            datastore_version_id: version.id.clone(),
            created: now,
            updated: now,
            deleted: false,
            deleted_at: None,
        };
        let mut tx = Transaction::new(format!("create-configuration-{}", group.id));
        tx.create(&group).context(error::CatalogSnafu)?;
        for (key, value) in values {
            let param = ConfigurationParameter::new(
                Uuid::new_v4().to_string(),
                group.id.clone(),
                key.clone(),
                value,
            );
            tx.create(&param).context(error::CatalogSnafu)?;
        }
        store.commit_transaction(tx).context(error::CatalogSnafu)?;
        info!(
            "Created configuration group '{}' ({}) with {} values",
            group.name,
            group.id,
            values.len()
        );

        Ok(GroupDetail {
            group,
            values: values.clone(),
            instance_count: 0,
            refused: Vec::new(),
        })
    }

    pub fn show(&self, ctx: &RequestContext, id: &str) -> Result<GroupDetail> {
        let store = read_store(&self.store)?;
        let group = load_group(&*store, ctx, id)?;
        let version = datastore::version_by_id(&*store, &group.datastore_version_id)?;
        let values = self.current_values(&*store, &version, id)?;
        let instance_count = attached(&*store, id)?.len();
        Ok(GroupDetail {
            group,
            values,
            instance_count,
            refused: Vec::new(),
        })
    }

    /// Groups visible to the caller, ordered by id.  `limit` is capped at the configured page
    /// size; `marker` is the id of the last item of the previous page.
    pub fn list(
        &self,
        ctx: &RequestContext,
        limit: Option<usize>,
        marker: Option<&str>,
    ) -> Result<Page<ConfigurationGroup>> {
        let page_size = self.config.configurations_page_size.max(1);
        let limit = limit.map_or(page_size, |l| l.clamp(1, page_size));

        let store = read_store(&self.store)?;
        let mut filter = Filter::new().live();
        if !ctx.is_admin {
            filter = filter.eq("tenant_id", ctx.tenant_id.as_str());
        }
        let groups: Vec<ConfigurationGroup> =
            store.find_all(&filter).context(error::CatalogSnafu)?;

        let mut remaining = groups
            .into_iter()
            .filter(|g| marker.map_or(true, |m| g.id.as_str() > m))
            .peekable();
        let items: Vec<ConfigurationGroup> = remaining.by_ref().take(limit).collect();
        let next_marker = match remaining.peek() {
            Some(_) => items.last().map(|g| g.id.clone()),
            None => None,
        };
        Ok(Page { items, next_marker })
    }

    /// Live instances attached to the group.
    pub fn instances(&self, ctx: &RequestContext, id: &str) -> Result<Vec<Instance>> {
        let store = read_store(&self.store)?;
        load_group(&*store, ctx, id)?;
        attached(&*store, id)
    }

    /// Replaces all of the group's values and pushes them to attached instances.
    pub fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        values: &ParameterOverrides,
    ) -> Result<GroupDetail> {
        self.change_values(ctx, id, values, true)
    }

    /// Merges the values into the group's existing ones and pushes the result to attached
    /// instances.
    pub fn edit(
        &self,
        ctx: &RequestContext,
        id: &str,
        values: &ParameterOverrides,
    ) -> Result<GroupDetail> {
        self.change_values(ctx, id, values, false)
    }

    /// Soft-deletes the group and its values.  Fails while any instance is attached.
    pub fn delete(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        let mut store = write_store(&self.store)?;
        let mut group = load_group(&*store, ctx, id)?;
        let count = attached(&*store, id)?.len();
        ensure!(
            count == 0,
            error::InstanceAssignedToConfigurationSnafu { id, count }
        );

        let now = Utc::now();
        let mut tx = Transaction::new(format!("delete-configuration-{}", id));
        group.mark_deleted(now);
        tx.save(&group).context(error::CatalogSnafu)?;
        for mut param in live_parameters(&*store, id)? {
            param.mark_deleted(now);
            tx.save(&param).context(error::CatalogSnafu)?;
        }
        store.commit_transaction(tx).context(error::CatalogSnafu)?;
        info!("Deleted configuration group '{}'", id);
        Ok(())
    }

    /// The group's values, as they would be pushed to an instance.
    pub fn get_configuration_overrides(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<ParameterOverrides> {
        Ok(self.show(ctx, id)?.values)
    }

    /// Whether applying the group's values needs a service restart.
    pub fn does_configuration_need_restart(&self, ctx: &RequestContext, id: &str) -> Result<bool> {
        let store = read_store(&self.store)?;
        let group = load_group(&*store, ctx, id)?;
        let version = datastore::version_by_id(&*store, &group.datastore_version_id)?;
        let rules = effective_rules(&*store, &self.rules, &version)?;
        let params = live_parameters(&*store, id)?;
        Ok(rules.requires_restart(
            params.iter().map(|p| p.configuration_key.as_str()),
            self.config.apply_dynamic_configuration,
        ))
    }

    fn change_values(
        &self,
        ctx: &RequestContext,
        id: &str,
        values: &ParameterOverrides,
        replace: bool,
    ) -> Result<GroupDetail> {
        let mut store = write_store(&self.store)?;
        let mut group = load_group(&*store, ctx, id)?;
        let version = datastore::version_by_id(&*store, &group.datastore_version_id)?;
        let rules = effective_rules(&*store, &self.rules, &version)?;
        validate_values(&rules, &datastore_name(&*store, &version)?, values)?;

        let existing = live_parameters(&*store, id)?;
        let mut merged = if replace {
            ParameterOverrides::new()
        } else {
            resolve_values(&rules, &existing)?
        };

        let now = Utc::now();
        let mut tx = Transaction::new(format!("update-configuration-{}", id));
        for mut param in existing {
            if replace || values.contains_key(&param.configuration_key) {
                param.mark_deleted(now);
                tx.save(&param).context(error::CatalogSnafu)?;
            }
        }
        for (key, value) in values {
            let param = ConfigurationParameter::new(
                Uuid::new_v4().to_string(),
                id.to_string(),
                key.clone(),
                value,
            );
            tx.create(&param).context(error::CatalogSnafu)?;
            merged.insert(key.clone(), value.clone());
        }
        group.updated = now;
        tx.save(&group).context(error::CatalogSnafu)?;
        store.commit_transaction(tx).context(error::CatalogSnafu)?;

        // Dispatch while still holding the store so instances see updates in commit order.  The
        // values are committed, so a refusal is recorded on the instance instead of failing the
        // call.
        let instances = attached(&*store, id)?;
        let mut refused = Vec::new();
        for instance in &instances {
            debug!("Pushing configuration '{}' to '{}'", id, instance.id);
            if let Err(e) = self.dispatcher.update_overrides(&instance.id, &merged) {
                warn!(
                    "Dispatcher refused update_overrides for '{}': {}",
                    instance.id, e
                );
                let mut instance = instance.clone();
                instance.set_task(InstanceTask::UpdateError, Some(e.to_string()));
                store.save(&instance).context(error::CatalogSnafu)?;
                refused.push(instance.id);
            }
        }
        info!(
            "Updated configuration group '{}' on {} of {} instances",
            id,
            instances.len() - refused.len(),
            instances.len()
        );

        Ok(GroupDetail {
            group,
            values: merged,
            instance_count: instances.len(),
            refused,
        })
    }

    fn current_values(
        &self,
        store: &S,
        version: &DatastoreVersion,
        id: &str,
    ) -> Result<ParameterOverrides> {
        let params = live_parameters(store, id)?;
        if params.is_empty() {
            return Ok(ParameterOverrides::new());
        }
        let rules = effective_rules(store, &self.rules, version)?;
        resolve_values(&rules, &params)
    }
}

fn load_group<S: CatalogStore>(
    store: &S,
    ctx: &RequestContext,
    id: &str,
) -> Result<ConfigurationGroup> {
    store
        .get::<ConfigurationGroup>(id)
        .context(error::CatalogSnafu)?
        .filter(|g| !g.deleted && ctx.can_access(&g.tenant_id))
        .context(error::ConfigurationNotFoundSnafu { id })
}

fn live_parameters<S: CatalogStore>(store: &S, id: &str) -> Result<Vec<ConfigurationParameter>> {
    store
        .find_all(&Filter::new().eq("configuration_id", id).live())
        .context(error::CatalogSnafu)
}

fn attached<S: CatalogStore>(store: &S, id: &str) -> Result<Vec<Instance>> {
    store
        .find_all(&Filter::new().eq("configuration_id", id).live())
        .context(error::CatalogSnafu)
}

fn datastore_name<S: CatalogStore>(store: &S, version: &DatastoreVersion) -> Result<String> {
    Ok(store
        .get::<Datastore>(&version.datastore_id)
        .context(error::CatalogSnafu)?
        .map_or_else(|| version.manager.clone(), |d| d.name))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{DatastoreCatalog, Error};
    use catalog::MemoryCatalog;
    use maplit::btreemap;
    use model::{InstanceTask, ParameterValue, ValidationRules};
    use std::sync::{Mutex, RwLock};

    #[derive(Default)]
    struct RecordingDispatcher {
        updates: Mutex<Vec<(String, ParameterOverrides)>>,
        refuse: Mutex<Vec<String>>,
    }

    impl TaskDispatcher for RecordingDispatcher {
        fn create_cluster(&self, _: &str) -> taskmanager::Result<()> {
            Ok(())
        }

        fn grow_cluster(&self, _: &str, _: &[String]) -> taskmanager::Result<()> {
            Ok(())
        }

        fn update_overrides(
            &self,
            instance_id: &str,
            overrides: &ParameterOverrides,
        ) -> taskmanager::Result<()> {
            if self.refuse.lock().unwrap().iter().any(|id| id == instance_id) {
                return Err(taskmanager::Error::ShutDown {
                    command: "update_overrides".to_string(),
                });
            }
            self.updates
                .lock()
                .unwrap()
                .push((instance_id.to_string(), overrides.clone()));
            Ok(())
        }
    }

    struct Fixture {
        store: SharedStore<MemoryCatalog>,
        dispatcher: Arc<RecordingDispatcher>,
        controller: ConfigurationController<MemoryCatalog>,
        version_id: String,
    }

    fn fixture(page_size: usize) -> Fixture {
        let store = Arc::new(RwLock::new(MemoryCatalog::new()));
        let datastores = DatastoreCatalog::new(store.clone());
        datastores.update_datastore("mysql", None).unwrap();
        let version = datastores
            .update_datastore_version("mysql", "5.7", "mysql", "img", vec![], true)
            .unwrap();
        datastores.update_datastore("mysql", Some("5.7")).unwrap();

        let rules = Arc::new(RuleRegistry::new("/nonexistent"));
        rules
            .insert(
                "mysql",
                Arc::new(
                    ValidationRules::from_json(
                        r#"{"configuration-parameters": [
                            {"name": "max_connections", "type": "integer", "min": 1, "max": 1000, "dynamic": true},
                            {"name": "autocommit", "type": "boolean", "dynamic": true},
                            {"name": "innodb_buffer_pool_size", "type": "integer", "min": 0, "restart_required": true}
                        ]}"#,
                    )
                    .unwrap(),
                ),
            )
            .unwrap();
        let config = Config {
            configurations_page_size: page_size,
            ..Default::default()
        };
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let controller = ConfigurationController::new(
            store.clone(),
            Arc::new(config),
            rules,
            dispatcher.clone(),
        );
        Fixture {
            store,
            dispatcher,
            controller,
            version_id: version.id,
        }
    }

    fn attach(f: &Fixture, instance_id: &str, configuration_id: &str) {
        let now = Utc::now();
        let instance = Instance {
            id: instance_id.to_string(),
            name: ResourceName::try_from(instance_id).unwrap(),
            tenant_id: "t1".into(),
            flavor_id: "7".into(),
            volume_size: Some(1),
            cluster_id: None,
            instance_type: None,
            availability_zone: None,
            nics: vec![],
            datastore_version_id: f.version_id.clone(),
            configuration_id: Some(configuration_id.to_string()),
            task_status: InstanceTask::None,
            task_description: None,
            created: now,
            updated: now,
            deleted: false,
            deleted_at: None,
        };
        f.store.write().unwrap().create(&instance).unwrap();
    }

    fn values(max_connections: i64) -> ParameterOverrides {
        btreemap! { "max_connections".to_string() => ParameterValue::Integer(max_connections) }
    }

    #[test]
    fn create_and_show() {
        let f = fixture(20);
        let ctx = RequestContext::tenant("t1");
        let created = f
            .controller
            .create(&ctx, "tuned", Some("more connections"), "mysql", None, &values(100))
            .unwrap();
        let shown = f.controller.show(&ctx, &created.group.id).unwrap();
        assert_eq!(shown.values, values(100));
        assert_eq!(shown.group.description.as_deref(), Some("more connections"));
        assert_eq!(shown.instance_count, 0);

        assert!(matches!(
            f.controller
                .show(&RequestContext::tenant("t2"), &created.group.id)
                .unwrap_err(),
            Error::ConfigurationNotFound { .. }
        ));
    }

    #[test]
    fn invalid_values_change_nothing() {
        let f = fixture(20);
        let ctx = RequestContext::tenant("t1");
        let created = f
            .controller
            .create(&ctx, "tuned", None, "mysql", None, &values(100))
            .unwrap();
        let err = f
            .controller
            .update(&ctx, &created.group.id, &values(5000))
            .unwrap_err();
        assert!(matches!(err, Error::ParameterGreaterThanMax { .. }));
        assert_eq!(
            f.controller
                .get_configuration_overrides(&ctx, &created.group.id)
                .unwrap(),
            values(100)
        );
        assert!(matches!(
            f.controller
                .create(&ctx, "bad", None, "mysql", None, &btreemap! {
                    "autocommit".to_string() => ParameterValue::Integer(1)
                })
                .unwrap_err(),
            Error::ParameterWrongType { .. }
        ));
    }

    #[test]
    fn edit_merges_and_update_replaces() {
        let f = fixture(20);
        let ctx = RequestContext::tenant("t1");
        let id = f
            .controller
            .create(&ctx, "tuned", None, "mysql", None, &values(100))
            .unwrap()
            .group
            .id;
        attach(&f, "i1", &id);

        let edited = f
            .controller
            .edit(&ctx, &id, &btreemap! {
                "autocommit".to_string() => ParameterValue::Boolean(false)
            })
            .unwrap();
        let both = btreemap! {
            "autocommit".to_string() => ParameterValue::Boolean(false),
            "max_connections".to_string() => ParameterValue::Integer(100),
        };
        assert_eq!(edited.values, both);
        assert_eq!(edited.instance_count, 1);

        let replaced = f.controller.update(&ctx, &id, &values(200)).unwrap();
        assert_eq!(replaced.values, values(200));
        assert_eq!(f.controller.show(&ctx, &id).unwrap().values, values(200));

        let updates = f.dispatcher.updates.lock().unwrap();
        assert_eq!(
            *updates,
            vec![("i1".to_string(), both), ("i1".to_string(), values(200))]
        );
    }

    #[test]
    fn refused_update_is_recorded_on_the_instance() {
        let f = fixture(20);
        let ctx = RequestContext::tenant("t1");
        let id = f
            .controller
            .create(&ctx, "tuned", None, "mysql", None, &values(100))
            .unwrap()
            .group
            .id;
        attach(&f, "i1", &id);
        attach(&f, "i2", &id);
        attach(&f, "i3", &id);
        f.dispatcher.refuse.lock().unwrap().push("i2".to_string());

        let updated = f.controller.update(&ctx, &id, &values(200)).unwrap();
        assert_eq!(updated.values, values(200));
        assert_eq!(updated.refused, vec!["i2".to_string()]);
        assert_eq!(f.controller.show(&ctx, &id).unwrap().values, values(200));

        // Instances after the refused one still get the update.
        let pushed: Vec<String> = f
            .dispatcher
            .updates
            .lock()
            .unwrap()
            .iter()
            .map(|(instance, _)| instance.clone())
            .collect();
        assert_eq!(pushed, vec!["i1".to_string(), "i3".to_string()]);

        let store = f.store.read().unwrap();
        let refused: Instance = store.get("i2").unwrap().unwrap();
        assert_eq!(refused.task_status, InstanceTask::UpdateError);
        assert!(refused.task_description.is_some());
        let accepted: Instance = store.get("i1").unwrap().unwrap();
        assert_eq!(accepted.task_status, InstanceTask::None);
    }

    #[test]
    fn delete_requires_no_instances() {
        let f = fixture(20);
        let ctx = RequestContext::tenant("t1");
        let id = f
            .controller
            .create(&ctx, "tuned", None, "mysql", None, &values(100))
            .unwrap()
            .group
            .id;
        attach(&f, "i1", &id);
        let err = f.controller.delete(&ctx, &id).unwrap_err();
        assert!(matches!(
            err,
            Error::InstanceAssignedToConfiguration { count: 1, .. }
        ));
        assert_eq!(err.status_code().as_u16(), 409);

        let mut instance: Instance = f.store.read().unwrap().get("i1").unwrap().unwrap();
        instance.configuration_id = None;
        f.store.write().unwrap().save(&instance).unwrap();
        f.controller.delete(&ctx, &id).unwrap();
        assert!(matches!(
            f.controller.show(&ctx, &id).unwrap_err(),
            Error::ConfigurationNotFound { .. }
        ));
        let params: Vec<ConfigurationParameter> = f
            .store
            .read()
            .unwrap()
            .find_all(&Filter::new().eq("configuration_id", id.as_str()))
            .unwrap();
        assert!(params.iter().all(|p| p.deleted));
    }

    #[test]
    fn restart_classification() {
        let f = fixture(20);
        let ctx = RequestContext::tenant("t1");
        let dynamic = f
            .controller
            .create(&ctx, "dynamic", None, "mysql", None, &values(100))
            .unwrap()
            .group
            .id;
        let restart = f
            .controller
            .create(&ctx, "restart", None, "mysql", None, &btreemap! {
                "innodb_buffer_pool_size".to_string() => ParameterValue::Integer(1024)
            })
            .unwrap()
            .group
            .id;
        assert!(!f.controller.does_configuration_need_restart(&ctx, &dynamic).unwrap());
        assert!(f.controller.does_configuration_need_restart(&ctx, &restart).unwrap());
    }

    #[test]
    fn list_pages_by_marker() {
        let f = fixture(2);
        let ctx = RequestContext::tenant("t1");
        for name in &["a", "b", "c"] {
            f.controller
                .create(&ctx, name, None, "mysql", None, &values(10))
                .unwrap();
        }
        f.controller
            .create(&RequestContext::tenant("t2"), "other", None, "mysql", None, &values(10))
            .unwrap();

        // The limit is capped at the page size.
        let first = f.controller.list(&ctx, Some(50), None).unwrap();
        assert_eq!(first.items.len(), 2);
        let marker = first.next_marker.clone().unwrap();
        let second = f.controller.list(&ctx, None, Some(marker.as_str())).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.next_marker, None);
        assert!(second.items.iter().all(|g| g.id.as_str() > marker.as_str()));

        let admin = f.controller.list(&RequestContext::admin("ops"), None, None).unwrap();
        assert_eq!(admin.items.len(), 2);
        assert!(admin.next_marker.is_some());
    }
}
