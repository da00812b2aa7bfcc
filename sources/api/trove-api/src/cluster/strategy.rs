use log::warn;
use model::{Cluster, DatastoreVersion, Instance};
use snafu::OptionExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::pxc::PxcStrategy;
use super::validator::Validator;
use super::InstanceSpec;
use crate::config::Config;
use crate::error::{self, Result};
use crate::quota::Deltas;

/// Changes to an existing cluster that a strategy may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAction {
    Grow,
    Shrink,
}

impl fmt::Display for ClusterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterAction::Grow => write!(f, "grow"),
            ClusterAction::Shrink => write!(f, "shrink"),
        }
    }
}

/// Datastore-specific cluster behavior.
pub trait ClusterStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// The `instance_type` given to members.
    fn member_role(&self) -> &str;

    fn supports(&self, action: ClusterAction) -> bool;

    /// Validates the specs of a new cluster and returns the resources to reserve.
    fn validate_create(&self, validator: &Validator<'_>, specs: &[InstanceSpec]) -> Result<Deltas>;

    /// Validates the specs of members being added to `existing`.
    fn validate_grow(
        &self,
        validator: &Validator<'_>,
        existing: &[Instance],
        specs: &[InstanceSpec],
    ) -> Result<Deltas>;

    /// Instance rows for new members.  `ordinal_base` is the number of members the cluster has
    /// ever had, so generated names never repeat.
    fn build_members(
        &self,
        cluster: &Cluster,
        version: &DatastoreVersion,
        specs: &[InstanceSpec],
        ordinal_base: usize,
    ) -> Result<Vec<Instance>>;
}

/// Strategies keyed by datastore manager.
#[derive(Default)]
pub struct StrategyRegistry {
    by_manager: HashMap<String, Arc<dyn ClusterStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in strategies, plus any manager the config maps to one of them.
    pub fn from_config(config: &Config) -> Self {
        let pxc: Arc<dyn ClusterStrategy> = Arc::new(PxcStrategy);
        let mut registry = Self::new();
        registry.register("pxc", pxc.clone());
        for (manager, settings) in &config.datastores {
            match settings.strategy.as_deref() {
                Some("pxc") => registry.register(manager, pxc.clone()),
                Some(other) => warn!(
                    "Unknown cluster strategy '{}' for manager '{}', ignoring",
                    other, manager
                ),
                None => {}
            }
        }
        registry
    }

    pub fn register<S: Into<String>>(&mut self, manager: S, strategy: Arc<dyn ClusterStrategy>) {
        self.by_manager.insert(manager.into(), strategy);
    }

    pub fn get(&self, manager: &str) -> Result<Arc<dyn ClusterStrategy>> {
        self.by_manager
            .get(manager)
            .cloned()
            .context(error::ClusteringNotSupportedSnafu { manager })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DatastoreClusterConfig;
    use crate::Error;
    use maplit::hashmap;

    #[test]
    fn config_maps_managers() {
        let config = Config {
            datastores: hashmap! {
                "mysql-pxc".to_string() => DatastoreClusterConfig {
                    strategy: Some("pxc".into()),
                    ..Default::default()
                },
                "odd".to_string() => DatastoreClusterConfig {
                    strategy: Some("raft".into()),
                    ..Default::default()
                },
            },
            ..Default::default()
        };
        let registry = StrategyRegistry::from_config(&config);
        assert_eq!(registry.get("pxc").unwrap().name(), "pxc");
        assert_eq!(registry.get("mysql-pxc").unwrap().member_role(), "member");
        assert!(matches!(
            registry.get("odd").err(),
            Some(Error::ClusteringNotSupported { .. })
        ));
        assert!(registry.get("mysql").is_err());
    }
}
