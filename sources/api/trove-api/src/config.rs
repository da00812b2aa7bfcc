//! Control plane settings, read from a TOML file.  Every field has a default so a partial file,
//! or none at all, is usable.

use serde::Deserialize;
use snafu::ResultExt;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskmanager::Timeouts;

use crate::compute::Flavor;
use crate::error::{self, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog_path: PathBuf,
    /// Holds `<manager>/validation-rules.json` for each datastore manager.
    pub validation_rules_dir: PathBuf,
    /// When false, every configuration change is treated as needing a restart.
    pub apply_dynamic_configuration: bool,
    pub configurations_page_size: usize,
    /// Largest accepted volume, in GB.
    pub max_accepted_volume_size: u32,
    /// Seconds allowed for installing a cluster member.
    pub cluster_usage_timeout: u64,
    /// Seconds allowed for any other guest call.
    pub agent_call_high_timeout: u64,
    pub quotas: QuotaConfig,
    /// Cluster settings keyed by datastore manager.
    pub datastores: HashMap<String, DatastoreClusterConfig>,
    pub flavors: Vec<Flavor>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("/var/lib/trove/catalog"),
            validation_rules_dir: PathBuf::from("/etc/trove/templates"),
            apply_dynamic_configuration: true,
            configurations_page_size: 20,
            max_accepted_volume_size: 5,
            cluster_usage_timeout: 36000,
            agent_call_high_timeout: 1200,
            quotas: QuotaConfig::default(),
            datastores: HashMap::new(),
            flavors: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).context(error::ReadFileSnafu { path })?;
        toml::from_str(&data).context(error::ConfigParseSnafu { path })
    }

    /// Cluster settings for the manager, or the defaults if it has none.
    pub fn datastore(&self, manager: &str) -> DatastoreClusterConfig {
        self.datastores.get(manager).cloned().unwrap_or_default()
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            cluster_usage: Duration::from_secs(self.cluster_usage_timeout),
            agent_call_high: Duration::from_secs(self.agent_call_high_timeout),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub max_instances_per_tenant: i64,
    /// Total volume GB per tenant.
    pub max_volumes_per_tenant: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_instances_per_tenant: 5,
            max_volumes_per_tenant: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatastoreClusterConfig {
    /// Name of the cluster strategy serving this manager, e.g. "pxc".
    pub strategy: Option<String>,
    pub min_cluster_member_count: usize,
    pub volume_support: bool,
    /// When set and volumes aren't supported, flavors must provide ephemeral storage.
    pub device_path: Option<String>,
}

impl Default for DatastoreClusterConfig {
    fn default() -> Self {
        Self {
            strategy: None,
            min_cluster_member_count: 3,
            volume_support: true,
            device_path: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.apply_dynamic_configuration);
        assert_eq!(config.configurations_page_size, 20);
        assert_eq!(config.datastore("pxc").min_cluster_member_count, 3);
        assert_eq!(config.timeouts().agent_call_high, Duration::from_secs(1200));
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
apply_dynamic_configuration = false
max_accepted_volume_size = 10

[quotas]
max_instances_per_tenant = 9

[datastores.pxc]
strategy = "pxc"
min_cluster_member_count = 2
volume_support = false
device_path = "/dev/vdb"

[[flavors]]
id = "7"
name = "m1.small"
ram = 2048
ephemeral = 0
"#
        )
        .unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert!(!config.apply_dynamic_configuration);
        assert_eq!(config.quotas.max_instances_per_tenant, 9);
        assert_eq!(config.quotas.max_volumes_per_tenant, 20);
        let pxc = config.datastore("pxc");
        assert_eq!(pxc.strategy.as_deref(), Some("pxc"));
        assert!(!pxc.volume_support);
        assert_eq!(pxc.device_path.as_deref(), Some("/dev/vdb"));
        assert_eq!(config.flavors[0].name, "m1.small");
    }

    #[test]
    fn bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "configurations_page_size = \"many\"").unwrap();
        assert!(matches!(
            Config::from_path(file.path()).unwrap_err(),
            crate::Error::ConfigParse { .. }
        ));
    }
}
