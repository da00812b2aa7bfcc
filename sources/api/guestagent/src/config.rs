//! Agent settings, read from a TOML file.

use serde::Deserialize;
use snafu::ResultExt;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::{codec_for, CodecKind};
use crate::error::{self, Result};
use crate::overrides::ConfigurationManager;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/trove/guest-agent.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GuestConfig {
    /// Datastore manager, e.g. `redis` or `mysql`.
    pub manager: String,
    pub config_path: PathBuf,
    pub overrides_dir: PathBuf,
    pub codec: CodecKind,
    pub ini_section: String,
    /// Keys whose occurrences add up across layers instead of replacing each other.
    pub repeatable_keys: Vec<String>,
    pub validation_rules: PathBuf,
    pub apply_dynamic_configuration: bool,
    pub restart_commands: Vec<String>,
    /// Seconds a restart may take.
    pub state_change_wait_time: u64,
    pub redis_socket: Option<PathBuf>,
    pub redis_password: Option<String>,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            manager: "redis".to_string(),
            config_path: "/etc/redis/redis.conf".into(),
            overrides_dir: "/etc/redis/conf.d".into(),
            codec: CodecKind::Properties,
            ini_section: "mysqld".to_string(),
            repeatable_keys: vec!["rename-command".to_string()],
            validation_rules: "/etc/trove/validation-rules.json".into(),
            apply_dynamic_configuration: true,
            restart_commands: vec!["systemctl restart redis-server".to_string()],
            state_change_wait_time: 600,
            redis_socket: None,
            redis_password: None,
        }
    }
}

impl GuestConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).context(error::ConfigReadSnafu { path })?;
        toml::from_str(&data).context(error::ConfigParseSnafu { path })
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.state_change_wait_time)
    }

    pub fn configuration_manager(&self) -> Result<ConfigurationManager> {
        ConfigurationManager::new(
            &self.config_path,
            &self.overrides_dir,
            codec_for(self.codec, &self.ini_section),
            self.repeatable_keys.iter().cloned().collect::<HashSet<_>>(),
        )
    }

    pub fn is_redis(&self) -> bool {
        self.manager == "redis"
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guest-agent.toml");
        fs::write(
            &path,
            r#"
manager = "mysql"
config-path = "/etc/mysql/my.cnf"
codec = "ini"
repeatable-keys = []
restart-commands = ["systemctl restart mysql"]
"#,
        )
        .unwrap();
        let config = GuestConfig::from_path(&path).unwrap();
        assert_eq!(config.codec, CodecKind::Ini);
        assert!(!config.is_redis());
        assert!(config.repeatable_keys.is_empty());
        assert_eq!(config.ini_section, "mysqld");
        assert_eq!(config.restart_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guest-agent.toml");
        fs::write(&path, "codec = \"yaml\"\n").unwrap();
        assert!(matches!(
            GuestConfig::from_path(&path).unwrap_err(),
            crate::Error::ConfigParse { .. }
        ));
    }
}
