/*!
Redis guest support.

Redis reads a properties-style file and accepts most parameters at runtime through `CONFIG SET`.
The guest renames `CONFIG` to a random name so only the agent can change settings, and keeps
the settings it manages in the `common` system layer.
*/

use async_trait::async_trait;
use log::{debug, info};
use maplit::btreemap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde_json::{Map, Value};
use snafu::ResultExt;
use std::path::{Path, PathBuf};

use crate::applier::{LiveApplier, RuntimeAdmin, WhitespaceJoin};
use crate::directive::{Directive, Overrides, ValueConverter};
use crate::error::{self, Result};
use crate::overrides::{ConfigurationManager, DEFAULT_SYSTEM_LAYER};
use model::ValidationRules;

pub const CONFIG_COMMAND: &str = "CONFIG";
pub const CLUSTER_LAYER: &str = "clustering";
const MANGLED_LENGTH: usize = 32;
const DEFAULT_PORT: u16 = 6379;

/// Talks to the local server over its unix socket, or loopback TCP when there is none.
pub struct RedisAdmin {
    client: Client,
    config_command: String,
}

impl RedisAdmin {
    pub fn new(socket: Option<&Path>, password: Option<String>) -> Result<Self> {
        let addr = match socket {
            Some(path) => ConnectionAddr::Unix(path.to_path_buf()),
            None => ConnectionAddr::Tcp("127.0.0.1".to_string(), DEFAULT_PORT),
        };
        let info = ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: 0,
                username: None,
                password,
            },
        };
        let client = Client::open(info).context(error::RedisSnafu { op: "open" })?;
        Ok(Self {
            client,
            config_command: CONFIG_COMMAND.to_string(),
        })
    }

    pub fn config_command(&self) -> &str {
        &self.config_command
    }

    pub fn set_config_command<S: Into<String>>(&mut self, name: S) {
        self.config_command = name.into();
    }

    pub async fn ping(&self) -> Result<bool> {
        let mut conn = self.connection().await?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context(error::RedisSnafu { op: "PING" })?;
        Ok(reply == "PONG")
    }

    async fn connection(&self) -> Result<redis::aio::Connection> {
        self.client
            .get_async_connection()
            .await
            .context(error::RedisSnafu { op: "connect" })
    }
}

#[async_trait]
impl RuntimeAdmin for RedisAdmin {
    async fn config_set(&mut self, name: &str, value: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let reply = redis::cmd(&self.config_command)
            .arg("SET")
            .arg(name)
            .arg(value)
            .query_async::<_, redis::Value>(&mut conn)
            .await;
        match reply {
            Ok(redis::Value::Okay) => Ok(true),
            Ok(redis::Value::Status(status)) => Ok(status == "OK"),
            Ok(other) => {
                debug!("Unexpected reply to CONFIG SET {}: {:?}", name, other);
                Ok(false)
            }
            // An error reply is the server refusing the value.
            Err(e) if e.kind() == redis::ErrorKind::ResponseError => {
                debug!("CONFIG SET {} refused: {}", name, e);
                Ok(false)
            }
            Err(e) => Err(e).context(error::RedisSnafu {
                op: format!("CONFIG SET {}", name),
            }),
        }
    }
}

/// Paths the agent pins in the managed configuration.
#[derive(Debug, Clone)]
pub struct RedisPaths {
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub data_dir: PathBuf,
}

impl Default for RedisPaths {
    fn default() -> Self {
        Self {
            pid_file: "/var/run/redis/redis-server.pid".into(),
            log_file: "/var/log/redis/server.log".into(),
            data_dir: "/var/lib/redis".into(),
        }
    }
}

pub struct RedisApp {
    manager: ConfigurationManager,
    admin: RedisAdmin,
    converter: ValueConverter,
    applier: LiveApplier<WhitespaceJoin>,
}

impl RedisApp {
    /// The socket and password set in the configuration file win over the ones given here.
    pub fn new(
        manager: ConfigurationManager,
        socket: Option<PathBuf>,
        password: Option<String>,
    ) -> Result<Self> {
        let props = manager.effective()?;
        let socket = property(&props, "unixsocket").map(PathBuf::from).or(socket);
        let password = property(&props, "requirepass").or(password);
        let mut admin = RedisAdmin::new(socket.as_deref(), password)?;
        if let Some(name) = renamed_config_command(&props) {
            admin.set_config_command(name);
        }
        Ok(Self {
            manager,
            admin,
            converter: ValueConverter::redis(),
            applier: LiveApplier::new(WhitespaceJoin),
        })
    }

    pub fn manager(&self) -> &ConfigurationManager {
        &self.manager
    }

    pub fn admin(&self) -> &RedisAdmin {
        &self.admin
    }

    pub fn converter(&self) -> &ValueConverter {
        &self.converter
    }

    /// Pins the settings the agent relies on and hides `CONFIG` behind a new random name.
    pub fn apply_initial_guestagent_configuration(&mut self, paths: &RedisPaths) -> Result<()> {
        let mangled = mangled_command_name();
        let overrides = btreemap! {
            "daemonize".to_string() => Directive::single("yes"),
            "pidfile".to_string() => Directive::single(path_arg(&paths.pid_file)),
            "logfile".to_string() => Directive::single(path_arg(&paths.log_file)),
            "dir".to_string() => Directive::single(path_arg(&paths.data_dir)),
            "rename-command".to_string() => Directive::from_args(vec![CONFIG_COMMAND, mangled.as_str()]),
        };
        self.manager
            .apply_system_override(&overrides, DEFAULT_SYSTEM_LAYER)?;
        self.admin.set_config_command(mangled);
        info!("Applied initial guest agent configuration");
        Ok(())
    }

    pub fn enable_cluster(&self) -> Result<()> {
        self.manager.apply_system_override(
            &btreemap! { "cluster-enabled".to_string() => Directive::single("yes") },
            CLUSTER_LAYER,
        )
    }

    pub fn set_cluster_config_filename(&self, name: &str) -> Result<()> {
        self.manager.apply_system_override(
            &btreemap! { "cluster-config-file".to_string() => Directive::single(name) },
            CLUSTER_LAYER,
        )
    }

    /// Persists user overrides; an empty set leaves the current ones alone.
    pub fn update_overrides(&self, values: &Map<String, Value>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let overrides = self.converter.to_overrides(values)?;
        self.manager.apply_user_override(&overrides)
    }

    /// Sets the dynamic values on the running server.
    pub async fn apply_overrides(
        &mut self,
        rules: &ValidationRules,
        values: &Map<String, Value>,
    ) -> Result<Vec<String>> {
        let overrides = self.converter.to_overrides(values)?;
        self.applier.apply(&mut self.admin, rules, &overrides).await
    }

    pub fn remove_overrides(&self) -> Result<()> {
        self.manager.remove_user_override()
    }

    pub fn reset_configuration(&self, contents: &str) -> Result<()> {
        self.manager.save_configuration(contents)
    }

    pub fn property(&self, name: &str) -> Result<Option<String>> {
        Ok(property(&self.manager.effective()?, name))
    }

    pub fn config_command_name(&self) -> Result<Option<String>> {
        Ok(renamed_config_command(&self.manager.effective()?))
    }

    pub fn logfile(&self) -> Result<Option<String>> {
        self.property("logfile")
    }

    pub fn db_filename(&self) -> Result<Option<String>> {
        self.property("dbfilename")
    }

    pub fn working_dir(&self) -> Result<Option<String>> {
        self.property("dir")
    }

    pub fn auth_password(&self) -> Result<Option<String>> {
        self.property("requirepass")
    }

    pub fn is_appendonly_enabled(&self) -> Result<bool> {
        self.flag("appendonly")
    }

    pub fn append_file_name(&self) -> Result<Option<String>> {
        self.property("appendfilename")
    }

    pub fn is_cluster_enabled(&self) -> Result<bool> {
        self.flag("cluster-enabled")
    }

    pub fn cluster_config_filename(&self) -> Result<Option<String>> {
        self.property("cluster-config-file")
    }

    pub fn cluster_node_timeout(&self) -> Result<Option<String>> {
        self.property("cluster-node-timeout")
    }

    fn flag(&self, name: &str) -> Result<bool> {
        Ok(self.property(name)?.map_or(false, |v| v == "yes"))
    }
}

/// The arguments of a key's first occurrence; empty values count as unset.
fn property(props: &Overrides, name: &str) -> Option<String> {
    let args = props.get(name)?.occurrences().first()?.join(" ");
    if args.is_empty() || args == "''" || args == "\"\"" {
        None
    } else {
        Some(args)
    }
}

fn renamed_config_command(props: &Overrides) -> Option<String> {
    props
        .get("rename-command")?
        .occurrences()
        .iter()
        .rev()
        .find(|args| args.len() == 2 && args[0].eq_ignore_ascii_case(CONFIG_COMMAND))
        .map(|args| args[1].clone())
}

fn mangled_command_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MANGLED_LENGTH)
        .map(char::from)
        .collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::PropertiesCodec;
    use maplit::hashset;
    use serde_json::json;
    use std::fs;

    const BASE: &str = "port 6379\nappendonly no\nrename-command FLUSHALL \"\"\n";

    fn app(dir: &Path) -> RedisApp {
        let config = dir.join("redis.conf");
        if !config.exists() {
            fs::write(&config, BASE).unwrap();
        }
        let manager = ConfigurationManager::new(
            config,
            dir.join("conf.d"),
            Box::new(PropertiesCodec),
            hashset! { "rename-command".to_string() },
        )
        .unwrap();
        RedisApp::new(manager, None, None).unwrap()
    }

    #[test]
    fn initial_configuration_hides_config_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        assert_eq!(app.admin().config_command(), CONFIG_COMMAND);
        assert_eq!(app.config_command_name().unwrap(), None);

        let paths = RedisPaths {
            data_dir: dir.path().join("data"),
            ..Default::default()
        };
        app.apply_initial_guestagent_configuration(&paths).unwrap();
        let mangled = app.config_command_name().unwrap().unwrap();
        assert_eq!(mangled.len(), MANGLED_LENGTH);
        assert!(mangled.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(app.admin().config_command(), mangled);
        assert_eq!(
            app.working_dir().unwrap(),
            Some(paths.data_dir.to_string_lossy().into_owned())
        );

        let written = fs::read_to_string(dir.path().join("redis.conf")).unwrap();
        assert!(written.contains("daemonize yes\n"));
        assert!(written.contains(&format!("rename-command CONFIG {}\n", mangled)));
        assert!(written.contains("rename-command FLUSHALL \"\"\n"));

        // A restarted agent finds the renamed command in the file.
        drop(app);
        assert_eq!(app_command(dir.path()), mangled);
    }

    fn app_command(dir: &Path) -> String {
        app(dir).admin().config_command().to_string()
    }

    #[test]
    fn clustering_layer() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        assert!(!app.is_cluster_enabled().unwrap());
        app.enable_cluster().unwrap();
        app.set_cluster_config_filename("nodes.conf").unwrap();
        assert!(app.is_cluster_enabled().unwrap());
        assert_eq!(
            app.cluster_config_filename().unwrap(),
            Some("nodes.conf".to_string())
        );
        let layers = app.manager().list_layers().unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].name, CLUSTER_LAYER);
    }

    #[test]
    fn user_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let values = json!({"appendonly": true, "appendfilename": "a.aof"});
        app.update_overrides(values.as_object().unwrap()).unwrap();
        assert!(app.is_appendonly_enabled().unwrap());
        assert_eq!(app.append_file_name().unwrap(), Some("a.aof".to_string()));

        // Nothing to apply keeps what is there.
        app.update_overrides(&Map::new()).unwrap();
        assert!(app.is_appendonly_enabled().unwrap());

        app.remove_overrides().unwrap();
        assert!(!app.is_appendonly_enabled().unwrap());
        assert_eq!(app.append_file_name().unwrap(), None);
    }

    #[test]
    fn reset_replaces_base() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        app.reset_configuration("port 7000\nrequirepass secret\n")
            .unwrap();
        assert_eq!(app.property("port").unwrap(), Some("7000".to_string()));
        assert_eq!(app.auth_password().unwrap(), Some("secret".to_string()));
        assert_eq!(app.db_filename().unwrap(), None);
    }
}
