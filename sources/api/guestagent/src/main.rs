/*!
# Introduction

guest-overrides manages the configuration of the datastore running on this guest.

* `apply` reads a JSON object of parameter overrides from stdin and makes it the user layer.  When
  every parameter is dynamic the values are also set on the running datastore; otherwise the
  datastore is restarted.
* `remove` drops the user layer and restarts the datastore.
* `init` pins the settings the agent relies on (Redis only).
* `get` prints the effective value of a key.
* `layers` lists the override layers in precedence order.
* `reset` replaces the base configuration with the contents of a file.
*/

use argh::FromArgs;
use guestagent::config::DEFAULT_CONFIG_PATH;
use guestagent::redis_app::RedisPaths;
use guestagent::{restart, service, GuestConfig, RedisApp, ValueConverter};
use log::{info, LevelFilter};
use serde_json::{Map, Value};
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};
use snafu::{OptionExt, ResultExt};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

/// Manage the datastore's configuration overrides
#[derive(FromArgs, PartialEq, Debug)]
struct Args {
    #[argh(option, default = "PathBuf::from(DEFAULT_CONFIG_PATH)")]
    /// path to the agent's config file
    config: PathBuf,

    #[argh(option, default = "LevelFilter::Info")]
    /// log level (error, warn, info, debug, trace)
    log_level: LevelFilter,

    #[argh(subcommand)]
    subcommand: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Apply(ApplyArgs),
    Remove(RemoveArgs),
    Init(InitArgs),
    Get(GetArgs),
    Layers(LayersArgs),
    Reset(ResetArgs),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "apply")]
/// Apply overrides read from stdin
struct ApplyArgs {}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "remove")]
/// Remove user overrides and restart the datastore
struct RemoveArgs {}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "init")]
/// Apply the agent's own settings
struct InitArgs {
    #[argh(switch)]
    /// enable clustering
    cluster: bool,

    #[argh(option)]
    /// cluster state file name
    cluster_config_file: Option<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "get")]
/// Print the effective value of a key
struct GetArgs {
    #[argh(positional)]
    /// configuration key
    key: String,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "layers")]
/// List override layers
struct LayersArgs {}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "reset")]
/// Replace the base configuration
struct ResetArgs {
    #[argh(positional)]
    /// file holding the new base configuration
    file: PathBuf,
}

/// Reads the overrides object from stdin.
fn read_overrides() -> Result<Map<String, Value>> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context(error::ReadInputSnafu { from: "stdin" })?;
    let value: Value = serde_json::from_str(&input).context(error::InvalidOverridesSnafu)?;
    match value {
        Value::Object(map) => Ok(map),
        _ => error::OverridesNotObjectSnafu.fail(),
    }
}

fn redis_app(config: &GuestConfig) -> Result<RedisApp> {
    let manager = config
        .configuration_manager()
        .context(error::GuestSnafu)?;
    RedisApp::new(
        manager,
        config.redis_socket.clone(),
        config.redis_password.clone(),
    )
    .context(error::GuestSnafu)
}

async fn apply(config: &GuestConfig) -> Result<()> {
    let values = read_overrides()?;
    if values.is_empty() {
        info!("No overrides given, nothing to do");
        return Ok(());
    }
    let rules = restart::load_rules(&config.validation_rules).context(error::GuestSnafu)?;

    if config.is_redis() {
        let mut app = redis_app(config)?;
        app.update_overrides(&values).context(error::GuestSnafu)?;
        let overrides = app
            .converter()
            .to_overrides(&values)
            .context(error::GuestSnafu)?;
        if restart::requires_restart(&rules, &overrides, config.apply_dynamic_configuration) {
            info!("Overrides need a restart");
            return restart_datastore(config).await;
        }
        let applied = app
            .apply_overrides(&rules, &values)
            .await
            .context(error::GuestSnafu)?;
        info!("Applied {:?} without a restart", applied);
        return Ok(());
    }

    // Other datastores take new values on restart.
    let manager = config
        .configuration_manager()
        .context(error::GuestSnafu)?;
    let overrides = ValueConverter::default()
        .to_overrides(&values)
        .context(error::GuestSnafu)?;
    manager
        .apply_user_override(&overrides)
        .context(error::GuestSnafu)?;
    restart_datastore(config).await
}

async fn restart_datastore(config: &GuestConfig) -> Result<()> {
    service::restart(&config.restart_commands, config.restart_timeout())
        .await
        .context(error::GuestSnafu)
}

async fn run() -> Result<()> {
    let args: Args = argh::from_env();

    // TerminalMode::Stderr keeps stdout for command output.
    TermLogger::init(
        args.log_level,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context(error::LoggerSnafu)?;

    let config = GuestConfig::from_path(&args.config).context(error::GuestSnafu)?;
    info!("guest-overrides started for manager '{}'", config.manager);

    match args.subcommand {
        SubCommand::Apply(_) => apply(&config).await?,
        SubCommand::Remove(_) => {
            config
                .configuration_manager()
                .and_then(|m| m.remove_user_override())
                .context(error::GuestSnafu)?;
            restart_datastore(&config).await?;
        }
        SubCommand::Init(init) => {
            snafu::ensure!(
                config.is_redis(),
                error::UnsupportedManagerSnafu {
                    manager: &config.manager,
                    action: "init",
                }
            );
            let mut app = redis_app(&config)?;
            app.apply_initial_guestagent_configuration(&RedisPaths::default())
                .context(error::GuestSnafu)?;
            if init.cluster {
                app.enable_cluster().context(error::GuestSnafu)?;
            }
            if let Some(name) = init.cluster_config_file {
                app.set_cluster_config_filename(&name)
                    .context(error::GuestSnafu)?;
            }
        }
        SubCommand::Get(get) => {
            let manager = config
                .configuration_manager()
                .context(error::GuestSnafu)?;
            let directive = manager
                .get_value(&get.key, None)
                .context(error::GuestSnafu)?
                .context(error::KeyNotSetSnafu { key: &get.key })?;
            for args in directive.occurrences() {
                println!("{}", args.join(" "));
            }
        }
        SubCommand::Layers(_) => {
            let manager = config
                .configuration_manager()
                .context(error::GuestSnafu)?;
            for layer in manager.list_layers().context(error::GuestSnafu)? {
                println!("{}\t{:03}\t{}", layer.kind, layer.sequence, layer.name);
            }
        }
        SubCommand::Reset(reset) => {
            let contents = fs::read_to_string(&reset.file).context(error::ReadInputSnafu {
                from: "reset file",
            })?;
            config
                .configuration_manager()
                .and_then(|m| m.save_configuration(&contents))
                .context(error::GuestSnafu)?;
        }
    }
    Ok(())
}

// Returning a Result from main makes it print a Debug representation of the error, but with Snafu
// we have nice Display representations of the error, so we wrap "main" (run) and print any error.
// https://github.com/shepmaster/snafu/issues/110
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}", e);
        process::exit(1);
    }
}

mod error {
    use snafu::Snafu;
    use std::io;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(super) enum Error {
        #[snafu(display("{}", source))]
        Guest { source: guestagent::Error },

        #[snafu(display("Failed to read {}: {}", from, source))]
        ReadInput {
            from: &'static str,
            source: io::Error,
        },

        #[snafu(display("Invalid overrides input: {}", source))]
        InvalidOverrides { source: serde_json::Error },

        #[snafu(display("Overrides must be a JSON object of parameter names to values"))]
        OverridesNotObject,

        #[snafu(display("Key '{}' is not set", key))]
        KeyNotSet { key: String },

        #[snafu(display("'{}' is not supported for manager '{}'", action, manager))]
        UnsupportedManager { manager: String, action: String },

        #[snafu(display("Logger setup error: {}", source))]
        Logger { source: log::SetLoggerError },
    }
}

type Result<T> = std::result::Result<T, error::Error>;
