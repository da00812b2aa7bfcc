/*!
# Introduction

trove-manage administers the control plane's catalog.

Commands are grouped by category:
* `db sync`, `db upgrade [--version N]`, `db downgrade --version N`, `db wipe` move the catalog
  between schema versions.
* `datastore update`, `datastore version-update` and `datastore load-config-parameters` seed the
  datastore reference data.
*/

#![deny(rust_2018_idioms)]

mod error;
mod schema;

use argh::FromArgs;
use catalog::FilesystemCatalog;
use error::Result;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, RwLock};
use trove_api::{Config, DatastoreCatalog, ParameterCatalog, RequestContext, RuleRegistry};

const DEFAULT_CONFIG: &str = "/etc/trove/trove.toml";
const OPERATOR: &str = "trove-manage";

/// Administer the control plane catalog
#[derive(FromArgs, PartialEq, Debug)]
struct Args {
    #[argh(option, default = "PathBuf::from(DEFAULT_CONFIG)")]
    /// path to the control plane config file
    config: PathBuf,

    #[argh(option, default = "LevelFilter::Info")]
    /// log level (error, warn, info, debug, trace)
    log_level: LevelFilter,

    #[argh(subcommand)]
    category: Category,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum Category {
    Db(DbArgs),
    Datastore(DatastoreArgs),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "db")]
/// Manage the catalog schema
struct DbArgs {
    #[argh(subcommand)]
    action: DbAction,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum DbAction {
    Sync(SyncArgs),
    Upgrade(UpgradeArgs),
    Downgrade(DowngradeArgs),
    Wipe(WipeArgs),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "sync")]
/// Bring the catalog to the latest schema version
struct SyncArgs {}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "upgrade")]
/// Upgrade the catalog schema
struct UpgradeArgs {
    #[argh(option)]
    /// target version; the latest when omitted
    version: Option<u32>,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "downgrade")]
/// Downgrade the catalog schema
struct DowngradeArgs {
    #[argh(option)]
    /// target version
    version: u32,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "wipe")]
/// Drop every row and resync the schema
struct WipeArgs {}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "datastore")]
/// Manage datastores
struct DatastoreArgs {
    #[argh(subcommand)]
    action: DatastoreAction,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum DatastoreAction {
    Update(UpdateArgs),
    VersionUpdate(VersionUpdateArgs),
    LoadConfigParameters(LoadConfigParametersArgs),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "update")]
/// Create a datastore or set its default version
struct UpdateArgs {
    #[argh(positional)]
    /// datastore name
    datastore_name: String,

    #[argh(positional)]
    /// default version name
    default_version: Option<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "version-update")]
/// Create or replace a datastore version
struct VersionUpdateArgs {
    #[argh(positional)]
    /// datastore name
    datastore: String,

    #[argh(positional)]
    /// version name
    version_name: String,

    #[argh(positional)]
    /// datastore manager, e.g. mysql or redis
    manager: String,

    #[argh(positional)]
    /// image the guests boot from
    image_id: String,

    #[argh(positional)]
    /// comma-separated packages to install
    packages: String,

    #[argh(positional, from_str_fn(parse_active))]
    /// whether the version can be used: true/false or 1/0
    active: bool,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "load-config-parameters")]
/// Load a validation rules file into the parameter catalog
struct LoadConfigParametersArgs {
    #[argh(positional)]
    /// datastore name
    datastore: String,

    #[argh(positional)]
    /// version name
    version_name: String,

    #[argh(positional)]
    /// path to the rules file
    config_file: PathBuf,
}

fn parse_active(value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(error::InvalidActiveSnafu { value }.build().to_string()),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        warn!("{} not found, using default settings", path.display());
        return Ok(Config::default());
    }
    Config::from_path(path).context(error::ApiSnafu)
}

/// Runs one command against the catalog and returns the message to print.
fn execute(category: Category, config: &Config) -> Result<String> {
    let mut store = FilesystemCatalog::new(&config.catalog_path);
    let action = match category {
        Category::Db(db) => db.action,
        Category::Datastore(datastore) => {
            return execute_datastore(datastore.action, store, config);
        }
    };
    let version = match action {
        DbAction::Sync(_) => schema::upgrade(&mut store, None)?,
        DbAction::Upgrade(upgrade) => schema::upgrade(&mut store, upgrade.version)?,
        DbAction::Downgrade(downgrade) => schema::downgrade(&mut store, downgrade.version)?,
        DbAction::Wipe(_) => schema::wipe(&mut store)?,
    };
    Ok(format!("Catalog is at schema version {}.", version))
}

fn execute_datastore(
    action: DatastoreAction,
    store: FilesystemCatalog,
    config: &Config,
) -> Result<String> {
    let store = Arc::new(RwLock::new(store));
    match action {
        DatastoreAction::Update(update) => {
            DatastoreCatalog::new(store)
                .update_datastore(&update.datastore_name, update.default_version.as_deref())
                .context(error::ApiSnafu)?;
            Ok(format!("Datastore '{}' updated.", update.datastore_name))
        }
        DatastoreAction::VersionUpdate(update) => {
            let packages = update
                .packages
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            DatastoreCatalog::new(store)
                .update_datastore_version(
                    &update.datastore,
                    &update.version_name,
                    &update.manager,
                    &update.image_id,
                    packages,
                    update.active,
                )
                .context(error::ApiSnafu)?;
            Ok(format!(
                "Datastore version '{}' updated.",
                update.version_name
            ))
        }
        DatastoreAction::LoadConfigParameters(load) => {
            let rules = Arc::new(RuleRegistry::new(&config.validation_rules_dir));
            let loaded = ParameterCatalog::new(store, rules)
                .load_parameters_file(
                    &RequestContext::admin(OPERATOR),
                    &load.datastore,
                    &load.version_name,
                    &load.config_file,
                )
                .context(error::ApiSnafu)?;
            Ok(format!(
                "Loaded {} configuration parameters for '{}' version '{}'.",
                loaded, load.datastore, load.version_name
            ))
        }
    }
}

fn run() -> Result<()> {
    let args: Args = argh::from_env();

    TermLogger::init(
        args.log_level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context(error::LoggerSnafu)?;

    let config = load_config(&args.config)?;
    info!("Using catalog at {}", config.catalog_path.display());
    println!("{}", execute(args.category, &config)?);
    Ok(())
}

// Returning a Result from main makes it print a Debug representation of the error, but with Snafu
// we have nice Display representations of the error, so we wrap "main" (run) and print any error.
// https://github.com/shepmaster/snafu/issues/110
fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use catalog::CatalogStore;
    use std::fs;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["trove-manage"], args).unwrap()
    }

    fn config(dir: &Path) -> Config {
        Config {
            catalog_path: dir.join("catalog"),
            validation_rules_dir: dir.join("rules"),
            ..Default::default()
        }
    }

    #[test]
    fn command_table() {
        let args = parse(&["db", "upgrade", "--version", "3"]);
        assert_eq!(
            args.category,
            Category::Db(DbArgs {
                action: DbAction::Upgrade(UpgradeArgs { version: Some(3) })
            })
        );
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));

        let args = parse(&[
            "--log-level",
            "debug",
            "datastore",
            "version-update",
            "mysql",
            "5.7",
            "mysql",
            "img-1",
            "mysql-server, percona-toolkit",
            "1",
        ]);
        assert_eq!(args.log_level, LevelFilter::Debug);
        match args.category {
            Category::Datastore(DatastoreArgs {
                action: DatastoreAction::VersionUpdate(update),
            }) => {
                assert!(update.active);
                assert_eq!(update.manager, "mysql");
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Args::from_args(&["trove-manage"], &["db", "downgrade"]).is_err());
        assert!(Args::from_args(&["trove-manage"], &["db", "rewind"]).is_err());
        assert!(Args::from_args(
            &["trove-manage"],
            &["datastore", "version-update", "a", "b", "c", "d", "e", "maybe"]
        )
        .is_err());
    }

    #[test]
    fn db_commands_move_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let latest = schema::latest();

        assert_eq!(
            execute(parse(&["db", "sync"]).category, &config).unwrap(),
            format!("Catalog is at schema version {}.", latest)
        );
        execute(parse(&["db", "downgrade", "--version", "1"]).category, &config).unwrap();
        assert_eq!(
            FilesystemCatalog::new(&config.catalog_path)
                .schema_version()
                .unwrap(),
            1
        );
        assert!(execute(parse(&["db", "upgrade", "--version", "99"]).category, &config).is_err());
        execute(parse(&["db", "wipe"]).category, &config).unwrap();
        assert_eq!(
            FilesystemCatalog::new(&config.catalog_path)
                .schema_version()
                .unwrap(),
            latest
        );
    }

    #[test]
    fn datastore_commands_seed_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let rules = dir.path().join("rules.json");
        fs::write(
            &rules,
            r#"{"configuration-parameters": [
                {"name": "max_connections", "type": "integer", "min": 1, "dynamic": true}
            ]}"#,
        )
        .unwrap();
        let rules = rules.to_string_lossy().into_owned();

        for command in [
            vec!["datastore", "update", "mysql"],
            vec![
                "datastore",
                "version-update",
                "mysql",
                "5.7",
                "mysql",
                "img-1",
                "",
                "true",
            ],
            vec!["datastore", "update", "mysql", "5.7"],
            vec!["datastore", "load-config-parameters", "mysql", "5.7", rules.as_str()],
        ] {
            execute(parse(&command).category, &config).unwrap();
        }

        let store = Arc::new(RwLock::new(FilesystemCatalog::new(&config.catalog_path)));
        let (datastore, version) = DatastoreCatalog::new(store.clone())
            .resolve("mysql", None)
            .unwrap();
        assert_eq!(datastore.default_version_id, Some(version.id.clone()));
        assert!(version.packages.is_empty());
        let params = ParameterCatalog::new(
            store,
            Arc::new(RuleRegistry::new(&config.validation_rules_dir)),
        )
        .list_parameters("mysql", None)
        .unwrap();
        assert_eq!(params.len(), 1);

        let err = execute(
            parse(&["datastore", "update", "mysql", "9.9"]).category,
            &config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("9.9"));
    }
}
