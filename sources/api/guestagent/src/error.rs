use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Potential errors while managing a guest's configuration
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "Base configuration file {} does not exist and no saved copy was found",
        path.display()
    ))]
    BaseMissing { path: PathBuf },

    #[snafu(display("Failed to read {}: {}", path.display(), source))]
    ReadFile { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to write {}: {}", path.display(), source))]
    WriteFile { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to remove {}: {}", path.display(), source))]
    RemoveFile { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to create directory {}: {}", path.display(), source))]
    CreateDir { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to list directory {}: {}", path.display(), source))]
    ListDir { path: PathBuf, source: io::Error },

    #[snafu(display("Unable to parse {} at line {}: {}", layer, line, msg))]
    Parse {
        layer: String,
        line: usize,
        msg: String,
    },

    #[snafu(display("Invalid layer name '{}'", name))]
    InvalidLayerName { name: String },

    #[snafu(display("Value for '{}' can't be written as a directive: {}", key, value))]
    UnsupportedValue { key: String, value: String },

    #[snafu(display("Datastore refused to set '{}' to '{}'", name, value))]
    Unprocessable { name: String, value: String },

    #[snafu(display("Redis {} failed: {}", op, source))]
    Redis {
        op: String,
        source: redis::RedisError,
    },

    #[snafu(display("Failed to read validation rules from {}: {}", path.display(), source))]
    RulesRead { path: PathBuf, source: io::Error },

    #[snafu(display("Invalid validation rules in {}: {}", path.display(), source))]
    RulesParse { path: PathBuf, source: model::Error },

    #[snafu(display("Failed to read config file {}: {}", path.display(), source))]
    ConfigRead { path: PathBuf, source: io::Error },

    #[snafu(display("Invalid config file {}: {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("Failed to run restart command - '{}': {}", command, source))]
    CommandExecutionFailure { command: String, source: io::Error },

    #[snafu(display("Restart command failed - '{}': {}", command, stderr))]
    FailedRestartCommand { command: String, stderr: String },

    #[snafu(display("Restart command is invalid (empty, space prefix, etc.) - {}", command))]
    InvalidRestartCommand { command: String },

    #[snafu(display("Restart command '{}' did not finish within {}s", command, seconds))]
    RestartTimeout { command: String, seconds: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
