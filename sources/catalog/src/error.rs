use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Possible errors from catalog operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Error serializing row '{}' of table '{}': {}", id, table, source))]
    SerializeRow {
        table: String,
        id: String,
        source: serde_json::Error,
    },

    #[snafu(display("Error deserializing row from table '{}': {}", table, source))]
    DeserializeRow {
        table: String,
        source: serde_json::Error,
    },

    #[snafu(display("No row in table '{}' matches {}", table, filter))]
    NotFound { table: String, filter: String },

    #[snafu(display("{} rows in table '{}' match {}, expected one", count, table, filter))]
    Ambiguous {
        table: String,
        filter: String,
        count: usize,
    },

    #[snafu(display("Row '{}' already exists in table '{}'", id, table))]
    Duplicate { table: String, id: String },

    #[snafu(display("Row name would traverse outside catalog: {}", name))]
    PathTraversal { name: String },

    #[snafu(display("Reading row at '{}' failed: {}", path.display(), source))]
    RowRead { path: PathBuf, source: io::Error },

    #[snafu(display("IO error on '{}': {}", path.display(), source))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("Catalog integrity violation at {}: {}", path.display(), msg))]
    Corruption { msg: String, path: PathBuf },

    #[snafu(display("Error listing catalog rows: {}", source))]
    ListRows { source: walkdir::Error },

    #[snafu(display("Catalog logic error: {}", msg))]
    Internal { msg: String },
}

pub type Result<T> = std::result::Result<T, Error>;
