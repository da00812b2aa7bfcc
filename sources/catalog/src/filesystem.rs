//! This implementation of the CatalogStore trait relies on the filesystem for row storage.
//!
//! Each row is kept as a JSON file at `live/<table>/<id>.json`.  A transaction is first written in
//! full under `pending/<transaction>/`, then moved into `live` once every row has been staged.

use log::{debug, error, trace};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{check_creates, error, CatalogStore, Result, RowKey, Transaction};

const ROW_SUFFIX: &str = ".json";
const SCHEMA_VERSION_FILE: &str = "schema_version";

// This describes the set of characters we encode when making the filesystem path for a given row.
// Any non-ASCII characters, plus these ones, will be encoded.
// We start off very strict (anything not alphanumeric) and remove characters we'll allow.
// Since '.' is encoded, the row suffix can't collide with an id.
const ENCODE_CHARACTERS: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-');

#[derive(Debug)]
pub struct FilesystemCatalog {
    base_path: PathBuf,
    live_path: PathBuf,
    pending_base_path: PathBuf,
}

impl FilesystemCatalog {
    pub fn new<P: AsRef<Path>>(base_path: P) -> FilesystemCatalog {
        FilesystemCatalog {
            base_path: base_path.as_ref().to_path_buf(),
            live_path: base_path.as_ref().join("live"),
            pending_base_path: base_path.as_ref().join("pending"),
        }
    }

    /// Returns the staging directory for the named transaction.
    fn pending_path(&self, transaction: &str) -> PathBuf {
        self.pending_base_path
            .join(encode_path_component(transaction))
    }

    /// Returns the path of the given row underneath `base`.
    fn row_path(&self, base: &Path, key: &RowKey) -> Result<PathBuf> {
        let path = base
            .join(encode_path_component(&key.table))
            .join(format!("{}{}", encode_path_component(&key.id), ROW_SUFFIX));

        // Confirm no path traversal outside of base
        ensure!(
            path != *base && path.starts_with(base),
            error::PathTraversalSnafu {
                name: key.to_string()
            }
        );

        Ok(path)
    }

    fn schema_version_path(&self) -> PathBuf {
        self.base_path.join(SCHEMA_VERSION_FILE)
    }
}

// Filesystem helpers

/// Encodes a string so that it's safe to use as a filesystem path component.
fn encode_path_component<S: AsRef<str>>(segment: S) -> String {
    let encoded = utf8_percent_encode(segment.as_ref(), ENCODE_CHARACTERS);
    encoded.to_string()
}

/// Decodes a path component, removing the encoding that's applied to make it filesystem-safe.
fn decode_path_component<S, P>(segment: S, path: P) -> Result<String>
where
    S: AsRef<str>,
    P: AsRef<Path>,
{
    let segment = segment.as_ref();

    percent_decode_str(segment)
        .decode_utf8()
        // Get back a plain String.
        .map(|cow| cow.into_owned())
        // decode_utf8 will only fail if someone messed with the filesystem contents directly
        // and created a filename that contains percent-encoded bytes that are invalid UTF-8.
        .ok()
        .context(error::CorruptionSnafu {
            path: path.as_ref(),
            msg: format!("invalid UTF-8 in encoded segment '{}'", segment),
        })
}

/// Helper for reading a row from the filesystem.  Returns Ok(None) if the file doesn't exist
/// rather than erroring.
fn read_row(path: &Path) -> Result<Option<Value>> {
    let data = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            if e.kind() == io::ErrorKind::NotFound {
                return Ok(None);
            }
            return Err(e).context(error::RowReadSnafu { path });
        }
    };
    let value = serde_json::from_str(&data)
        .ok()
        .context(error::CorruptionSnafu {
            path,
            msg: "row is not valid JSON",
        })?;
    Ok(Some(value))
}

/// Helper for writing a file that makes the directory tree beforehand, so tables don't need to
/// be created up front.
fn write_file_mkdir<S: AsRef<str>>(path: &Path, data: S) -> Result<()> {
    let dirname = path.parent().with_context(|| error::InternalSnafu {
        msg: format!(
            "Given path to write without proper prefix: {}",
            path.display()
        ),
    })?;
    fs::create_dir_all(dirname).context(error::IoSnafu { path: dirname })?;

    fs::write(path, data.as_ref().as_bytes()).context(error::IoSnafu { path })
}

/// Removes a file or directory tree, treating a missing path as success.
fn remove_if_present(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            Err(e).context(error::IoSnafu { path })
        }
        _ => Ok(()),
    }
}

impl CatalogStore for FilesystemCatalog {
    fn get_row(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let path = self.row_path(&self.live_path, &RowKey::new(table, id))?;
        read_row(&path)
    }

    fn list_rows(&self, table: &str) -> Result<Vec<Value>> {
        let table_path = self.live_path.join(encode_path_component(table));
        if !table_path.is_dir() {
            trace!(
                "Returning empty list because table path doesn't exist: {}",
                table_path.display()
            );
            return Ok(Vec::new());
        }

        let walker = WalkDir::new(&table_path).min_depth(1).max_depth(1);
        let mut rows = Vec::new();
        for entry in walker {
            let entry = entry.context(error::ListRowsSnafu)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry
                .file_name()
                .to_str()
                .context(error::CorruptionSnafu {
                    path: entry.path(),
                    msg: "non-Unicode file name",
                })?;
            let encoded_id = match file_name.strip_suffix(ROW_SUFFIX) {
                Some(id) => id,
                None => {
                    debug!("Skipping non-row file {}", entry.path().display());
                    continue;
                }
            };
            let id = decode_path_component(encoded_id, entry.path())?;
            let row = read_row(entry.path())?.context(error::CorruptionSnafu {
                path: entry.path(),
                msg: "listed row disappeared",
            })?;
            rows.push((id, row));
        }

        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    /// We commit by writing every row to the pending directory, then moving each row to live, then
    /// removing pending.  A failure before the first move leaves live untouched.
    fn commit_transaction(&mut self, transaction: Transaction) -> Result<HashSet<RowKey>> {
        check_creates(&transaction, |key| self.row_exists(key))?;

        let pending = self.pending_path(transaction.name());
        // Clear out anything left over from an interrupted commit of the same name.
        remove_if_present(&pending)?;

        let rows = transaction.into_rows();
        let mut staged = Vec::with_capacity(rows.len());
        for (_, key, value) in rows {
            let staged_path = self.row_path(&pending, &key)?;
            write_file_mkdir(&staged_path, value.to_string())?;
            staged.push((key, staged_path));
        }

        debug!("Moving {} staged rows to live", staged.len());
        let mut changed = HashSet::new();
        for (key, staged_path) in staged {
            let live_path = self.row_path(&self.live_path, &key)?;
            let dirname = live_path.parent().context(error::InternalSnafu {
                msg: "row path without table directory",
            })?;
            fs::create_dir_all(dirname).context(error::IoSnafu { path: dirname })?;
            fs::rename(&staged_path, &live_path).context(error::IoSnafu { path: &live_path })?;
            changed.insert(key);
        }

        if let Err(e) = fs::remove_dir_all(&pending) {
            // The rows are live; a stale staging directory is cleaned up by the next commit.
            error!(
                "Failed to remove staging directory '{}': {}",
                pending.display(),
                e
            );
        }
        Ok(changed)
    }

    fn schema_version(&self) -> Result<u32> {
        let path = self.schema_version_path();
        match fs::read_to_string(&path) {
            Ok(s) => s.trim().parse().ok().context(error::CorruptionSnafu {
                path,
                msg: format!("invalid schema version '{}'", s.trim()),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e).context(error::IoSnafu { path }),
        }
    }

    fn set_schema_version(&mut self, version: u32) -> Result<()> {
        write_file_mkdir(&self.schema_version_path(), version.to_string())
    }

    fn drop_all(&mut self) -> Result<()> {
        remove_if_present(&self.live_path)?;
        remove_if_present(&self.pending_base_path)?;
        remove_if_present(&self.schema_version_path())
    }
}

#[cfg(test)]
mod test {
    use super::super::test_records::Widget;
    use super::super::{Error, Filter};
    use super::*;
    use chrono::Utc;

    #[test]
    fn row_path() {
        let f = FilesystemCatalog::new("/base");
        let key = RowKey::new("widgets", "a.b c");

        let live = f.row_path(&f.live_path, &key).unwrap();
        assert_eq!(live.into_os_string(), "/base/live/widgets/a%2Eb%20c.json");

        let pending = f.row_path(&f.pending_path("test tx"), &key).unwrap();
        assert_eq!(
            pending.into_os_string(),
            "/base/pending/test%20tx/widgets/a%2Eb%20c.json"
        );
    }

    #[test]
    fn traversal_is_encoded_away() {
        let f = FilesystemCatalog::new("/base");
        let key = RowKey::new("..", "../../etc/passwd");
        let path = f.row_path(&f.live_path, &key).unwrap();
        assert!(path.starts_with("/base/live"));
        assert_eq!(
            path.into_os_string(),
            "/base/live/%2E%2E/%2E%2E%2F%2E%2E%2Fetc%2Fpasswd.json"
        );
    }

    #[test]
    fn encode_path_component_works() {
        assert_eq!(encode_path_component("a-b_42"), "a-b_42");
        assert_eq!(encode_path_component("a.b"), "a%2Eb");
        assert_eq!(encode_path_component("a/b"), "a%2Fb");
        assert_eq!(encode_path_component("a b%c<d>e"), "a%20b%25c%3Cd%3Ee");
    }

    #[test]
    fn decode_path_component_works() {
        assert_eq!(decode_path_component("a-b_42", "").unwrap(), "a-b_42");
        assert_eq!(decode_path_component("a%2Eb", "").unwrap(), "a.b");
        assert_eq!(
            decode_path_component("a%20b%25c%3Cd%3Ee", "").unwrap(),
            "a b%c<d>e"
        );

        // Invalid UTF-8
        decode_path_component("%C3%28", "").unwrap_err();
    }

    #[test]
    fn rows_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = FilesystemCatalog::new(dir.path());

        f.create(&Widget::new("b", "alice", 2)).unwrap();
        f.create(&Widget::new("a.1", "bob", 1)).unwrap();
        assert!(dir.path().join("live/widgets/a%2E1.json").is_file());

        let all: Vec<Widget> = f.find_all(&Filter::new()).unwrap();
        let ids: Vec<&str> = all.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["a.1", "b"]);

        let mut b: Widget = f.find_by(&Filter::new().eq("owner", "alice")).unwrap();
        f.delete(&mut b, Utc::now()).unwrap();
        assert!(f.get::<Widget>("b").unwrap().unwrap().deleted);

        // Staging is cleaned up after each commit.
        assert!(!dir.path().join("pending/save-widgets").exists());
    }

    #[test]
    fn failed_transaction_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = FilesystemCatalog::new(dir.path());
        f.create(&Widget::new("w1", "alice", 1)).unwrap();

        let mut tx = Transaction::new("batch");
        tx.create(&Widget::new("w2", "alice", 1)).unwrap();
        tx.create(&Widget::new("w1", "alice", 1)).unwrap();
        let err = f.commit_transaction(tx).unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
        assert_eq!(f.get::<Widget>("w2").unwrap(), None);
        assert!(!dir.path().join("pending/batch").exists());
    }

    #[test]
    fn schema_version_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = FilesystemCatalog::new(dir.path());
        assert_eq!(f.schema_version().unwrap(), 0);
        f.set_schema_version(2).unwrap();
        assert_eq!(f.schema_version().unwrap(), 2);

        f.create(&Widget::new("w1", "alice", 1)).unwrap();
        f.drop_all().unwrap();
        assert_eq!(f.schema_version().unwrap(), 0);
        assert!(f.list_rows("widgets").unwrap().is_empty());
    }

    #[test]
    fn corrupt_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SCHEMA_VERSION_FILE), "seven").unwrap();
        let f = FilesystemCatalog::new(dir.path());
        assert!(matches!(
            f.schema_version().unwrap_err(),
            Error::Corruption { .. }
        ));
    }
}
