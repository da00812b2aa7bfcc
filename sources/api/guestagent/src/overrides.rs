/*!
Layered configuration for a datastore's config file.

The file the datastore reads is always generated: a saved copy of the base configuration, then
every system layer in the order it was first applied, then the user layer.  A later layer
replaces a key from an earlier one, except for keys the datastore allows to repeat, whose
occurrences are appended.

Layers live in the overrides directory as `<kind>-<seq>-<name>.overrides`.
*/

use log::{debug, info, warn};
use snafu::{ensure, ResultExt};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::StreamCodec;
use crate::directive::{Directive, Overrides};
use crate::error::{self, Result};

pub const USER_LAYER: &str = "user";
pub const DEFAULT_SYSTEM_LAYER: &str = "common";
const LAYER_SUFFIX: &str = ".overrides";
const BASE_COPY: &str = "base.conf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerKind {
    System,
    User,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::System => write!(f, "system"),
            LayerKind::User => write!(f, "user"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub kind: LayerKind,
    pub sequence: u32,
    pub name: String,
    pub path: PathBuf,
}

impl Layer {
    fn file_name(kind: LayerKind, sequence: u32, name: &str) -> String {
        format!("{}-{:03}-{}{}", kind, sequence, name, LAYER_SUFFIX)
    }

    fn from_path(path: PathBuf) -> Option<Self> {
        let stem = path.file_name()?.to_str()?.strip_suffix(LAYER_SUFFIX)?;
        let mut parts = stem.splitn(3, '-');
        let kind = match parts.next()? {
            "system" => LayerKind::System,
            "user" => LayerKind::User,
            _ => return None,
        };
        let sequence = parts.next()?.parse().ok()?;
        let name = parts.next()?.to_string();
        Some(Self {
            kind,
            sequence,
            name,
            path,
        })
    }

    fn label(&self) -> String {
        format!("{} layer '{}'", self.kind, self.name)
    }
}

pub struct ConfigurationManager {
    config_path: PathBuf,
    overrides_dir: PathBuf,
    codec: Box<dyn StreamCodec>,
    repeatable: HashSet<String>,
}

impl ConfigurationManager {
    /// Opens the configuration at `config_path`.  The first time, the file there is saved as the
    /// base; afterwards the saved copy is the base and `config_path` holds generated output.
    pub fn new<P1, P2>(
        config_path: P1,
        overrides_dir: P2,
        codec: Box<dyn StreamCodec>,
        repeatable: HashSet<String>,
    ) -> Result<Self>
    where
        P1: Into<PathBuf>,
        P2: Into<PathBuf>,
    {
        let manager = Self {
            config_path: config_path.into(),
            overrides_dir: overrides_dir.into(),
            codec,
            repeatable,
        };
        fs::create_dir_all(&manager.overrides_dir).context(error::CreateDirSnafu {
            path: &manager.overrides_dir,
        })?;

        let base = manager.base_path();
        if !base.exists() {
            ensure!(
                manager.config_path.exists(),
                error::BaseMissingSnafu {
                    path: &manager.config_path
                }
            );
            let contents = read(&manager.config_path)?;
            // Refuse to adopt a base the codec can't read.
            manager.codec.deserialize("base", &contents)?;
            write_atomic(&base, &contents)?;
            info!(
                "Saved base configuration from {}",
                manager.config_path.display()
            );
        }
        Ok(manager)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn base_path(&self) -> PathBuf {
        self.overrides_dir.join(BASE_COPY)
    }

    /// Every layer file, lowest precedence first.
    pub fn list_layers(&self) -> Result<Vec<Layer>> {
        let entries = fs::read_dir(&self.overrides_dir).context(error::ListDirSnafu {
            path: &self.overrides_dir,
        })?;
        let mut layers = Vec::new();
        for entry in entries {
            let path = entry
                .context(error::ListDirSnafu {
                    path: &self.overrides_dir,
                })?
                .path();
            if path.file_name().map_or(false, |n| n == BASE_COPY) {
                continue;
            }
            match Layer::from_path(path.clone()) {
                Some(layer) => layers.push(layer),
                None => warn!("Ignoring unrecognized file {}", path.display()),
            }
        }
        layers.sort_by(|a, b| (a.kind, a.sequence, &a.name).cmp(&(b.kind, b.sequence, &b.name)));
        Ok(layers)
    }

    /// Merges `overrides` into the named system layer, creating it after all existing system
    /// layers if needed, and regenerates the config file.  Applying the same values twice
    /// leaves the output unchanged.
    pub fn apply_system_override(&self, overrides: &Overrides, name: &str) -> Result<()> {
        check_layer_name(name)?;
        let layers = self.list_layers()?;
        let existing = layers
            .iter()
            .find(|l| l.kind == LayerKind::System && l.name == name);

        let (path, mut content) = match existing {
            Some(layer) => (layer.path.clone(), self.read_layer(layer)?),
            None => {
                let next = layers
                    .iter()
                    .filter(|l| l.kind == LayerKind::System)
                    .map(|l| l.sequence)
                    .max()
                    .map_or(1, |seq| seq + 1);
                let file = Layer::file_name(LayerKind::System, next, name);
                (self.overrides_dir.join(file), Overrides::new())
            }
        };
        for (key, directive) in overrides {
            content.insert(key.clone(), directive.clone());
        }
        write_atomic(&path, &self.codec.serialize(&content))?;
        debug!("Wrote system layer '{}' to {}", name, path.display());
        self.refresh()
    }

    /// Replaces the user layer with `overrides` and regenerates the config file.
    pub fn apply_user_override(&self, overrides: &Overrides) -> Result<()> {
        self.remove_user_layers()?;
        let path = self
            .overrides_dir
            .join(Layer::file_name(LayerKind::User, 1, USER_LAYER));
        write_atomic(&path, &self.codec.serialize(overrides))?;
        info!("Applied {} user overrides", overrides.len());
        self.refresh()
    }

    /// Drops the user layer; the config file goes back to base plus system layers.
    pub fn remove_user_override(&self) -> Result<()> {
        self.remove_user_layers()?;
        info!("Removed user overrides");
        self.refresh()
    }

    /// The effective value of `key` after all layers, or `default` when no layer sets it.
    pub fn get_value(&self, key: &str, default: Option<Directive>) -> Result<Option<Directive>> {
        Ok(self.effective()?.remove(key).or(default))
    }

    /// Replaces the base configuration and regenerates the config file with the existing
    /// layers on top.
    pub fn save_configuration(&self, contents: &str) -> Result<()> {
        self.codec.deserialize("base", contents)?;
        write_atomic(&self.base_path(), contents)?;
        info!("Saved new base configuration");
        self.refresh()
    }

    /// Base and layers merged in precedence order.
    pub fn effective(&self) -> Result<Overrides> {
        let mut merged = self.codec.deserialize("base", &read(&self.base_path())?)?;
        for layer in self.list_layers()? {
            for (key, directive) in self.read_layer(&layer)? {
                match merged.get_mut(&key) {
                    Some(current) if self.repeatable.contains(&key) => current.extend(directive),
                    _ => {
                        merged.insert(key, directive);
                    }
                }
            }
        }
        Ok(merged)
    }

    fn refresh(&self) -> Result<()> {
        let merged = self.effective()?;
        write_atomic(&self.config_path, &self.codec.serialize(&merged))?;
        debug!(
            "Regenerated {} with {} keys",
            self.config_path.display(),
            merged.len()
        );
        Ok(())
    }

    fn read_layer(&self, layer: &Layer) -> Result<Overrides> {
        self.codec.deserialize(&layer.label(), &read(&layer.path)?)
    }

    fn remove_user_layers(&self) -> Result<()> {
        for layer in self.list_layers()? {
            if layer.kind == LayerKind::User {
                fs::remove_file(&layer.path).context(error::RemoveFileSnafu { path: &layer.path })?;
            }
        }
        Ok(())
    }
}

fn check_layer_name(name: &str) -> Result<()> {
    ensure!(
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        error::InvalidLayerNameSnafu { name }
    );
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).context(error::ReadFileSnafu { path })
}

/// Writes through a temporary file in the same directory so readers never see a partial file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|e| {
            let _ = fs::remove_file(&tmp);
            e
        })
        .context(error::WriteFileSnafu { path })
}
