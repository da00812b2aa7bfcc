use log::{debug, info};
use model::ValidationRules;
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{self, Result};

const RULES_FILE: &str = "validation-rules.json";

/// Validation rule descriptors, read from `<dir>/<manager>/validation-rules.json` the first time a
/// manager's rules are needed and kept until reloaded.
#[derive(Debug)]
pub struct RuleRegistry {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<ValidationRules>>>,
}

impl RuleRegistry {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn rules_path(&self, manager: &str) -> PathBuf {
        self.dir.join(manager).join(RULES_FILE)
    }

    pub fn get_rules(&self, manager: &str) -> Result<Arc<ValidationRules>> {
        {
            let cache = self
                .cache
                .read()
                .ok()
                .context(error::LockPoisonedSnafu { name: "rules cache" })?;
            if let Some(rules) = cache.get(manager) {
                return Ok(rules.clone());
            }
        }
        self.reload(manager)
    }

    /// Reads the manager's descriptor again, replacing any cached copy.
    pub fn reload(&self, manager: &str) -> Result<Arc<ValidationRules>> {
        let path = self.rules_path(manager);
        let rules = Arc::new(read_rules(manager, &path)?);
        debug!("Loaded {} rules for '{}' from {}", rules.len(), manager, path.display());
        self.insert(manager, rules.clone())?;
        Ok(rules)
    }

    /// Loads every listed manager now rather than on first use.
    pub fn preload<'a, I>(&self, managers: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for manager in managers {
            self.reload(manager)?;
        }
        Ok(())
    }

    /// Uses the given rules for a manager instead of its descriptor file.
    pub fn insert<S: Into<String>>(&self, manager: S, rules: Arc<ValidationRules>) -> Result<()> {
        let manager = manager.into();
        info!("Using {} validation rules for '{}'", rules.len(), manager);
        self.cache
            .write()
            .ok()
            .context(error::LockPoisonedSnafu { name: "rules cache" })?
            .insert(manager, rules);
        Ok(())
    }
}

fn read_rules(manager: &str, path: &Path) -> Result<ValidationRules> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return error::RulesNotFoundSnafu { manager, path }.fail()
        }
        Err(e) => return Err(e).context(error::ReadFileSnafu { path }),
    };
    ValidationRules::from_json(&data).context(error::RulesParseSnafu { path })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    fn write_rules(dir: &Path, manager: &str, body: &str) {
        let path = dir.join(manager);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(RULES_FILE), body).unwrap();
    }

    #[test]
    fn loads_once_until_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        write_rules(
            dir.path(),
            "redis",
            r#"{"configuration-parameters": [{"name": "maxmemory", "type": "integer", "dynamic": true}]}"#,
        );
        let registry = RuleRegistry::new(dir.path());
        assert_eq!(registry.get_rules("redis").unwrap().len(), 1);

        write_rules(
            dir.path(),
            "redis",
            r#"{"configuration-parameters": []}"#,
        );
        assert_eq!(registry.get_rules("redis").unwrap().len(), 1);
        assert!(registry.reload("redis").unwrap().is_empty());
        assert!(registry.get_rules("redis").unwrap().is_empty());
    }

    #[test]
    fn missing_and_broken_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RuleRegistry::new(dir.path());
        let err = registry.get_rules("mysql").unwrap_err();
        assert!(matches!(err, Error::RulesNotFound { .. }));
        assert_eq!(err.status_code().as_u16(), 404);

        write_rules(dir.path(), "mysql", "{not json");
        assert!(matches!(
            registry.get_rules("mysql").unwrap_err(),
            Error::RulesParse { .. }
        ));
    }
}
