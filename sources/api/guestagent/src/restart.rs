//! Whether a set of overrides can go live or needs the datastore restarted.

use model::ValidationRules;
use snafu::ResultExt;
use std::fs;
use std::path::Path;

use crate::directive::Overrides;
use crate::error::{self, Result};

/// A key with no rule, or whose rule isn't dynamic, restarts the whole batch; so does turning
/// dynamic application off.
pub fn requires_restart(rules: &ValidationRules, overrides: &Overrides, apply_dynamic: bool) -> bool {
    rules.requires_restart(overrides.keys().map(String::as_str), apply_dynamic)
}

pub fn load_rules<P: AsRef<Path>>(path: P) -> Result<ValidationRules> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).context(error::RulesReadSnafu { path })?;
    ValidationRules::from_json(&data).context(error::RulesParseSnafu { path })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::directive::Directive;
    use maplit::btreemap;

    fn rules() -> ValidationRules {
        ValidationRules::from_json(
            r#"{"configuration-parameters": [
                {"name": "maxmemory", "type": "string", "dynamic": true},
                {"name": "port", "type": "integer", "restart_required": true}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn classification() {
        let dynamic = btreemap! { "maxmemory".to_string() => Directive::single("1mb") };
        let mixed = btreemap! {
            "maxmemory".to_string() => Directive::single("1mb"),
            "port".to_string() => Directive::single("7000"),
        };
        let unknown = btreemap! { "nope".to_string() => Directive::single("1") };

        assert!(!requires_restart(&rules(), &dynamic, true));
        assert!(requires_restart(&rules(), &dynamic, false));
        assert!(requires_restart(&rules(), &mixed, true));
        assert!(requires_restart(&rules(), &unknown, true));
        assert!(!requires_restart(&rules(), &Overrides::new(), true));
    }

    #[test]
    fn rules_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validation-rules.json");
        assert!(matches!(
            load_rules(&path).unwrap_err(),
            crate::Error::RulesRead { .. }
        ));
        fs::write(&path, "{").unwrap();
        assert!(matches!(
            load_rules(&path).unwrap_err(),
            crate::Error::RulesParse { .. }
        ));
    }
}
