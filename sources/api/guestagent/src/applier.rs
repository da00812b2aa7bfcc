/*!
Applies dynamic parameters to a running datastore through its admin interface.

Parameters are set one at a time in key order.  If the datastore refuses one, the parameters set
before it stay set; nothing is rolled back.  The persisted configuration still holds the full set,
so the next restart converges.
*/

use async_trait::async_trait;
use log::{debug, info};
use model::ValidationRules;
use snafu::ensure;

use crate::directive::{Directive, Overrides};
use crate::error::{self, Result};

/// A running datastore that accepts runtime configuration changes.
#[async_trait]
pub trait RuntimeAdmin: Send {
    /// Sets one parameter.  `Ok(false)` means the datastore answered but didn't acknowledge.
    async fn config_set(&mut self, name: &str, value: &str) -> Result<bool>;
}

/// Renders a directive as the single value the admin interface expects.
pub trait ValueEncoder: Send + Sync {
    fn encode(&self, directive: &Directive) -> String;
}

/// Joins every argument with spaces; `save 900 1` and `save 300 10` become `900 1 300 10`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceJoin;

impl ValueEncoder for WhitespaceJoin {
    fn encode(&self, directive: &Directive) -> String {
        directive.args().collect::<Vec<_>>().join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct LiveApplier<E> {
    encoder: E,
}

impl<E: ValueEncoder> LiveApplier<E> {
    pub fn new(encoder: E) -> Self {
        Self { encoder }
    }

    /// Sets each dynamic key of `overrides`, returning the names that were applied.  Keys the
    /// rules don't mark dynamic are left for the next restart.
    pub async fn apply<A>(
        &self,
        admin: &mut A,
        rules: &ValidationRules,
        overrides: &Overrides,
    ) -> Result<Vec<String>>
    where
        A: RuntimeAdmin + ?Sized,
    {
        let mut applied = Vec::new();
        for (name, directive) in overrides {
            if !rules.get(name).map_or(false, |r| r.is_dynamic()) {
                debug!("Skipping '{}', it can't be applied live", name);
                continue;
            }
            let value = self.encoder.encode(directive);
            let acked = admin.config_set(name, &value).await?;
            ensure!(acked, error::UnprocessableSnafu { name, value: &value });
            debug!("Set '{}' to '{}'", name, value);
            applied.push(name.clone());
        }
        info!("Applied {} parameters live", applied.len());
        Ok(applied)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;
    use maplit::btreemap;

    #[derive(Default)]
    struct FakeAdmin {
        refuse: Option<String>,
        set: Vec<(String, String)>,
    }

    #[async_trait]
    impl RuntimeAdmin for FakeAdmin {
        async fn config_set(&mut self, name: &str, value: &str) -> Result<bool> {
            if self.refuse.as_deref() == Some(name) {
                return Ok(false);
            }
            self.set.push((name.to_string(), value.to_string()));
            Ok(true)
        }
    }

    fn rules() -> ValidationRules {
        ValidationRules::from_json(
            r#"{"configuration-parameters": [
                {"name": "maxmemory", "type": "string", "dynamic": true},
                {"name": "save", "type": "string", "dynamic": true},
                {"name": "timeout", "type": "integer", "dynamic": true},
                {"name": "port", "type": "integer", "restart_required": true}
            ]}"#,
        )
        .unwrap()
    }

    fn overrides() -> Overrides {
        let mut save = Directive::from_args(vec!["900", "1"]);
        save.push(vec!["300".to_string(), "10".to_string()]);
        btreemap! {
            "maxmemory".to_string() => Directive::single("1mb"),
            "port".to_string() => Directive::single("7000"),
            "save".to_string() => save,
            "timeout".to_string() => Directive::single("30"),
        }
    }

    #[tokio::test]
    async fn applies_dynamic_keys_in_order() {
        let mut admin = FakeAdmin::default();
        let applied = LiveApplier::new(WhitespaceJoin)
            .apply(&mut admin, &rules(), &overrides())
            .await
            .unwrap();
        assert_eq!(applied, ["maxmemory", "save", "timeout"]);
        assert_eq!(admin.set[1], ("save".to_string(), "900 1 300 10".to_string()));
    }

    #[tokio::test]
    async fn refusal_stops_without_rollback() {
        let mut admin = FakeAdmin {
            refuse: Some("save".to_string()),
            ..Default::default()
        };
        let err = LiveApplier::new(WhitespaceJoin)
            .apply(&mut admin, &rules(), &overrides())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unprocessable { ref name, .. } if name == "save"));
        assert_eq!(admin.set, [("maxmemory".to_string(), "1mb".to_string())]);
    }
}
