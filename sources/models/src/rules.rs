//! Validation rules describe which configuration parameters a datastore accepts, their types and
//! bounds, and whether a new value can be applied to a running service.
//!
//! Rules are read from a per-datastore descriptor of the form
//! `{"configuration-parameters": [{"name": ..., "type": ..., "min": ..., "max": ..., "dynamic": ...}]}`.
//! Older descriptors say `restart_required` instead of `dynamic`; both are accepted.

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{self, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Boolean,
    Integer,
    String,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleType::Boolean => "boolean",
            RuleType::Integer => "integer",
            RuleType::String => "string",
        };
        write!(f, "{}", name)
    }
}

/// A parameter value as given by a user or resolved from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl ParameterValue {
    pub fn rule_type(&self) -> RuleType {
        match self {
            ParameterValue::Boolean(_) => RuleType::Boolean,
            ParameterValue::Integer(_) => RuleType::Integer,
            ParameterValue::String(_) => RuleType::String,
        }
    }

    /// The form kept in the catalog; `ValidationRule::resolve` reverses it.
    pub fn to_stored(&self) -> String {
        match self {
            ParameterValue::Boolean(b) => b.to_string(),
            ParameterValue::Integer(i) => i.to_string(),
            ParameterValue::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_stored())
    }
}

/// Parameter name to value, ordered by name.
pub type ParameterOverrides = BTreeMap<String, ParameterValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: RuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_required: Option<bool>,
}

impl ValidationRule {
    /// Whether a new value can be applied without restarting the service.  An explicit `dynamic`
    /// wins; otherwise the inverse of `restart_required`; a rule saying neither is not dynamic.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
            .or(self.restart_required.map(|r| !r))
            .unwrap_or(false)
    }

    /// Turns a stored value back into a typed value according to this rule.
    pub fn resolve(&self, raw: &str) -> Result<ParameterValue> {
        let bad_value = || error::StoredValueSnafu {
            name: &self.name,
            value: raw,
            expected: self.data_type,
        };
        match self.data_type {
            RuleType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => Ok(ParameterValue::Boolean(true)),
                "0" | "false" => Ok(ParameterValue::Boolean(false)),
                _ => bad_value().fail(),
            },
            RuleType::Integer => raw
                .trim()
                .parse()
                .map(ParameterValue::Integer)
                .ok()
                .ok_or_else(|| bad_value().build()),
            RuleType::String => Ok(ParameterValue::String(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(rename = "configuration-parameters")]
    rules: Vec<ValidationRule>,
}

impl ValidationRules {
    pub fn new(rules: Vec<ValidationRule>) -> Self {
        Self { rules }
    }

    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).context(error::RulesParseSnafu)
    }

    pub fn get(&self, name: &str) -> Option<&ValidationRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether applying the given keys needs a service restart.  Any key without a rule, or with
    /// a rule that isn't dynamic, makes the whole batch restart.  When dynamic application is
    /// disabled everything restarts.
    pub fn requires_restart<'a, I>(&self, keys: I, apply_dynamic: bool) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        if !apply_dynamic {
            return true;
        }
        keys.into_iter()
            .any(|key| self.get(key).map_or(true, |rule| !rule.is_dynamic()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;

    const DESCRIPTOR: &str = r#"{
        "configuration-parameters": [
            {"name": "maxmemory", "type": "integer", "min": 0, "dynamic": true},
            {"name": "save", "type": "string", "dynamic": true},
            {"name": "port", "type": "integer", "min": 1, "max": 65535, "restart_required": true},
            {"name": "key_max_connections", "type": "integer", "min": 1, "max": 1000, "restart_required": false},
            {"name": "autocommit", "type": "boolean"}
        ]
    }"#;

    fn rules() -> ValidationRules {
        ValidationRules::from_json(DESCRIPTOR).unwrap()
    }

    #[test]
    fn parses_descriptor() {
        let rules = rules();
        assert_eq!(rules.len(), 5);
        let port = rules.get("port").unwrap();
        assert_eq!(port.data_type, RuleType::Integer);
        assert_eq!(port.max, Some(65535));
        assert!(rules.get("nope").is_none());
    }

    #[test]
    fn dynamic_classification() {
        let rules = rules();
        assert!(rules.get("maxmemory").unwrap().is_dynamic());
        assert!(!rules.get("port").unwrap().is_dynamic());
        assert!(rules.get("key_max_connections").unwrap().is_dynamic());
        assert!(!rules.get("autocommit").unwrap().is_dynamic());
    }

    #[test]
    fn restart_decision() {
        let rules = rules();
        assert!(!rules.requires_restart(vec!["maxmemory", "save"], true));
        assert!(rules.requires_restart(vec!["maxmemory", "port"], true));
        assert!(rules.requires_restart(vec!["unknown_key"], true));
        assert!(rules.requires_restart(vec!["maxmemory"], false));
    }

    #[test]
    fn resolve_stored_values() {
        let rules = rules();
        let conns = rules.get("key_max_connections").unwrap();
        assert_eq!(conns.resolve("100").unwrap(), ParameterValue::Integer(100));
        assert!(conns.resolve("many").is_err());

        let autocommit = rules.get("autocommit").unwrap();
        assert_eq!(
            autocommit.resolve("1").unwrap(),
            ParameterValue::Boolean(true)
        );
        assert_eq!(
            autocommit.resolve("False").unwrap(),
            ParameterValue::Boolean(false)
        );
        assert!(autocommit.resolve("maybe").is_err());

        let save = rules.get("save").unwrap();
        assert_eq!(
            save.resolve("900 1").unwrap(),
            ParameterValue::String("900 1".to_string())
        );
    }

    #[test]
    fn values_are_plain_json() {
        let overrides: ParameterOverrides =
            serde_json::from_str(r#"{"a": true, "b": 100, "c": "yes"}"#).unwrap();
        assert_eq!(
            overrides,
            btreemap! {
                "a".to_string() => ParameterValue::Boolean(true),
                "b".to_string() => ParameterValue::Integer(100),
                "c".to_string() => ParameterValue::String("yes".to_string()),
            }
        );
        assert_eq!(
            serde_json::to_string(&overrides).unwrap(),
            r#"{"a":true,"b":100,"c":"yes"}"#
        );
        for value in overrides.values() {
            let stored = value.to_stored();
            let rule = ValidationRule {
                name: "x".to_string(),
                data_type: value.rule_type(),
                min: None,
                max: None,
                dynamic: None,
                restart_required: None,
            };
            assert_eq!(&rule.resolve(&stored).unwrap(), value);
        }
    }
}
