//! Configuration directives as the datastore's file sees them: a key followed by arguments,
//! possibly repeated.

use serde_json::{Map, Value};
use snafu::ensure;
use std::collections::BTreeMap;

use crate::error::{self, Result};

/// The arguments of every occurrence of one key, in file order.  Most keys occur once with a
/// single argument; `rename-command CONFIG x` is one occurrence with two arguments, and a key
/// like `save` may occur several times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directive(Vec<Vec<String>>);

/// Key to directive, ordered by key.
pub type Overrides = BTreeMap<String, Directive>;

impl Directive {
    pub fn single<S: Into<String>>(value: S) -> Self {
        Self(vec![vec![value.into()]])
    }

    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(vec![args.into_iter().map(Into::into).collect()])
    }

    pub fn occurrences(&self) -> &[Vec<String>] {
        &self.0
    }

    pub fn push(&mut self, args: Vec<String>) {
        self.0.push(args);
    }

    pub fn extend(&mut self, other: Directive) {
        self.0.extend(other.0);
    }

    /// The first argument of the first occurrence.
    pub fn first(&self) -> Option<&str> {
        self.0.first().and_then(|args| args.first()).map(String::as_str)
    }

    /// Every argument of every occurrence, flattened.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flatten().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Turns JSON override values into directive arguments.  Some datastores spell booleans and
/// empty values their own way, e.g. Redis writes `yes`/`no` and `''`.
#[derive(Debug, Clone, Default)]
pub struct ValueConverter {
    mappings: Vec<(Value, String)>,
}

impl ValueConverter {
    pub fn new(mappings: Vec<(Value, String)>) -> Self {
        Self { mappings }
    }

    pub fn redis() -> Self {
        Self::new(vec![
            (Value::Bool(true), "yes".to_string()),
            (Value::Bool(false), "no".to_string()),
            (Value::Null, "''".to_string()),
        ])
    }

    /// A scalar becomes one occurrence with one argument, a list of scalars one occurrence with
    /// several, and a list of lists one occurrence per inner list.
    pub fn to_directive(&self, key: &str, value: &Value) -> Result<Directive> {
        match value {
            Value::Array(items) if items.iter().all(Value::is_array) && !items.is_empty() => {
                let mut directive = Directive::default();
                for item in items {
                    if let Value::Array(args) = item {
                        directive.push(self.scalars(key, args)?);
                    }
                }
                Ok(directive)
            }
            Value::Array(items) => Ok(Directive::from_args(self.scalars(key, items)?)),
            other => Ok(Directive::single(self.scalar(key, other)?)),
        }
    }

    pub fn to_overrides(&self, values: &Map<String, Value>) -> Result<Overrides> {
        values
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.to_directive(key, value)?)))
            .collect()
    }

    fn scalars(&self, key: &str, values: &[Value]) -> Result<Vec<String>> {
        values.iter().map(|v| self.scalar(key, v)).collect()
    }

    fn scalar(&self, key: &str, value: &Value) -> Result<String> {
        if let Some((_, mapped)) = self.mappings.iter().find(|(from, _)| from == value) {
            return Ok(mapped.clone());
        }
        ensure!(
            !matches!(value, Value::Array(_) | Value::Object(_)),
            error::UnsupportedValueSnafu {
                key,
                value: value.to_string(),
            }
        );
        Ok(match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }
}
