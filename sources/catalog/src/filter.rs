//! Equality predicates over the serialized fields of a row.

use serde_json::Value;
use std::fmt;

/// An ordered list of `field == value` predicates; a row matches when all of them hold.  An empty
/// filter matches every row.  A field missing from a row compares as null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a predicate requiring `field` to equal `value`.
    pub fn eq<S, V>(mut self, field: S, value: V) -> Self
    where
        S: Into<String>,
        V: Into<Value>,
    {
        self.predicates.push((field.into(), value.into()));
        self
    }

    /// Shorthand for the common "not soft-deleted" predicate.
    pub fn live(self) -> Self {
        self.eq("deleted", false)
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.predicates
            .iter()
            .all(|(field, expected)| row.get(field).unwrap_or(&Value::Null) == expected)
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.predicates.is_empty() {
            return write!(f, "(all)");
        }
        let parts: Vec<String> = self
            .predicates
            .iter()
            .map(|(field, value)| format!("{}={}", field, value))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_matches_all() {
        assert!(Filter::new().matches(&json!({"id": "a"})));
        assert!(Filter::new().matches(&json!({})));
    }

    #[test]
    fn all_predicates_must_hold() {
        let row = json!({"id": "a", "tenant_id": "t1", "deleted": false});
        assert!(Filter::new().eq("tenant_id", "t1").live().matches(&row));
        assert!(!Filter::new().eq("tenant_id", "t2").live().matches(&row));
        assert!(!Filter::new().eq("tenant_id", "t1").eq("deleted", true).matches(&row));
    }

    #[test]
    fn missing_field_is_null() {
        let row = json!({"id": "a"});
        assert!(Filter::new().eq("cluster_id", Value::Null).matches(&row));
        assert!(!Filter::new().eq("cluster_id", "c1").matches(&row));
    }

    #[test]
    fn display() {
        let filter = Filter::new().eq("cluster_id", "c1").live();
        assert_eq!(filter.to_string(), "cluster_id=\"c1\", deleted=false");
        assert_eq!(Filter::new().to_string(), "(all)");
    }
}
