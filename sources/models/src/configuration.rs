//! Configuration groups, the values stored in them, and the per-datastore-version parameter
//! catalog that administrators maintain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::modeled_types::ResourceName;
use crate::rules::{ParameterValue, RuleType, ValidationRule};

/// A named, reusable bundle of parameter values that can be attached to instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationGroup {
    pub id: String,
    pub name: ResourceName,
    pub description: Option<String>,
    pub tenant_id: String,
    pub datastore_version_id: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

record_impls_for!(ConfigurationGroup, "configurations", soft_delete);

/// One key/value pair of a configuration group.  The value is kept in its stored string form and
/// resolved against the datastore's rules when read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationParameter {
    pub id: String,
    pub configuration_id: String,
    pub configuration_key: String,
    pub configuration_value: String,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ConfigurationParameter {
    pub fn new(id: String, configuration_id: String, key: String, value: &ParameterValue) -> Self {
        Self {
            id,
            configuration_id,
            configuration_key: key,
            configuration_value: value.to_stored(),
            deleted: false,
            deleted_at: None,
        }
    }
}

record_impls_for!(ConfigurationParameter, "configuration_parameters", soft_delete);

/// A validation rule kept in the catalog for one datastore version.  When a version has any of
/// these, they replace the rules from the datastore's descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastoreConfigurationParameter {
    pub id: String,
    pub name: String,
    pub datastore_version_id: String,
    pub restart_required: bool,
    pub data_type: RuleType,
    pub max_size: Option<i64>,
    pub min_size: Option<i64>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DatastoreConfigurationParameter {
    pub fn from_rule(id: String, datastore_version_id: String, rule: &ValidationRule) -> Self {
        Self {
            id,
            name: rule.name.clone(),
            datastore_version_id,
            restart_required: !rule.is_dynamic(),
            data_type: rule.data_type,
            max_size: rule.max,
            min_size: rule.min,
            deleted: false,
            deleted_at: None,
        }
    }

    /// Overwrites the type, bounds and restart flag from the given rule; used when modifying an
    /// existing parameter or reviving a deleted one.
    pub fn update_from(&mut self, rule: &ValidationRule) {
        self.restart_required = !rule.is_dynamic();
        self.data_type = rule.data_type;
        self.max_size = rule.max;
        self.min_size = rule.min;
        self.deleted = false;
        self.deleted_at = None;
    }

    pub fn to_rule(&self) -> ValidationRule {
        ValidationRule {
            name: self.name.clone(),
            data_type: self.data_type,
            min: self.min_size,
            max: self.max_size,
            dynamic: Some(!self.restart_required),
            restart_required: Some(self.restart_required),
        }
    }
}

record_impls_for!(
    DatastoreConfigurationParameter,
    "datastore_configuration_parameters",
    soft_delete
);
