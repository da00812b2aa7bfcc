use log::warn;
use model::{
    ConfigurationParameter, ParameterOverrides, ParameterValue, ValidationRule, ValidationRules,
};
use snafu::{ensure, OptionExt, ResultExt};

use crate::error::{self, Result};

/// Checks every value against its rule: the key must be known, the type must match, and integers
/// must be within the rule's bounds.
pub fn validate_values(
    rules: &ValidationRules,
    datastore: &str,
    values: &ParameterOverrides,
) -> Result<()> {
    for (key, value) in values {
        let rule = rules
            .get(key)
            .context(error::UnknownParameterKeySnafu { key, datastore })?;
        check_value(rule, value)?;
    }
    Ok(())
}

pub fn check_value(rule: &ValidationRule, value: &ParameterValue) -> Result<()> {
    ensure!(
        value.rule_type() == rule.data_type,
        error::ParameterWrongTypeSnafu {
            key: &rule.name,
            expected: rule.data_type,
        }
    );
    if let ParameterValue::Integer(value) = *value {
        if let Some(min) = rule.min {
            ensure!(
                value >= min,
                error::ParameterLessThanMinSnafu {
                    key: &rule.name,
                    value,
                    min,
                }
            );
        }
        if let Some(max) = rule.max {
            ensure!(
                value <= max,
                error::ParameterGreaterThanMaxSnafu {
                    key: &rule.name,
                    value,
                    max,
                }
            );
        }
    }
    Ok(())
}

/// Turns stored parameter rows back into typed values.  A key the rules no longer describe keeps
/// its stored string.
pub fn resolve_values(
    rules: &ValidationRules,
    params: &[ConfigurationParameter],
) -> Result<ParameterOverrides> {
    let mut values = ParameterOverrides::new();
    for param in params {
        let value = match rules.get(&param.configuration_key) {
            Some(rule) => rule
                .resolve(&param.configuration_value)
                .context(error::StoredValueSnafu)?,
            None => {
                warn!(
                    "No rule for stored key '{}', keeping it as a string",
                    param.configuration_key
                );
                ParameterValue::String(param.configuration_value.clone())
            }
        };
        values.insert(param.configuration_key.clone(), value);
    }
    Ok(values)
}
