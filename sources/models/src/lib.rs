/*!
# Data model

These are the records the control plane keeps in its catalog, and the reference data that
describes which configuration parameters a datastore accepts.

* [Clusters and their member instances](src/cluster.rs), with their task states.
* [Configuration groups](src/configuration.rs) and the parameter values stored in them.
* [Datastores and datastore versions](src/datastore.rs).
* [Scheduled tasks](src/scheduled_task.rs) attached to instances.
* [Validation rules](src/rules.rs), loaded from a per-datastore descriptor or from the catalog.

Every record implements `catalog::Record`, and the ones that are soft-deleted implement
`catalog::SoftDelete`.

At the field level, standard Rust types can be used, or ["modeled types"](src/modeled_types)
that add input validation.
*/

/// Implements `catalog::Record` for a type with a string `id` field, and `catalog::SoftDelete`
/// when the type also has `deleted` and `deleted_at` fields.
macro_rules! record_impls_for {
    ($for:ident, $table:expr) => {
        impl catalog::Record for $for {
            const TABLE: &'static str = $table;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
    ($for:ident, $table:expr, soft_delete) => {
        record_impls_for!($for, $table);

        impl catalog::SoftDelete for $for {
            fn is_deleted(&self) -> bool {
                self.deleted
            }

            fn mark_deleted(&mut self, at: chrono::DateTime<chrono::Utc>) {
                self.deleted = true;
                self.deleted_at = Some(at);
            }
        }
    };
}

// "Modeled types" are types with special ser/de behavior used for validation.
pub mod modeled_types;

pub mod cluster;
pub mod configuration;
pub mod datastore;
pub mod error;
pub mod rules;
pub mod scheduled_task;

pub use cluster::{Cluster, ClusterTask, Instance, InstanceTask, Nic};
pub use configuration::{
    ConfigurationGroup, ConfigurationParameter, DatastoreConfigurationParameter,
};
pub use datastore::{Datastore, DatastoreVersion};
pub use error::{Error, Result};
pub use modeled_types::ResourceName;
pub use rules::{ParameterOverrides, ParameterValue, RuleType, ValidationRule, ValidationRules};
pub use scheduled_task::ScheduledTask;
