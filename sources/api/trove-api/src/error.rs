use http::StatusCode;
use model::{ClusterTask, RuleType};
use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Broad classes of failure, used to decide how an error reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request is wrong and the caller can correct it.
    Validation,
    /// The caller may not perform the operation.
    Forbidden,
    NotFound,
    /// The target is not in a state that allows the operation.
    Conflict,
    /// A collaborator (quota, dispatcher) refused or failed.
    Downstream,
    Internal,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    // Validation
    #[snafu(display("The number of instances for your initial cluster must be at least {}", min))]
    ClusterNumInstancesNotLargeEnough { min: usize },

    #[snafu(display("At least one instance is required"))]
    ClusterInstancesEmpty,

    #[snafu(display("The flavor for each instance in a cluster must be the same"))]
    ClusterFlavorsNotEqual,

    #[snafu(display("A volume size is required for each instance in the cluster"))]
    ClusterVolumeSizeRequired,

    #[snafu(display("The volume size for each instance in a cluster must be the same"))]
    ClusterVolumeSizesNotEqual,

    #[snafu(display("Volume size must be a positive number of GB, given {}", size))]
    VolumeSizeInvalid { size: u32 },

    #[snafu(display(
        "Volume size of {}GB cannot exceed the maximum of {}GB",
        size,
        max
    ))]
    VolumeSizeTooLarge { size: u32, max: u32 },

    #[snafu(display("Volume sizes are not supported by datastore manager '{}'", manager))]
    VolumeNotSupported { manager: String },

    #[snafu(display(
        "Local storage not specified in flavor '{}', which datastore manager '{}' requires",
        flavor_id,
        manager
    ))]
    LocalStorageNotSpecified { flavor_id: String, manager: String },

    #[snafu(display("Invalid name: {}", source))]
    InvalidName {
        source: model::modeled_types::ValidationError,
    },

    #[snafu(display(
        "{} is not a supported configuration key for datastore '{}'",
        key,
        datastore
    ))]
    UnknownParameterKey { key: String, datastore: String },

    #[snafu(display(
        "Incorrect data type supplied as a value for key {}. Expected type of {}.",
        key,
        expected
    ))]
    ParameterWrongType { key: String, expected: RuleType },

    #[snafu(display("Value {} for {} less than min {}", value, key, min))]
    ParameterLessThanMin { key: String, value: i64, min: i64 },

    #[snafu(display("Value {} for {} greater than max {}", value, key, max))]
    ParameterGreaterThanMax { key: String, value: i64, max: i64 },

    #[snafu(display("Datastore manager '{}' does not support clustering", manager))]
    ClusteringNotSupported { manager: String },

    #[snafu(display("Datastore manager '{}' does not support cluster action '{}'", manager, action))]
    ClusterActionNotSupported { manager: String, action: String },

    #[snafu(display("Datastore version '{}' is not active", version))]
    DatastoreVersionInactive { version: String },

    #[snafu(display("Unable to create scheduled task: {}", reason))]
    ScheduledTaskCreation { reason: String },

    // Forbidden
    #[snafu(display("Only administrators may {}", action))]
    AdminRequired { action: String },

    // Not found
    #[snafu(display("Flavor '{}' could not be found", flavor_id))]
    FlavorNotFound { flavor_id: String },

    #[snafu(display("Datastore '{}' could not be found", name))]
    DatastoreNotFound { name: String },

    #[snafu(display(
        "Datastore version '{}' of datastore '{}' could not be found",
        version,
        datastore
    ))]
    DatastoreVersionNotFound { datastore: String, version: String },

    #[snafu(display("Datastore version with id '{}' could not be found", id))]
    DatastoreVersionIdNotFound { id: String },

    #[snafu(display("Cluster '{}' could not be found", id))]
    ClusterNotFound { id: String },

    #[snafu(display("Configuration group '{}' could not be found", id))]
    ConfigurationNotFound { id: String },

    #[snafu(display("Instance '{}' could not be found", id))]
    InstanceNotFound { id: String },

    #[snafu(display("Scheduled task '{}' could not be found", id))]
    ScheduledTaskNotFound { id: String },

    #[snafu(display(
        "No configuration parameter '{}' for datastore version '{}'",
        key,
        version
    ))]
    ConfigKeyNotFound { key: String, version: String },

    #[snafu(display(
        "No validation rules for datastore manager '{}' at {}",
        manager,
        path.display()
    ))]
    RulesNotFound { manager: String, path: PathBuf },

    // Conflict
    #[snafu(display(
        "Cluster '{}' is not available for this operation while it is {}",
        id,
        task
    ))]
    ClusterNotAvailable { id: String, task: ClusterTask },

    #[snafu(display(
        "Configuration group '{}' is assigned to {} instance(s) and cannot be deleted",
        id,
        count
    ))]
    InstanceAssignedToConfiguration { id: String, count: usize },

    #[snafu(display(
        "Configuration parameter '{}' already exists for datastore version '{}'",
        name,
        version
    ))]
    ParameterExists { name: String, version: String },

    // Downstream
    #[snafu(display(
        "Quota exceeded for resource '{}': requested {}, {} of {} in use or reserved",
        resource,
        requested,
        used,
        limit
    ))]
    QuotaExceeded {
        resource: String,
        requested: i64,
        used: i64,
        limit: i64,
    },

    #[snafu(display("Unknown quota reservation '{}'", id))]
    ReservationNotFound { id: String },

    #[snafu(display("Task dispatcher did not accept {}: {}", command, source))]
    Dispatch {
        command: String,
        source: taskmanager::Error,
    },

    // Internal
    #[snafu(display("Catalog error: {}", source))]
    Catalog { source: catalog::Error },

    #[snafu(display("Invalid value stored in catalog: {}", source))]
    StoredValue { source: model::Error },

    #[snafu(display("Failed to read {}: {}", path.display(), source))]
    ReadFile { path: PathBuf, source: io::Error },

    #[snafu(display("Invalid validation rules in {}: {}", path.display(), source))]
    RulesParse { path: PathBuf, source: model::Error },

    #[snafu(display("Invalid config file {}: {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("Catalog store lock was poisoned"))]
    StoreLock,

    #[snafu(display("{} lock was poisoned", name))]
    LockPoisoned { name: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ClusterNumInstancesNotLargeEnough { .. }
            | Error::ClusterInstancesEmpty
            | Error::ClusterFlavorsNotEqual
            | Error::ClusterVolumeSizeRequired
            | Error::ClusterVolumeSizesNotEqual
            | Error::VolumeSizeInvalid { .. }
            | Error::VolumeSizeTooLarge { .. }
            | Error::VolumeNotSupported { .. }
            | Error::LocalStorageNotSpecified { .. }
            | Error::InvalidName { .. }
            | Error::UnknownParameterKey { .. }
            | Error::ParameterWrongType { .. }
            | Error::ParameterLessThanMin { .. }
            | Error::ParameterGreaterThanMax { .. }
            | Error::ClusteringNotSupported { .. }
            | Error::ClusterActionNotSupported { .. }
            | Error::DatastoreVersionInactive { .. }
            | Error::ScheduledTaskCreation { .. } => ErrorKind::Validation,

            Error::AdminRequired { .. } => ErrorKind::Forbidden,

            Error::FlavorNotFound { .. }
            | Error::DatastoreNotFound { .. }
            | Error::DatastoreVersionNotFound { .. }
            | Error::DatastoreVersionIdNotFound { .. }
            | Error::ClusterNotFound { .. }
            | Error::ConfigurationNotFound { .. }
            | Error::InstanceNotFound { .. }
            | Error::ScheduledTaskNotFound { .. }
            | Error::ConfigKeyNotFound { .. }
            | Error::RulesNotFound { .. } => ErrorKind::NotFound,

            Error::ClusterNotAvailable { .. }
            | Error::InstanceAssignedToConfiguration { .. }
            | Error::ParameterExists { .. } => ErrorKind::Conflict,

            Error::QuotaExceeded { .. }
            | Error::ReservationNotFound { .. }
            | Error::Dispatch { .. } => ErrorKind::Downstream,

            Error::Catalog { .. }
            | Error::StoredValue { .. }
            | Error::ReadFile { .. }
            | Error::RulesParse { .. }
            | Error::ConfigParse { .. }
            | Error::StoreLock
            | Error::LockPoisoned { .. } => ErrorKind::Internal,
        }
    }

    /// Stable identifier of the error, for callers that match on it.
    pub fn name(&self) -> &'static str {
        match self {
            Error::ClusterNumInstancesNotLargeEnough { .. } => "ClusterNumInstancesNotLargeEnough",
            Error::ClusterInstancesEmpty => "ClusterInstancesEmpty",
            Error::ClusterFlavorsNotEqual => "ClusterFlavorsNotEqual",
            Error::ClusterVolumeSizeRequired => "ClusterVolumeSizeRequired",
            Error::ClusterVolumeSizesNotEqual => "ClusterVolumeSizesNotEqual",
            Error::VolumeSizeInvalid { .. } => "VolumeSizeInvalid",
            Error::VolumeSizeTooLarge { .. } => "VolumeSizeTooLarge",
            Error::VolumeNotSupported { .. } => "VolumeNotSupported",
            Error::LocalStorageNotSpecified { .. } => "LocalStorageNotSpecified",
            Error::InvalidName { .. } => "InvalidName",
            Error::UnknownParameterKey { .. } => "UnknownParameterKey",
            Error::ParameterWrongType { .. } => "ParameterWrongType",
            Error::ParameterLessThanMin { .. } => "ParameterLessThanMin",
            Error::ParameterGreaterThanMax { .. } => "ParameterGreaterThanMax",
            Error::ClusteringNotSupported { .. } => "ClusteringNotSupported",
            Error::ClusterActionNotSupported { .. } => "ClusterActionNotSupported",
            Error::DatastoreVersionInactive { .. } => "DatastoreVersionInactive",
            Error::ScheduledTaskCreation { .. } => "ScheduledTaskCreationError",
            Error::AdminRequired { .. } => "AdminRequired",
            Error::FlavorNotFound { .. } => "FlavorNotFound",
            Error::DatastoreNotFound { .. } => "DatastoreNotFound",
            Error::DatastoreVersionNotFound { .. } => "DatastoreVersionNotFound",
            Error::DatastoreVersionIdNotFound { .. } => "DatastoreVersionNotFound",
            Error::ClusterNotFound { .. } => "ClusterNotFound",
            Error::ConfigurationNotFound { .. } => "ConfigurationNotFound",
            Error::InstanceNotFound { .. } => "InstanceNotFound",
            Error::ScheduledTaskNotFound { .. } => "ScheduledTaskNotFound",
            Error::ConfigKeyNotFound { .. } => "ConfigKeyNotFound",
            Error::RulesNotFound { .. } => "RulesNotFound",
            Error::ClusterNotAvailable { .. } => "ClusterNotAvailable",
            Error::InstanceAssignedToConfiguration { .. } => "InstanceAssignedToConfiguration",
            Error::ParameterExists { .. } => "ParameterExists",
            Error::QuotaExceeded { .. } => "QuotaExceeded",
            Error::ReservationNotFound { .. } => "ReservationNotFound",
            Error::Dispatch { .. } => "DispatchFailed",
            Error::Catalog { .. } => "CatalogError",
            Error::StoredValue { .. } => "StoredValueInvalid",
            Error::ReadFile { .. } => "ReadFailed",
            Error::RulesParse { .. } => "RulesInvalid",
            Error::ConfigParse { .. } => "ConfigInvalid",
            Error::StoreLock | Error::LockPoisoned { .. } => "LockPoisoned",
        }
    }

    /// The status an HTTP front end would answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::VolumeSizeTooLarge { .. } | Error::QuotaExceeded { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            Error::UnknownParameterKey { .. }
            | Error::ParameterWrongType { .. }
            | Error::ParameterLessThanMin { .. }
            | Error::ParameterGreaterThanMax { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => match self.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Downstream | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds_and_codes() {
        let err = Error::ClusterNumInstancesNotLargeEnough { min: 3 };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.name(), "ClusterNumInstancesNotLargeEnough");

        let err = Error::ParameterGreaterThanMax {
            key: "max_connections".to_string(),
            value: 5000,
            max: 1000,
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            err.to_string(),
            "Value 5000 for max_connections greater than max 1000"
        );

        let err = Error::ClusterNotAvailable {
            id: "c1".to_string(),
            task: ClusterTask::GrowingCluster,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("GROWING_CLUSTER"));
    }
}
