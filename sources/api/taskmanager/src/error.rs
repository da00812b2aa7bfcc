use snafu::Snafu;

use crate::guest::GuestError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Task dispatcher can't accept {}: worker has shut down", command))]
    ShutDown { command: String },

    #[snafu(display("Catalog store lock was poisoned"))]
    StoreLock,

    #[snafu(display("Task queue lock was poisoned"))]
    QueueLock,

    #[snafu(display("Catalog error while {}: {}", action, source))]
    Catalog {
        action: String,
        source: catalog::Error,
    },

    #[snafu(display("Instance '{}' not found", id))]
    InstanceNotFound { id: String },

    #[snafu(display("Cluster '{}' not found", id))]
    ClusterNotFound { id: String },

    #[snafu(display(
        "Guest call '{}' on instance '{}' timed out after {}s",
        call,
        instance_id,
        seconds
    ))]
    GuestTimeout {
        call: String,
        instance_id: String,
        seconds: u64,
    },

    #[snafu(display(
        "Guest call '{}' on instance '{}' failed: {}",
        call,
        instance_id,
        source
    ))]
    GuestCall {
        call: String,
        instance_id: String,
        source: GuestError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
