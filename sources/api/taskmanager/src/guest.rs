//! The interface to the agent running on each instance.

use async_trait::async_trait;
use model::{Instance, ParameterOverrides};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GuestError {
    #[snafu(display("Guest agent unreachable: {}", message))]
    Unreachable { message: String },

    #[snafu(display("Guest agent reported failure: {}", message))]
    Failed { message: String },
}

pub type GuestResult<T> = std::result::Result<T, GuestError>;

#[async_trait]
pub trait GuestAgent: Send + Sync {
    /// Installs the datastore on `instance` and joins it to `members`.  The first member of a new
    /// cluster bootstraps it.
    async fn install_cluster(
        &self,
        instance: &Instance,
        members: &[Instance],
        bootstrap: bool,
    ) -> GuestResult<()>;

    /// Tells the instance that every member of its cluster is installed.
    async fn cluster_complete(&self, instance: &Instance) -> GuestResult<()>;

    /// Writes the given values as the instance's user configuration override.
    async fn update_overrides(
        &self,
        instance: &Instance,
        overrides: &ParameterOverrides,
    ) -> GuestResult<()>;
}
