/*!
# Background

Long-running work on guest instances (building cluster members, pushing configuration changes)
is handed to a task dispatcher so that API calls can return as soon as the work is accepted.

# Library

`TaskDispatcher` is the interface the control plane submits commands through.  Submitting only
reports whether the command was accepted; outcomes are written to the catalog as instance and
cluster task states, where a later status poll finds them.

`GuestAgent` is the interface to the agent running on each instance.

`LocalDispatcher` runs commands in-process on a tokio runtime:
* every guest call is bounded by a timeout, and a call that fails or times out marks the
  instance with an error state and description;
* configuration updates for one instance run one at a time, in submission order;
* cluster tasks return to `NONE` when the build or grow finishes, successfully or not.
*/

pub mod error;
pub mod guest;
pub mod local;

pub use error::{Error, Result};
pub use guest::{GuestAgent, GuestError, GuestResult};
pub use local::{LocalDispatcher, Timeouts};

use model::ParameterOverrides;
use std::sync::{Arc, RwLock};

/// The catalog, shared between API handlers and dispatched work.
pub type SharedStore<S> = Arc<RwLock<S>>;

/// Accepts lifecycle and configuration commands for asynchronous execution.
pub trait TaskDispatcher: Send + Sync {
    /// Install and start every member of a newly created cluster.
    fn create_cluster(&self, cluster_id: &str) -> Result<()>;
    /// Install and join the given new members to an existing cluster.
    fn grow_cluster(&self, cluster_id: &str, member_ids: &[String]) -> Result<()>;
    /// Push the given configuration values to an instance.
    fn update_overrides(&self, instance_id: &str, overrides: &ParameterOverrides) -> Result<()>;
}
