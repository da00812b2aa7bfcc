//! The compute service's flavor catalog.

use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::HashMap;

use crate::error::{self, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub name: String,
    /// Memory in MB.
    pub ram: u64,
    /// Ephemeral disk in GB; 0 means the flavor has no local storage.
    pub ephemeral: u64,
}

pub trait ComputeClient: Send + Sync {
    fn get_flavor(&self, flavor_id: &str) -> Result<Flavor>;
}

/// A fixed flavor list, usually taken from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticFlavors {
    flavors: HashMap<String, Flavor>,
}

impl StaticFlavors {
    pub fn new<I: IntoIterator<Item = Flavor>>(flavors: I) -> Self {
        Self {
            flavors: flavors.into_iter().map(|f| (f.id.clone(), f)).collect(),
        }
    }
}

impl ComputeClient for StaticFlavors {
    fn get_flavor(&self, flavor_id: &str) -> Result<Flavor> {
        self.flavors
            .get(flavor_id)
            .cloned()
            .context(error::FlavorNotFoundSnafu { flavor_id })
    }
}
