//! Checks applied to the instance specs of a cluster request.  Rules run in a fixed order and the
//! first one that fails decides the error.

use snafu::{ensure, OptionExt};

use super::InstanceSpec;
use crate::compute::{ComputeClient, Flavor};
use crate::config::DatastoreClusterConfig;
use crate::error::{self, Result};
use crate::quota::{Deltas, QuotaService, Reservation, INSTANCES, VOLUMES};

/// The volume size a spec asks for.  A size of zero counts as no request.
pub(crate) fn requested_volume(spec: &InstanceSpec) -> Option<u32> {
    spec.volume_size.filter(|&size| size > 0)
}

pub struct Validator<'a> {
    compute: &'a dyn ComputeClient,
    quotas: &'a dyn QuotaService,
    settings: &'a DatastoreClusterConfig,
    manager: &'a str,
    max_volume_size: u32,
}

impl<'a> Validator<'a> {
    pub fn new(
        compute: &'a dyn ComputeClient,
        quotas: &'a dyn QuotaService,
        settings: &'a DatastoreClusterConfig,
        manager: &'a str,
        max_volume_size: u32,
    ) -> Self {
        Self {
            compute,
            quotas,
            settings,
            manager,
            max_volume_size,
        }
    }

    pub fn min_member_count(&self) -> usize {
        self.settings.min_cluster_member_count
    }

    /// Validates the specs and returns the flavor they share and the resources they need.
    /// `min_count` of `None` skips the member count check, as when growing.
    pub fn validate_cluster_instances(
        &self,
        specs: &[InstanceSpec],
        min_count: Option<usize>,
    ) -> Result<(Flavor, Deltas)> {
        if let Some(min) = min_count {
            ensure!(
                specs.len() >= min,
                error::ClusterNumInstancesNotLargeEnoughSnafu { min }
            );
        }
        let first = specs.first().context(error::ClusterInstancesEmptySnafu)?;
        ensure!(
            specs.iter().all(|s| s.flavor_id == first.flavor_id),
            error::ClusterFlavorsNotEqualSnafu
        );
        let flavor = self.compute.get_flavor(&first.flavor_id)?;

        let count = specs.len() as i64;
        let mut deltas = Deltas::new();
        deltas.insert(INSTANCES.to_string(), count);

        if self.settings.volume_support {
            let size = requested_volume(first).context(error::ClusterVolumeSizeRequiredSnafu)?;
            for spec in specs {
                let other =
                    requested_volume(spec).context(error::ClusterVolumeSizeRequiredSnafu)?;
                ensure!(other == size, error::ClusterVolumeSizesNotEqualSnafu);
            }
            self.validate_volume_size(size)?;
            deltas.insert(VOLUMES.to_string(), i64::from(size) * count);
        } else {
            ensure!(
                specs.iter().all(|s| requested_volume(s).is_none()),
                error::VolumeNotSupportedSnafu {
                    manager: self.manager
                }
            );
            if self.settings.device_path.is_some() {
                ensure!(
                    flavor.ephemeral > 0,
                    error::LocalStorageNotSpecifiedSnafu {
                        flavor_id: &flavor.id,
                        manager: self.manager,
                    }
                );
            }
        }

        Ok((flavor, deltas))
    }

    pub fn validate_volume_size(&self, size: u32) -> Result<()> {
        ensure!(size > 0, error::VolumeSizeInvalidSnafu { size });
        ensure!(
            size <= self.max_volume_size,
            error::VolumeSizeTooLargeSnafu {
                size,
                max: self.max_volume_size
            }
        );
        Ok(())
    }

    /// Reserves the resources against the tenant's quota.
    pub fn reserve(&self, tenant_id: &str, deltas: &Deltas) -> Result<Reservation> {
        self.quotas.check_and_reserve(tenant_id, deltas)
    }
}
