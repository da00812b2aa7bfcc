//! Percona XtraDB Cluster: every member is an equal, writable node of a Galera group.

use model::{Cluster, DatastoreVersion, Instance};
use snafu::{ensure, ResultExt};

use super::strategy::{ClusterAction, ClusterStrategy};
use super::validator::{requested_volume, Validator};
use super::{new_member, InstanceSpec};
use crate::error::{self, Result};
use crate::quota::Deltas;

const MEMBER_ROLE: &str = "member";

#[derive(Debug, Clone, Copy, Default)]
pub struct PxcStrategy;

impl ClusterStrategy for PxcStrategy {
    fn name(&self) -> &str {
        "pxc"
    }

    fn member_role(&self) -> &str {
        MEMBER_ROLE
    }

    fn supports(&self, action: ClusterAction) -> bool {
        action == ClusterAction::Grow
    }

    fn validate_create(&self, validator: &Validator<'_>, specs: &[InstanceSpec]) -> Result<Deltas> {
        let (_, deltas) =
            validator.validate_cluster_instances(specs, Some(validator.min_member_count()))?;
        Ok(deltas)
    }

    fn validate_grow(
        &self,
        validator: &Validator<'_>,
        existing: &[Instance],
        specs: &[InstanceSpec],
    ) -> Result<Deltas> {
        // New members must look like the ones already there.
        if let (Some(current), Some(first)) = (existing.first(), specs.first()) {
            ensure!(
                first.flavor_id == current.flavor_id,
                error::ClusterFlavorsNotEqualSnafu
            );
            if let (Some(size), Some(requested)) = (current.volume_size, requested_volume(first)) {
                ensure!(size == requested, error::ClusterVolumeSizesNotEqualSnafu);
            }
        }
        let (_, deltas) = validator.validate_cluster_instances(specs, None)?;
        Ok(deltas)
    }

    fn build_members(
        &self,
        cluster: &Cluster,
        version: &DatastoreVersion,
        specs: &[InstanceSpec],
        ordinal_base: usize,
    ) -> Result<Vec<Instance>> {
        specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                // Requested names are ignored so member names stay unique within the cluster.
                let name = format!("{}-member-{}", cluster.name, ordinal_base + i + 1);
                let name = name.as_str().try_into().context(error::InvalidNameSnafu)?;
                Ok(new_member(cluster, version, spec, name, MEMBER_ROLE))
            })
            .collect()
    }
}
