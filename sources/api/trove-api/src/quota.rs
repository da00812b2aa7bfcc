//! Tenant quotas.  Resources are reserved before catalog rows are written, then the reservation is
//! committed once the rows exist, or rolled back if writing them failed.

use log::{debug, info};
use snafu::{ensure, OptionExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::QuotaConfig;
use crate::error::{self, Result};

pub const INSTANCES: &str = "instances";
/// Total volume size in GB.
pub const VOLUMES: &str = "volumes";

/// Resource name to requested amount.
pub type Deltas = BTreeMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: String,
    pub tenant_id: String,
    pub deltas: Deltas,
}

pub trait QuotaService: Send + Sync {
    /// Reserves the deltas for the tenant, failing with `QuotaExceeded` if any resource would go
    /// over its limit.  Nothing is reserved on failure.
    fn check_and_reserve(&self, tenant_id: &str, deltas: &Deltas) -> Result<Reservation>;
    /// Turns a reservation into usage.
    fn commit(&self, reservation: &Reservation) -> Result<()>;
    /// Releases a reservation.
    fn rollback(&self, reservation: &Reservation) -> Result<()>;
}

#[derive(Debug, Default)]
struct TenantUsage {
    in_use: Deltas,
    reserved: HashMap<String, Deltas>,
}

impl TenantUsage {
    fn used(&self, resource: &str) -> i64 {
        let in_use = self.in_use.get(resource).copied().unwrap_or(0);
        let reserved: i64 = self
            .reserved
            .values()
            .filter_map(|d| d.get(resource))
            .sum();
        in_use + reserved
    }
}

/// Quotas kept in process memory, with the same limit for every tenant.
#[derive(Debug)]
pub struct InMemoryQuotas {
    limits: Deltas,
    usage: Mutex<HashMap<String, TenantUsage>>,
}

impl InMemoryQuotas {
    pub fn new(limits: Deltas) -> Self {
        Self {
            limits,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        let mut limits = Deltas::new();
        limits.insert(INSTANCES.to_string(), config.max_instances_per_tenant);
        limits.insert(VOLUMES.to_string(), config.max_volumes_per_tenant);
        Self::new(limits)
    }

    /// Committed plus reserved amount of a resource for the tenant.
    pub fn used(&self, tenant_id: &str, resource: &str) -> Result<i64> {
        let usage = self.lock()?;
        Ok(usage.get(tenant_id).map_or(0, |u| u.used(resource)))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, TenantUsage>>> {
        self.usage
            .lock()
            .ok()
            .context(error::LockPoisonedSnafu { name: "quota" })
    }
}

impl QuotaService for InMemoryQuotas {
    fn check_and_reserve(&self, tenant_id: &str, deltas: &Deltas) -> Result<Reservation> {
        let mut usage = self.lock()?;
        let tenant = usage.entry(tenant_id.to_string()).or_default();
        for (resource, requested) in deltas {
            // Resources without a limit are unlimited.
            let limit = match self.limits.get(resource) {
                Some(limit) => *limit,
                None => continue,
            };
            let used = tenant.used(resource);
            ensure!(
                used + requested <= limit,
                error::QuotaExceededSnafu {
                    resource,
                    requested: *requested,
                    used,
                    limit,
                }
            );
        }

        let reservation = Reservation {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            deltas: deltas.clone(),
        };
        tenant
            .reserved
            .insert(reservation.id.clone(), deltas.clone());
        debug!(
            "Reserved {:?} for tenant '{}' as '{}'",
            deltas, tenant_id, reservation.id
        );
        Ok(reservation)
    }

    fn commit(&self, reservation: &Reservation) -> Result<()> {
        let mut usage = self.lock()?;
        let tenant = usage
            .get_mut(&reservation.tenant_id)
            .context(error::ReservationNotFoundSnafu {
                id: &reservation.id,
            })?;
        let deltas = tenant
            .reserved
            .remove(&reservation.id)
            .context(error::ReservationNotFoundSnafu {
                id: &reservation.id,
            })?;
        for (resource, amount) in deltas {
            *tenant.in_use.entry(resource).or_insert(0) += amount;
        }
        Ok(())
    }

    fn rollback(&self, reservation: &Reservation) -> Result<()> {
        let mut usage = self.lock()?;
        if let Some(tenant) = usage.get_mut(&reservation.tenant_id) {
            if tenant.reserved.remove(&reservation.id).is_some() {
                info!(
                    "Rolled back reservation '{}' for tenant '{}'",
                    reservation.id, reservation.tenant_id
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;
    use maplit::btreemap;

    fn quotas() -> InMemoryQuotas {
        InMemoryQuotas::new(btreemap! {
            INSTANCES.to_string() => 5,
            VOLUMES.to_string() => 10,
        })
    }

    #[test]
    fn reserve_commit_rollback() {
        let q = quotas();
        let deltas = btreemap! { INSTANCES.to_string() => 3, VOLUMES.to_string() => 6 };

        let first = q.check_and_reserve("t1", &deltas).unwrap();
        assert_eq!(q.used("t1", INSTANCES).unwrap(), 3);

        // Reserved amounts count against the limit.
        let err = q.check_and_reserve("t1", &deltas).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));

        q.rollback(&first).unwrap();
        assert_eq!(q.used("t1", INSTANCES).unwrap(), 0);

        let second = q.check_and_reserve("t1", &deltas).unwrap();
        q.commit(&second).unwrap();
        assert_eq!(q.used("t1", VOLUMES).unwrap(), 6);
        assert!(q.commit(&second).is_err());

        // Other tenants are unaffected.
        q.check_and_reserve("t2", &deltas).unwrap();
    }

    #[test]
    fn unlimited_resources() {
        let q = quotas();
        let deltas = btreemap! { "backups".to_string() => 1000 };
        q.check_and_reserve("t1", &deltas).unwrap();
    }
}
