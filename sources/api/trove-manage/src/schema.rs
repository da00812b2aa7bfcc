//! Catalog schema versions.  Each step names the tables it introduces; moving between versions
//! records the new version in the catalog's schema marker.

use catalog::CatalogStore;
use log::info;
use snafu::{ensure, ResultExt};

use crate::error::{self, Result};

const STEPS: &[&str] = &[
    "datastores and datastore versions",
    "instances",
    "configuration groups and parameters",
    "clusters",
    "datastore configuration parameters",
    "scheduled tasks",
];

pub fn latest() -> u32 {
    STEPS.len() as u32
}

/// Moves the catalog up to `target`, or to the latest version.  Returns the new version.
pub fn upgrade<S: CatalogStore>(store: &mut S, target: Option<u32>) -> Result<u32> {
    let current = store.schema_version().context(error::CatalogSnafu)?;
    let target = target.unwrap_or_else(latest);
    ensure!(
        target <= latest(),
        error::UnknownVersionSnafu {
            version: target,
            latest: latest()
        }
    );
    ensure!(
        target >= current,
        error::WrongDirectionSnafu {
            current,
            target,
            action: "upgrade",
        }
    );
    for version in current + 1..=target {
        info!("Applying schema version {}: {}", version, step(version));
    }
    store
        .set_schema_version(target)
        .context(error::CatalogSnafu)?;
    Ok(target)
}

pub fn downgrade<S: CatalogStore>(store: &mut S, target: u32) -> Result<u32> {
    let current = store.schema_version().context(error::CatalogSnafu)?;
    ensure!(
        target <= current,
        error::WrongDirectionSnafu {
            current,
            target,
            action: "downgrade",
        }
    );
    for version in (target + 1..=current).rev() {
        info!("Reverting schema version {}: {}", version, step(version));
    }
    store
        .set_schema_version(target)
        .context(error::CatalogSnafu)?;
    Ok(target)
}

/// Drops every row and brings the empty catalog to the latest version.
pub fn wipe<S: CatalogStore>(store: &mut S) -> Result<u32> {
    store.drop_all().context(error::CatalogSnafu)?;
    info!("Dropped all catalog rows");
    upgrade(store, None)
}

fn step(version: u32) -> &'static str {
    STEPS
        .get(version as usize - 1)
        .copied()
        .unwrap_or("unknown")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use catalog::MemoryCatalog;

    #[test]
    fn upgrade_and_downgrade() {
        let mut store = MemoryCatalog::new();
        assert_eq!(upgrade(&mut store, Some(2)).unwrap(), 2);
        assert_eq!(upgrade(&mut store, None).unwrap(), latest());
        assert!(matches!(
            upgrade(&mut store, Some(1)).unwrap_err(),
            Error::WrongDirection { .. }
        ));
        assert!(matches!(
            upgrade(&mut store, Some(latest() + 1)).unwrap_err(),
            Error::UnknownVersion { .. }
        ));

        assert_eq!(downgrade(&mut store, 1).unwrap(), 1);
        assert_eq!(store.schema_version().unwrap(), 1);
        assert!(matches!(
            downgrade(&mut store, 3).unwrap_err(),
            Error::WrongDirection { .. }
        ));
    }

    #[test]
    fn wipe_resyncs() {
        let mut store = MemoryCatalog::new();
        downgrade(&mut store, 0).unwrap();
        assert_eq!(wipe(&mut store).unwrap(), latest());
        assert_eq!(store.schema_version().unwrap(), latest());
    }
}
