//! Per-region creation locks.
//!
//! Two observations close enough to merge always share at least one geohash
//! cell in their covering sets, so holding every cell lock of the covering
//! set serialises any pair of creates that could otherwise both open an
//! issue at the same place. Locks are taken in sorted key order.
//!
//! Regions that cannot be covered by cells (polar, antimeridian, very large
//! radius) take the global lock exclusively; cell-covered regions hold it
//! shared, so both kinds still exclude each other.
//!
//! The table lives in process memory. Exclusion holds only between callers
//! sharing one [`RegionLocks`], so workers in separate processes writing to
//! the same database can still both create an issue at one spot. Running
//! more than one worker process against a shared store needs a lock held in
//! the database around the create path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard,
    RwLock as AsyncRwLock,
};
use urbanwatch_core::geo::GeoPoint;

use crate::cells::covering_cells;

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

#[derive(Default)]
pub struct RegionLocks {
    global: Arc<AsyncRwLock<()>>,
    table: Arc<LockTable>,
}

enum GlobalGuard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Holds a region's locks until dropped.
pub struct RegionGuard {
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
    global: Option<GlobalGuard>,
    table: Arc<LockTable>,
}

impl RegionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every cell within `radius_meters` of `point`.
    pub async fn lock(&self, point: GeoPoint, radius_meters: f64) -> RegionGuard {
        let Some(keys) = covering_cells(point, radius_meters) else {
            let global = self.global.clone().write_owned().await;
            return RegionGuard {
                keys: Vec::new(),
                guards: Vec::new(),
                global: Some(GlobalGuard::Exclusive(global)),
                table: self.table.clone(),
            };
        };
        let global = self.global.clone().read_owned().await;

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            keys.iter()
                .map(|key| table.entry(key.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        RegionGuard {
            keys,
            guards,
            global: Some(GlobalGuard::Shared(global)),
            table: self.table.clone(),
        }
    }

    /// Number of cells currently tracked.
    pub fn tracked(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl RegionGuard {
    /// Cell keys held. Empty when the global lock is held exclusively.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self.global, Some(GlobalGuard::Exclusive(_)))
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        self.guards.clear();
        self.global = None;
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            // Only the table itself still references an idle lock.
            if table.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
                table.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn here() -> GeoPoint {
        GeoPoint::new(22.3149, 87.3105)
    }

    #[tokio::test]
    async fn guard_releases_and_prunes() {
        let locks = RegionLocks::new();
        {
            let guard = locks.lock(here(), 50.0).await;
            assert_eq!(guard.keys().len(), 9);
            assert_eq!(locks.tracked(), 9);
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn overlapping_regions_are_serialised() {
        let locks = Arc::new(RegionLocks::new());
        let first = locks.lock(here(), 50.0).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(here().offset_north(30.0), 50.0).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .expect("contender acquires after release")
            .unwrap();
    }

    #[tokio::test]
    async fn distant_regions_do_not_block() {
        let locks = RegionLocks::new();
        let _a = locks.lock(here(), 50.0).await;
        let b = tokio::time::timeout(
            Duration::from_secs(1),
            locks.lock(here().offset_north(20_000.0), 50.0),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn separate_tables_do_not_exclude() {
        let a = RegionLocks::new();
        let b = RegionLocks::new();
        let _held = a.lock(here(), 50.0).await;
        let other = tokio::time::timeout(Duration::from_secs(1), b.lock(here(), 50.0)).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn uncoverable_region_excludes_cell_regions() {
        let locks = Arc::new(RegionLocks::new());
        let wide = locks.lock(here(), 100_000.0).await;
        assert!(wide.is_exclusive());
        assert!(wide.keys().is_empty());

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(here().offset_east(5_000.0), 50.0).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(wide);
        tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .expect("contender acquires after release")
            .unwrap();
    }
}
