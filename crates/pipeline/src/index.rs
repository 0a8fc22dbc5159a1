//! In-memory spatial index over open issues.
//!
//! Entries are bucketed by `(category, geohash cell)`. A radius query reads
//! the nine cells around the query point when they cover the radius and
//! falls back to scanning every entry otherwise. The whole state sits behind
//! one `RwLock`, so a reader sees an insert or removal either completely or
//! not at all.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use urbanwatch_core::category::IssueCategory;
use urbanwatch_core::geo::GeoPoint;
use urbanwatch_core::issue::Issue;
use urbanwatch_core::types::IssueId;

use crate::cells::{cell_of, covering_cells};

/// A radius query hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub issue_id: IssueId,
    pub location: GeoPoint,
    pub distance_meters: f64,
}

#[derive(Debug, Clone)]
struct Entry {
    location: GeoPoint,
    category: IssueCategory,
    cell: Option<String>,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<IssueId, Entry>,
    buckets: HashMap<(IssueCategory, String), BTreeSet<IssueId>>,
}

impl IndexState {
    fn insert(&mut self, issue_id: IssueId, location: GeoPoint, category: IssueCategory) {
        self.remove(issue_id);
        let cell = cell_of(location);
        if let Some(cell) = &cell {
            self.buckets
                .entry((category, cell.clone()))
                .or_default()
                .insert(issue_id);
        }
        self.entries.insert(
            issue_id,
            Entry {
                location,
                category,
                cell,
            },
        );
    }

    fn remove(&mut self, issue_id: IssueId) -> bool {
        let Some(entry) = self.entries.remove(&issue_id) else {
            return false;
        };
        if let Some(cell) = entry.cell {
            let key = (entry.category, cell);
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.remove(&issue_id);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
        true
    }

    fn candidate(
        &self,
        issue_id: IssueId,
        origin: GeoPoint,
        category: Option<IssueCategory>,
        radius_meters: f64,
    ) -> Option<Candidate> {
        let entry = self.entries.get(&issue_id)?;
        if category.is_some_and(|c| c != entry.category) {
            return None;
        }
        let distance_meters = origin.distance_meters(&entry.location);
        (distance_meters <= radius_meters).then_some(Candidate {
            issue_id,
            location: entry.location,
            distance_meters,
        })
    }
}

/// Projection of open issues' locations, queried by the cluster resolver.
#[derive(Debug, Default)]
pub struct GeoIndex {
    state: RwLock<IndexState>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoned locks are recovered: IndexState mutations never panic midway.
    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or move an issue.
    pub fn insert(&self, issue_id: IssueId, location: GeoPoint, category: IssueCategory) {
        self.write().insert(issue_id, location, category);
    }

    /// Drop an issue. Returns `false` if it was not indexed.
    pub fn remove(&self, issue_id: IssueId) -> bool {
        self.write().remove(issue_id)
    }

    pub fn contains(&self, issue_id: IssueId) -> bool {
        self.read().entries.contains_key(&issue_id)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Replace the whole index with the open issues in `issues`.
    pub fn rebuild<'a>(&self, issues: impl IntoIterator<Item = &'a Issue>) {
        let mut fresh = IndexState::default();
        for issue in issues.into_iter().filter(|i| i.is_open()) {
            fresh.insert(issue.id, issue.location, issue.category);
        }
        *self.write() = fresh;
    }

    /// Issues of `category` within `radius_meters` of `origin` (inclusive),
    /// nearest first, ties broken by ascending id.
    pub fn query_radius(
        &self,
        origin: GeoPoint,
        category: IssueCategory,
        radius_meters: f64,
    ) -> Vec<Candidate> {
        self.query(origin, Some(category), radius_meters)
    }

    /// Like [`query_radius`](Self::query_radius) across every category.
    pub fn query_radius_any(&self, origin: GeoPoint, radius_meters: f64) -> Vec<Candidate> {
        self.query(origin, None, radius_meters)
    }

    fn query(
        &self,
        origin: GeoPoint,
        category: Option<IssueCategory>,
        radius_meters: f64,
    ) -> Vec<Candidate> {
        if radius_meters.is_nan() || radius_meters < 0.0 {
            return Vec::new();
        }

        let state = self.read();
        let mut hits: Vec<Candidate> = match covering_cells(origin, radius_meters) {
            Some(cells) => {
                let categories: Vec<IssueCategory> = match category {
                    Some(c) => vec![c],
                    None => IssueCategory::ALL.to_vec(),
                };
                categories
                    .into_iter()
                    .flat_map(|c| cells.iter().map(move |cell| (c, cell.clone())))
                    .filter_map(|key| state.buckets.get(&key))
                    .flatten()
                    .filter_map(|&id| state.candidate(id, origin, category, radius_meters))
                    .collect()
            }
            None => state
                .entries
                .keys()
                .filter_map(|&id| state.candidate(id, origin, category, radius_meters))
                .collect(),
        };
        drop(state);

        hits.sort_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then(a.issue_id.cmp(&b.issue_id))
        });
        hits
    }
}
