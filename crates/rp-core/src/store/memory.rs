//! In-memory spatial store backed by an R-tree.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rstar::primitives::GeomWithData;
use rstar::RTree;

use super::{Result, SpatialStore, StoreError, UpsertOutcome};
use crate::models::{Coords, FieldClock, System, SystemAddress, SystemPatch};
use crate::spatial::{distance, encode_position, is_real_position};

type IndexedPoint = GeomWithData<[f64; 3], SystemAddress>;

/// Slack applied to the R-tree probe so boundary points survive float rounding;
/// the exact distance filter runs afterwards.
const PROBE_SLACK: f64 = 1e-9;

struct Entry {
    system: System,
    clock: FieldClock,
}

#[derive(Default)]
struct Inner {
    systems: HashMap<SystemAddress, Entry>,
    index: RTree<IndexedPoint>,
}

impl Inner {
    fn reindex(&mut self, address: SystemAddress, old: Option<Coords>, new: Option<Coords>) {
        let old_point = encode_position(old).as_array();
        let new_point = encode_position(new).as_array();
        if old_point == new_point {
            return;
        }
        self.index.remove(&IndexedPoint::new(old_point, address));
        self.index.insert(IndexedPoint::new(new_point, address));
    }
}

/// Process-local store. One lock guards both the records and the index so a
/// reader never sees them disagree.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with complete records, e.g. test fixtures.
    pub fn with_systems(systems: impl IntoIterator<Item = System>) -> Self {
        let mut inner = Inner::default();
        let mut points = Vec::new();
        for system in systems {
            points.push(IndexedPoint::new(
                encode_position(system.coords).as_array(),
                system.address,
            ));
            let clock = FieldClock::complete(system.updated_at);
            inner.systems.insert(system.address, Entry { system, clock });
        }
        inner.index = RTree::bulk_load(points);
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.systems.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

#[async_trait]
impl SpatialStore for MemoryStore {
    async fn upsert(
        &self,
        address: SystemAddress,
        patch: &SystemPatch,
        timestamp: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        let inner = &mut *guard;

        let Some(existing) = inner.systems.get_mut(&address) else {
            let system = System::from_patch(address, patch, timestamp);
            inner.index.insert(IndexedPoint::new(
                encode_position(system.coords).as_array(),
                address,
            ));
            let clock = FieldClock::from_patch(patch, timestamp);
            inner.systems.insert(address, Entry { system, clock });
            return Ok(UpsertOutcome::Inserted);
        };

        let old = existing.system.coords;
        if !existing.system.merge(&mut existing.clock, patch, timestamp) {
            return Ok(UpsertOutcome::Stale);
        }
        let new = existing.system.coords;

        inner.reindex(address, old, new);
        Ok(UpsertOutcome::Updated)
    }

    async fn range_query(
        &self,
        center: Coords,
        radius: f64,
        exclude_unknown: bool,
    ) -> Result<Vec<System>> {
        if !radius.is_finite() || radius < 0.0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().map_err(poisoned)?;
        let probe = radius * (1.0 + PROBE_SLACK) + PROBE_SLACK;

        let mut found = Vec::new();
        for point in inner
            .index
            .locate_within_distance(center.as_array(), probe * probe)
        {
            if distance(&Coords::from(*point.geom()), &center) > radius {
                continue;
            }
            let Some(Entry { system, .. }) = inner.systems.get(&point.data) else {
                continue;
            };
            if exclude_unknown && !system.coords.as_ref().is_some_and(is_real_position) {
                continue;
            }
            found.push(system.clone());
        }
        Ok(found)
    }

    async fn by_identity(&self, address: SystemAddress) -> Result<Option<System>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.systems.get(&address).map(|entry| entry.system.clone()))
    }

    async fn by_name(&self, name: &str) -> Result<Option<System>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .systems
            .values()
            .map(|entry| &entry.system)
            .filter(|system| system.name == name)
            .min_by_key(|system| system.address)
            .cloned())
    }
}
