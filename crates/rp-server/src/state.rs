//! Shared application state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rp_core::ingest::{IngestArbiter, StatsSnapshot};
use rp_core::store::SpatialStore;

/// Handles shared by the loops and the HTTP surface.
pub struct AppState {
    arbiter: Arc<IngestArbiter>,
    loop_heartbeats: DashMap<&'static str, DateTime<Utc>>,
}

impl AppState {
    pub fn new(store: Arc<dyn SpatialStore>) -> Self {
        Self {
            arbiter: Arc::new(IngestArbiter::new(store)),
            loop_heartbeats: DashMap::new(),
        }
    }

    pub fn arbiter(&self) -> &IngestArbiter {
        &self.arbiter
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.arbiter.snapshot()
    }

    pub fn mark_loop_heartbeat(&self, name: &'static str) {
        self.loop_heartbeats.insert(name, Utc::now());
    }

    pub fn loop_heartbeats(&self) -> BTreeMap<String, DateTime<Utc>> {
        self.loop_heartbeats
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect()
    }
}
