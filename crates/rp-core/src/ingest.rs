//! Ingestion arbiter.
//!
//! Keeps the spatial store at the most recent declared state of every
//! system, whatever order the feed delivers observations in. Conflicts are
//! resolved by the observation's own timestamp (last writer wins by declared
//! time), so redelivered and reordered events need no deduplication.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::{decode_envelope, FeedMessage};
use crate::models::IngestEvent;
use crate::spatial::is_real_position;
use crate::store::{SpatialStore, StoreError};

/// Per-event result. None of these are failures of the arbiter itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    RejectedStale,
    RejectedMalformed,
}

/// Why an event was rejected as malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    MissingIdentity,
    InvalidCoordinates,
}

/// Point-in-time view of the arbiter counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub applied: u64,
    pub rejected_stale: u64,
    pub rejected_malformed: u64,
    /// Envelopes of schemas the planner does not track.
    pub ignored: u64,
    /// Envelopes that could not be decoded at all.
    pub undecodable: u64,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    applied: AtomicU64,
    rejected_stale: AtomicU64,
    rejected_malformed: AtomicU64,
    ignored: AtomicU64,
    undecodable: AtomicU64,
}

/// Summary of one envelope pushed through the arbiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeSummary {
    pub applied: usize,
    pub rejected_stale: usize,
    pub rejected_malformed: usize,
    pub ignored: bool,
}

pub struct IngestArbiter {
    store: Arc<dyn SpatialStore>,
    counters: Counters,
}

impl IngestArbiter {
    pub fn new(store: Arc<dyn SpatialStore>) -> Self {
        Self {
            store,
            counters: Counters::default(),
        }
    }

    /// Check an event's preconditions without touching storage.
    pub fn validate(event: &IngestEvent) -> Result<(), Malformed> {
        if event.address.is_none() {
            return Err(Malformed::MissingIdentity);
        }
        if let Some(coords) = &event.patch.coords {
            if !is_real_position(coords) {
                return Err(Malformed::InvalidCoordinates);
            }
        }
        Ok(())
    }

    /// Apply one observation.
    ///
    /// Exactly one conditional upsert for a well-formed event, zero writes
    /// otherwise. Only a storage failure is returned as an error.
    pub async fn accept(&self, event: &IngestEvent) -> Result<Outcome, StoreError> {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        let address = match (Self::validate(event), event.address) {
            (Ok(()), Some(address)) => address,
            (result, _) => {
                tracing::debug!(
                    address = ?event.address,
                    reason = ?result.err(),
                    "Rejecting malformed event"
                );
                self.counters.rejected_malformed.fetch_add(1, Ordering::Relaxed);
                return Ok(Outcome::RejectedMalformed);
            }
        };

        let outcome = self
            .store
            .upsert(address, &event.patch, event.timestamp)
            .await?;

        if outcome.is_applied() {
            tracing::debug!(
                address,
                name = ?event.patch.name,
                coords = ?event.patch.coords,
                timestamp = %event.timestamp,
                "Applied system update"
            );
            self.counters.applied.fetch_add(1, Ordering::Relaxed);
            Ok(Outcome::Applied)
        } else {
            tracing::debug!(address, timestamp = %event.timestamp, "Skipping stale update");
            self.counters.rejected_stale.fetch_add(1, Ordering::Relaxed);
            Ok(Outcome::RejectedStale)
        }
    }

    /// Decode a raw relay envelope and apply every event in it.
    ///
    /// Decoding problems are counted and swallowed; a storage failure aborts
    /// the remainder of the envelope and is returned.
    pub async fn accept_envelope(&self, raw: &str) -> Result<EnvelopeSummary, StoreError> {
        let mut summary = EnvelopeSummary::default();
        let events = match decode_envelope(raw) {
            Ok(FeedMessage::Systems(events)) => events,
            Ok(FeedMessage::Ignored { schema }) => {
                tracing::trace!(%schema, "Ignoring envelope");
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                summary.ignored = true;
                return Ok(summary);
            }
            Err(err) => {
                tracing::debug!(error = %err, "Undecodable envelope");
                return Ok(self.record_undecodable());
            }
        };

        for event in &events {
            match self.accept(event).await? {
                Outcome::Applied => summary.applied += 1,
                Outcome::RejectedStale => summary.rejected_stale += 1,
                Outcome::RejectedMalformed => summary.rejected_malformed += 1,
            }
        }
        Ok(summary)
    }

    /// Like [`accept_envelope`](Self::accept_envelope) for a raw line that
    /// may not be valid UTF-8.
    pub async fn accept_bytes(&self, raw: &[u8]) -> Result<EnvelopeSummary, StoreError> {
        match std::str::from_utf8(raw) {
            Ok(text) => self.accept_envelope(text).await,
            Err(err) => {
                tracing::debug!(error = %err, "Envelope is not UTF-8");
                Ok(self.record_undecodable())
            }
        }
    }

    /// Count an envelope that never reached the decoder, e.g. one cut off by
    /// the transport's line limit.
    pub fn record_undecodable(&self) -> EnvelopeSummary {
        self.counters.undecodable.fetch_add(1, Ordering::Relaxed);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.counters.rejected_malformed.fetch_add(1, Ordering::Relaxed);
        EnvelopeSummary {
            rejected_malformed: 1,
            ..EnvelopeSummary::default()
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.counters.processed.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            rejected_stale: self.counters.rejected_stale.load(Ordering::Relaxed),
            rejected_malformed: self.counters.rejected_malformed.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            undecodable: self.counters.undecodable.load(Ordering::Relaxed),
            captured_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coords, System, SystemPatch};
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, IngestArbiter) {
        let store = Arc::new(MemoryStore::new());
        let arbiter = IngestArbiter::new(store.clone());
        (store, arbiter)
    }

    fn sighting(address: u64, year: i32, name: &str, x: f64) -> IngestEvent {
        IngestEvent::new(
            address,
            ts(year),
            SystemPatch {
                name: Some(name.to_string()),
                coords: Some(Coords::new(x, 0.0, 0.0)),
                ..SystemPatch::default()
            },
        )
    }

    #[tokio::test]
    async fn first_sighting_is_applied() {
        let (store, arbiter) = setup();
        let outcome = arbiter.accept(&sighting(1, 2024, "Sol", 0.0)).await.unwrap();
        assert_eq!(outcome, Outcome::Applied);

        let stored = store.by_identity(1).await.unwrap().unwrap();
        assert_eq!(stored.name, "Sol");
        assert_eq!(stored.updated_at, ts(2024));
    }

    #[tokio::test]
    async fn arrival_order_does_not_matter() {
        let older = sighting(1, 2023, "Old", 1.0);
        let newer = sighting(1, 2025, "New", 2.0);

        let (forward_store, forward) = setup();
        forward.accept(&older).await.unwrap();
        forward.accept(&newer).await.unwrap();

        let (reverse_store, reverse) = setup();
        assert_eq!(reverse.accept(&newer).await.unwrap(), Outcome::Applied);
        assert_eq!(reverse.accept(&older).await.unwrap(), Outcome::RejectedStale);

        let (only_store, only) = setup();
        only.accept(&newer).await.unwrap();

        let a = forward_store.by_identity(1).await.unwrap();
        let b = reverse_store.by_identity(1).await.unwrap();
        let c = only_store.by_identity(1).await.unwrap();
        assert_eq!(a, c);
        assert_eq!(b, c);
        assert_eq!(c.unwrap().updated_at, ts(2025));
    }

    #[tokio::test]
    async fn partial_events_converge_in_either_order() {
        let permit = IngestEvent::new(
            1,
            ts(2023),
            SystemPatch {
                requires_permit: Some(true),
                ..SystemPatch::default()
            },
        );
        let position = IngestEvent::new(
            1,
            ts(2025),
            SystemPatch {
                coords: Some(Coords::new(3.0, 4.0, 5.0)),
                ..SystemPatch::default()
            },
        );

        let (forward_store, forward) = setup();
        assert_eq!(forward.accept(&permit).await.unwrap(), Outcome::Applied);
        assert_eq!(forward.accept(&position).await.unwrap(), Outcome::Applied);

        let (reverse_store, reverse) = setup();
        assert_eq!(reverse.accept(&position).await.unwrap(), Outcome::Applied);
        // Older, but it carries a field nothing newer has written.
        assert_eq!(reverse.accept(&permit).await.unwrap(), Outcome::Applied);
        assert_eq!(reverse.accept(&permit).await.unwrap(), Outcome::RejectedStale);

        let a = forward_store.by_identity(1).await.unwrap().unwrap();
        let b = reverse_store.by_identity(1).await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.updated_at, ts(2025));
        assert_eq!(a.coords, Some(Coords::new(3.0, 4.0, 5.0)));
        assert!(a.requires_permit);
        assert_eq!(a.name, "");

        // Not the same as seeing the newer event alone: that one never said
        // anything about the permit.
        let (only_store, only) = setup();
        only.accept(&position).await.unwrap();
        let c = only_store.by_identity(1).await.unwrap().unwrap();
        assert_ne!(a, c);
        assert!(!c.requires_permit);
        assert_eq!(
            System {
                requires_permit: true,
                ..c
            },
            a
        );
    }

    #[tokio::test]
    async fn redelivery_is_stale() {
        let (_store, arbiter) = setup();
        let event = sighting(1, 2024, "Sol", 0.0);
        assert_eq!(arbiter.accept(&event).await.unwrap(), Outcome::Applied);
        assert_eq!(arbiter.accept(&event).await.unwrap(), Outcome::RejectedStale);
    }

    #[tokio::test]
    async fn malformed_events_touch_nothing() {
        let (store, arbiter) = setup();

        let no_identity = IngestEvent {
            address: None,
            timestamp: ts(2024),
            patch: SystemPatch::default(),
        };
        assert_eq!(
            arbiter.accept(&no_identity).await.unwrap(),
            Outcome::RejectedMalformed
        );

        let mut bad_coords = sighting(2, 2024, "Nowhere", 0.0);
        bad_coords.patch.coords = Some(Coords::new(f64::NAN, 0.0, 0.0));
        assert_eq!(
            arbiter.accept(&bad_coords).await.unwrap(),
            Outcome::RejectedMalformed
        );

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn partial_update_merges_fields() {
        let (store, arbiter) = setup();
        arbiter.accept(&sighting(1, 2023, "Sol", 0.0)).await.unwrap();

        let flags_only = IngestEvent::new(
            1,
            ts(2024),
            SystemPatch {
                requires_permit: Some(true),
                ..SystemPatch::default()
            },
        );
        assert_eq!(arbiter.accept(&flags_only).await.unwrap(), Outcome::Applied);

        let stored = store.by_identity(1).await.unwrap().unwrap();
        assert_eq!(stored.name, "Sol");
        assert_eq!(stored.coords, Some(Coords::new(0.0, 0.0, 0.0)));
        assert!(stored.requires_permit);
        assert_eq!(stored.updated_at, ts(2024));
    }

    #[tokio::test]
    async fn counters_add_up() {
        let (_store, arbiter) = setup();
        arbiter.accept(&sighting(1, 2024, "A", 0.0)).await.unwrap();
        arbiter.accept(&sighting(1, 2023, "A", 0.0)).await.unwrap();
        arbiter.accept(&sighting(2, 2024, "B", 5.0)).await.unwrap();

        let commodity = json!({"$schemaRef": "https://eddn.edcd.io/schemas/commodity/3"});
        let summary = arbiter.accept_envelope(&commodity.to_string()).await.unwrap();
        assert!(summary.ignored);
        let summary = arbiter.accept_envelope("not json").await.unwrap();
        assert_eq!(summary.rejected_malformed, 1);

        let snapshot = arbiter.snapshot();
        assert_eq!(snapshot.processed, 4);
        assert_eq!(snapshot.applied, 2);
        assert_eq!(snapshot.rejected_stale, 1);
        assert_eq!(snapshot.rejected_malformed, 1);
        assert_eq!(snapshot.ignored, 1);
        assert_eq!(snapshot.undecodable, 1);
        assert_eq!(
            snapshot.processed,
            snapshot.applied + snapshot.rejected_stale + snapshot.rejected_malformed
        );
    }

    #[tokio::test]
    async fn nav_route_envelope_applies_each_system() {
        let (store, arbiter) = setup();
        let raw = json!({
            "$schemaRef": "https://eddn.edcd.io/schemas/navroute/1",
            "message": {
                "timestamp": "2025-01-01T00:00:00Z",
                "Route": [
                    {"SystemAddress": 1, "StarSystem": "A", "StarPos": [1.0, 2.0, 3.0]},
                    {"SystemAddress": 2, "StarSystem": "B", "StarPos": [4.0, 5.0, 6.0]}
                ]
            }
        });
        let summary = arbiter.accept_envelope(&raw.to_string()).await.unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn non_utf8_bytes_are_counted_as_undecodable() {
        let (store, arbiter) = setup();
        let summary = arbiter.accept_bytes(b"{\"message\": \"\xff\xfe\"}").await.unwrap();
        assert_eq!(summary.rejected_malformed, 1);

        let raw = json!({
            "$schemaRef": "https://eddn.edcd.io/schemas/journal/1",
            "message": {
                "event": "FSDJump",
                "timestamp": "2025-01-01T00:00:00Z",
                "SystemAddress": 2,
                "StarSystem": "B",
                "StarPos": [1.0, 0.0, 0.0]
            }
        });
        let summary = arbiter.accept_bytes(raw.to_string().as_bytes()).await.unwrap();
        assert_eq!(summary.applied, 1);

        arbiter.record_undecodable();
        let snapshot = arbiter.snapshot();
        assert_eq!(snapshot.undecodable, 2);
        assert_eq!(snapshot.rejected_malformed, 2);
        assert_eq!(snapshot.processed, 3);
        assert_eq!(store.len(), 1);
    }
}
