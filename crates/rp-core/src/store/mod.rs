//! Spatial store contract.
//!
//! The only gateway to persisted system data. The ingestion arbiter writes
//! through it and the route search reads through it; neither depends on the
//! storage engine behind it.
//!
//! | Backend | Crate | Description |
//! |---------|-------|-------------|
//! | `MemoryStore` | `rp-core` | R-tree in process memory, for tests and embedding |
//! | `SqliteStore` | `rp-server` | SQLite table plus R*Tree virtual table |

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Coords, System, SystemAddress, SystemPatch};

pub use memory::MemoryStore;

/// Spatial store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not answer. Never reported as an empty result.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Result of a conditional upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// First sighting, record created.
    Inserted,
    /// Newer observation merged into the existing record.
    Updated,
    /// Stored record is as new or newer; nothing written.
    Stale,
}

impl UpsertOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, UpsertOutcome::Stale)
    }
}

#[async_trait]
pub trait SpatialStore: Send + Sync {
    /// Atomically merge `patch` into the record for `address`.
    ///
    /// Writes only when no record exists or `timestamp` is strictly newer
    /// than the stored `updated_at`; the comparison and the write are one
    /// atomic step per identity.
    async fn upsert(
        &self,
        address: SystemAddress,
        patch: &SystemPatch,
        timestamp: DateTime<Utc>,
    ) -> Result<UpsertOutcome>;

    /// All systems within `radius` of `center`, in no particular order.
    ///
    /// Systems with an unknown position sit at the sentinel point and are
    /// dropped when `exclude_unknown` is set. Every call returns a fresh,
    /// finite result.
    async fn range_query(
        &self,
        center: Coords,
        radius: f64,
        exclude_unknown: bool,
    ) -> Result<Vec<System>>;

    async fn by_identity(&self, address: SystemAddress) -> Result<Option<System>>;

    /// Exact name lookup, first match.
    async fn by_name(&self, name: &str) -> Result<Option<System>>;
}
