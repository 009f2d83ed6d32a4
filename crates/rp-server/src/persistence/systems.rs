//! SQLite-backed spatial store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use rp_core::models::{Coords, System, SystemAddress, SystemPatch};
use rp_core::spatial::{bounding_box, decode_position, distance, encode_position, UNKNOWN_SENTINEL};
use rp_core::store::{Result, SpatialStore, StoreError, UpsertOutcome};

use super::Database;

/// Widens the R*Tree box, which stores 32-bit floats; the exact distance
/// filter runs afterwards.
const BOX_SLACK: f64 = 0.01;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Number of catalogued systems, known position or not.
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM systems")
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(count.max(0) as u64)
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    tracing::error!("System store query failed: {}", err);
    StoreError::Unavailable(err.to_string())
}

// Addresses use the full u64 range; SQLite integers are i64. Bit-cast both ways.
fn to_row_id(address: SystemAddress) -> i64 {
    address as i64
}

fn from_row_id(id: i64) -> SystemAddress {
    id as u64
}

#[derive(sqlx::FromRow)]
struct SystemRow {
    id64: i64,
    name: String,
    x: f64,
    y: f64,
    z: f64,
    requires_permit: bool,
    sells_tritium: bool,
    updated_at: i64,
}

impl TryFrom<SystemRow> for System {
    type Error = StoreError;

    fn try_from(row: SystemRow) -> Result<Self> {
        let updated_at = DateTime::<Utc>::from_timestamp_micros(row.updated_at).ok_or_else(|| {
            StoreError::Unavailable(format!(
                "system {} has corrupt timestamp {}",
                from_row_id(row.id64),
                row.updated_at
            ))
        })?;
        Ok(System {
            address: from_row_id(row.id64),
            name: row.name,
            coords: decode_position(row.x, row.y, row.z),
            requires_permit: row.requires_permit,
            sells_tritium: row.sells_tritium,
            updated_at,
        })
    }
}

const SELECT_COLUMNS: &str =
    "s.id64, s.name, s.x, s.y, s.z, s.requires_permit, s.sells_tritium, s.updated_at";

#[async_trait]
impl SpatialStore for SqliteStore {
    async fn upsert(
        &self,
        address: SystemAddress,
        patch: &SystemPatch,
        timestamp: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        // One statement: compare and write happen under SQLite's write lock.
        // SET expressions all see the row as it was before the update.
        let written: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO systems (id64, name, x, y, z, requires_permit, sells_tritium, updated_at,
                                 name_at, coords_at, permit_at, tritium_at)
            VALUES (?1, COALESCE(?2, ''), COALESCE(?3, ?9), COALESCE(?4, ?9), COALESCE(?5, ?9),
                    COALESCE(?6, 0), COALESCE(?7, 0), ?8,
                    CASE WHEN ?2 IS NULL THEN NULL ELSE ?8 END,
                    CASE WHEN ?3 IS NULL THEN NULL ELSE ?8 END,
                    CASE WHEN ?6 IS NULL THEN NULL ELSE ?8 END,
                    CASE WHEN ?7 IS NULL THEN NULL ELSE ?8 END)
            ON CONFLICT(id64) DO UPDATE SET
                name = CASE WHEN ?2 IS NOT NULL AND (systems.name_at IS NULL OR ?8 > systems.name_at)
                            THEN ?2 ELSE systems.name END,
                name_at = CASE WHEN ?2 IS NOT NULL AND (systems.name_at IS NULL OR ?8 > systems.name_at)
                               THEN ?8 ELSE systems.name_at END,
                x = CASE WHEN ?3 IS NOT NULL AND (systems.coords_at IS NULL OR ?8 > systems.coords_at)
                         THEN ?3 ELSE systems.x END,
                y = CASE WHEN ?3 IS NOT NULL AND (systems.coords_at IS NULL OR ?8 > systems.coords_at)
                         THEN ?4 ELSE systems.y END,
                z = CASE WHEN ?3 IS NOT NULL AND (systems.coords_at IS NULL OR ?8 > systems.coords_at)
                         THEN ?5 ELSE systems.z END,
                coords_at = CASE WHEN ?3 IS NOT NULL AND (systems.coords_at IS NULL OR ?8 > systems.coords_at)
                                 THEN ?8 ELSE systems.coords_at END,
                requires_permit = CASE WHEN ?6 IS NOT NULL AND (systems.permit_at IS NULL OR ?8 > systems.permit_at)
                                       THEN ?6 ELSE systems.requires_permit END,
                permit_at = CASE WHEN ?6 IS NOT NULL AND (systems.permit_at IS NULL OR ?8 > systems.permit_at)
                                 THEN ?8 ELSE systems.permit_at END,
                sells_tritium = CASE WHEN ?7 IS NOT NULL AND (systems.tritium_at IS NULL OR ?8 > systems.tritium_at)
                                     THEN ?7 ELSE systems.sells_tritium END,
                tritium_at = CASE WHEN ?7 IS NOT NULL AND (systems.tritium_at IS NULL OR ?8 > systems.tritium_at)
                                  THEN ?8 ELSE systems.tritium_at END,
                updated_at = MAX(systems.updated_at, ?8),
                revision = systems.revision + 1
            WHERE ?8 > systems.updated_at
               OR (?2 IS NOT NULL AND (systems.name_at IS NULL OR ?8 > systems.name_at))
               OR (?3 IS NOT NULL AND (systems.coords_at IS NULL OR ?8 > systems.coords_at))
               OR (?6 IS NOT NULL AND (systems.permit_at IS NULL OR ?8 > systems.permit_at))
               OR (?7 IS NOT NULL AND (systems.tritium_at IS NULL OR ?8 > systems.tritium_at))
            RETURNING revision
            "#,
        )
        .bind(to_row_id(address))
        .bind(patch.name.as_deref())
        .bind(patch.coords.map(|c| c.x))
        .bind(patch.coords.map(|c| c.y))
        .bind(patch.coords.map(|c| c.z))
        .bind(patch.requires_permit)
        .bind(patch.sells_tritium)
        .bind(timestamp.timestamp_micros())
        .bind(UNKNOWN_SENTINEL)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(match written {
            None => UpsertOutcome::Stale,
            Some((0,)) => UpsertOutcome::Inserted,
            Some(_) => UpsertOutcome::Updated,
        })
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
        let (min, max) = bounding_box(&center, radius + BOX_SLACK);

        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM systems_rtree r JOIN systems s ON s.id64 = r.id \
             WHERE r.max_x >= ?1 AND r.min_x <= ?2 \
               AND r.max_y >= ?3 AND r.min_y <= ?4 \
               AND r.max_z >= ?5 AND r.min_z <= ?6"
        );
        let rows: Vec<SystemRow> = sqlx::query_as(&sql)
            .bind(min.x)
            .bind(max.x)
            .bind(min.y)
            .bind(max.y)
            .bind(min.z)
            .bind(max.z)
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let system = System::try_from(row)?;
            if exclude_unknown && system.coords.is_none() {
                continue;
            }
            if distance(&encode_position(system.coords), &center) <= radius {
                found.push(system);
            }
        }
        Ok(found)
    }

    async fn by_identity(&self, address: SystemAddress) -> Result<Option<System>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM systems s WHERE s.id64 = ?1");
        let row: Option<SystemRow> = sqlx::query_as(&sql)
            .bind(to_row_id(address))
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        row.map(System::try_from).transpose()
    }

    async fn by_name(&self, name: &str) -> Result<Option<System>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM systems s WHERE s.name = ?1 ORDER BY s.id64 LIMIT 1"
        );
        let row: Option<SystemRow> = sqlx::query_as(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        row.map(System::try_from).transpose()
    }
}
