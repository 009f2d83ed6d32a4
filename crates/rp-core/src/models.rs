//! Core data models for the route planner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable 64-bit identity of a star system.
pub type SystemAddress = u64;

/// A measured position in light years.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coords {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Coords {
    fn from(value: [f64; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

/// A star system as held by the spatial store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub address: SystemAddress,
    pub name: String,
    /// `None` when the position has never been observed.
    pub coords: Option<Coords>,
    #[serde(default)]
    pub requires_permit: bool,
    #[serde(default)]
    pub sells_tritium: bool,
    pub updated_at: DateTime<Utc>,
}

impl System {
    /// Build a fresh record from the first accepted observation.
    pub fn from_patch(address: SystemAddress, patch: &SystemPatch, updated_at: DateTime<Utc>) -> Self {
        Self {
            address,
            name: patch.name.clone().unwrap_or_default(),
            coords: patch.coords,
            requires_permit: patch.requires_permit.unwrap_or(false),
            sells_tritium: patch.sells_tritium.unwrap_or(false),
            updated_at,
        }
    }

    /// Merge `patch` field by field: each present field is written only if
    /// `timestamp` is newer than the declared time that field was last set.
    /// `updated_at` tracks the newest declared time seen.
    ///
    /// Returns whether anything changed.
    pub fn merge(&mut self, clock: &mut FieldClock, patch: &SystemPatch, timestamp: DateTime<Utc>) -> bool {
        let mut changed = false;
        if let Some(name) = &patch.name {
            if wins(&mut clock.name, timestamp) {
                self.name = name.clone();
                changed = true;
            }
        }
        if let Some(coords) = patch.coords {
            if wins(&mut clock.coords, timestamp) {
                self.coords = Some(coords);
                changed = true;
            }
        }
        if let Some(requires_permit) = patch.requires_permit {
            if wins(&mut clock.requires_permit, timestamp) {
                self.requires_permit = requires_permit;
                changed = true;
            }
        }
        if let Some(sells_tritium) = patch.sells_tritium {
            if wins(&mut clock.sells_tritium, timestamp) {
                self.sells_tritium = sells_tritium;
                changed = true;
            }
        }
        if timestamp > self.updated_at {
            self.updated_at = timestamp;
            changed = true;
        }
        changed
    }

    /// Whether this system can take part in a route.
    pub fn is_routable(&self) -> bool {
        self.coords.is_some()
    }
}

/// Declared time each field of a [`System`] was last written. `None` means
/// the field still holds its default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldClock {
    pub name: Option<DateTime<Utc>>,
    pub coords: Option<DateTime<Utc>>,
    pub requires_permit: Option<DateTime<Utc>>,
    pub sells_tritium: Option<DateTime<Utc>>,
}

impl FieldClock {
    /// Clock of a record built from `patch` alone.
    pub fn from_patch(patch: &SystemPatch, timestamp: DateTime<Utc>) -> Self {
        let at = |present: bool| present.then_some(timestamp);
        Self {
            name: at(patch.name.is_some()),
            coords: at(patch.coords.is_some()),
            requires_permit: at(patch.requires_permit.is_some()),
            sells_tritium: at(patch.sells_tritium.is_some()),
        }
    }

    /// Clock of a record whose every field was set at `timestamp`.
    pub fn complete(timestamp: DateTime<Utc>) -> Self {
        Self {
            name: Some(timestamp),
            coords: Some(timestamp),
            requires_permit: Some(timestamp),
            sells_tritium: Some(timestamp),
        }
    }
}

fn wins(field: &mut Option<DateTime<Utc>>, timestamp: DateTime<Utc>) -> bool {
    if field.map_or(true, |set_at| timestamp > set_at) {
        *field = Some(timestamp);
        true
    } else {
        false
    }
}

/// Partial update carried by an observation. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<Coords>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_permit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sells_tritium: Option<bool>,
}

impl SystemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.coords.is_none()
            && self.requires_permit.is_none()
            && self.sells_tritium.is_none()
    }
}

/// A timestamped observation of a system from the external feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestEvent {
    pub address: Option<SystemAddress>,
    /// Generation time declared by the observer, not arrival time.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub patch: SystemPatch,
}

impl IngestEvent {
    pub fn new(address: SystemAddress, timestamp: DateTime<Utc>, patch: SystemPatch) -> Self {
        Self {
            address: Some(address),
            timestamp,
            patch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sol() -> SystemPatch {
        SystemPatch {
            name: Some("Sol".into()),
            coords: Some(Coords::new(0.0, 0.0, 0.0)),
            requires_permit: Some(true),
            sells_tritium: None,
        }
    }

    #[test]
    fn merge_keeps_fields_missing_from_patch() {
        let t0 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut system = System::from_patch(10, &sol(), t0);
        let mut clock = FieldClock::from_patch(&sol(), t0);

        let changed = system.merge(
            &mut clock,
            &SystemPatch {
                sells_tritium: Some(true),
                ..SystemPatch::default()
            },
            t1,
        );

        assert!(changed);
        assert_eq!(system.name, "Sol");
        assert_eq!(system.coords, Some(Coords::new(0.0, 0.0, 0.0)));
        assert!(system.requires_permit);
        assert!(system.sells_tritium);
        assert_eq!(system.updated_at, t1);
        assert_eq!(clock.sells_tritium, Some(t1));
        assert_eq!(clock.name, Some(t0));
    }

    #[test]
    fn older_patch_only_fills_fields_set_before_it() {
        let t0 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut system = System::from_patch(10, &sol(), t1);
        let mut clock = FieldClock::from_patch(&sol(), t1);

        let older = SystemPatch {
            name: Some("Old Sol".into()),
            sells_tritium: Some(true),
            ..SystemPatch::default()
        };
        assert!(system.merge(&mut clock, &older, t0));
        assert_eq!(system.name, "Sol");
        assert!(system.sells_tritium);
        assert_eq!(system.updated_at, t1);

        // Redelivery changes nothing.
        assert!(!system.merge(&mut clock, &older, t0));
        assert!(!system.merge(&mut clock, &sol(), t1));
    }
}
