//! Jump cost models.
//!
//! Edge cost must be strictly positive and strictly increasing in distance.
//! `lower_bound` feeds the A* heuristic and must never exceed the real cost
//! of any route covering the given straight-line distance.

use serde::{Deserialize, Serialize};

pub trait JumpCost: Send + Sync {
    /// Cost of a single jump of `distance` light years.
    fn jump_cost(&self, distance: f64) -> f64;

    /// Admissible estimate of the cheapest route spanning `distance` when no
    /// jump may exceed `max_jump_range`.
    fn lower_bound(&self, distance: f64, max_jump_range: f64) -> f64;
}

/// Fuel proportional to distance, no per-jump overhead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFuel {
    pub per_ly: f64,
}

impl Default for LinearFuel {
    fn default() -> Self {
        Self { per_ly: 1.0 }
    }
}

impl JumpCost for LinearFuel {
    fn jump_cost(&self, distance: f64) -> f64 {
        // Zero-length jumps still cost something so edges stay strictly positive.
        (self.per_ly * distance).max(f64::MIN_POSITIVE)
    }

    fn lower_bound(&self, distance: f64, _max_jump_range: f64) -> f64 {
        self.per_ly * distance
    }
}

/// Fleet carrier tritium model: a fixed charge per jump plus a per light year term.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarrierFuel {
    pub per_jump: f64,
    pub per_ly: f64,
}

impl Default for CarrierFuel {
    fn default() -> Self {
        Self {
            per_jump: 5.0,
            per_ly: 0.125,
        }
    }
}

impl JumpCost for CarrierFuel {
    fn jump_cost(&self, distance: f64) -> f64 {
        self.per_jump + self.per_ly * distance
    }

    fn lower_bound(&self, distance: f64, max_jump_range: f64) -> f64 {
        if distance <= 0.0 {
            return 0.0;
        }
        let min_jumps = if max_jump_range > 0.0 && max_jump_range.is_finite() {
            (distance / max_jump_range).ceil()
        } else {
            1.0
        };
        self.per_jump * min_jumps + self.per_ly * distance
    }
}
