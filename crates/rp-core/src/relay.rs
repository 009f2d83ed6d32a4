//! Relay stop pairing for two cooperating routes.
//!
//! Runs after both routes are planned. Where the routes pass through the
//! same system (or systems close enough to rendezvous), one carrier can hand
//! tritium to the other. The receiver's load resets at the rendezvous; the
//! donor carries the transferred amount from its last refuel point up to it.
//! A transfer is only worth making when the donor has slack in that stretch,
//! since fuel is never created by the exchange.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::SystemAddress;
use crate::search::RoutePlan;
use crate::spatial::distance;

const MIN_GAIN: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Intermediate stops at most this far apart may serve as a rendezvous.
    /// Zero means the routes must share the exact system.
    pub rendezvous_range: f64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            rendezvous_range: 0.0,
        }
    }
}

/// Which route hands fuel over at a relay stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Donor {
    First,
    Second,
}

/// A rendezvous between the two routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayStop {
    /// Stop index within the first route.
    pub first_index: usize,
    pub first_address: SystemAddress,
    /// Stop index within the second route.
    pub second_index: usize,
    pub second_address: SystemAddress,
    pub separation: f64,
    pub donor: Donor,
    /// Fuel handed over: the receiver's cost from here to its next refuel point.
    pub transferred: f64,
    /// Reduction of the combined capacity when this stop was chosen.
    pub capacity_saved: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayPlan {
    pub stops: Vec<RelayStop>,
    pub first_capacity_before: f64,
    pub second_capacity_before: f64,
    pub first_capacity_after: f64,
    pub second_capacity_after: f64,
}

impl RelayPlan {
    pub fn combined_before(&self) -> f64 {
        self.first_capacity_before + self.second_capacity_before
    }

    pub fn combined_after(&self) -> f64 {
        self.first_capacity_after + self.second_capacity_after
    }
}

/// Largest fuel load the route needs between two refuel points.
///
/// The origin always counts as a refuel point, as does any stop selling
/// tritium and every index in `received`.
pub fn required_capacity(plan: &RoutePlan, received: &BTreeSet<usize>) -> f64 {
    capacity(plan, &refuel_points(plan, received), &[])
}

fn refuel_points(plan: &RoutePlan, received: &BTreeSet<usize>) -> BTreeSet<usize> {
    let mut points: BTreeSet<usize> = plan
        .stops
        .iter()
        .enumerate()
        .filter(|(_, stop)| stop.sells_tritium)
        .map(|(index, _)| index)
        .collect();
    points.insert(0);
    points.extend(received.iter().copied());
    points
}

/// Fuel burnt from `start` until the next refuel point or the destination.
fn cost_to_next_refuel(plan: &RoutePlan, refuel: &BTreeSet<usize>, start: usize) -> f64 {
    let mut cost = 0.0;
    for index in start + 1..plan.stops.len() {
        cost += plan.stops[index].jump_cost;
        if refuel.contains(&index) {
            break;
        }
    }
    cost
}

/// Peak tank load: for each stretch between refuel points, the fuel burnt
/// plus whatever is handed to the other route within that stretch.
fn capacity(plan: &RoutePlan, refuel: &BTreeSet<usize>, donations: &[(usize, f64)]) -> f64 {
    let last = plan.stops.len().saturating_sub(1);
    let mut peak: f64 = 0.0;
    let mut load = 0.0;
    let mut stretch_start = 0;
    for index in 1..plan.stops.len() {
        load += plan.stops[index].jump_cost;
        if refuel.contains(&index) || index == last {
            let donated: f64 = donations
                .iter()
                .filter(|(at, _)| *at > stretch_start && *at <= index)
                .map(|(_, amount)| amount)
                .sum();
            peak = peak.max(load + donated);
            load = 0.0;
            stretch_start = index;
        }
    }
    peak
}

#[derive(Debug, Clone, Copy)]
struct Transfer {
    first_index: usize,
    second_index: usize,
    donor: Donor,
}

struct Evaluation {
    first_capacity: f64,
    second_capacity: f64,
    transferred: Vec<f64>,
}

fn evaluate(first: &RoutePlan, second: &RoutePlan, transfers: &[Transfer]) -> Evaluation {
    let first_received: BTreeSet<usize> = transfers
        .iter()
        .filter(|t| t.donor == Donor::Second)
        .map(|t| t.first_index)
        .collect();
    let second_received: BTreeSet<usize> = transfers
        .iter()
        .filter(|t| t.donor == Donor::First)
        .map(|t| t.second_index)
        .collect();
    let first_refuel = refuel_points(first, &first_received);
    let second_refuel = refuel_points(second, &second_received);

    let mut first_donations = Vec::new();
    let mut second_donations = Vec::new();
    let mut transferred = Vec::with_capacity(transfers.len());
    for transfer in transfers {
        let amount = match transfer.donor {
            Donor::First => {
                let amount = cost_to_next_refuel(second, &second_refuel, transfer.second_index);
                // A donor at a tritium seller buys the fuel on the spot.
                if !first.stops[transfer.first_index].sells_tritium {
                    first_donations.push((transfer.first_index, amount));
                }
                amount
            }
            Donor::Second => {
                let amount = cost_to_next_refuel(first, &first_refuel, transfer.first_index);
                if !second.stops[transfer.second_index].sells_tritium {
                    second_donations.push((transfer.second_index, amount));
                }
                amount
            }
        };
        transferred.push(amount);
    }

    Evaluation {
        first_capacity: capacity(first, &first_refuel, &first_donations),
        second_capacity: capacity(second, &second_refuel, &second_donations),
        transferred,
    }
}

struct Candidate {
    first_index: usize,
    second_index: usize,
    separation: f64,
}

fn candidates(first: &RoutePlan, second: &RoutePlan, config: &RelayConfig) -> Vec<Candidate> {
    let inner = |plan: &RoutePlan| 1..plan.stops.len().saturating_sub(1);
    let mut found = Vec::new();
    for i in inner(first) {
        let a = &first.stops[i];
        for j in inner(second) {
            let b = &second.stops[j];
            let separation = if a.address == b.address {
                0.0
            } else {
                distance(&a.coords, &b.coords)
            };
            if a.address == b.address || separation <= config.rendezvous_range {
                found.push(Candidate {
                    first_index: i,
                    second_index: j,
                    separation,
                });
            }
        }
    }
    found
}

/// Choose relay stops and their direction greedily by combined capacity saved.
pub fn pair_routes(first: &RoutePlan, second: &RoutePlan, config: &RelayConfig) -> RelayPlan {
    let before = evaluate(first, second, &[]);
    let mut combined = before.first_capacity + before.second_capacity;

    let mut remaining = candidates(first, second, config);
    let mut chosen: Vec<(Transfer, f64, f64)> = Vec::new();

    loop {
        let current: Vec<Transfer> = chosen.iter().map(|(t, _, _)| *t).collect();
        let mut best: Option<(usize, Donor, f64)> = None;
        for (idx, candidate) in remaining.iter().enumerate() {
            for donor in [Donor::First, Donor::Second] {
                let mut trial = current.clone();
                trial.push(Transfer {
                    first_index: candidate.first_index,
                    second_index: candidate.second_index,
                    donor,
                });
                let outcome = evaluate(first, second, &trial);
                let gain = combined - (outcome.first_capacity + outcome.second_capacity);
                if gain > MIN_GAIN && best.map_or(true, |(_, _, best_gain)| gain > best_gain) {
                    best = Some((idx, donor, gain));
                }
            }
        }

        let Some((idx, donor, gain)) = best else {
            break;
        };
        let candidate = remaining.swap_remove(idx);
        combined -= gain;
        chosen.push((
            Transfer {
                first_index: candidate.first_index,
                second_index: candidate.second_index,
                donor,
            },
            candidate.separation,
            gain,
        ));
    }

    let transfers: Vec<Transfer> = chosen.iter().map(|(t, _, _)| *t).collect();
    let after = evaluate(first, second, &transfers);

    let mut stops: Vec<RelayStop> = chosen
        .iter()
        .zip(after.transferred.iter())
        .map(|((transfer, separation, gain), amount)| RelayStop {
            first_index: transfer.first_index,
            first_address: first.stops[transfer.first_index].address,
            second_index: transfer.second_index,
            second_address: second.stops[transfer.second_index].address,
            separation: *separation,
            donor: transfer.donor,
            transferred: *amount,
            capacity_saved: *gain,
        })
        .collect();
    stops.sort_by_key(|stop| stop.first_index);
    tracing::debug!(relays = stops.len(), "Paired routes");

    RelayPlan {
        stops,
        first_capacity_before: before.first_capacity,
        second_capacity_before: before.second_capacity,
        first_capacity_after: after.first_capacity,
        second_capacity_after: after.second_capacity,
    }
}
