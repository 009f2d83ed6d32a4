//! Long-range route search.
//!
//! A* over a graph that is never materialised: a node's neighbours are the
//! systems returned by a radius query around it, issued only when the node is
//! expanded. All search state is keyed by `SystemAddress`, so memory grows
//! with the explored region rather than with the dataset.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cost::JumpCost;
use crate::models::{Coords, System, SystemAddress};
use crate::spatial::distance;
use crate::store::{SpatialStore, StoreError};

/// Default hard cap on node expansions per search.
pub const DEFAULT_MAX_EXPANSIONS: usize = 100_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("invalid endpoint {address}: {problem}")]
    InvalidEndpoint {
        address: SystemAddress,
        problem: EndpointProblem,
    },

    #[error("invalid route request: {0}")]
    InvalidRequest(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for SearchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => SearchError::StoreUnavailable(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointProblem {
    NotFound,
    UnknownPosition,
}

impl std::fmt::Display for EndpointProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointProblem::NotFound => f.write_str("system not found"),
            EndpointProblem::UnknownPosition => f.write_str("system position is unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    ExpansionBudget,
    Cancelled,
    DeadlineExceeded,
}

/// Parameters of one search.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub max_jump_range: f64,
    pub max_expansions: usize,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
}

impl RouteRequest {
    pub fn new(max_jump_range: f64, max_expansions: usize) -> Self {
        Self {
            max_jump_range,
            max_expansions,
            deadline: None,
            cancel: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn validate(&self) -> Result<(), SearchError> {
        if !self.max_jump_range.is_finite() || self.max_jump_range <= 0.0 {
            return Err(SearchError::InvalidRequest(format!(
                "max jump range must be positive, got {}",
                self.max_jump_range
            )));
        }
        Ok(())
    }

    fn interrupted(&self) -> Option<AbortReason> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Some(AbortReason::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(AbortReason::DeadlineExceeded);
        }
        None
    }
}

/// One stop of a planned route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub address: SystemAddress,
    pub name: String,
    pub coords: Coords,
    #[serde(default)]
    pub sells_tritium: bool,
    /// Length of the jump that arrived here; zero at the origin.
    pub jump_distance: f64,
    pub jump_cost: f64,
    pub cumulative_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub stops: Vec<RouteStop>,
    pub total_cost: f64,
    pub total_distance: f64,
    pub jumps: usize,
    pub expansions: usize,
}

impl RoutePlan {
    pub fn addresses(&self) -> Vec<SystemAddress> {
        self.stops.iter().map(|stop| stop.address).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RouteOutcome {
    Found(RoutePlan),
    /// Frontier exhausted: no chain of jumps within range connects the endpoints.
    NoPathFound { expansions: usize },
    /// Stopped early; a larger budget or more time may still find a route.
    Aborted {
        reason: AbortReason,
        expansions: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    address: SystemAddress,
    g_score: FloatOrd,
    h_score: FloatOrd,
    f_score: FloatOrd,
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f_score
            .cmp(&other.f_score)
            .then_with(|| self.h_score.cmp(&other.h_score))
            .then_with(|| self.address.cmp(&other.address))
            .then_with(|| self.g_score.cmp(&other.g_score))
    }
}

#[derive(Debug, Clone, Copy)]
struct Predecessor {
    from: SystemAddress,
    jump_distance: f64,
    jump_cost: f64,
}

/// Stateless route planner; each call owns its own frontier and maps.
#[derive(Clone)]
pub struct RouteSearch {
    store: Arc<dyn SpatialStore>,
    cost: Arc<dyn JumpCost>,
}

impl RouteSearch {
    pub fn new(store: Arc<dyn SpatialStore>, cost: Arc<dyn JumpCost>) -> Self {
        Self { store, cost }
    }

    pub async fn find_route(
        &self,
        origin: SystemAddress,
        destination: SystemAddress,
        request: &RouteRequest,
    ) -> Result<RouteOutcome, SearchError> {
        request.validate()?;
        let (start, start_coords) = self.resolve_endpoint(origin).await?;
        let (goal, goal_coords) = self.resolve_endpoint(destination).await?;

        if origin == destination {
            return Ok(RouteOutcome::Found(RoutePlan {
                stops: vec![stop(&start, start_coords, 0.0, 0.0, 0.0)],
                total_cost: 0.0,
                total_distance: 0.0,
                jumps: 0,
                expansions: 0,
            }));
        }

        let range = request.max_jump_range;
        tracing::debug!(
            origin = %start.name,
            destination = %goal.name,
            range,
            direct = distance(&start_coords, &goal_coords),
            "Planning route"
        );

        let start_h = self
            .cost
            .lower_bound(distance(&start_coords, &goal_coords), range);
        let mut open_set: BinaryHeap<Reverse<OpenNode>> = BinaryHeap::new();
        open_set.push(Reverse(OpenNode {
            address: origin,
            g_score: FloatOrd(0.0),
            h_score: FloatOrd(start_h),
            f_score: FloatOrd(start_h),
        }));

        let mut closed_set: HashSet<SystemAddress> = HashSet::new();
        let mut g_score: HashMap<SystemAddress, f64> = HashMap::new();
        let mut came_from: HashMap<SystemAddress, Predecessor> = HashMap::new();
        let mut discovered: HashMap<SystemAddress, System> = HashMap::new();
        g_score.insert(origin, 0.0);
        discovered.insert(origin, start);
        let mut expansions = 0usize;

        while let Some(Reverse(current)) = open_set.pop() {
            if closed_set.contains(&current.address) {
                continue;
            }
            let best_g = g_score
                .get(&current.address)
                .copied()
                .unwrap_or(f64::INFINITY);
            if current.g_score.0 > best_g + 1e-9 {
                continue;
            }

            if current.address == destination {
                let plan = reconstruct(destination, &came_from, &discovered, &g_score, expansions);
                tracing::info!(
                    jumps = plan.jumps,
                    total_cost = plan.total_cost,
                    expansions,
                    "Route found"
                );
                return Ok(RouteOutcome::Found(plan));
            }

            if let Some(reason) = request.interrupted() {
                tracing::info!(?reason, expansions, "Route search interrupted");
                return Ok(RouteOutcome::Aborted { reason, expansions });
            }
            if expansions >= request.max_expansions {
                tracing::info!(expansions, "Route search hit expansion budget");
                return Ok(RouteOutcome::Aborted {
                    reason: AbortReason::ExpansionBudget,
                    expansions,
                });
            }
            expansions += 1;
            closed_set.insert(current.address);

            let Some(current_coords) = discovered
                .get(&current.address)
                .and_then(|system| system.coords)
            else {
                continue;
            };

            let neighbours = self.store.range_query(current_coords, range, true).await?;
            tracing::trace!(
                address = current.address,
                neighbours = neighbours.len(),
                "Expanded node"
            );

            for neighbour in neighbours {
                if neighbour.address == current.address || closed_set.contains(&neighbour.address)
                {
                    continue;
                }
                let Some(coords) = neighbour.coords else {
                    continue;
                };

                let jump_distance = distance(&current_coords, &coords);
                let jump_cost = self.cost.jump_cost(jump_distance);
                let tentative_g = best_g + jump_cost;
                let known_g = g_score
                    .get(&neighbour.address)
                    .copied()
                    .unwrap_or(f64::INFINITY);
                if tentative_g >= known_g {
                    continue;
                }

                let h_score = self.cost.lower_bound(distance(&coords, &goal_coords), range);
                came_from.insert(
                    neighbour.address,
                    Predecessor {
                        from: current.address,
                        jump_distance,
                        jump_cost,
                    },
                );
                g_score.insert(neighbour.address, tentative_g);
                open_set.push(Reverse(OpenNode {
                    address: neighbour.address,
                    g_score: FloatOrd(tentative_g),
                    h_score: FloatOrd(h_score),
                    f_score: FloatOrd(tentative_g + h_score),
                }));
                discovered.insert(neighbour.address, neighbour);
            }
        }

        tracing::info!(expansions, "No route within jump range");
        Ok(RouteOutcome::NoPathFound { expansions })
    }

    async fn resolve_endpoint(
        &self,
        address: SystemAddress,
    ) -> Result<(System, Coords), SearchError> {
        let system = self
            .store
            .by_identity(address)
            .await?
            .ok_or(SearchError::InvalidEndpoint {
                address,
                problem: EndpointProblem::NotFound,
            })?;
        let coords = system.coords.ok_or(SearchError::InvalidEndpoint {
            address,
            problem: EndpointProblem::UnknownPosition,
        })?;
        Ok((system, coords))
    }
}

fn stop(
    system: &System,
    coords: Coords,
    jump_distance: f64,
    jump_cost: f64,
    cumulative_cost: f64,
) -> RouteStop {
    RouteStop {
        address: system.address,
        name: system.name.clone(),
        coords,
        sells_tritium: system.sells_tritium,
        jump_distance,
        jump_cost,
        cumulative_cost,
    }
}

fn reconstruct(
    destination: SystemAddress,
    came_from: &HashMap<SystemAddress, Predecessor>,
    discovered: &HashMap<SystemAddress, System>,
    g_score: &HashMap<SystemAddress, f64>,
    expansions: usize,
) -> RoutePlan {
    let mut stops = Vec::new();
    let mut total_distance = 0.0;
    let mut current = Some(destination);

    while let Some(address) = current {
        let predecessor = came_from.get(&address);
        let (jump_distance, jump_cost) = predecessor
            .map(|p| (p.jump_distance, p.jump_cost))
            .unwrap_or((0.0, 0.0));
        total_distance += jump_distance;

        if let Some(system) = discovered.get(&address) {
            if let Some(coords) = system.coords {
                let cumulative = g_score.get(&address).copied().unwrap_or(0.0);
                stops.push(stop(system, coords, jump_distance, jump_cost, cumulative));
            }
        }
        current = predecessor.map(|p| p.from);
    }
    stops.reverse();

    let total_cost = stops.last().map(|s| s.cumulative_cost).unwrap_or(0.0);
    RoutePlan {
        jumps: stops.len().saturating_sub(1),
        stops,
        total_cost,
        total_distance,
        expansions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{CarrierFuel, LinearFuel};
    use crate::models::SystemPatch;
    use crate::store::{MemoryStore, UpsertOutcome};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    const A: u64 = 1;
    const B: u64 = 2;
    const C: u64 = 3;

    fn system(address: u64, name: &str, coords: Option<Coords>) -> System {
        System {
            address,
            name: name.to_string(),
            coords,
            requires_permit: false,
            sells_tritium: false,
            updated_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn at(x: f64, y: f64, z: f64) -> Option<Coords> {
        Some(Coords::new(x, y, z))
    }

    fn chain_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_systems([
            system(A, "A", at(0.0, 0.0, 0.0)),
            system(B, "B", at(400.0, 0.0, 0.0)),
            system(C, "C", at(800.0, 0.0, 0.0)),
        ]))
    }

    fn carrier_search(store: Arc<MemoryStore>) -> RouteSearch {
        RouteSearch::new(store, Arc::new(CarrierFuel::default()))
    }

    fn found(outcome: RouteOutcome) -> RoutePlan {
        match outcome {
            RouteOutcome::Found(plan) => plan,
            other => panic!("expected a route, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chain_uses_intermediate_stop_when_range_is_short() {
        let search = carrier_search(chain_store());
        let plan = found(
            search
                .find_route(A, C, &RouteRequest::new(500.0, 100))
                .await
                .unwrap(),
        );

        assert_eq!(plan.addresses(), vec![A, B, C]);
        assert_eq!(plan.jumps, 2);
        assert_eq!(plan.total_cost, 110.0);
        assert_eq!(plan.total_distance, 800.0);
        let cumulative: Vec<_> = plan.stops.iter().map(|s| s.cumulative_cost).collect();
        assert_eq!(cumulative, vec![0.0, 55.0, 110.0]);
    }

    #[tokio::test]
    async fn long_range_prefers_cheaper_direct_jump() {
        let search = carrier_search(chain_store());
        let plan = found(
            search
                .find_route(A, C, &RouteRequest::new(900.0, 100))
                .await
                .unwrap(),
        );

        // One 800 ly jump costs 105, two 400 ly jumps cost 110.
        assert_eq!(plan.addresses(), vec![A, C]);
        assert_eq!(plan.total_cost, 105.0);
    }

    #[tokio::test]
    async fn same_origin_and_destination_is_zero_length() {
        let search = carrier_search(chain_store());
        let plan = found(
            search
                .find_route(B, B, &RouteRequest::new(500.0, 1))
                .await
                .unwrap(),
        );
        assert_eq!(plan.addresses(), vec![B]);
        assert_eq!(plan.jumps, 0);
        assert_eq!(plan.total_cost, 0.0);
    }

    #[tokio::test]
    async fn single_expansion_budget_aborts() {
        let search = carrier_search(chain_store());
        let outcome = search
            .find_route(A, C, &RouteRequest::new(500.0, 1))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Aborted {
                reason: AbortReason::ExpansionBudget,
                expansions: 1
            }
        );
    }

    #[tokio::test]
    async fn isolated_systems_have_no_path() {
        let store = Arc::new(MemoryStore::with_systems([
            system(A, "A", at(0.0, 0.0, 0.0)),
            system(B, "B", at(5_000.0, 0.0, 0.0)),
        ]));
        let outcome = carrier_search(store)
            .find_route(A, B, &RouteRequest::new(500.0, 100))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::NoPathFound { expansions: 1 });
    }

    #[tokio::test]
    async fn unknown_and_missing_endpoints_are_rejected() {
        let store = Arc::new(MemoryStore::with_systems([
            system(A, "A", at(0.0, 0.0, 0.0)),
            system(B, "B", None),
        ]));
        let search = carrier_search(store);
        let request = RouteRequest::new(500.0, 100);

        assert_eq!(
            search.find_route(A, B, &request).await,
            Err(SearchError::InvalidEndpoint {
                address: B,
                problem: EndpointProblem::UnknownPosition
            })
        );
        assert_eq!(
            search.find_route(99, A, &request).await,
            Err(SearchError::InvalidEndpoint {
                address: 99,
                problem: EndpointProblem::NotFound
            })
        );
    }

    #[tokio::test]
    async fn unknown_position_systems_are_never_neighbours() {
        // The range covers the sentinel point, yet B must not be used.
        let store = Arc::new(MemoryStore::with_systems([
            system(A, "A", at(0.0, 0.0, 0.0)),
            system(B, "B", None),
            system(C, "C", at(900_000.0, 0.0, 0.0)),
        ]));
        let outcome = carrier_search(store)
            .find_route(A, C, &RouteRequest::new(1_800_000.0, 100))
            .await
            .unwrap();
        let plan = found(outcome);
        assert!(!plan.addresses().contains(&B));
    }

    #[tokio::test]
    async fn rejects_non_positive_range() {
        let search = carrier_search(chain_store());
        assert!(matches!(
            search.find_route(A, C, &RouteRequest::new(0.0, 10)).await,
            Err(SearchError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_search_aborts() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = carrier_search(chain_store())
            .find_route(A, C, &RouteRequest::new(500.0, 100).with_cancel(token))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Aborted {
                reason: AbortReason::Cancelled,
                expansions: 0
            }
        );
    }

    #[tokio::test]
    async fn elapsed_deadline_aborts() {
        let outcome = carrier_search(chain_store())
            .find_route(
                A,
                C,
                &RouteRequest::new(500.0, 100).with_timeout(Duration::ZERO),
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RouteOutcome::Aborted {
                reason: AbortReason::DeadlineExceeded,
                ..
            }
        ));
    }

    /// Brute-force cheapest simple path over the explicit jump graph.
    fn brute_force(
        systems: &[System],
        from: usize,
        to: usize,
        range: f64,
        cost: &dyn JumpCost,
    ) -> f64 {
        #[allow(clippy::too_many_arguments)]
        fn walk(
            systems: &[System],
            at: usize,
            to: usize,
            range: f64,
            cost: &dyn JumpCost,
            visited: &mut Vec<bool>,
            so_far: f64,
            best: &mut f64,
        ) {
            if at == to {
                *best = best.min(so_far);
                return;
            }
            let here = systems[at].coords.unwrap();
            for next in 0..systems.len() {
                if visited[next] {
                    continue;
                }
                let there = systems[next].coords.unwrap();
                let d = distance(&here, &there);
                if d > range {
                    continue;
                }
                visited[next] = true;
                walk(systems, next, to, range, cost, visited, so_far + cost.jump_cost(d), best);
                visited[next] = false;
            }
        }

        let mut visited = vec![false; systems.len()];
        visited[from] = true;
        let mut best = f64::INFINITY;
        walk(systems, from, to, range, cost, &mut visited, 0.0, &mut best);
        best
    }

    #[tokio::test]
    async fn matches_brute_force_optimum() {
        let systems: Vec<System> = [
            (0.0, 0.0, 0.0),
            (180.0, 40.0, 0.0),
            (220.0, -90.0, 10.0),
            (390.0, 10.0, -30.0),
            (450.0, 160.0, 0.0),
            (610.0, -40.0, 20.0),
            (700.0, 120.0, -10.0),
            (880.0, 0.0, 0.0),
        ]
        .iter()
        .enumerate()
        .map(|(i, (x, y, z))| system(i as u64 + 1, &format!("S{i}"), at(*x, *y, *z)))
        .collect();
        let store = Arc::new(MemoryStore::with_systems(systems.clone()));

        let models: Vec<Arc<dyn JumpCost>> = vec![
            Arc::new(CarrierFuel::default()),
            Arc::new(LinearFuel::default()),
        ];
        for model in models {
            for range in [250.0, 320.0, 500.0] {
                let expected = brute_force(&systems, 0, systems.len() - 1, range, model.as_ref());
                let search = RouteSearch::new(store.clone(), model.clone());
                let outcome = search
                    .find_route(1, systems.len() as u64, &RouteRequest::new(range, 1_000))
                    .await
                    .unwrap();
                if expected.is_infinite() {
                    assert!(matches!(outcome, RouteOutcome::NoPathFound { .. }));
                } else {
                    let plan = found(outcome);
                    assert!(
                        (plan.total_cost - expected).abs() < 1e-9,
                        "range {range}: got {} expected {expected}",
                        plan.total_cost
                    );
                }
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl SpatialStore for BrokenStore {
        async fn upsert(
            &self,
            _address: SystemAddress,
            _patch: &SystemPatch,
            _timestamp: DateTime<Utc>,
        ) -> crate::store::Result<UpsertOutcome> {
            Err(StoreError::Unavailable("offline".into()))
        }

        async fn range_query(
            &self,
            _center: Coords,
            _radius: f64,
            _exclude_unknown: bool,
        ) -> crate::store::Result<Vec<System>> {
            Err(StoreError::Unavailable("offline".into()))
        }

        async fn by_identity(&self, address: SystemAddress) -> crate::store::Result<Option<System>> {
            Ok(Some(system(address, "Somewhere", at(address as f64 * 100.0, 0.0, 0.0))))
        }

        async fn by_name(&self, _name: &str) -> crate::store::Result<Option<System>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn store_failure_is_not_reported_as_no_path() {
        let search = RouteSearch::new(Arc::new(BrokenStore), Arc::new(CarrierFuel::default()));
        assert_eq!(
            search.find_route(1, 9, &RouteRequest::new(500.0, 10)).await,
            Err(SearchError::StoreUnavailable("offline".into()))
        );
    }
}
