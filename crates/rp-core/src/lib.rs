pub mod cost;
pub mod feed;
pub mod ingest;
pub mod models;
pub mod relay;
pub mod search;
pub mod spatial;
pub mod store;

pub use cost::{CarrierFuel, JumpCost, LinearFuel};
pub use feed::{decode_envelope, FeedError, FeedMessage, SYSTEM_SCHEMAS};
pub use ingest::{EnvelopeSummary, IngestArbiter, Malformed, Outcome, StatsSnapshot};
pub use models::{Coords, IngestEvent, System, SystemAddress, SystemPatch};
pub use relay::{pair_routes, required_capacity, Donor, RelayConfig, RelayPlan, RelayStop};
pub use search::{
    AbortReason, EndpointProblem, RouteOutcome, RoutePlan, RouteRequest, RouteSearch, RouteStop,
    SearchError, DEFAULT_MAX_EXPANSIONS,
};
pub use spatial::{distance, is_real_position, UNKNOWN_SENTINEL};
pub use store::{MemoryStore, SpatialStore, StoreError, UpsertOutcome};
