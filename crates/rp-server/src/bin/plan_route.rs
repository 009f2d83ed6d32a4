use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use rp_core::cost::{CarrierFuel, JumpCost, LinearFuel};
use rp_core::models::SystemAddress;
use rp_core::relay::{pair_routes, Donor, RelayConfig, RelayPlan};
use rp_core::search::{RouteOutcome, RoutePlan, RouteRequest, RouteSearch, DEFAULT_MAX_EXPANSIONS};
use rp_core::store::SpatialStore;
use rp_server::persistence::{init_database, SqliteStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CostModel {
    /// Fixed tritium per jump plus a per light year term
    Carrier,
    /// Cost equals distance
    Linear,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Plan a fleet carrier route between two systems", long_about = None)]
struct Args {
    /// Origin system name or address
    start: String,

    /// Destination system name or address
    end: String,

    /// Longest single jump in light years
    #[arg(long, default_value_t = 500.0)]
    max_jump_range: f64,

    /// Node expansion budget
    #[arg(long, default_value_t = DEFAULT_MAX_EXPANSIONS)]
    max_expansions: usize,

    /// Give up after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// System catalogue database
    #[arg(long, env = "RP_DB_PATH", default_value = "data/systems.db")]
    db: String,

    #[arg(long, value_enum, default_value_t = CostModel::Carrier)]
    cost: CostModel,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Origin of a second carrier to pair relay stops with
    #[arg(long, requires = "partner_end")]
    partner_start: Option<String>,

    /// Destination of the second carrier
    #[arg(long, requires = "partner_start")]
    partner_end: Option<String>,

    /// Furthest apart two stops may be and still serve as a rendezvous
    #[arg(long, default_value_t = 0.0)]
    rendezvous_range: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let db = init_database(&args.db, 1).await?;
    let store: Arc<dyn SpatialStore> = Arc::new(SqliteStore::new(&db));
    let cost: Arc<dyn JumpCost> = match args.cost {
        CostModel::Carrier => Arc::new(CarrierFuel::default()),
        CostModel::Linear => Arc::new(LinearFuel::default()),
    };
    let search = RouteSearch::new(store.clone(), cost);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }
    let mut request = RouteRequest::new(args.max_jump_range, args.max_expansions).with_cancel(cancel);
    if let Some(secs) = args.timeout_secs {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    let route = plan(&search, store.as_ref(), &args.start, &args.end, &request).await?;

    let partner = match (&args.partner_start, &args.partner_end) {
        (Some(start), Some(end)) => Some(plan(&search, store.as_ref(), start, end, &request).await?),
        _ => None,
    };
    let relay = partner.as_ref().map(|second| {
        pair_routes(
            &route,
            second,
            &RelayConfig {
                rendezvous_range: args.rendezvous_range,
            },
        )
    });

    if args.json {
        let output = serde_json::json!({
            "route": route,
            "partner": partner,
            "relay": relay,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_route(&route);
        if let (Some(second), Some(relay)) = (&partner, &relay) {
            println!();
            print_route(second);
            println!();
            print_relay(&route, second, relay);
        }
    }
    Ok(())
}

async fn resolve(store: &dyn SpatialStore, key: &str) -> Result<SystemAddress> {
    if let Some(system) = store.by_name(key).await? {
        return Ok(system.address);
    }
    if let Ok(address) = key.parse::<SystemAddress>() {
        return Ok(address);
    }
    bail!("unknown system {:?}", key)
}

async fn plan(
    search: &RouteSearch,
    store: &dyn SpatialStore,
    start: &str,
    end: &str,
    request: &RouteRequest,
) -> Result<RoutePlan> {
    let origin = resolve(store, start).await?;
    let destination = resolve(store, end).await?;
    let outcome = search
        .find_route(origin, destination, request)
        .await
        .with_context(|| format!("planning {} -> {}", start, end))?;

    match outcome {
        RouteOutcome::Found(plan) => Ok(plan),
        RouteOutcome::NoPathFound { expansions } => bail!(
            "no route from {} to {} within jump range ({} systems expanded)",
            start,
            end,
            expansions
        ),
        RouteOutcome::Aborted { reason, expansions } => bail!(
            "search from {} to {} stopped early: {:?} after {} expansions",
            start,
            end,
            reason,
            expansions
        ),
    }
}

fn print_route(plan: &RoutePlan) {
    println!(
        "{:>4}  {:<32} {:>10} {:>10} {:>12}  {}",
        "#", "System", "Jump (ly)", "Fuel", "Total fuel", "Tritium"
    );
    for (index, stop) in plan.stops.iter().enumerate() {
        println!(
            "{:>4}  {:<32} {:>10.2} {:>10.2} {:>12.2}  {}",
            index,
            stop.name,
            stop.jump_distance,
            stop.jump_cost,
            stop.cumulative_cost,
            if stop.sells_tritium { "yes" } else { "" }
        );
    }
    println!(
        "{} jumps, {:.2} ly, {:.2} fuel, {} systems expanded",
        plan.jumps, plan.total_distance, plan.total_cost, plan.expansions
    );
}

fn print_relay(first: &RoutePlan, second: &RoutePlan, relay: &RelayPlan) {
    if relay.stops.is_empty() {
        println!("No relay stops found");
    }
    for stop in &relay.stops {
        let (from, to) = match stop.donor {
            Donor::First => ("first", "second"),
            Donor::Second => ("second", "first"),
        };
        println!(
            "Relay at {} / {} (stop {} / {}), {:.2} ly apart: {} carrier hands {:.2} to the {}, saves {:.2}",
            first.stops[stop.first_index].name,
            second.stops[stop.second_index].name,
            stop.first_index,
            stop.second_index,
            stop.separation,
            from,
            stop.transferred,
            to,
            stop.capacity_saved
        );
    }
    println!(
        "Capacity needed: {:.2} + {:.2} -> {:.2} + {:.2}",
        relay.first_capacity_before,
        relay.second_capacity_before,
        relay.first_capacity_after,
        relay.second_capacity_after
    );
}
