//! Periodic ingest health report.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub async fn run_stats_loop(state: Arc<AppState>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing to report yet.
    ticker.tick().await;
    state.mark_loop_heartbeat("stats");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Stats loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat("stats");
                let stats = state.stats();
                tracing::info!(
                    processed = stats.processed,
                    applied = stats.applied,
                    rejected_stale = stats.rejected_stale,
                    rejected_malformed = stats.rejected_malformed,
                    ignored = stats.ignored,
                    undecodable = stats.undecodable,
                    "Ingest stats"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_core::store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_cancelled() {
        let state = Arc::new(AppState::new(Arc::new(MemoryStore::new())));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_stats_loop(
            state.clone(),
            Duration::from_secs(60),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(130)).await;
        assert!(state.loop_heartbeats().contains_key("stats"));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
