//! Ingestion loop.
//!
//! Pulls envelopes off the feed, hands them to the arbiter and reconnects
//! when the relay goes away. A storage failure ends the loop with an error;
//! restarting the process is the supervisor's job.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::{Config, FeedSource};
use crate::feed::{self, EnvelopeReader, Frame};
use crate::state::AppState;

const RECONNECT_BASE_MS: u64 = 500;
const RECONNECT_MAX_SECS: u64 = 60;

/// How a single feed session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The source reached end of stream.
    Closed,
    /// The connection failed mid-read.
    Broken,
    Shutdown,
}

pub async fn run_ingest_loop(
    state: Arc<AppState>,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut backoff = Backoff::new(
        Duration::from_millis(RECONNECT_BASE_MS),
        Duration::from_secs(RECONNECT_MAX_SECS),
    );
    state.mark_loop_heartbeat("ingest");

    loop {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            connected = feed::connect(&config.feed_source, config.feed_max_line_bytes) => connected,
        };

        match connected {
            Ok(mut reader) => {
                backoff.reset();
                let end = consume(&state, &mut reader, config.feed_timeout, &shutdown).await?;
                match (end, &config.feed_source) {
                    (StreamEnd::Shutdown, _) => return Ok(()),
                    // Standard input cannot be re-opened.
                    (_, FeedSource::Stdin) => {
                        tracing::info!("Standard input ended ({:?}), ingest finished", end);
                        return Ok(());
                    }
                    _ => tracing::warn!("Feed session ended ({:?}), reconnecting", end),
                }
            }
            Err(err) => {
                tracing::warn!(
                    "Feed connect failed: {} (attempt {})",
                    err,
                    backoff.failures() + 1
                );
            }
        }

        let delay = backoff.fail();
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = sleep(delay) => {}
        }
    }
}

/// Drain one feed session.
///
/// Silence longer than `feed_timeout` is logged and waited out. Bad
/// envelopes (undecodable, not UTF-8, over the line limit) are counted and
/// skipped; only end of stream, a read error or shutdown end the session.
pub async fn consume(
    state: &AppState,
    reader: &mut EnvelopeReader,
    feed_timeout: Duration,
    shutdown: &CancellationToken,
) -> Result<StreamEnd> {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return Ok(StreamEnd::Shutdown),
            next = timeout(feed_timeout, reader.next_frame()) => next,
        };
        state.mark_loop_heartbeat("ingest");

        let line = match next {
            Err(_) => {
                tracing::warn!("No envelope received in {:?}, still waiting", feed_timeout);
                continue;
            }
            Ok(Ok(Some(Frame::Line(line)))) => line,
            Ok(Ok(Some(Frame::Oversized { length }))) => {
                tracing::warn!("Dropping {} byte envelope over the line limit", length);
                state.arbiter().record_undecodable();
                continue;
            }
            Ok(Ok(None)) => return Ok(StreamEnd::Closed),
            Ok(Err(err)) => {
                tracing::warn!("Feed read failed: {}", err);
                return Ok(StreamEnd::Broken);
            }
        };

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let summary = state
            .arbiter()
            .accept_bytes(&line)
            .await
            .context("spatial store rejected a write")?;
        if summary.applied > 0 {
            tracing::debug!(applied = summary.applied, "Envelope applied");
        }
    }
}
