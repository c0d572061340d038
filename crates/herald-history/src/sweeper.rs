use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::history::EventHistory;

/// Spawn the periodic TTL sweep. Runs until `shutdown` is cancelled.
///
/// Returns `None` without spawning anything when the history has no TTL.
pub fn spawn_sweeper(
    history: Arc<EventHistory>,
    every: Duration,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    history.ttl()?;

    Some(tokio::spawn(async move {
        info!(interval_secs = every.as_secs_f64(), "history sweeper started");
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately; nothing can have expired yet
        tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let removed = history.remove_expired();
                    if removed > 0 {
                        debug!(removed, remaining = history.count(), "expired events swept from history");
                    }
                }
            }
        }
        info!("history sweeper stopped");
    }))
}
