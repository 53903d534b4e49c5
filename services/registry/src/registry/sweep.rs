//! Periodic staleness sweep.
//!
//! A cycle that fails is logged and retried on the next tick. A cycle that
//! overruns its interval causes the missed tick to be skipped, not queued.
//! Shutdown stops new ticks; a cycle already running is allowed to finish.
use super::Registry;
use crate::observability::names;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub fn spawn_sweeper(
    registry: Registry,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the first sweep runs one interval after start.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            run_sweep_cycle(&registry).await;
        }
        tracing::debug!("sweeper stopped");
    })
}

/// Run one sweep and record its outcome. Returns the number of records marked
/// stale, or `None` when the cycle failed.
pub async fn run_sweep_cycle(registry: &Registry) -> Option<u64> {
    metrics::counter!(names::SWEEPS).increment(1);
    match registry.sweep().await {
        Ok(marked) => {
            metrics::counter!(names::MARKED_STALE).increment(marked);
            if marked > 0 {
                tracing::info!(marked, "marked stale membranes");
            }
            Some(marked)
        }
        Err(err) => {
            metrics::counter!(names::SWEEP_FAILURES).increment(1);
            tracing::warn!(error = %err, "registry sweep failed");
            None
        }
    }
}
