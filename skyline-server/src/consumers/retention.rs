//! Periodic retention sweep.
//!
//! Runs `evict_expired` on every log at a fixed interval, in addition to the
//! eviction each append performs.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::AppState;

use super::ConsumerManager;

/// Run one sweep over the alarm log and every cluster log.
pub async fn sweep(state: &AppState) -> usize {
    let alarms = state.alarms.evict_expired().await;
    let clusters = state.clusters.evict_expired().await;
    let evicted = alarms + clusters;
    if evicted > 0 {
        debug!(alarms, clusters, "Retention sweep evicted records");
    }
    evicted
}

/// Shortest period the sweeper runs at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Start the sweeper on `manager`. Intervals below [`MIN_SWEEP_INTERVAL`]
/// are raised to it.
pub fn start_retention_sweeper(manager: &ConsumerManager, state: AppState, interval: Duration) {
    if interval < MIN_SWEEP_INTERVAL {
        warn!(requested = ?interval, using = ?MIN_SWEEP_INTERVAL, "Sweep interval too short");
    }
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    let shutdown = manager.shutdown_token();
    manager.spawn(run(state, interval, shutdown));
}

async fn run(state: AppState, interval: Duration, shutdown: CancellationToken) {
    info!(interval = ?interval, "Retention sweeper started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                sweep(&state).await;
            }
        }
    }
    info!("Retention sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyline_events::{EventLog, LogConfig, RecordDraft};

    #[tokio::test]
    async fn sweep_evicts_expired_alarms() {
        let mut state = AppState::new_for_testing().await.unwrap();
        state.alarms = EventLog::new(
            "alarms",
            LogConfig::default().with_retention_age(Duration::from_millis(20)),
        );
        state
            .alarms
            .append(RecordDraft::alarm("Stale").with_name("x"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sweep(&state).await, 1);
        assert!(state.alarms.is_empty().await);
    }

    #[tokio::test]
    async fn sweeper_runs_until_shutdown() {
        let mut state = AppState::new_for_testing().await.unwrap();
        state.alarms = EventLog::new(
            "alarms",
            LogConfig::default().with_retention_age(Duration::from_millis(10)),
        );
        state
            .alarms
            .append(RecordDraft::alarm("Stale").with_name("x"))
            .await
            .unwrap();

        let manager = ConsumerManager::new();
        start_retention_sweeper(&manager, state.clone(), Duration::from_millis(15));

        for _ in 0..100 {
            if state.alarms.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(state.alarms.is_empty().await);

        manager.shutdown();
        tokio::time::timeout(Duration::from_secs(1), manager.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn zero_interval_is_raised_instead_of_panicking() {
        let mut state = AppState::new_for_testing().await.unwrap();
        state.alarms = EventLog::new(
            "alarms",
            LogConfig::default().with_retention_age(Duration::from_millis(10)),
        );
        state
            .alarms
            .append(RecordDraft::alarm("Stale").with_name("x"))
            .await
            .unwrap();

        let manager = ConsumerManager::new();
        start_retention_sweeper(&manager, state.clone(), Duration::ZERO);

        for _ in 0..100 {
            if state.alarms.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(state.alarms.is_empty().await);

        manager.shutdown();
        tokio::time::timeout(Duration::from_secs(1), manager.wait_for_shutdown())
            .await
            .unwrap();
    }
}
