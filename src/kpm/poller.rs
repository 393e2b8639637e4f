use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::manager::ModuleManager;

/// Interval between background cache refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Spawn the periodic refresh loop.
///
/// The first refresh runs immediately. The loop exits once `cancel_rx`
/// observes `true` or its sender is dropped.
pub fn spawn_refresh_loop(
    manager: ModuleManager,
    interval: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::debug!("[Poller] Refresh loop started, interval {:?}", interval);

        loop {
            if *cancel_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = manager.refresh().await {
                        log::warn!("[Poller] Periodic refresh failed: {}", e);
                    }
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        log::debug!("[Poller] Refresh loop stopped");
    })
}
