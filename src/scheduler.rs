use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::BranchError;
use crate::manager::BranchManager;

/// Interval used when the configured one is zero or negative.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Deadline for a single sweep, so a stuck cleanup cannot starve later ticks.
const TICK_TIMEOUT: Duration = Duration::from_secs(600);

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Periodic worker that deletes expired preview branches.
///
/// One loop drives all ticks, so sweeps never overlap: a tick that outlasts
/// the interval simply delays the next one. `stop` is idempotent, and both
/// stop-before-start and duplicate starts are no-ops. The sweep task is
/// isolated in its own tokio task; a panic inside it is caught by the runtime
/// and logged instead of taking down the process.
pub struct CleanupScheduler {
    manager: Arc<BranchManager>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl CleanupScheduler {
    pub fn new(manager: Arc<BranchManager>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        Self {
            manager,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    pub fn start(&self) {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            log::debug!("cleanup scheduler already running");
            return;
        }

        let (shutdown, mut signal) = watch::channel(false);
        let manager = self.manager.clone();
        let interval = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Consume the immediate first tick; the first sweep runs one full
            // interval after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => run_sweep(&manager).await,
                    _ = signal.changed() => break,
                }
            }
            log::debug!("cleanup scheduler stopped");
        });

        log::info!(
            "cleanup scheduler started (interval: {}s)",
            interval.as_secs()
        );
        *running = Some(Running { shutdown, task });
    }

    /// Signals the loop to exit after any in-flight sweep finishes. Safe to
    /// call repeatedly or before `start`.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().unwrap().take() {
            let _ = running.shutdown.send(true);
            drop(running.task);
        }
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_sweep(manager: &BranchManager) {
    match tokio::time::timeout(TICK_TIMEOUT, manager.cleanup_expired_branches()).await {
        Err(_) => log::warn!(
            "cleanup sweep exceeded {}s and was abandoned",
            TICK_TIMEOUT.as_secs()
        ),
        Ok(Err(BranchError::BranchingDisabled)) => {
            log::debug!("cleanup sweep skipped: branching is disabled");
        }
        Ok(Err(e)) => log::warn!("cleanup sweep failed: {e}"),
        Ok(Ok(report)) => {
            if !report.deleted.is_empty() || !report.failed.is_empty() {
                log::info!(
                    "cleanup sweep deleted {} branch(es), {} failure(s)",
                    report.deleted.len(),
                    report.failed.len()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::Storage;

    fn test_scheduler(interval: Duration) -> CleanupScheduler {
        let config = Config::default();
        let main_pool = config.database.create_main_pool().unwrap();
        let storage = Arc::new(Storage::new(main_pool.clone()));
        let manager = Arc::new(BranchManager::new(storage, &config, main_pool).unwrap());
        CleanupScheduler::new(manager, interval)
    }

    #[test]
    fn zero_interval_falls_back_to_hourly() {
        let scheduler = test_scheduler(Duration::ZERO);
        assert_eq!(scheduler.interval(), DEFAULT_INTERVAL);

        let scheduler = test_scheduler(Duration::from_secs(120));
        assert_eq!(scheduler.interval(), Duration::from_secs(120));
    }

    #[test]
    fn stop_before_start_is_a_noop() {
        let scheduler = test_scheduler(Duration::from_secs(60));
        assert!(!scheduler.is_running());
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let scheduler = test_scheduler(Duration::from_secs(3600));
        scheduler.start();
        assert!(scheduler.is_running());
        // A second start must not spawn a second loop.
        scheduler.start();
        assert!(scheduler.is_running());

        scheduler.stop();
        assert!(!scheduler.is_running());
        scheduler.stop();
    }
}
