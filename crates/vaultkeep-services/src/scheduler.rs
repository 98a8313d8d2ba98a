//! Cron-driven backup trigger
//!
//! One background task keeps exactly one pending trigger. The expression
//! comes from the live config and is re-read whenever the [`ConfigStore`]
//! publishes a new one, so saving a new schedule takes effect without a
//! restart.
//!
//! [`ConfigStore`]: vaultkeep_core::ConfigStore

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use vaultkeep_core::schedule::parse_schedule_or_default;
use vaultkeep_core::BackupConfig;

/// Work triggered on every firing.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    async fn run(&self);
}

/// First firing of `schedule` strictly after `after`, evaluated in `tz`.
pub fn next_run(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|at| at.with_timezone(&Utc))
}

pub struct Scheduler {
    job: Arc<dyn ScheduledJob>,
    tz: Tz,
}

impl Scheduler {
    pub fn new(job: Arc<dyn ScheduledJob>, tz: Tz) -> Self {
        Self { job, tz }
    }

    /// Spawn the scheduling loop. It follows `config_rx` until
    /// [`SchedulerHandle::shutdown`] is called.
    pub fn start(self, config_rx: watch::Receiver<BackupConfig>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(config_rx, shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }

    async fn run(
        self,
        mut config_rx: watch::Receiver<BackupConfig>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut expression = config_rx.borrow_and_update().schedule_cron.clone();
        let mut schedule = parse_schedule_or_default(&expression);
        let mut last_fired: Option<DateTime<Utc>> = None;
        let mut config_open = true;

        tracing::info!(schedule = %expression, timezone = %self.tz, "Scheduler started");

        loop {
            let now = Utc::now();
            let from = last_fired.map_or(now, |fired| fired.max(now));
            let next = next_run(&schedule, self.tz, from);

            let wait = match next {
                Some(at) => {
                    tracing::debug!(next_run = %at.with_timezone(&self.tz), "Next scheduled backup");
                    (at - now).to_std().unwrap_or(Duration::ZERO)
                }
                None => {
                    tracing::warn!(schedule = %expression, "Schedule has no upcoming run");
                    Duration::MAX
                }
            };

            tokio::select! {
                // A due firing wins over a simultaneous reconfiguration
                biased;

                _ = &mut shutdown_rx => {
                    tracing::info!("Scheduler stopped");
                    break;
                }
                _ = tokio::time::sleep(wait), if next.is_some() => {
                    last_fired = next;
                    tracing::info!(schedule = %expression, "Scheduled backup triggered");
                    let job = self.job.clone();
                    tokio::spawn(async move { job.run().await });
                }
                changed = config_rx.changed(), if config_open => {
                    match changed {
                        Ok(()) => {
                            let updated = config_rx.borrow_and_update().schedule_cron.clone();
                            if updated != expression {
                                schedule = parse_schedule_or_default(&updated);
                                tracing::info!(old = %expression, new = %updated, "Schedule updated");
                                expression = updated;
                            }
                        }
                        Err(_) => {
                            tracing::debug!("Config publisher gone, keeping current schedule");
                            config_open = false;
                        }
                    }
                }
            }
        }
    }
}

pub struct SchedulerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop. Backups already triggered keep running.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Scheduler task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DurationRound, TimeDelta, TimeZone, Timelike};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vaultkeep_core::schedule::parse_schedule;
    use vaultkeep_core::ConfigStore;

    #[derive(Default)]
    struct CountingJob {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config_with(schedule: &str) -> BackupConfig {
        BackupConfig {
            schedule_cron: schedule.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_next_run_uses_configured_zone() {
        let schedule = parse_schedule("0 3 * * *").unwrap();
        // 20:00 in Shanghai
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let next = next_run(&schedule, chrono_tz::Asia::Shanghai, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap());

        let next = next_run(&schedule, chrono_tz::UTC, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 2, 3, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_fires_and_stops_on_shutdown() {
        let job = Arc::new(CountingJob::default());
        let (_tx, rx) = watch::channel(config_with("* * * * * *"));

        let handle = Scheduler::new(job.clone(), chrono_tz::UTC).start(rx);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.shutdown().await;

        let runs = job.runs.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected at least two firings, got {}", runs);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn test_saved_schedule_takes_effect() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_config(
            dir.path().join("backup_config.json"),
            config_with("0 0 1 1 *"),
        );
        let job = Arc::new(CountingJob::default());

        let handle = Scheduler::new(job.clone(), chrono_tz::UTC).start(store.subscribe());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);

        store.save(config_with("* * * * * *")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.shutdown().await;

        assert!(job.runs.load(Ordering::SeqCst) >= 1);
    }

    async fn sleep_until(at: DateTime<Utc>) {
        if let Ok(wait) = (at - Utc::now()).to_std() {
            tokio::time::sleep(wait).await;
        }
    }

    #[tokio::test]
    async fn test_reconfiguration_does_not_fire_twice() {
        let target = (Utc::now() + TimeDelta::seconds(3))
            .duration_trunc(TimeDelta::seconds(1))
            .unwrap();
        let daily_at_target = format!(
            "{} {} {} * * *",
            target.second(),
            target.minute(),
            target.hour()
        );
        // Same instant, written differently
        let with_year = format!("{} *", daily_at_target);

        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_config(
            dir.path().join("backup_config.json"),
            config_with(&daily_at_target),
        );
        let job = Arc::new(CountingJob::default());
        let handle = Scheduler::new(job.clone(), chrono_tz::UTC).start(store.subscribe());

        sleep_until(target - TimeDelta::milliseconds(800)).await;
        store.save(config_with(&with_year)).await.unwrap();
        sleep_until(target + TimeDelta::milliseconds(300)).await;
        store.save(config_with(&daily_at_target)).await.unwrap();
        sleep_until(target + TimeDelta::milliseconds(1500)).await;
        handle.shutdown().await;

        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_schedule_saved_by_other_process_takes_effect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup_config.json");
        let daemon = Arc::new(ConfigStore::with_config(&path, config_with("0 0 1 1 *")));
        let watcher = daemon.clone().watch_file(Duration::from_millis(50));
        let job = Arc::new(CountingJob::default());
        let handle = Scheduler::new(job.clone(), chrono_tz::UTC).start(daemon.subscribe());

        ConfigStore::load(&path)
            .save(config_with("* * * * * *"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.shutdown().await;
        watcher.abort();

        assert_eq!(daemon.current().schedule_cron, "* * * * * *");
        assert!(job.runs.load(Ordering::SeqCst) >= 1);
    }
}
