//! Wall-clock scheduler for the periodic backup and log export jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use portbridge_domain::schedule::{NextRun, ScheduleConfig};
use portbridge_domain::time::local_now;

use super::backup_service::BackupService;
use crate::ports::{ConfigBackup, DeviceBookkeeping, DeviceRepository, EventPublisher};

/// Longest single sleep, so wall-clock jumps are noticed.
const MAX_NAP: Duration = Duration::from_secs(60);

pub struct Scheduler<B, DR, R, E> {
    backups: Arc<BackupService<B, DR, R, E>>,
    schedule: ScheduleConfig,
}

impl<B, DR, R, E> Scheduler<B, DR, R, E>
where
    B: ConfigBackup,
    DR: DeviceRepository,
    R: DeviceBookkeeping,
    E: EventPublisher,
{
    pub fn new(backups: Arc<BackupService<B, DR, R, E>>, schedule: ScheduleConfig) -> Self {
        Self { backups, schedule }
    }

    /// Run the scheduler loop until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(&self, cancel: CancellationToken) {
        loop {
            let mut next = self.schedule.next_run(local_now());
            tracing::info!(
                at = %next.at,
                backup_config = next.backup_config,
                export_logs = next.export_logs,
                "next scheduled run"
            );
            loop {
                let now = local_now();
                if now >= next.at {
                    break;
                }
                // the clock went backwards: an earlier run may be due first
                let recomputed = self.schedule.next_run(now);
                if recomputed.at < next.at {
                    next = recomputed;
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(nap(now, next.at)) => {}
                }
            }
            self.fire(next).await;
        }
    }

    /// Run whatever `next` says is due.
    pub async fn fire(&self, next: NextRun) {
        if next.export_logs {
            let done = self.backups.run_scheduled_log_exports().await;
            tracing::info!(done, "scheduled log export finished");
        }
        if next.backup_config {
            let done = self.backups.run_scheduled_backups().await;
            tracing::info!(done, "scheduled backup finished");
        }
    }
}

fn nap(now: NaiveDateTime, until: NaiveDateTime) -> Duration {
    (until - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .min(MAX_NAP)
}
