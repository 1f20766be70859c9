use std::time::Duration;

use chrono::Utc;
use mailqueue::entity::mail_queue;
use mailqueue::{DeliveryOutcome, MailQueue, MailQueueError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::transport::{Envelope, Transport};

/// Counts from one pass over the queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub delivered: usize,
    /// Transport rejected the item; the attempt was recorded.
    pub failed: usize,
    /// The outcome could not be recorded. The item becomes ready again once
    /// its lease expires.
    pub skipped: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.delivered + self.failed + self.skipped
    }
}

enum Processed {
    Delivered,
    Failed,
    Skipped,
}

/// Polls the queue, hands claimed items to a [`Transport`] and records
/// the outcome of each.
pub struct DeliveryWorker<T: Transport> {
    queue: MailQueue,
    transport: T,
    config: WorkerConfig,
}

impl<T: Transport> DeliveryWorker<T> {
    pub fn new(queue: MailQueue, transport: T, config: WorkerConfig) -> Self {
        Self {
            queue,
            transport,
            config,
        }
    }

    pub fn queue(&self) -> &MailQueue {
        &self.queue
    }

    /// Claim one batch and attempt delivery of every item in it.
    ///
    /// Only a failure to poll is returned as an error. Per-item failures are
    /// logged and counted.
    pub async fn run_once(&self) -> Result<BatchReport> {
        let items = self
            .queue
            .poll(self.config.batch_size, self.config.lease())
            .await?;

        let mut report = BatchReport::default();
        for item in &items {
            match self.process(item).await {
                Processed::Delivered => report.delivered += 1,
                Processed::Failed => report.failed += 1,
                Processed::Skipped => report.skipped += 1,
            }
        }

        if report.total() > 0 {
            info!(
                worker_id = %self.config.id,
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                "Delivery batch finished"
            );
        }

        Ok(report)
    }

    async fn process(&self, item: &mail_queue::Model) -> Processed {
        let envelope = Envelope::from_item(item, self.config.default_sender.as_deref());

        let (outcome, processed) = match self.transport.send(&envelope).await {
            Ok(receipt) => {
                debug!(id = item.id, receipt = %receipt.message, "Delivered");
                (DeliveryOutcome::Delivered, Processed::Delivered)
            }
            Err(failure) => {
                let next_due_time = self.queue.next_due_time(item, Utc::now());
                let attempts = item.attempts.saturating_add(1);

                match next_due_time {
                    Some(due) => warn!(
                        id = item.id,
                        attempts,
                        smtp_code = ?failure.code,
                        error = %failure.message,
                        next_due_time = %due,
                        "Delivery failed, will retry"
                    ),
                    None => warn!(
                        id = item.id,
                        attempts,
                        smtp_code = ?failure.code,
                        error = %failure.message,
                        "Retry budget exhausted, item quarantined"
                    ),
                }

                (
                    DeliveryOutcome::Failed {
                        smtp_code: failure.code,
                        smtp_message: Some(failure.message),
                        next_due_time,
                    },
                    Processed::Failed,
                )
            }
        };

        match self.queue.report_outcome(item.id, outcome).await {
            Ok(()) => processed,
            Err(MailQueueError::NotFound(id)) => {
                warn!(id, "Item vanished before its outcome was recorded");
                Processed::Skipped
            }
            Err(e) => {
                error!(id = item.id, error = %e, "Failed to record delivery outcome");
                Processed::Skipped
            }
        }
    }

    /// Delete quarantined items older than `retention`.
    pub async fn purge_expired(&self, retention: Duration) -> Result<u64> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|_| WorkerError::InvalidSetting("retention is out of range".into()))?;
        let cutoff = Utc::now() - retention;

        let purged = self
            .queue
            .repository()
            .purge_failed_before(self.queue.policy().max_attempts, cutoff)
            .await?;

        Ok(purged)
    }

    /// Poll and purge on their configured intervals until `shutdown` flips
    /// to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_id = %self.config.id,
            poll_interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            "Starting delivery worker"
        );

        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut purge = tokio::time::interval(self.config.purge_interval());
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Delivery poll failed");
                    }
                }
                _ = purge.tick() => {
                    if let Err(e) = self.purge_expired(self.config.retention()).await {
                        error!(error = %e, "Quarantine purge failed");
                    }
                }
            }
        }

        info!(worker_id = %self.config.id, "Delivery worker stopped");
    }
}
