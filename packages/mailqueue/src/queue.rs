use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{InsertFingerprint, RetryPolicy};
use sea_orm::DatabaseConnection;
use tracing::{debug, info, warn};

use crate::entity::mail_queue;
use crate::error::{MailQueueError, Result};
use crate::message::{self, BodyFormat, Threading};
use crate::repository::{
    DEFAULT_STATEMENT_TIMEOUT, DeleteResult, MailQueueRepository, NewMailQueueItem,
};

/// Result of handing a message to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(i64),
    /// A row with the same dedup key exists. Success-equivalent for producers.
    AlreadyQueued,
}

/// What happened when a worker tried to deliver an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed {
        smtp_code: Option<i32>,
        smtp_message: Option<String>,
        /// Caller-computed backoff. `None` leaves the item due immediately;
        /// workers pass `None` once the retry budget is spent.
        next_due_time: Option<DateTime<Utc>>,
    },
}

/// A notification as a producer describes it, before assembly.
#[derive(Debug, Clone, Default)]
pub struct Notification {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub format: BodyFormat,
    /// When set, a `Message-ID` is generated and threading headers added.
    pub threading: Option<Threading>,
    /// Envelope sender, if different from the transport default.
    pub sender: Option<String>,
    pub article_id: Option<i64>,
    pub fingerprint: Option<InsertFingerprint>,
}

impl Notification {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: BodyFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_threading(mut self, threading: Threading) -> Self {
        self.threading = Some(threading);
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_article_id(mut self, article_id: i64) -> Self {
        self.article_id = Some(article_id);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: InsertFingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// Returned by [`MailQueue::enqueue_notification`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationReceipt {
    pub outcome: EnqueueOutcome,
    /// Generated `Message-ID` (with brackets) for threaded notifications,
    /// so the producer can reference it in later replies.
    pub message_id: Option<String>,
}

/// Producer and worker entry points over the queue repository.
#[derive(Clone)]
pub struct MailQueue {
    db: DatabaseConnection,
    policy: RetryPolicy,
    statement_timeout: Duration,
}

impl MailQueue {
    pub fn new(db: DatabaseConnection, policy: RetryPolicy) -> Self {
        Self {
            db,
            policy,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn repository(&self) -> MailQueueRepository<'_, DatabaseConnection> {
        MailQueueRepository::new(&self.db).with_timeout(self.statement_timeout)
    }

    /// Insert an assembled message. A duplicate dedup key is reported as
    /// [`EnqueueOutcome::AlreadyQueued`], not as an error.
    pub async fn enqueue(&self, item: NewMailQueueItem) -> Result<EnqueueOutcome> {
        match self.repository().insert(item).await {
            Ok(id) => Ok(EnqueueOutcome::Queued(id)),
            Err(MailQueueError::DuplicateKey) => Ok(EnqueueOutcome::AlreadyQueued),
            Err(e) => Err(e),
        }
    }

    /// Assemble a notification and enqueue it.
    pub async fn enqueue_notification(
        &self,
        notification: Notification,
    ) -> Result<NotificationReceipt> {
        let Notification {
            from,
            to,
            subject,
            body,
            format,
            threading,
            sender,
            article_id,
            fingerprint,
        } = notification;

        let (raw_message, message_id) = match &threading {
            Some(threading) => {
                let threaded =
                    message::build_threaded_message(&from, &to, &subject, &body, threading, format)?;
                (threaded.bytes, Some(threaded.message_id))
            }
            None => (
                message::build_message_with_headers(&from, &to, &subject, &body, &[], format)?,
                None,
            ),
        };

        let outcome = self
            .enqueue(NewMailQueueItem {
                insert_fingerprint: fingerprint.map(String::from),
                article_id,
                sender,
                recipient: to,
                raw_message,
                due_time: None,
            })
            .await?;

        if let EnqueueOutcome::Queued(id) = outcome {
            info!(id, article_id = ?article_id, "Queued notification email");
        }

        Ok(NotificationReceipt {
            outcome,
            message_id,
        })
    }

    /// Fetch up to `limit` deliverable items and lease each one for `lease`.
    ///
    /// Only items this caller managed to claim are returned, so concurrent
    /// workers never hand the same item to the transport twice while a lease
    /// is live. A failed claim skips that item; the poll returns the error
    /// only when nothing was claimed.
    pub async fn poll(&self, limit: u64, lease: Duration) -> Result<Vec<mail_queue::Model>> {
        let repo = self.repository();
        let candidates = repo.get_deliverable(self.policy.max_attempts, limit).await?;

        claim_candidates(candidates, |id| repo.claim(id, lease)).await
    }

    /// Next due time after a failed attempt on `item`, per the retry policy.
    /// `None` once the attempt being recorded exhausts the budget.
    pub fn next_due_time(
        &self,
        item: &mail_queue::Model,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.policy.next_due_time(item.attempts.saturating_add(1), now)
    }

    /// Record a delivery outcome: delete on success, record the attempt on
    /// failure.
    pub async fn report_outcome(&self, id: i64, outcome: DeliveryOutcome) -> Result<()> {
        let repo = self.repository();

        match outcome {
            DeliveryOutcome::Delivered => match repo.delete(id).await? {
                DeleteResult::Deleted => {
                    debug!(id, "Removed delivered item");
                    Ok(())
                }
                DeleteResult::NotFound => {
                    debug!(id, "Delivered item was already removed");
                    Ok(())
                }
            },
            DeliveryOutcome::Failed {
                smtp_code,
                smtp_message,
                next_due_time,
            } => {
                repo.update_attempts(id, smtp_code, smtp_message, next_due_time)
                    .await
            }
        }
    }

    /// Items whose attempts reached `max_attempts`, oldest first.
    pub async fn quarantine(
        &self,
        max_attempts: i32,
        limit: u64,
    ) -> Result<Vec<mail_queue::Model>> {
        self.repository().get_failed(max_attempts, limit).await
    }
}

async fn claim_candidates<F, Fut>(
    candidates: Vec<mail_queue::Model>,
    mut claim: F,
) -> Result<Vec<mail_queue::Model>>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut claimed = Vec::with_capacity(candidates.len());
    let mut last_error = None;

    for item in candidates {
        match claim(item.id).await {
            Ok(true) => claimed.push(item),
            Ok(false) => debug!(id = item.id, "Item claimed by another worker"),
            Err(e) => {
                warn!(id = item.id, error = %e, "Failed to claim item, skipping");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if claimed.is_empty() => Err(e),
        _ => Ok(claimed),
    }
}
