use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::entity::mail_queue;
use crate::error::{MailQueueError, Result};

/// Default bound on a single storage statement.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Input for [`MailQueueRepository::insert`].
#[derive(Debug, Clone, Default)]
pub struct NewMailQueueItem {
    pub insert_fingerprint: Option<String>,
    pub article_id: Option<i64>,
    pub sender: Option<String>,
    pub recipient: String,
    pub raw_message: Vec<u8>,
    /// Earliest first attempt; `None` means deliver as soon as possible.
    pub due_time: Option<DateTime<Utc>>,
}

impl NewMailQueueItem {
    pub fn new(recipient: impl Into<String>, raw_message: Vec<u8>) -> Self {
        Self {
            recipient: recipient.into(),
            raw_message,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.recipient.trim().is_empty() {
            return Err(MailQueueError::MalformedInput(
                "recipient must not be empty".into(),
            ));
        }
        if self.recipient.chars().any(char::is_control) {
            return Err(MailQueueError::MalformedInput(
                "recipient contains control characters".into(),
            ));
        }
        if self.raw_message.is_empty() {
            return Err(MailQueueError::MalformedInput(
                "raw message must not be empty".into(),
            ));
        }
        if self
            .insert_fingerprint
            .as_deref()
            .is_some_and(|fp| fp.trim().is_empty())
        {
            return Err(MailQueueError::MalformedInput(
                "insert fingerprint must not be blank".into(),
            ));
        }
        Ok(())
    }
}

/// Result of deleting a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    Deleted,
    /// The row was already gone. Benign.
    NotFound,
}

/// Data access for the `mail_queue` table.
///
/// Every public method issues exactly one statement and relies on the
/// storage engine's single-row atomicity; nothing here holds a lock across
/// calls. Each statement is bounded by the statement timeout or, when set,
/// an absolute deadline. A call that runs out of time returns
/// [`MailQueueError::Timeout`] and its statement is abandoned whole.
pub struct MailQueueRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl<'a, C: ConnectionTrait> MailQueueRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self {
            conn,
            timeout: DEFAULT_STATEMENT_TIMEOUT,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bound every subsequent call by an absolute deadline as well.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    async fn bounded<T, F>(&self, statement: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, DbErr>>,
    {
        let started = Instant::now();
        let by_timeout = started + self.timeout;
        let deadline = match self.deadline {
            Some(deadline) => deadline.min(by_timeout),
            None => by_timeout,
        };

        match tokio::time::timeout_at(deadline, statement).await {
            Ok(result) => result.map_err(MailQueueError::from),
            Err(_) => Err(MailQueueError::Timeout(
                deadline.saturating_duration_since(started),
            )),
        }
    }

    /// Persist a new item with `attempts = 0` and `create_time = now`.
    ///
    /// Returns the assigned id, or [`MailQueueError::DuplicateKey`] when the
    /// fingerprint or article id is already queued.
    pub async fn insert(&self, item: NewMailQueueItem) -> Result<i64> {
        item.validate()?;

        let fingerprint = item.insert_fingerprint.clone();
        let article_id = item.article_id;

        let model = mail_queue::ActiveModel {
            insert_fingerprint: Set(item.insert_fingerprint),
            article_id: Set(item.article_id),
            attempts: Set(0),
            sender: Set(item.sender),
            recipient: Set(item.recipient),
            raw_message: Set(item.raw_message),
            due_time: Set(item.due_time),
            last_smtp_code: Set(None),
            last_smtp_message: Set(None),
            create_time: Set(Utc::now()),
            ..Default::default()
        };

        let outcome = self
            .bounded(async {
                Ok::<_, DbErr>(mail_queue::Entity::insert(model).exec(self.conn).await)
            })
            .await?;

        match outcome {
            Ok(inserted) => {
                debug!(id = inserted.last_insert_id, "Queued mail item");
                Ok(inserted.last_insert_id)
            }
            Err(e) => match MailQueueError::from_insert(e) {
                MailQueueError::DuplicateKey => {
                    info!(
                        fingerprint = ?fingerprint,
                        article_id = ?article_id,
                        "Mail item already queued"
                    );
                    Err(MailQueueError::DuplicateKey)
                }
                other => {
                    error!(error = %other, "Failed to insert mail queue item");
                    Err(other)
                }
            },
        }
    }

    /// Ready items (`due_time` unset or past), oldest first.
    pub async fn get_pending(&self, limit: u64) -> Result<Vec<mail_queue::Model>> {
        self.get_pending_at(Utc::now(), limit).await
    }

    /// [`get_pending`](Self::get_pending) evaluated at an explicit instant.
    ///
    /// A plain read: two callers may see the same rows. Use
    /// [`claim`](Self::claim) before delivering when more than one worker runs.
    pub async fn get_pending_at(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<mail_queue::Model>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.bounded(
            mail_queue::Entity::find()
                .filter(ready_at(now))
                .order_by_asc(mail_queue::Column::CreateTime)
                .order_by_asc(mail_queue::Column::Id)
                .limit(limit)
                .all(self.conn),
        )
        .await
    }

    /// Ready items that still have retry budget left (`attempts < max_attempts`).
    ///
    /// Quarantined rows stay ready indefinitely and are excluded here.
    pub async fn get_deliverable(
        &self,
        max_attempts: i32,
        limit: u64,
    ) -> Result<Vec<mail_queue::Model>> {
        self.get_deliverable_at(Utc::now(), max_attempts, limit)
            .await
    }

    pub async fn get_deliverable_at(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: u64,
    ) -> Result<Vec<mail_queue::Model>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.bounded(
            mail_queue::Entity::find()
                .filter(ready_at(now))
                .filter(mail_queue::Column::Attempts.lt(max_attempts))
                .order_by_asc(mail_queue::Column::CreateTime)
                .order_by_asc(mail_queue::Column::Id)
                .limit(limit)
                .all(self.conn),
        )
        .await
    }

    /// Try to take a lease on a ready item by pushing its due time to
    /// `now + lease`. Only one concurrent caller can win; the loser sees
    /// `false`. An expired lease makes the item ready again.
    ///
    /// A zero lease would leave the row ready and let every caller win, so
    /// it is rejected as [`MailQueueError::MalformedInput`].
    pub async fn claim(&self, id: i64, lease: Duration) -> Result<bool> {
        self.claim_at(id, Utc::now(), lease).await
    }

    pub async fn claim_at(&self, id: i64, now: DateTime<Utc>, lease: Duration) -> Result<bool> {
        if lease.is_zero() {
            return Err(MailQueueError::MalformedInput(
                "lease must be longer than zero".into(),
            ));
        }
        let lease = chrono::Duration::from_std(lease)
            .map_err(|_| MailQueueError::MalformedInput("lease is out of range".into()))?;
        let leased_until = now + lease;

        let result = self
            .bounded(
                mail_queue::Entity::update_many()
                    .col_expr(mail_queue::Column::DueTime, Expr::value(leased_until))
                    .filter(mail_queue::Column::Id.eq(id))
                    .filter(ready_at(now))
                    .exec(self.conn),
            )
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Record a delivery attempt: `attempts += 1` plus the diagnostics and
    /// the caller-computed next due time, in one statement.
    pub async fn update_attempts(
        &self,
        id: i64,
        smtp_code: Option<i32>,
        smtp_message: Option<String>,
        next_due_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = self
            .bounded(
                mail_queue::Entity::update_many()
                    .col_expr(mail_queue::Column::Attempts, attempts_plus_one())
                    .col_expr(mail_queue::Column::LastSmtpCode, Expr::value(smtp_code))
                    .col_expr(
                        mail_queue::Column::LastSmtpMessage,
                        Expr::value(smtp_message),
                    )
                    .col_expr(mail_queue::Column::DueTime, Expr::value(next_due_time))
                    .filter(mail_queue::Column::Id.eq(id))
                    .exec(self.conn),
            )
            .await?;

        if result.rows_affected == 0 {
            return Err(MailQueueError::NotFound(id));
        }

        debug!(id, smtp_code = ?smtp_code, next_due_time = ?next_due_time, "Recorded delivery attempt");
        Ok(())
    }

    /// Remove an item after confirmed delivery.
    pub async fn delete(&self, id: i64) -> Result<DeleteResult> {
        let result = self
            .bounded(mail_queue::Entity::delete_by_id(id).exec(self.conn))
            .await?;

        if result.rows_affected > 0 {
            Ok(DeleteResult::Deleted)
        } else {
            Ok(DeleteResult::NotFound)
        }
    }

    /// Items whose attempts reached `max_attempts`, oldest first. Read-only.
    pub async fn get_failed(
        &self,
        max_attempts: i32,
        limit: u64,
    ) -> Result<Vec<mail_queue::Model>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.bounded(
            mail_queue::Entity::find()
                .filter(mail_queue::Column::Attempts.gte(max_attempts))
                .order_by_asc(mail_queue::Column::CreateTime)
                .order_by_asc(mail_queue::Column::Id)
                .limit(limit)
                .all(self.conn),
        )
        .await
    }

    /// Delete quarantined items (`attempts >= max_attempts`) created before
    /// `cutoff`. Returns the number of rows removed.
    pub async fn purge_failed_before(
        &self,
        max_attempts: i32,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = self
            .bounded(
                mail_queue::Entity::delete_many()
                    .filter(mail_queue::Column::Attempts.gte(max_attempts))
                    .filter(mail_queue::Column::CreateTime.lt(cutoff))
                    .exec(self.conn),
            )
            .await?;

        if result.rows_affected > 0 {
            info!(
                count = result.rows_affected,
                cutoff = %cutoff,
                "Purged quarantined mail items"
            );
        }
        Ok(result.rows_affected)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<mail_queue::Model>> {
        self.bounded(mail_queue::Entity::find_by_id(id).one(self.conn))
            .await
    }

    /// Number of items ready now.
    pub async fn count_pending(&self) -> Result<u64> {
        self.count_pending_at(Utc::now()).await
    }

    /// Number of items ready at `now`.
    pub async fn count_pending_at(&self, now: DateTime<Utc>) -> Result<u64> {
        self.bounded(
            mail_queue::Entity::find()
                .filter(ready_at(now))
                .count(self.conn),
        )
        .await
    }
}

fn attempts_plus_one() -> Expr {
    use sea_orm::sea_query::ExprTrait;
    Expr::col(mail_queue::Column::Attempts).add(1)
}

fn ready_at(now: DateTime<Utc>) -> Condition {
    Condition::any()
        .add(mail_queue::Column::DueTime.is_null())
        .add(mail_queue::Column::DueTime.lte(now))
}
