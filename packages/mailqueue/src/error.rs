use std::time::Duration;

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

use crate::message::MessageError;

#[derive(Debug, Error)]
pub enum MailQueueError {
    /// A row with the same insert fingerprint or article id already exists.
    /// Producers treat this as "already enqueued".
    #[error("notification already queued")]
    DuplicateKey,

    #[error("mail queue item {0} not found")]
    NotFound(i64),

    /// Rejected before reaching storage; never persisted.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("storage error: {0}")]
    Storage(#[from] DbErr),

    #[error("storage call exceeded its deadline ({0:?})")]
    Timeout(Duration),
}

impl MailQueueError {
    /// Classify an insert failure, separating unique-key collisions from
    /// other storage faults.
    pub fn from_insert(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => Self::DuplicateKey,
            _ => Self::Storage(err),
        }
    }

    /// Worth retrying at the call site.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Timeout(_))
    }
}

impl From<MessageError> for MailQueueError {
    fn from(err: MessageError) -> Self {
        Self::MalformedInput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MailQueueError>;
