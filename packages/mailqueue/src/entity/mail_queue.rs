use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An outbound notification email waiting for delivery.
///
/// Rows are deleted once delivery is confirmed; there is no "sent" state.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mail_queue")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Producer-supplied dedup key.
    #[sea_orm(unique)]
    pub insert_fingerprint: Option<String>,

    /// Ticket article that produced this email; at most one row per article.
    #[sea_orm(unique)]
    pub article_id: Option<i64>,

    /// Delivery attempts recorded so far. Only ever incremented.
    #[sea_orm(default_value = 0)]
    pub attempts: i32,

    /// Envelope sender. Falls back to the worker's default when absent.
    pub sender: Option<String>,

    pub recipient: String,

    /// Fully assembled message, resent byte-for-byte on every attempt.
    pub raw_message: Vec<u8>,

    /// `NULL` means eligible now, otherwise the earliest retry instant.
    pub due_time: Option<DateTimeUtc>,

    pub last_smtp_code: Option<i32>,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_smtp_message: Option<String>,

    pub create_time: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the item may be picked up at `now`.
    pub fn is_ready_at(&self, now: DateTimeUtc) -> bool {
        self.due_time.is_none_or(|due| due <= now)
    }
}
