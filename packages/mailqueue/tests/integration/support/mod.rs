use chrono::{DateTime, Utc};
use common::DatabaseConfig;
use mailqueue::entity::mail_queue;
use mailqueue::message::build_message;
use mailqueue::NewMailQueueItem;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

/// Fresh in-memory database with the `mail_queue` schema.
pub async fn test_db() -> DatabaseConnection {
    mailqueue::database::init_db(&DatabaseConfig::default())
        .await
        .expect("Failed to initialize in-memory database")
}

/// A queue item carrying a plain-text message for `recipient`.
pub fn new_item(recipient: &str) -> NewMailQueueItem {
    let raw = build_message("helpdesk@example.com", recipient, "Ticket update", "hello")
        .expect("Failed to build test message");
    NewMailQueueItem::new(recipient, raw)
}

/// Overwrite `create_time` to simulate items enqueued at different moments.
pub async fn set_create_time(db: &DatabaseConnection, id: i64, at: DateTime<Utc>) {
    mail_queue::ActiveModel {
        id: Set(id),
        create_time: Set(at),
        ..Default::default()
    }
    .update(db)
    .await
    .expect("Failed to set create_time");
}

/// Overwrite `attempts` directly, bypassing attempt recording.
pub async fn set_attempts(db: &DatabaseConnection, id: i64, attempts: i32) {
    mail_queue::ActiveModel {
        id: Set(id),
        attempts: Set(attempts),
        ..Default::default()
    }
    .update(db)
    .await
    .expect("Failed to set attempts");
}
