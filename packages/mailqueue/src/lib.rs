pub mod database;
pub mod entity;
pub mod error;
pub mod message;
pub mod queue;
pub mod repository;

pub use error::{MailQueueError, Result};
pub use message::{BodyFormat, MessageError, ThreadedMessage, Threading};
pub use queue::{DeliveryOutcome, EnqueueOutcome, MailQueue, Notification, NotificationReceipt};
pub use repository::{DeleteResult, MailQueueRepository, NewMailQueueItem};
