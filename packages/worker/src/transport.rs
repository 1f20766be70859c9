use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mailqueue::entity::mail_queue;
use thiserror::Error;

/// A queued message as handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: i64,
    pub sender: Option<String>,
    pub recipient: String,
    pub raw_message: Vec<u8>,
}

impl Envelope {
    pub fn from_item(item: &mail_queue::Model, default_sender: Option<&str>) -> Self {
        Self {
            id: item.id,
            sender: item
                .sender
                .clone()
                .or_else(|| default_sender.map(str::to_string)),
            recipient: item.recipient.clone(),
            raw_message: item.raw_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReceipt {
    pub message: String,
}

/// A rejected or failed hand-off. `code` carries the SMTP-style reply
/// code when the transport has one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("delivery failed ({code:?}): {message}")]
pub struct TransportFailure {
    pub code: Option<i32>,
    pub message: String,
}

impl TransportFailure {
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Hands a message to the next hop.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<TransportReceipt, TransportFailure>;
}

/// Writes each message to `<dir>/<id>.eml` for a local MTA to pick up.
///
/// Files are written under a temporary name and renamed into place, so the
/// MTA never sees a partial message.
#[derive(Debug, Clone)]
pub struct PickupDirTransport {
    dir: PathBuf,
}

impl PickupDirTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: i64) -> PathBuf {
        self.dir.join(format!("{id}.eml"))
    }
}

#[async_trait]
impl Transport for PickupDirTransport {
    async fn send(&self, envelope: &Envelope) -> Result<TransportReceipt, TransportFailure> {
        let io_failure = |e: std::io::Error| TransportFailure::new(None, e.to_string());

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_failure)?;

        let target = self.path_for(envelope.id);
        let staging = self.dir.join(format!(".tmp_{}.eml", envelope.id));

        tokio::fs::write(&staging, &envelope.raw_message)
            .await
            .map_err(io_failure)?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(io_failure)?;

        Ok(TransportReceipt {
            message: format!("queued as {}", target.display()),
        })
    }
}
