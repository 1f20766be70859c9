pub mod config;
pub mod delivery;
pub mod error;
pub mod transport;

pub use config::{WorkerAppConfig, WorkerConfig};
pub use delivery::{BatchReport, DeliveryWorker};
pub use error::{Result, WorkerError};
pub use transport::{Envelope, PickupDirTransport, Transport, TransportFailure, TransportReceipt};
