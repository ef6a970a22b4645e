//! Capture persistence and live broadcast collaborators.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};

use crate::capture::record::CaptureRecord;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture store unavailable: {0}")]
    Unavailable(String),

    #[error("capture store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable store for capture records.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    async fn create(&self, record: &CaptureRecord) -> Result<(), CaptureError>;
}

/// Delivery of events to live viewers. Fire-and-forget.
pub trait EventBroadcaster: Send + Sync {
    fn broadcast(&self, event: &str, payload: serde_json::Value);
}

/// Keeps records in memory; used by tests and when no store path is set.
#[derive(Debug, Clone, Default)]
pub struct MemoryCaptureStore {
    records: Arc<RwLock<Vec<CaptureRecord>>>,
}

impl MemoryCaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CaptureRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl CaptureStore for MemoryCaptureStore {
    async fn create(&self, record: &CaptureRecord) -> Result<(), CaptureError> {
        self.records.write().push(record.clone());
        Ok(())
    }
}

/// Appends one JSON document per line to a file.
#[derive(Debug)]
pub struct JsonLinesCaptureStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesCaptureStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl CaptureStore for JsonLinesCaptureStore {
    async fn create(&self, record: &CaptureRecord) -> Result<(), CaptureError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        // Serialize appends so concurrent workers never interleave lines.
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// An event as delivered to live subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct LiveEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

/// In-process pub/sub hub backing the admin event feed.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<LiveEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBroadcaster for EventHub {
    fn broadcast(&self, event: &str, payload: serde_json::Value) {
        // No subscribers is not an error.
        let _ = self.tx.send(LiveEvent {
            event: event.to_string(),
            payload,
        });
    }
}
