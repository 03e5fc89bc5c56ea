//! Event sinks.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use log::warn;
use tokio::sync::{mpsc, Mutex};

use crate::errors::SinkError;
use crate::models::Payload;

/// Destination for relayed events.
///
/// Implementations may be in-memory queues, message brokers or anything
/// else that accepts events one at a time.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Unique name within a relay; used in metrics and errors.
    fn name(&self) -> &str;

    async fn publish(&self, event: &Payload) -> Result<(), SinkError>;

    /// Release resources. Default implementation does nothing.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Bounded in-process queue.
///
/// `publish` waits for free capacity, so a full queue slows the relay down
/// under the block policy. Closing drops the sender: queued events can still
/// be received, after which `recv` returns `None`.
pub struct InMemorySink {
    name: String,
    tx: std::sync::Mutex<Option<mpsc::Sender<Payload>>>,
    rx: Mutex<mpsc::Receiver<Payload>>,
    queued: AtomicUsize,
}

impl InMemorySink {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name: name.into(),
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            queued: AtomicUsize::new(0),
        }
    }

    /// Next queued event; `None` once closed and drained.
    pub async fn recv(&self) -> Option<Payload> {
        let event = self.rx.lock().await.recv().await;
        if event.is_some() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        event
    }

    pub fn try_recv(&self) -> Option<Payload> {
        let event = self.rx.try_lock().ok()?.try_recv().ok();
        if event.is_some() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        event
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    fn sender(&self) -> Option<mpsc::Sender<Payload>> {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| {
                warn!("In-memory sink lock was poisoned, recovering");
                poisoned.into_inner()
            })
            .clone()
    }
}

#[async_trait]
impl EventSink for InMemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, event: &Payload) -> Result<(), SinkError> {
        let tx = self
            .sender()
            .ok_or_else(|| SinkError::new(format!("sink '{}' is closed", self.name)))?;
        self.queued.fetch_add(1, Ordering::SeqCst);
        tx.send(event.clone()).await.map_err(|_| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            SinkError::new(format!("sink '{}' receiver dropped", self.name))
        })
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_sink_queues_in_order() {
        let sink = InMemorySink::new("memory", 4);
        sink.publish(&json!(1)).await.unwrap();
        sink.publish(&json!(2)).await.unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.recv().await, Some(json!(1)));
        assert_eq!(sink.try_recv(), Some(json!(2)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_closed_sink_rejects_publish() {
        let sink = InMemorySink::new("memory", 4);
        sink.publish(&json!(1)).await.unwrap();
        sink.close().await.unwrap();
        assert!(sink.is_closed());
        assert!(sink.publish(&json!(2)).await.is_err());
        assert_eq!(sink.recv().await, Some(json!(1)));
        assert_eq!(sink.recv().await, None);
    }
}
