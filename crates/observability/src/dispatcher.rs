// Batch Dispatcher Trait
//
// Defines the interface between the batch-ingestion adapter and whatever
// delivers events to the backend. Enqueue is synchronous and infallible so it
// can be called from trace completion; flush and shutdown are async.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::ingestion::IngestionEvent;

/// Receives ingestion events and delivers them in batches
#[async_trait]
pub trait BatchDispatcher: Send + Sync {
    /// Get the name of this dispatcher (for logging)
    fn name(&self) -> &'static str;

    /// Queue an event for delivery
    fn enqueue(&self, event: IngestionEvent);

    /// Deliver everything queued so far
    async fn flush(&self) -> Result<(), ObservabilityError>;

    /// Shutdown the dispatcher gracefully
    async fn shutdown(&self) -> Result<(), ObservabilityError> {
        self.flush().await
    }
}

/// Errors that can occur during observability operations
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend not enabled")]
    NotEnabled,
}

/// A no-op dispatcher for when observability is disabled
pub struct NoopDispatcher;

#[async_trait]
impl BatchDispatcher for NoopDispatcher {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn enqueue(&self, _event: IngestionEvent) {}

    async fn flush(&self) -> Result<(), ObservabilityError> {
        Ok(())
    }
}

/// Dispatcher that keeps events in memory; flush moves them to `flushed`
#[derive(Default)]
pub struct InMemoryDispatcher {
    pending: Mutex<Vec<IngestionEvent>>,
    flushed: Mutex<Vec<IngestionEvent>>,
}

impl InMemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events queued and not yet flushed
    pub fn pending(&self) -> Vec<IngestionEvent> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Events delivered by previous flushes
    pub fn flushed(&self) -> Vec<IngestionEvent> {
        self.flushed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl BatchDispatcher for InMemoryDispatcher {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn enqueue(&self, event: IngestionEvent) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    async fn flush(&self) -> Result<(), ObservabilityError> {
        let items = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        self.flushed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(items);
        Ok(())
    }
}
