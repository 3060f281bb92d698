// Ingestion Client
//
// HTTP BatchDispatcher for the Langfuse ingestion API. Events are queued
// synchronously; a background loop flushes them every flush interval or as
// soon as the queue reaches the maximum batch size.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::IngestionConfig;
use crate::dispatcher::{BatchDispatcher, ObservabilityError};
use crate::ingestion::IngestionEvent;

/// Batch request to the ingestion API
#[derive(Debug, Clone, Serialize)]
struct IngestionBatch {
    batch: Vec<BatchItem>,
    metadata: Option<BatchMetadata>,
}

#[derive(Debug, Clone, Serialize)]
struct BatchItem {
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: IngestionEvent,
}

#[derive(Debug, Clone, Serialize)]
struct BatchMetadata {
    sdk_name: String,
    sdk_version: String,
    public_key: String,
}

/// Response from the ingestion API
#[derive(Debug, Clone, Deserialize)]
struct IngestionResponse {
    #[serde(default)]
    successes: Vec<SuccessItem>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
struct SuccessItem {
    id: String,
    status: i32,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorItem {
    id: String,
    status: i32,
    message: Option<String>,
    error: Option<String>,
}

struct Inner {
    config: IngestionConfig,
    client: Client,
    batch: Mutex<Vec<BatchItem>>,
    batch_full: Notify,
    closed: AtomicBool,
}

/// HTTP ingestion dispatcher
#[derive(Clone)]
pub struct IngestionClient {
    inner: Arc<Inner>,
}

impl IngestionClient {
    /// Create a new client from configuration
    pub fn new(config: IngestionConfig) -> Result<Self, ObservabilityError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ObservabilityError::Config(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                batch: Mutex::new(Vec::new()),
                batch_full: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Create from environment configuration
    pub fn from_env() -> Result<Option<Self>, ObservabilityError> {
        match IngestionConfig::from_env() {
            Some(config) => Ok(Some(Self::new(config)?)),
            None => Ok(None),
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.inner.config
    }

    /// Number of queued events
    pub fn pending(&self) -> usize {
        self.lock_batch().len()
    }

    fn lock_batch(&self) -> std::sync::MutexGuard<'_, Vec<BatchItem>> {
        self.inner.batch.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the background flush loop
    ///
    /// Must be called from within a Tokio runtime. The loop exits after
    /// `shutdown`.
    pub fn spawn_flush_loop(&self) -> JoinHandle<()> {
        let client = self.clone();
        let interval = self.inner.config.flush_interval();

        tokio::spawn(async move {
            debug!(interval_ms = interval.as_millis() as u64, "Ingestion flush loop started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = client.inner.batch_full.notified() => {}
                }

                if client.inner.closed.load(Ordering::Acquire) {
                    break;
                }

                if let Err(e) = client.flush().await {
                    warn!(error = %e, "Failed to flush ingestion batch");
                }
            }
            debug!("Ingestion flush loop stopped");
        })
    }

    /// Send the batch to the ingestion API
    async fn send_batch(&self, items: Vec<BatchItem>) -> Result<(), ObservabilityError> {
        if items.is_empty() {
            return Ok(());
        }

        let config = &self.inner.config;
        let batch = IngestionBatch {
            batch: items,
            metadata: Some(BatchMetadata {
                sdk_name: "lineage-observability".to_string(),
                sdk_version: env!("CARGO_PKG_VERSION").to_string(),
                public_key: config.public_key.clone(),
            }),
        };

        let url = config.ingestion_url();

        debug!(url = %url, batch_size = batch.batch.len(), "Sending ingestion batch");

        let response = self
            .inner
            .client
            .post(&url)
            .header("Authorization", config.auth_header())
            .header("Content-Type", "application/json")
            .json(&batch)
            .send()
            .await
            .map_err(|e| ObservabilityError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, body = %body, "Ingestion request failed");
            return Err(ObservabilityError::Export(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let result: IngestionResponse = response
            .json()
            .await
            .map_err(|e| ObservabilityError::Serialization(e.to_string()))?;

        for err in &result.errors {
            warn!(
                id = %err.id,
                status = err.status,
                message = ?err.message,
                error = ?err.error,
                "Ingestion item rejected"
            );
        }

        debug!(
            successes = result.successes.len(),
            errors = result.errors.len(),
            "Ingestion batch sent"
        );

        Ok(())
    }
}

#[async_trait]
impl BatchDispatcher for IngestionClient {
    fn name(&self) -> &'static str {
        "langfuse-ingestion"
    }

    fn enqueue(&self, event: IngestionEvent) {
        let item = BatchItem {
            id: uuid::Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            event,
        };

        let should_flush = {
            let mut batch = self.lock_batch();
            batch.push(item);
            batch.len() >= self.inner.config.max_batch_size
        };

        if should_flush {
            self.inner.batch_full.notify_one();
        }
    }

    async fn flush(&self) -> Result<(), ObservabilityError> {
        let items = std::mem::take(&mut *self.lock_batch());

        if items.is_empty() {
            return Ok(());
        }

        info!(batch_size = items.len(), "Flushing ingestion batch");
        self.send_batch(items).await
    }

    async fn shutdown(&self) -> Result<(), ObservabilityError> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.batch_full.notify_one();
        self.flush().await?;
        info!("Ingestion client shutdown complete");
        Ok(())
    }
}
