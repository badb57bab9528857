//! # Queue Reconciler
//!
//! Drains the operation queue toward the cloud, one batch at a time.
//!
//! ## Batch Algorithm
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Reconciler Batch                                  │
//! │                                                                         │
//! │  process_batch()                                                        │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  configured? ──no──► return {0, 0, 0}  (queue keeps growing harmlessly)│
//! │      │ yes                                                              │
//! │      ▼                                                                  │
//! │  fetch_pending(batch_size)                                              │
//! │      │                                                                  │
//! │      ▼  for each entry (isolation: one failure never aborts the batch) │
//! │  mark_processing                                                        │
//! │      │                                                                  │
//! │  execute stored method/endpoint/payload/headers via CloudApi           │
//! │      │                                                                  │
//! │      ├── 200/201/204  → mark_completed                                 │
//! │      └── any error    → mark_failed(message)  (backoff or terminal)    │
//! │                                                                         │
//! │  Storage errors on a single entry are logged and the batch moves on;   │
//! │  a skipped entry stays pending and is picked up next batch.            │
//! │                                                                         │
//! │  Stateless across invocations: everything lives in the queue table.    │
//! │  Driven by an external scheduler, not its own loop.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::CloudApi;
use crate::error::AgentResult;
use beacon_core::{HubCredentials, QueueEntry};
use beacon_db::OperationQueueRepository;

/// Result of one reconciler batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Entries picked up this batch.
    pub processed: u32,
    /// Entries delivered and marked completed.
    pub completed: u32,
    /// Entries whose delivery failed (retried later or terminal).
    pub failed: u32,
}

/// Replays queued operations against the cloud.
pub struct Reconciler {
    cloud: Arc<dyn CloudApi>,
    queue: OperationQueueRepository,
    credentials: HubCredentials,
    batch_size: u32,
}

impl Reconciler {
    /// Creates a reconciler. Credentials are a construction-time snapshot.
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        queue: OperationQueueRepository,
        credentials: HubCredentials,
        batch_size: u32,
    ) -> Self {
        Reconciler {
            cloud,
            queue,
            credentials,
            batch_size,
        }
    }

    /// Returns `processing` orphans (from a crash mid-batch) to `pending`.
    ///
    /// Call once at startup, before the first batch. A crash never counts
    /// as a delivery attempt.
    pub async fn recover_interrupted(&self) -> AgentResult<u64> {
        let recovered = self.queue.recover_stale_processing().await?;
        if recovered > 0 {
            info!(recovered, "Recovered interrupted queue entries");
        }
        Ok(recovered)
    }

    /// Processes up to one batch of pending entries.
    pub async fn process_batch(&self) -> AgentResult<BatchOutcome> {
        if !self.credentials.is_configured() {
            debug!("Hub not configured, skipping reconciliation");
            return Ok(BatchOutcome::default());
        }

        let entries = self.queue.fetch_pending(self.batch_size).await?;
        if entries.is_empty() {
            return Ok(BatchOutcome::default());
        }

        debug!(count = entries.len(), "Reconciling pending operations");

        let mut outcome = BatchOutcome::default();
        for entry in entries {
            outcome.processed += 1;
            if self.deliver(&entry).await {
                outcome.completed += 1;
            } else {
                outcome.failed += 1;
            }
        }

        info!(
            processed = outcome.processed,
            completed = outcome.completed,
            failed = outcome.failed,
            "Reconciler batch finished"
        );
        Ok(outcome)
    }

    /// Delivers one entry. Returns true on completion, false on any failure.
    ///
    /// Storage errors are logged and swallowed here so one entry never
    /// aborts the rest of the batch; an entry skipped this way is still
    /// pending and gets picked up again next batch.
    async fn deliver(&self, entry: &QueueEntry) -> bool {
        if let Err(e) = self.queue.mark_processing(&entry.id).await {
            error!(id = %entry.id, error = %e, "Could not mark entry processing, skipping");
            return false;
        }

        let payload = match entry.payload_json() {
            Ok(payload) => payload,
            Err(e) => {
                // Unparseable payload will never deliver; burn an attempt
                warn!(id = %entry.id, error = %e, "Queue entry has corrupt payload");
                self.record_failure(&entry.id, &format!("Corrupt payload: {}", e))
                    .await;
                return false;
            }
        };

        let result = self
            .cloud
            .execute_operation(
                entry.http_method,
                &entry.endpoint,
                &payload,
                &entry.headers_map(),
            )
            .await;

        match result {
            Ok(()) => {
                debug!(
                    id = %entry.id,
                    operation_type = %entry.operation_type,
                    "Operation delivered"
                );
                if let Err(e) = self.queue.mark_completed(&entry.id).await {
                    // Row stays processing; the startup sweep returns it to
                    // pending and the operation may be delivered again
                    error!(id = %entry.id, error = %e, "Delivered but could not mark completed");
                }
                true
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(
                        id = %entry.id,
                        operation_type = %entry.operation_type,
                        retry_count = entry.retry_count,
                        error = %e,
                        "Operation delivery failed, will back off"
                    );
                } else {
                    error!(
                        id = %entry.id,
                        operation_type = %entry.operation_type,
                        retry_count = entry.retry_count,
                        error = %e,
                        "Cloud rejected operation"
                    );
                }
                self.record_failure(&entry.id, &e.to_string()).await;
                false
            }
        }
    }

    async fn record_failure(&self, id: &str, message: &str) {
        if let Err(e) = self.queue.mark_failed(id, message).await {
            error!(id = %id, error = %e, "Could not record delivery failure");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
