//! # Operation Queue Repository
//!
//! Manages the durable outbox of operations awaiting cloud delivery.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., register employee while offline)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT INTO operation_queue (type, endpoint, method, payload, ...)    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            QUEUE RECONCILER (periodic, beacon-sync)             │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT pending entries due for delivery (FIFO)             │   │
//! │  │  2. Replay each against the cloud with live credentials        │   │
//! │  │  3. 2xx → mark_completed                                       │   │
//! │  │     error → mark_failed (backoff or terminal)                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • enqueue never touches the network                                   │
//! │  • Offline? Entries queue up harmlessly                                │
//! │  • Completed/failed rows stay forever (audit trail)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No automatic dedup: callers construct idempotent payloads (natural keys),
//! since the same logical operation may be enqueued twice under concurrent
//! local writes.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use beacon_core::backoff;
use beacon_core::{HttpMethod, OperationType, QueueEntry, QueueStatus, DEFAULT_MAX_RETRIES};

const SELECT_COLUMNS: &str = "id, operation_type, endpoint, http_method, payload, \
     extra_headers, status, retry_count, max_retries, last_error, \
     created_at, updated_at, completed_at, next_retry_at";

/// Repository for operation queue rows.
#[derive(Debug, Clone)]
pub struct OperationQueueRepository {
    pool: SqlitePool,
}

impl OperationQueueRepository {
    /// Creates a new OperationQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OperationQueueRepository { pool }
    }

    /// Queues an operation for eventual cloud delivery.
    ///
    /// Always succeeds if the store is writable; never blocks on the network.
    pub async fn enqueue(
        &self,
        operation_type: OperationType,
        endpoint: &str,
        http_method: HttpMethod,
        payload: &serde_json::Value,
        extra_headers: &HashMap<String, String>,
    ) -> DbResult<QueueEntry> {
        let now = Utc::now();

        let entry = QueueEntry {
            id: Uuid::new_v4().to_string(),
            operation_type,
            endpoint: endpoint.to_string(),
            http_method,
            payload: payload.to_string(),
            extra_headers: serde_json::to_string(extra_headers)
                .map_err(|e| DbError::Internal(e.to_string()))?,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            next_retry_at: None,
        };

        debug!(
            operation_type = %entry.operation_type,
            endpoint = %entry.endpoint,
            "Enqueuing operation"
        );

        sqlx::query(
            r#"
            INSERT INTO operation_queue (
                id, operation_type, endpoint, http_method, payload,
                extra_headers, status, retry_count, max_retries, last_error,
                created_at, updated_at, completed_at, next_retry_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.operation_type)
        .bind(&entry.endpoint)
        .bind(entry.http_method)
        .bind(&entry.payload)
        .bind(&entry.extra_headers)
        .bind(entry.status)
        .bind(entry.retry_count)
        .bind(entry.max_retries)
        .bind(&entry.last_error)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(entry.completed_at)
        .bind(entry.next_retry_at)
        .execute(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Gets pending entries eligible for delivery right now.
    ///
    /// Returns entries with `status = pending` whose backoff window (if any)
    /// has elapsed, ordered by `created_at` ascending: FIFO fairness, the
    /// oldest starved operation goes first.
    pub async fn fetch_pending(&self, limit: u32) -> DbResult<Vec<QueueEntry>> {
        let now = Utc::now();

        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM operation_queue
            WHERE status = 'pending'
              AND (next_retry_at IS NULL OR next_retry_at <= ?1)
            ORDER BY created_at ASC
            LIMIT ?2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Fetches a single entry by ID.
    pub async fn get(&self, id: &str) -> DbResult<QueueEntry> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT {SELECT_COLUMNS} FROM operation_queue WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("QueueEntry", id))
    }

    /// Marks an entry as picked up by the reconciler (pending → processing).
    pub async fn mark_processing(&self, id: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE operation_queue
            SET status = 'processing', updated_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Marks an entry as successfully delivered.
    ///
    /// Idempotent: a second call matches zero rows, so `completed_at` is
    /// stamped exactly once. Terminal rows are never resurrected.
    pub async fn mark_completed(&self, id: &str) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE operation_queue
            SET status = 'completed', completed_at = ?2, updated_at = ?2
            WHERE id = ?1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a delivery failure.
    ///
    /// Increments `retry_count`; once it reaches `max_retries` the entry
    /// becomes terminal `failed`. Otherwise it returns to `pending` with
    /// `next_retry_at = now + 2^retry_count minutes`.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        let entry = self.get(id).await?;

        if entry.is_terminal() {
            // Terminal rows are immutable history
            warn!(id = %id, status = ?entry.status, "Ignoring mark_failed on terminal entry");
            return Ok(());
        }

        let now = Utc::now();
        let retry_count = entry.retry_count + 1;

        if retry_count >= entry.max_retries {
            debug!(id = %id, retry_count, "Entry exhausted retries, marking failed");
            sqlx::query(
                r#"
                UPDATE operation_queue
                SET status = 'failed', retry_count = ?2, last_error = ?3, updated_at = ?4
                WHERE id = ?1
                "#,
            )
            .bind(id)
            .bind(retry_count)
            .bind(error)
            .bind(now)
            .execute(&self.pool)
            .await?;
        } else {
            let next_retry_at = backoff::next_retry_at(now, retry_count);
            debug!(
                id = %id,
                retry_count,
                next_retry_at = %next_retry_at,
                "Entry scheduled for retry"
            );
            sqlx::query(
                r#"
                UPDATE operation_queue
                SET status = 'pending', retry_count = ?2, last_error = ?3,
                    next_retry_at = ?4, updated_at = ?5
                WHERE id = ?1
                "#,
            )
            .bind(id)
            .bind(retry_count)
            .bind(error)
            .bind(next_retry_at)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Counts entries still awaiting delivery.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM operation_queue WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Returns rows stuck in `processing` to `pending`.
    ///
    /// A crash between mark_processing and the final outcome leaves orphans;
    /// the reconciler sweeps them back at startup. Does not touch retry_count,
    /// so a crash never counts as a delivery attempt.
    pub async fn recover_stale_processing(&self) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE operation_queue
            SET status = 'pending', updated_at = ?1
            WHERE status = 'processing'
            "#,
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Tests
// =============================================================================
