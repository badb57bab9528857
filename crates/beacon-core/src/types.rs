//! # Domain Types
//!
//! Shared types for the operation queue, the remote command channel, and the
//! device credential record.
//!
//! ## Queue Entry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     QueueEntry State Machine                            │
//! │                                                                         │
//! │   enqueue                                                              │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  ┌─────────┐  picked by   ┌────────────┐  2xx   ┌───────────┐          │
//! │  │ pending │─────────────►│ processing │───────►│ completed │ terminal │
//! │  └─────────┘  reconciler  └─────┬──────┘        └───────────┘          │
//! │      ▲                          │ error                                │
//! │      │   retry_count < max      ▼                                      │
//! │      └──────────────────── mark_failed                                 │
//! │          (next_retry_at =       │ retry_count >= max                   │
//! │           now + 2^n min)        ▼                                      │
//! │                            ┌────────┐                                  │
//! │                            │ failed │  terminal                        │
//! │                            └────────┘                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Operation Queue Types
// =============================================================================

/// The kind of local mutation a queue entry carries to the cloud.
///
/// Closed enum: adding a variant is a schema-visible change, since the value
/// is stored as TEXT in the `operation_queue` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(
    feature = "sqlx",
    derive(sqlx::Type),
    sqlx(rename_all = "kebab-case")
)]
pub enum OperationType {
    UserRegister,
    UserRemove,
    UserUpdate,
    ModuleInstall,
    ModuleUninstall,
    SaleSync,
    ConfigPush,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationType::UserRegister => "user-register",
            OperationType::UserRemove => "user-remove",
            OperationType::UserUpdate => "user-update",
            OperationType::ModuleInstall => "module-install",
            OperationType::ModuleUninstall => "module-uninstall",
            OperationType::SaleSync => "sale-sync",
            OperationType::ConfigPush => "config-push",
        };
        write!(f, "{}", s)
    }
}

/// HTTP method a queued operation replays against the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[cfg_attr(
    feature = "sqlx",
    derive(sqlx::Type),
    sqlx(rename_all = "UPPERCASE")
)]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        write!(f, "{}", s)
    }
}

/// Delivery state of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(
    feature = "sqlx",
    derive(sqlx::Type),
    sqlx(rename_all = "snake_case")
)]
pub enum QueueStatus {
    /// Awaiting delivery (possibly in a backoff window).
    Pending,
    /// Currently being delivered by the reconciler.
    Processing,
    /// Delivered and acknowledged with 200/201/204. Terminal.
    Completed,
    /// Gave up after max_retries attempts. Terminal.
    Failed,
}

impl QueueStatus {
    /// Terminal entries are immutable history.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

/// A durable outbox row: one local mutation awaiting cloud delivery.
///
/// Created by any local write that needs eventual cloud visibility; mutated
/// exclusively by the reconciler; never hard-deleted (audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct QueueEntry {
    pub id: String,
    pub operation_type: OperationType,
    /// Relative URL path on the cloud, e.g. `/api/users/`.
    pub endpoint: String,
    pub http_method: HttpMethod,
    /// JSON body, stored verbatim.
    pub payload: String,
    /// JSON object of extra headers (string -> string), stored verbatim.
    pub extra_headers: String,
    pub status: QueueStatus,
    pub retry_count: i64,
    pub max_retries: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once, on the transition to `completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest time the next delivery attempt is allowed.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Whether this entry may still change state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the entry is eligible for delivery at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending
            && self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// Decodes the stored extra headers into a map.
    ///
    /// Corrupt header JSON is treated as "no extra headers" rather than
    /// poisoning delivery of the entry.
    pub fn headers_map(&self) -> HashMap<String, String> {
        serde_json::from_str(&self.extra_headers).unwrap_or_default()
    }

    /// Decodes the stored payload into a JSON value.
    pub fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

// =============================================================================
// Token Cache Singleton
// =============================================================================

/// Device-local singleton caching tokens and the cloud public key.
///
/// Written lazily on first cache write; read by the token validator when it
/// falls back to offline verification. The row survives process restarts and
/// reinstall-level resets within the same data volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct TokenCacheRecord {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_cached_at: Option<DateTime<Utc>>,
    pub public_key_pem: Option<String>,
    pub key_cached_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Remote Command Types
// =============================================================================

/// A cloud-originated command, transient by design.
///
/// Fetched on poll, verified, executed, acknowledged, then discarded. Nothing
/// is persisted locally, so duplicate delivery must be tolerated by idempotent
/// handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Signed token binding the command to this hub. Absent on legacy clouds.
    #[serde(default)]
    pub command_jwt: Option<String>,
}

/// Outcome reported back to the cloud for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Completed,
    Failed,
}

/// Acknowledgement body for `POST /api/hubs/me/commands/{id}/ack/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAck {
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandAck {
    pub fn completed(result: Option<serde_json::Value>) -> Self {
        CommandAck {
            status: CommandStatus::Completed,
            result,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        CommandAck {
            status: CommandStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

// =============================================================================
// Heartbeat
// =============================================================================

/// Liveness payload for `POST /api/hubs/me/heartbeat/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Agent software version.
    pub version: String,
    /// Identifiers of locally installed modules.
    pub modules: Vec<String>,
    /// Coarse health status string, e.g. "online".
    pub status: String,
    pub uptime_seconds: u64,
}

// =============================================================================
// Device Credentials
// =============================================================================

/// Read-only device identity handed to the agent at construction time.
///
/// Owned by the external configuration store; the agent never writes it and
/// does not react to mid-run changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubCredentials {
    /// This device's identity with the cloud.
    pub hub_id: Option<String>,
    /// Outbound bearer token attached to every authenticated call.
    pub bearer_token: Option<String>,
    /// Optional pinned copy of the cloud public key (PEM).
    pub pinned_public_key: Option<String>,
}

impl HubCredentials {
    /// A hub is configured once it has both an identity and a bearer token.
    ///
    /// "Not yet onboarded" is an expected steady state: every component
    /// degrades to a quiet no-op when this returns false.
    pub fn is_configured(&self) -> bool {
        self.hub_id.as_deref().map_or(false, |s| !s.is_empty())
            && self.bearer_token.as_deref().map_or(false, |s| !s.is_empty())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(status: QueueStatus, next_retry_at: Option<DateTime<Utc>>) -> QueueEntry {
        let now = Utc::now();
        QueueEntry {
            id: "e-1".into(),
            operation_type: OperationType::SaleSync,
            endpoint: "/api/sales/".into(),
            http_method: HttpMethod::Post,
            payload: "{}".into(),
            extra_headers: "{}".into(),
            status,
            retry_count: 0,
            max_retries: 5,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            next_retry_at,
        }
    }

    #[test]
    fn test_pending_without_backoff_is_due() {
        let e = entry(QueueStatus::Pending, None);
        assert!(e.is_due(Utc::now()));
    }

    #[test]
    fn test_backoff_window_defers_entry() {
        let now = Utc::now();
        let e = entry(QueueStatus::Pending, Some(now + Duration::minutes(2)));
        assert!(!e.is_due(now));
        assert!(e.is_due(now + Duration::minutes(3)));
    }

    #[test]
    fn test_terminal_states() {
        assert!(entry(QueueStatus::Completed, None).is_terminal());
        assert!(entry(QueueStatus::Failed, None).is_terminal());
        assert!(!entry(QueueStatus::Processing, None).is_terminal());
        assert!(!entry(QueueStatus::Pending, None).is_terminal());
    }

    #[test]
    fn test_non_pending_is_never_due() {
        let now = Utc::now();
        assert!(!entry(QueueStatus::Processing, None).is_due(now));
        assert!(!entry(QueueStatus::Completed, None).is_due(now));
        assert!(!entry(QueueStatus::Failed, None).is_due(now));
    }

    #[test]
    fn test_corrupt_headers_degrade_to_empty() {
        let mut e = entry(QueueStatus::Pending, None);
        e.extra_headers = "not json".into();
        assert!(e.headers_map().is_empty());
    }

    #[test]
    fn test_command_deserializes_wire_shape() {
        let cmd: Command = serde_json::from_str(
            r#"{"id":"c-1","type":"module_install","payload":{"module":"scale"},"command_jwt":"x.y.z"}"#,
        )
        .unwrap();
        assert_eq!(cmd.command_type, "module_install");
        assert_eq!(cmd.command_jwt.as_deref(), Some("x.y.z"));
    }

    #[test]
    fn test_command_jwt_is_optional() {
        let cmd: Command =
            serde_json::from_str(r#"{"id":"c-2","type":"config_sync"}"#).unwrap();
        assert!(cmd.command_jwt.is_none());
        assert!(cmd.payload.is_null());
    }

    #[test]
    fn test_ack_skips_empty_fields() {
        let ack = CommandAck::completed(None);
        let json = serde_json::to_string(&ack).unwrap();
        assert_eq!(json, r#"{"status":"completed"}"#);
    }

    #[test]
    fn test_credentials_configured() {
        let mut creds = HubCredentials::default();
        assert!(!creds.is_configured());
        creds.hub_id = Some("hub-1".into());
        assert!(!creds.is_configured());
        creds.bearer_token = Some("tok".into());
        assert!(creds.is_configured());
    }
}
