//! # Agent Error Types
//!
//! Error types for cloud communication, token verification, and the agent.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Agent Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   CloudError    │  │   TokenError    │  │     AgentError          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  NotConfigured  │  │  Expired        │  │  Config/Db/Cloud/Token  │ │
//! │  │  Unauthorized   │  │  InvalidSig     │  │  wrapped at the loop    │ │
//! │  │  Timeout        │  │  Malformed      │  │  and batch boundaries   │ │
//! │  │  Connection     │  │  NoKey          │  │                         │ │
//! │  │  Http{status}   │  │  WrongHub       │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  The taxonomy drives retry policy: transport errors retry with         │
//! │  backoff, auth errors surface immediately, token errors fail the       │
//! │  command they arrived with and nothing else.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Cloud Errors
// =============================================================================

/// Result type alias for cloud API calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors from talking to the cloud API.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The hub has no cloud identity/token yet. Expected before onboarding;
    /// callers treat this as "do nothing", never as a failure to retry.
    #[error("Hub is not configured for cloud access")]
    NotConfigured,

    /// Cloud rejected our bearer token (HTTP 401).
    #[error("Cloud rejected credentials (401 Unauthorized)")]
    Unauthorized,

    /// Cloud refused the operation for this identity (HTTP 403).
    #[error("Cloud refused operation (403 Forbidden)")]
    Forbidden,

    /// The request timed out.
    #[error("Cloud request timed out")]
    Timeout,

    /// Could not reach the cloud at all (DNS, refused, unreachable).
    #[error("Cloud connection failed: {0}")]
    Connection(String),

    /// Cloud answered with a non-success status other than 401/403.
    #[error("Cloud returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Cloud answered 2xx but the body was not what we expected.
    #[error("Invalid cloud response: {0}")]
    InvalidResponse(String),
}

impl CloudError {
    /// Whether the failure is transient (transport trouble, 5xx, 408, 429)
    /// rather than a request the cloud has definitively rejected.
    ///
    /// Queue scheduling does not branch on this: every recorded failure
    /// backs off the same way until the attempt budget runs out, so a
    /// transient outage and a bad request leave the same audit trail. The
    /// reconciler uses the classification for log severity.
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::Timeout | CloudError::Connection(_) => true,
            CloudError::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

/// Classify transport-level reqwest failures.
///
/// Status-code mapping happens at the response site (the status is not
/// visible here); this covers the cases where no response arrived at all.
impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CloudError::Timeout
        } else if err.is_connect() {
            CloudError::Connection(err.to_string())
        } else if err.is_decode() {
            CloudError::InvalidResponse(err.to_string())
        } else {
            CloudError::Connection(err.to_string())
        }
    }
}

// =============================================================================
// Token Errors
// =============================================================================

/// Result type alias for token verification.
pub type TokenResult<T> = Result<T, TokenError>;

/// Errors from verifying a cloud-issued JWT.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The token's `exp` claim is in the past.
    #[error("Token has expired")]
    Expired,

    /// Signature does not verify against the cloud public key.
    #[error("Token signature is invalid")]
    InvalidSignature,

    /// Structurally broken token (not three base64url segments, bad claims).
    #[error("Token is malformed: {0}")]
    Malformed(String),

    /// No public key available from any cache tier or the cloud.
    #[error("No public key available for verification")]
    NoKey,

    /// Command token is bound to a different hub.
    #[error("Token is addressed to hub '{actual}', this hub is '{expected}'")]
    WrongHub { expected: String, actual: String },

    /// Command token is missing or carries the wrong declared type.
    #[error("Token has wrong type: expected '{expected}', got '{actual}'")]
    WrongType { expected: String, actual: String },
}

/// Map jsonwebtoken errors into the local taxonomy.
///
/// ## Error Mapping
/// ```text
/// ExpiredSignature               → TokenError::Expired
/// InvalidSignature               → TokenError::InvalidSignature
/// InvalidToken / Base64 / Json   → TokenError::Malformed
/// Other                          → TokenError::Malformed
/// ```
impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}

// =============================================================================
// Agent Errors
// =============================================================================

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Top-level error for the hub agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Invalid agent configuration.
    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// Database layer failure.
    #[error("Database error: {0}")]
    Database(#[from] beacon_db::DbError),

    /// Cloud API failure.
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Token verification failure.
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// JSON (de)serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The agent is already running.
    #[error("Agent is already running")]
    AlreadyRunning,

    /// Internal agent error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        AgentError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for AgentError {
    fn from(err: toml::ser::Error) -> Self {
        AgentError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
