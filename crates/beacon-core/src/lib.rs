//! # beacon-core: Pure Types for the Beacon Hub Agent
//!
//! This crate holds the domain types shared by the persistence layer and the
//! sync agent. Everything here is pure data: no I/O, no async, no clocks other
//! than timestamps passed in by callers.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon Hub Data Flow                             │
//! │                                                                         │
//! │  Local mutation (e.g., register employee while offline)                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  QueueEntry (THIS CRATE) ──► beacon-db ──► operation_queue table       │
//! │                                                                         │
//! │  Cloud poll                                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Command (THIS CRATE) ──► beacon-sync ──► verify ──► execute ──► ack   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (QueueEntry, Command, Heartbeat, credentials)
//! - [`backoff`] - Retry delay arithmetic for the operation queue

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backoff;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default number of delivery attempts before a queue entry becomes terminal.
pub const DEFAULT_MAX_RETRIES: i64 = 5;

/// Freshness window for the cached cloud public key, in seconds (24 hours).
///
/// A stale key is still served as a degraded fallback when the cloud is
/// unreachable; already-issued tokens stay verifiable through their expiry.
pub const KEY_FRESHNESS_SECS: u64 = 24 * 60 * 60;

/// How long a connectivity probe result is trusted, in seconds.
pub const PROBE_TTL_SECS: u64 = 30;

/// Timeout for a single connectivity probe, in seconds.
pub const PROBE_TIMEOUT_SECS: u64 = 5;

/// Declared token type a remote command JWT must carry.
pub const COMMAND_TOKEN_TYPE: &str = "hub_command";
