//! # beacon-sync: Cloud Synchronization and Trust Agent
//!
//! This crate keeps a Beacon Hub useful offline and honest online: local
//! operations queue durably and drain to the cloud when connectivity allows,
//! while cloud-issued commands are verified against the cloud's signing key
//! before anything executes.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Hub Agent Architecture                             │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     HubAgent (Orchestrator)                      │  │
//! │  │                                                                  │  │
//! │  │  Owns two background Tokio tasks sharing one CancellationToken: │  │
//! │  │  heartbeat loop + command poll loop                             │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼──────────────────────┐                 │
//! │         ▼                     ▼                      ▼                  │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   Reconciler   │  │  CloudClient   │  │   TokenValidator       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Drains pending │  │ reqwest HTTP   │  │ RS256 verification     │    │
//! │  │ operation_queue│  │ bearer auth    │  │ via 3-tier key cache   │    │
//! │  │ with backoff   │  │ error taxonomy │  │ hub-binding check      │    │
//! │  └───────┬────────┘  └────────────────┘  └───────────┬────────────┘    │
//! │          │                                           │                  │
//! │          ▼                                           ▼                  │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  Connectivity  │  │   KeyCache     │  │   HandlerRegistry      │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Cached online/ │  │ memory → disk  │  │ Command dispatch:      │    │
//! │  │ offline oracle │  │ → db → cloud   │  │ module_install, ...    │    │
//! │  │ (30s TTL)      │  │ 24h freshness  │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `HubAgent` orchestrator (heartbeat + command polling)
//! - [`client`] - `CloudApi` trait and reqwest-backed `CloudClient`
//! - [`config`] - Agent configuration (TOML file + env overrides)
//! - [`connectivity`] - Cached connectivity oracle
//! - [`error`] - Error taxonomy (`CloudError`, `TokenError`, `AgentError`)
//! - [`handlers`] - Remote command handler registry
//! - [`key_cache`] - Three-tier public key cache
//! - [`reconciler`] - Operation queue drainer
//! - [`validator`] - JWT verification for cloud-issued tokens
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_sync::{AgentConfig, CloudClient, HubAgent};
//! use beacon_db::{Database, DbConfig};
//!
//! let config = AgentConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(&config.storage.database_path)).await?;
//! let client = Arc::new(CloudClient::new(&config)?);
//!
//! let agent = HubAgent::new(config, client, db);
//! agent.start().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod handlers;
pub mod key_cache;
pub mod reconciler;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AgentStatus, HubAgent};
pub use client::{CloudApi, CloudClient};
pub use config::AgentConfig;
pub use connectivity::ConnectivityOracle;
pub use error::{AgentError, AgentResult, CloudError, CloudResult, TokenError, TokenResult};
pub use handlers::{CommandHandler, HandlerRegistry};
pub use key_cache::KeyCache;
pub use reconciler::{BatchOutcome, Reconciler};
pub use validator::TokenValidator;
