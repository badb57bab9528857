//! # Repository Module
//!
//! Database repository implementations for the Beacon Hub agent.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  Reconciler / Agent                                                    │
//! │       │                                                                 │
//! │       │  db.operation_queue().fetch_pending(10)                        │
//! │       ▼                                                                 │
//! │  OperationQueueRepository                                              │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite database                                                       │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • SQL is isolated in one place                                        │
//! │  • Queue invariants enforced next to the queries                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`queue::OperationQueueRepository`] - durable outbox management
//! - [`token_cache::TokenCacheRepository`] - token/public-key singleton

pub mod queue;
pub mod token_cache;
