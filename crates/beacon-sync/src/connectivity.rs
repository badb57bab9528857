//! # Connectivity Oracle
//!
//! Cached answer to "does the cloud look reachable right now?".
//!
//! ## Caching Behavior
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Connectivity Oracle                                │
//! │                                                                         │
//! │  is_online()                                                            │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  cached result younger than 30s? ──yes──► return cached bool           │
//! │      │ no                                                               │
//! │      ▼                                                                  │
//! │  GET /api/health/ (5s timeout)                                         │
//! │      │                                                                  │
//! │      ├── 2xx            → online,  cache for 30s                       │
//! │      └── anything else  → offline, cache for 30s                       │
//! │                                                                         │
//! │  force_check() skips the cache and refreshes it.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Advisory only: it feeds status displays and log lines. The reconciler
//! never consults it before attempting delivery; the delivery attempt itself
//! is the authoritative online/offline detector.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::CloudApi;
use beacon_core::PROBE_TTL_SECS;

/// Cached connectivity probe.
pub struct ConnectivityOracle {
    cloud: Arc<dyn CloudApi>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, bool)>>,
}

impl ConnectivityOracle {
    /// Creates an oracle with the default 30s cache TTL.
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self::with_ttl(cloud, Duration::from_secs(PROBE_TTL_SECS))
    }

    /// Creates an oracle with a custom TTL (tests use short ones).
    pub fn with_ttl(cloud: Arc<dyn CloudApi>, ttl: Duration) -> Self {
        ConnectivityOracle {
            cloud,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Whether the cloud looked reachable within the last TTL window.
    pub async fn is_online(&self) -> bool {
        let mut cached = self.cached.lock().await;

        if let Some((at, online)) = *cached {
            if at.elapsed() < self.ttl {
                return online;
            }
        }

        let online = self.probe().await;
        *cached = Some((Instant::now(), online));
        online
    }

    /// Probes right now, bypassing and refreshing the cache.
    pub async fn force_check(&self) -> bool {
        let online = self.probe().await;
        *self.cached.lock().await = Some((Instant::now(), online));
        online
    }

    async fn probe(&self) -> bool {
        match self.cloud.probe_health().await {
            Ok(()) => {
                debug!("Connectivity probe: online");
                true
            }
            Err(e) => {
                debug!(error = %e, "Connectivity probe: offline");
                false
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
