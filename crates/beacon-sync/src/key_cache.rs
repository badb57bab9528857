//! # Public Key Cache
//!
//! Three-tier cache for the cloud's token-signing public key.
//!
//! ## Tier Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Public Key Cache Tiers                              │
//! │                                                                         │
//! │  get_key()                                                              │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  1. memory (value + Instant)          fresh? ──► return                │
//! │      │ empty/expired                                                    │
//! │      ▼                                                                  │
//! │  2. disk file (timestamp = mtime)     fresh? ──► promote to 1, return  │
//! │      │ empty/expired                                                    │
//! │      ▼                                                                  │
//! │  3. token_cache row (key_cached_at)   fresh? ──► promote to 1+2, return│
//! │      │ empty/expired                                                    │
//! │      ▼                                                                  │
//! │  4. GET /api/auth/public-key/  ──success──► write back ALL tiers       │
//! │      │ failure                                                          │
//! │      ▼                                                                  │
//! │  5. last known stale key from any tier (or the config pin, or None)    │
//! │                                                                         │
//! │  Freshness window: 24 hours.                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tier 5 is a deliberate availability trade: a stale key still verifies
//! already-issued tokens through their expiry. An offline hub keeps working
//! at the cost of key-rotation lag; the product accepted that trade.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::CloudApi;
use beacon_db::TokenCacheRepository;
use beacon_core::KEY_FRESHNESS_SECS;

/// Three-tier public key cache.
pub struct KeyCache {
    cloud: Arc<dyn CloudApi>,
    db: TokenCacheRepository,
    disk_path: PathBuf,
    /// Optional key pinned in the agent config; lowest-priority fallback.
    pinned: Option<String>,
    freshness: Duration,
    memory: Mutex<Option<(Instant, String)>>,
}

impl KeyCache {
    /// Creates a cache with the default 24h freshness window.
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        db: TokenCacheRepository,
        disk_path: impl Into<PathBuf>,
        pinned: Option<String>,
    ) -> Self {
        Self::with_freshness(
            cloud,
            db,
            disk_path,
            pinned,
            Duration::from_secs(KEY_FRESHNESS_SECS),
        )
    }

    /// Creates a cache with a custom freshness window (tests use short ones).
    pub fn with_freshness(
        cloud: Arc<dyn CloudApi>,
        db: TokenCacheRepository,
        disk_path: impl Into<PathBuf>,
        pinned: Option<String>,
        freshness: Duration,
    ) -> Self {
        KeyCache {
            cloud,
            db,
            disk_path: disk_path.into(),
            pinned,
            freshness,
            memory: Mutex::new(None),
        }
    }

    /// Resolves the cloud public key, freshest tier first.
    ///
    /// Returns `None` only when no tier has ever held a key, no pin is
    /// configured, and the cloud is unreachable.
    pub async fn get_key(&self) -> Option<String> {
        let mut memory = self.memory.lock().await;

        // Tier 1: memory
        if let Some((at, ref pem)) = *memory {
            if at.elapsed() < self.freshness {
                return Some(pem.clone());
            }
        }

        // Tier 2: disk, timestamped by mtime
        if let Some(pem) = self.read_disk_fresh() {
            debug!("Public key served from disk cache");
            *memory = Some((Instant::now(), pem.clone()));
            return Some(pem);
        }

        // Tier 3: database row
        if let Some(pem) = self.read_db_fresh().await {
            debug!("Public key served from database cache");
            self.write_disk(&pem);
            *memory = Some((Instant::now(), pem.clone()));
            return Some(pem);
        }

        // Tier 4: the network
        match self.cloud.fetch_public_key().await {
            Ok(pem) => {
                info!("Public key refreshed from cloud");
                self.write_disk(&pem);
                if let Err(e) = self.db.save_public_key(&pem).await {
                    warn!(error = %e, "Failed to persist public key to database");
                }
                *memory = Some((Instant::now(), pem.clone()));
                Some(pem)
            }
            Err(e) => {
                warn!(error = %e, "Public key fetch failed, falling back to stale key");
                self.stale_fallback(&memory).await
            }
        }
    }

    /// Last known key from any tier regardless of age, then the config pin.
    async fn stale_fallback(&self, memory: &Option<(Instant, String)>) -> Option<String> {
        if let Some((_, ref pem)) = *memory {
            return Some(pem.clone());
        }
        if let Ok(pem) = std::fs::read_to_string(&self.disk_path) {
            if !pem.is_empty() {
                return Some(pem);
            }
        }
        if let Ok(record) = self.db.get().await {
            if let Some(pem) = record.public_key_pem {
                return Some(pem);
            }
        }
        self.pinned.clone()
    }

    fn read_disk_fresh(&self) -> Option<String> {
        let metadata = std::fs::metadata(&self.disk_path).ok()?;
        let age = metadata.modified().ok()?.elapsed().ok()?;
        if age >= self.freshness {
            return None;
        }
        let pem = std::fs::read_to_string(&self.disk_path).ok()?;
        if pem.is_empty() {
            None
        } else {
            Some(pem)
        }
    }

    async fn read_db_fresh(&self) -> Option<String> {
        let record = self.db.get().await.ok()?;
        let pem = record.public_key_pem?;
        let cached_at = record.key_cached_at?;

        let age = (Utc::now() - cached_at).to_std().ok()?;
        if age < self.freshness {
            Some(pem)
        } else {
            None
        }
    }

    fn write_disk(&self, pem: &str) {
        if let Some(parent) = self.disk_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "Failed to create key cache directory");
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.disk_path, pem) {
            warn!(error = %e, "Failed to write public key to disk cache");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockCloud;
    use beacon_db::{Database, DbConfig};

    const PEM: &str = "-----BEGIN PUBLIC KEY-----\nTESTKEY\n-----END PUBLIC KEY-----\n";

    async fn db_repo() -> TokenCacheRepository {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.token_cache()
    }

    #[tokio::test]
    async fn test_network_refill_writes_all_tiers() {
        let cloud = Arc::new(MockCloud::new());
        cloud.set_public_key(Some(PEM));
        let repo = db_repo().await;
        let dir = tempfile::tempdir().unwrap();
        let disk_path = dir.path().join("public_key.pem");

        let cache = KeyCache::new(cloud.clone(), repo.clone(), &disk_path, None);
        assert_eq!(cache.get_key().await.as_deref(), Some(PEM));

        // Disk and database tiers were refilled
        assert_eq!(std::fs::read_to_string(&disk_path).unwrap(), PEM);
        let record = repo.get().await.unwrap();
        assert_eq!(record.public_key_pem.as_deref(), Some(PEM));

        // Memory tier now serves without the network
        cloud.set_public_key(None);
        assert_eq!(cache.get_key().await.as_deref(), Some(PEM));
    }

    #[tokio::test]
    async fn test_disk_tier_survives_restart() {
        let cloud = Arc::new(MockCloud::new());
        cloud.set_public_key(None); // cloud down the whole time
        let dir = tempfile::tempdir().unwrap();
        let disk_path = dir.path().join("public_key.pem");
        std::fs::write(&disk_path, PEM).unwrap();

        // Fresh process: empty memory, fresh disk file
        let cache = KeyCache::new(cloud, db_repo().await, &disk_path, None);
        assert_eq!(cache.get_key().await.as_deref(), Some(PEM));
    }

    #[tokio::test]
    async fn test_db_tier_promotes_to_disk_and_memory() {
        let cloud = Arc::new(MockCloud::new());
        cloud.set_public_key(None);
        let repo = db_repo().await;
        repo.save_public_key(PEM).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let disk_path = dir.path().join("public_key.pem");

        let cache = KeyCache::new(cloud, repo, &disk_path, None);
        assert_eq!(cache.get_key().await.as_deref(), Some(PEM));
        assert_eq!(std::fs::read_to_string(&disk_path).unwrap(), PEM);
    }

    #[tokio::test]
    async fn test_stale_key_served_when_cloud_unreachable() {
        let cloud = Arc::new(MockCloud::new());
        cloud.set_public_key(Some(PEM));
        let dir = tempfile::tempdir().unwrap();
        let disk_path = dir.path().join("public_key.pem");

        // Tiny freshness window so everything goes stale quickly
        let cache = KeyCache::with_freshness(
            cloud.clone(),
            db_repo().await,
            &disk_path,
            None,
            Duration::from_millis(20),
        );
        assert_eq!(cache.get_key().await.as_deref(), Some(PEM));

        tokio::time::sleep(Duration::from_millis(40)).await;
        cloud.set_public_key(None);

        // All tiers expired, fetch fails: stale key beats no key
        assert_eq!(cache.get_key().await.as_deref(), Some(PEM));
    }

    #[tokio::test]
    async fn test_pinned_key_is_last_resort() {
        let cloud = Arc::new(MockCloud::new());
        cloud.set_public_key(None);
        let dir = tempfile::tempdir().unwrap();

        let cache = KeyCache::new(
            cloud,
            db_repo().await,
            dir.path().join("public_key.pem"),
            Some(PEM.to_string()),
        );
        assert_eq!(cache.get_key().await.as_deref(), Some(PEM));
    }

    #[tokio::test]
    async fn test_no_key_anywhere_returns_none() {
        let cloud = Arc::new(MockCloud::new());
        cloud.set_public_key(None);
        let dir = tempfile::tempdir().unwrap();

        let cache = KeyCache::new(
            cloud,
            db_repo().await,
            dir.path().join("public_key.pem"),
            None,
        );
        assert!(cache.get_key().await.is_none());
    }
}
