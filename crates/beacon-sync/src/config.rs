//! # Agent Configuration
//!
//! Configuration management for the hub agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BEACON_HUB_ID=hub-7f3a                                             │
//! │     BEACON_CLOUD_URL=https://cloud.example.com                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/beacon-hub/agent.toml (Linux)                            │
//! │     ~/Library/Application Support/com.beacon.hub/agent.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     Unconfigured hub: every component degrades to a quiet no-op        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # agent.toml
//! [hub]
//! id = "hub-7f3a"
//! bearer_token = "bt_..."
//! # public_key_pem = "-----BEGIN PUBLIC KEY-----..."  # optional pin
//!
//! [cloud]
//! base_url = "https://cloud.example.com"
//! request_timeout_secs = 30
//!
//! [agent]
//! heartbeat_interval_secs = 60
//! poll_interval_secs = 30
//! reconcile_interval_secs = 300
//! batch_size = 10
//!
//! [storage]
//! database_path = "/var/lib/beacon/hub.db"
//! key_cache_path = "/var/lib/beacon/public_key.pem"
//! ```
//!
//! Credentials are read once at construction time; a re-onboarded hub
//! restarts its agent rather than hot-swapping identity mid-run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{AgentError, AgentResult};
use beacon_core::HubCredentials;

// =============================================================================
// Hub Identity
// =============================================================================

/// The hub's cloud identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubSection {
    /// Cloud-assigned hub identifier. None until onboarded.
    #[serde(default)]
    pub id: Option<String>,

    /// Bearer token for authenticated cloud calls. None until onboarded.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Optional pinned copy of the cloud signing key (PEM).
    /// When set, it seeds the key cache but never blocks a refresh.
    #[serde(default)]
    pub public_key_pem: Option<String>,
}

// =============================================================================
// Cloud Endpoint
// =============================================================================

/// Where and how to reach the cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSection {
    /// Base URL of the cloud API, e.g. `https://cloud.example.com`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for a single authenticated request (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://cloud.example.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for CloudSection {
    fn default() -> Self {
        CloudSection {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Agent Behavior
// =============================================================================

/// Timing and sizing knobs for the background loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Interval between heartbeats (seconds).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Interval between command polls (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Delay before the first command poll after startup (seconds).
    /// Gives the key cache a chance to warm before commands arrive.
    #[serde(default = "default_poll_grace")]
    pub poll_grace_secs: u64,

    /// Interval between reconciler batches (seconds).
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Queue entries per reconciler batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Version string reported in heartbeats.
    #[serde(default = "default_version")]
    pub version: String,

    /// Locally installed module identifiers reported in heartbeats.
    #[serde(default)]
    pub modules: Vec<String>,
}

fn default_heartbeat_interval() -> u64 {
    60
}
fn default_poll_interval() -> u64 {
    30
}
fn default_poll_grace() -> u64 {
    10
}
fn default_reconcile_interval() -> u64 {
    300
}
fn default_batch_size() -> u32 {
    10
}
fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        AgentSection {
            heartbeat_interval_secs: default_heartbeat_interval(),
            poll_interval_secs: default_poll_interval(),
            poll_grace_secs: default_poll_grace(),
            reconcile_interval_secs: default_reconcile_interval(),
            batch_size: default_batch_size(),
            version: default_version(),
            modules: Vec::new(),
        }
    }
}

// =============================================================================
// Storage Paths
// =============================================================================

/// Local storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// SQLite database file for the queue and token cache.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Disk tier of the public key cache.
    #[serde(default = "default_key_cache_path")]
    pub key_cache_path: PathBuf,
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "beacon", "hub")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_database_path() -> PathBuf {
    data_dir().join("hub.db")
}

fn default_key_cache_path() -> PathBuf {
    data_dir().join("public_key.pem")
}

impl Default for StorageSection {
    fn default() -> Self {
        StorageSection {
            database_path: default_database_path(),
            key_cache_path: default_key_cache_path(),
        }
    }
}

// =============================================================================
// Main Agent Configuration
// =============================================================================

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hub identity and credentials.
    #[serde(default)]
    pub hub: HubSection,

    /// Cloud endpoint settings.
    #[serde(default)]
    pub cloud: CloudSection,

    /// Loop timing and heartbeat metadata.
    #[serde(default)]
    pub agent: AgentSection,

    /// Local storage paths.
    #[serde(default)]
    pub storage: StorageSection,
}

impl AgentConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (agent.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> AgentResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load agent config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> AgentResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| AgentError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Agent config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> AgentResult<()> {
        if !self.cloud.base_url.starts_with("http://")
            && !self.cloud.base_url.starts_with("https://")
        {
            return Err(AgentError::InvalidConfig(format!(
                "Cloud base URL must start with http:// or https://, got: {}",
                self.cloud.base_url
            )));
        }

        if self.agent.batch_size == 0 {
            return Err(AgentError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.agent.heartbeat_interval_secs == 0 || self.agent.poll_interval_secs == 0 {
            return Err(AgentError::InvalidConfig(
                "loop intervals must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("BEACON_HUB_ID") {
            debug!(hub_id = %id, "Overriding hub ID from environment");
            self.hub.id = Some(id);
        }

        if let Ok(token) = std::env::var("BEACON_BEARER_TOKEN") {
            self.hub.bearer_token = Some(token);
        }

        if let Ok(url) = std::env::var("BEACON_CLOUD_URL") {
            debug!(url = %url, "Overriding cloud URL from environment");
            self.cloud.base_url = url;
        }

        if let Ok(path) = std::env::var("BEACON_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }

        if let Ok(interval) = std::env::var("BEACON_HEARTBEAT_INTERVAL") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.agent.heartbeat_interval_secs = secs;
            }
        }

        if let Ok(interval) = std::env::var("BEACON_POLL_INTERVAL") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.agent.poll_interval_secs = secs;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "beacon", "hub")
            .map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Snapshot of the hub credentials.
    ///
    /// Components take this once at construction; mid-run config edits are
    /// picked up on restart, never reactively.
    pub fn credentials(&self) -> HubCredentials {
        HubCredentials {
            hub_id: self.hub.id.clone(),
            bearer_token: self.hub.bearer_token.clone(),
            pinned_public_key: self.hub.public_key_pem.clone(),
        }
    }

    /// Whether the hub is onboarded with the cloud.
    pub fn is_configured(&self) -> bool {
        self.credentials().is_configured()
    }
}

// =============================================================================
// Tests
// =============================================================================
