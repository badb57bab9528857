//! # Remote Command Handlers
//!
//! Dispatch table mapping command-type strings to executable handlers.
//!
//! ## Dispatch Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Command Dispatch                                   │
//! │                                                                         │
//! │  command.type ──► registry lookup                                      │
//! │                      │                                                  │
//! │         ┌────────────┴────────────┐                                    │
//! │         ▼                         ▼                                    │
//! │     registered               not registered                            │
//! │         │                         │                                    │
//! │         ▼                         ▼                                    │
//! │     execute(payload)       ack failed "Unknown command type"           │
//! │         │                                                               │
//! │    Ok(result)  → ack completed with result                             │
//! │    Err(msg)    → ack failed with msg                                   │
//! │                                                                         │
//! │  Commands may be delivered twice (nothing is persisted hub-side), so   │
//! │  every handler must be idempotent.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

// =============================================================================
// CommandHandler Trait
// =============================================================================

/// One executable remote command type.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Executes the command. `Err` carries a human-readable message that
    /// goes verbatim into the failed acknowledgement.
    async fn execute(&self, payload: &serde_json::Value) -> Result<serde_json::Value, String>;
}

// =============================================================================
// HandlerRegistry
// =============================================================================

/// Mutable mapping of command-type string → handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in module and config handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("module_install", Arc::new(ModuleInstallHandler));
        registry.register("module_update", Arc::new(ModuleUpdateHandler));
        registry.register("module_remove", Arc::new(ModuleRemoveHandler));
        registry.register("config_sync", Arc::new(ConfigSyncHandler));
        registry
    }

    /// Registers (or replaces) the handler for a command type.
    pub fn register(&mut self, command_type: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(command_type.into(), handler);
    }

    /// Looks up the handler for a command type.
    pub fn get(&self, command_type: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(command_type).cloned()
    }

    /// Registered command types, for status reporting.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

// =============================================================================
// Default Handlers
// =============================================================================

fn required_str(payload: &serde_json::Value, field: &str) -> Result<String, String> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| format!("Missing required field '{}'", field))
}

/// Installs a module named in the payload.
struct ModuleInstallHandler;

#[async_trait]
impl CommandHandler for ModuleInstallHandler {
    async fn execute(&self, payload: &serde_json::Value) -> Result<serde_json::Value, String> {
        let module = required_str(payload, "module")?;
        let version = payload
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or("latest");

        info!(module = %module, version = %version, "Installing module");

        Ok(serde_json::json!({
            "action": "install",
            "module": module,
            "version": version,
        }))
    }
}

/// Updates an installed module.
struct ModuleUpdateHandler;

#[async_trait]
impl CommandHandler for ModuleUpdateHandler {
    async fn execute(&self, payload: &serde_json::Value) -> Result<serde_json::Value, String> {
        let module = required_str(payload, "module")?;
        let version = required_str(payload, "version")?;

        info!(module = %module, version = %version, "Updating module");

        Ok(serde_json::json!({
            "action": "update",
            "module": module,
            "version": version,
        }))
    }
}

/// Removes an installed module. Removing an absent module succeeds
/// (idempotency under duplicate delivery).
struct ModuleRemoveHandler;

#[async_trait]
impl CommandHandler for ModuleRemoveHandler {
    async fn execute(&self, payload: &serde_json::Value) -> Result<serde_json::Value, String> {
        let module = required_str(payload, "module")?;

        info!(module = %module, "Removing module");

        Ok(serde_json::json!({
            "action": "remove",
            "module": module,
        }))
    }
}

/// Applies a cloud-pushed configuration snapshot.
struct ConfigSyncHandler;

#[async_trait]
impl CommandHandler for ConfigSyncHandler {
    async fn execute(&self, payload: &serde_json::Value) -> Result<serde_json::Value, String> {
        let config = payload
            .get("config")
            .ok_or_else(|| "Missing required field 'config'".to_string())?;

        let keys = config
            .as_object()
            .map(|o| o.len())
            .ok_or_else(|| "'config' must be an object".to_string())?;

        info!(keys, "Applying config sync");

        Ok(serde_json::json!({
            "action": "config_sync",
            "applied_keys": keys,
        }))
    }
}

// =============================================================================
// Tests
// =============================================================================
