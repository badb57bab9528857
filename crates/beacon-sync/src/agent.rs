//! # Heartbeat & Command Agent
//!
//! The long-running half of the hub agent: liveness reporting and remote
//! command execution.
//!
//! ## Task Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         HubAgent Tasks                                  │
//! │                                                                         │
//! │  start()  (no-op when unconfigured or already running)                 │
//! │    │                                                                    │
//! │    ├──► heartbeat task                                                 │
//! │    │      loop: sleep(heartbeat_interval) → send heartbeat             │
//! │    │            CloudError → log and continue (loop never dies)        │
//! │    │                                                                    │
//! │    └──► poll task                                                      │
//! │           grace delay, then                                            │
//! │           loop: sleep(poll_interval) → fetch commands → per command:   │
//! │                                                                         │
//! │             command_jwt present? ──► verify (key from cache)           │
//! │                 │ failure: ack failed "JWT verification failed"        │
//! │                 │          handler NEVER runs  ◄── trust boundary      │
//! │                 ▼                                                       │
//! │             registry lookup ── none ──► ack failed "Unknown command   │
//! │                 │                        type"                         │
//! │                 ▼                                                       │
//! │             execute inside an isolating guard                          │
//! │                 Ok     → ack completed + result                        │
//! │                 Err    → ack failed + message                          │
//! │                 panic  → ack failed, loop survives                     │
//! │                                                                         │
//! │  stop() cancels one shared CancellationToken; both loops select on it  │
//! │  so shutdown lands within ~1s, not at the next interval boundary.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::CloudApi;
use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::handlers::HandlerRegistry;
use crate::key_cache::KeyCache;
use crate::validator::TokenValidator;
use beacon_core::{Command, CommandAck, Heartbeat, HubCredentials};

const JWT_FAILURE_MESSAGE: &str = "JWT verification failed";
const UNKNOWN_TYPE_MESSAGE: &str = "Unknown command type";
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Status
// =============================================================================

/// Point-in-time snapshot of the agent.
#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub running: bool,
    pub configured: bool,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub heartbeats_sent: u64,
    pub commands_processed: u64,
    pub registered_handlers: Vec<String>,
}

/// Counters shared between the loops and `status()`.
#[derive(Default)]
struct AgentMetrics {
    heartbeats_sent: AtomicU64,
    commands_processed: AtomicU64,
    last_heartbeat_at: std::sync::Mutex<Option<DateTime<Utc>>>,
}

/// Handles of a running agent.
struct RunningTasks {
    cancel: CancellationToken,
    heartbeat: JoinHandle<()>,
    poll: JoinHandle<()>,
}

// =============================================================================
// HubAgent
// =============================================================================

/// Orchestrates the heartbeat and command-poll loops.
pub struct HubAgent {
    config: AgentConfig,
    credentials: HubCredentials,
    cloud: Arc<dyn CloudApi>,
    key_cache: Arc<KeyCache>,
    handlers: Arc<HandlerRegistry>,
    metrics: Arc<AgentMetrics>,
    started_at: Instant,
    running: Mutex<Option<RunningTasks>>,
}

impl HubAgent {
    /// Creates an agent with the default command handlers.
    pub fn new(config: AgentConfig, cloud: Arc<dyn CloudApi>, db: beacon_db::Database) -> Self {
        Self::with_handlers(config, cloud, db, HandlerRegistry::with_defaults())
    }

    /// Creates an agent with a caller-supplied handler registry.
    pub fn with_handlers(
        config: AgentConfig,
        cloud: Arc<dyn CloudApi>,
        db: beacon_db::Database,
        handlers: HandlerRegistry,
    ) -> Self {
        let credentials = config.credentials();
        let key_cache = Arc::new(KeyCache::new(
            cloud.clone(),
            db.token_cache(),
            config.storage.key_cache_path.clone(),
            credentials.pinned_public_key.clone(),
        ));

        HubAgent {
            config,
            credentials,
            cloud,
            key_cache,
            handlers: Arc::new(handlers),
            metrics: Arc::new(AgentMetrics::default()),
            started_at: Instant::now(),
            running: Mutex::new(None),
        }
    }

    /// Starts both loops. No-op if the hub is unconfigured or the agent is
    /// already running.
    pub async fn start(&self) -> AgentResult<()> {
        if !self.credentials.is_configured() {
            info!("Hub not configured, agent will not start");
            return Ok(());
        }

        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Agent already running, start is a no-op");
            return Ok(());
        }

        info!(
            heartbeat_interval = self.config.agent.heartbeat_interval_secs,
            poll_interval = self.config.agent.poll_interval_secs,
            "Starting hub agent"
        );

        let cancel = CancellationToken::new();
        let heartbeat = tokio::spawn(Self::heartbeat_loop(
            self.cloud.clone(),
            self.config.clone(),
            self.metrics.clone(),
            self.started_at,
            cancel.clone(),
        ));
        let poll = tokio::spawn(Self::poll_loop(
            self.cloud.clone(),
            self.key_cache.clone(),
            self.handlers.clone(),
            self.credentials.clone(),
            self.config.clone(),
            self.metrics.clone(),
            cancel.clone(),
        ));

        *running = Some(RunningTasks {
            cancel,
            heartbeat,
            poll,
        });
        Ok(())
    }

    /// Cancels both loops and waits for them within a bounded timeout.
    pub async fn stop(&self) {
        let Some(tasks) = self.running.lock().await.take() else {
            return;
        };

        info!("Stopping hub agent");
        tasks.cancel.cancel();

        for (name, handle) in [("heartbeat", tasks.heartbeat), ("poll", tasks.poll)] {
            match tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await {
                Ok(_) => debug!(task = name, "Agent task stopped"),
                Err(_) => warn!(task = name, "Agent task did not stop in time"),
            }
        }
        info!("Hub agent stopped");
    }

    /// Snapshot of the agent's current state.
    pub async fn status(&self) -> AgentStatus {
        AgentStatus {
            running: self.running.lock().await.is_some(),
            configured: self.credentials.is_configured(),
            last_heartbeat_at: *self.metrics.last_heartbeat_at.lock().unwrap(),
            heartbeats_sent: self.metrics.heartbeats_sent.load(Ordering::Relaxed),
            commands_processed: self.metrics.commands_processed.load(Ordering::Relaxed),
            registered_handlers: self.handlers.types(),
        }
    }

    // =========================================================================
    // Heartbeat Loop
    // =========================================================================

    async fn heartbeat_loop(
        cloud: Arc<dyn CloudApi>,
        config: AgentConfig,
        metrics: Arc<AgentMetrics>,
        started_at: Instant,
        cancel: CancellationToken,
    ) {
        let interval = Duration::from_secs(config.agent.heartbeat_interval_secs);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let heartbeat = Heartbeat {
                version: config.agent.version.clone(),
                modules: config.agent.modules.clone(),
                status: "online".to_string(),
                uptime_seconds: started_at.elapsed().as_secs(),
            };

            match cloud.send_heartbeat(&heartbeat).await {
                Ok(()) => {
                    debug!("Heartbeat sent");
                    metrics.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                    *metrics.last_heartbeat_at.lock().unwrap() = Some(Utc::now());
                }
                // The loop outlives any outage
                Err(e) => warn!(error = %e, "Heartbeat failed"),
            }
        }
        debug!("Heartbeat loop exited");
    }

    // =========================================================================
    // Command Poll Loop
    // =========================================================================

    async fn poll_loop(
        cloud: Arc<dyn CloudApi>,
        key_cache: Arc<KeyCache>,
        handlers: Arc<HandlerRegistry>,
        credentials: HubCredentials,
        config: AgentConfig,
        metrics: Arc<AgentMetrics>,
        cancel: CancellationToken,
    ) {
        let grace = Duration::from_secs(config.agent.poll_grace_secs);
        let interval = Duration::from_secs(config.agent.poll_interval_secs);

        // Startup grace: let the key cache warm before commands arrive
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(grace) => {}
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let commands = match cloud.get_pending_commands().await {
                Ok(commands) => commands,
                Err(e) => {
                    warn!(error = %e, "Command poll failed");
                    continue;
                }
            };

            for command in commands {
                Self::process_command(&cloud, &key_cache, &handlers, &credentials, command)
                    .await;
                metrics.commands_processed.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!("Poll loop exited");
    }

    /// Verifies, dispatches, and acknowledges one command.
    ///
    /// Every path ends in exactly one acknowledgement attempt; an ack that
    /// itself fails is logged and dropped (the cloud will redeliver).
    async fn process_command(
        cloud: &Arc<dyn CloudApi>,
        key_cache: &Arc<KeyCache>,
        handlers: &Arc<HandlerRegistry>,
        credentials: &HubCredentials,
        command: Command,
    ) {
        let command_id = command.id.clone();
        info!(id = %command_id, command_type = %command.command_type, "Processing command");

        // Trust boundary: an unverified command never reaches a handler
        if let Some(ref jwt) = command.command_jwt {
            let hub_id = credentials.hub_id.as_deref().unwrap_or("");
            let verified = match key_cache.get_key().await {
                Some(pem) => TokenValidator::validate_command(jwt, &pem, hub_id),
                None => Err(crate::error::TokenError::NoKey),
            };

            if let Err(e) = verified {
                error!(id = %command_id, error = %e, "Command JWT rejected");
                Self::ack(cloud, &command_id, CommandAck::failed(JWT_FAILURE_MESSAGE)).await;
                return;
            }
        }

        let Some(handler) = handlers.get(&command.command_type) else {
            warn!(
                id = %command_id,
                command_type = %command.command_type,
                "No handler registered for command"
            );
            Self::ack(cloud, &command_id, CommandAck::failed(UNKNOWN_TYPE_MESSAGE)).await;
            return;
        };

        // Run in a child task so a panicking handler becomes a failed ack
        // instead of killing the poll loop
        let payload = command.payload.clone();
        let outcome = tokio::spawn(async move { handler.execute(&payload).await }).await;

        let ack = match outcome {
            Ok(Ok(result)) => CommandAck::completed(Some(result)),
            Ok(Err(message)) => {
                warn!(id = %command_id, error = %message, "Command handler failed");
                CommandAck::failed(message)
            }
            Err(join_err) => {
                error!(id = %command_id, error = %join_err, "Command handler panicked");
                CommandAck::failed("Handler panicked")
            }
        };

        Self::ack(cloud, &command_id, ack).await;
    }

    async fn ack(cloud: &Arc<dyn CloudApi>, command_id: &str, ack: CommandAck) {
        if let Err(e) = cloud.acknowledge_command(command_id, &ack).await {
            warn!(id = %command_id, error = %e, "Failed to acknowledge command");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::CommandHandler;
    use crate::test_support::MockCloud;
    use async_trait::async_trait;
    use beacon_core::CommandStatus;
    use beacon_db::{Database, DbConfig};
    use std::sync::atomic::AtomicUsize;

    /// Handler that counts invocations, for trust-boundary assertions.
    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl CommandHandler for CountingHandler {
        async fn execute(&self, _: &serde_json::Value) -> Result<serde_json::Value, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"ran": true}))
        }
    }

    fn test_config(dir: &std::path::Path, configured: bool) -> AgentConfig {
        let mut config = AgentConfig::default();
        if configured {
            config.hub.id = Some("hub-1".into());
            config.hub.bearer_token = Some("bt_x".into());
        }
        config.storage.key_cache_path = dir.join("public_key.pem");
        config.agent.heartbeat_interval_secs = 1;
        config.agent.poll_interval_secs = 1;
        config.agent.poll_grace_secs = 0;
        config
    }

    async fn agent_with(
        cloud: Arc<MockCloud>,
        configured: bool,
        dir: &std::path::Path,
        handlers: HandlerRegistry,
    ) -> HubAgent {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        HubAgent::with_handlers(test_config(dir, configured), cloud, db, handlers)
    }

    fn command(id: &str, command_type: &str, jwt: Option<&str>) -> Command {
        Command {
            id: id.into(),
            command_type: command_type.into(),
            payload: serde_json::json!({"module": "scale"}),
            command_jwt: jwt.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_start_is_noop_when_unconfigured() {
        let cloud = Arc::new(MockCloud::new());
        let dir = tempfile::tempdir().unwrap();
        let agent =
            agent_with(cloud.clone(), false, dir.path(), HandlerRegistry::with_defaults()).await;

        agent.start().await.unwrap();
        let status = agent.status().await;
        assert!(!status.running);
        assert!(!status.configured);
    }

    #[tokio::test]
    async fn test_heartbeat_loop_reports_metadata() {
        let cloud = Arc::new(MockCloud::new());
        let dir = tempfile::tempdir().unwrap();
        let agent =
            agent_with(cloud.clone(), true, dir.path(), HandlerRegistry::with_defaults()).await;

        agent.start().await.unwrap();
        // Double start is a no-op, not an error
        agent.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        agent.stop().await;

        let sent = cloud.heartbeats.lock().unwrap().clone();
        assert!(!sent.is_empty());
        assert_eq!(sent[0].status, "online");

        let status = agent.status().await;
        assert!(!status.running);
        assert!(status.heartbeats_sent >= 1);
        assert!(status.last_heartbeat_at.is_some());
    }

    #[tokio::test]
    async fn test_unverified_command_never_reaches_handler() {
        let cloud = Arc::new(MockCloud::new());
        // Key cache has a key, but the JWT is garbage
        cloud.set_public_key(Some(
            "-----BEGIN PUBLIC KEY-----\nnot-a-real-key\n-----END PUBLIC KEY-----",
        ));
        cloud.push_commands(vec![command("c-1", "module_install", Some("bogus.jwt.here"))]);

        let calls = Arc::new(AtomicUsize::new(0));
        let mut handlers = HandlerRegistry::new();
        handlers.register("module_install", Arc::new(CountingHandler(calls.clone())));

        let dir = tempfile::tempdir().unwrap();
        let agent = agent_with(cloud.clone(), true, dir.path(), handlers).await;
        agent.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        agent.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let acks = cloud.acks();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].0, "c-1");
        assert_eq!(acks[0].1.status, CommandStatus::Failed);
        assert_eq!(acks[0].1.error.as_deref(), Some(JWT_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_unknown_command_type_acked_failed() {
        let cloud = Arc::new(MockCloud::new());
        cloud.push_commands(vec![command("c-2", "reboot_universe", None)]);

        let dir = tempfile::tempdir().unwrap();
        let agent =
            agent_with(cloud.clone(), true, dir.path(), HandlerRegistry::with_defaults()).await;
        agent.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        agent.stop().await;

        let acks = cloud.acks();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].1.error.as_deref(), Some(UNKNOWN_TYPE_MESSAGE));
    }

    #[tokio::test]
    async fn test_unsigned_known_command_runs_and_acks_completed() {
        let cloud = Arc::new(MockCloud::new());
        cloud.push_commands(vec![command("c-3", "module_install", None)]);

        let calls = Arc::new(AtomicUsize::new(0));
        let mut handlers = HandlerRegistry::new();
        handlers.register("module_install", Arc::new(CountingHandler(calls.clone())));

        let dir = tempfile::tempdir().unwrap();
        let agent = agent_with(cloud.clone(), true, dir.path(), handlers).await;
        agent.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        agent.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let acks = cloud.acks();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].1.status, CommandStatus::Completed);
        assert_eq!(
            acks[0].1.result.as_ref().unwrap()["ran"],
            serde_json::json!(true)
        );
        assert_eq!(agent.status().await.commands_processed, 1);
    }

    #[tokio::test]
    async fn test_stop_is_prompt() {
        let cloud = Arc::new(MockCloud::new());
        let dir = tempfile::tempdir().unwrap();
        // Long intervals: stop must not wait for the next tick
        let mut config = test_config(dir.path(), true);
        config.agent.heartbeat_interval_secs = 3600;
        config.agent.poll_interval_secs = 3600;
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let agent =
            HubAgent::with_handlers(config, cloud, db, HandlerRegistry::with_defaults());

        agent.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        agent.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!agent.status().await.running);
    }
}
