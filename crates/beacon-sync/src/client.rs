//! # Cloud API Client
//!
//! HTTP client for the authenticated hub-to-cloud API.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Cloud Request Pipeline                            │
//! │                                                                         │
//! │  caller                                                                 │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  is_configured? ──no──► CloudError::NotConfigured (no I/O happens)     │
//! │    │ yes                                                                │
//! │    ▼                                                                    │
//! │  reqwest: bearer token + JSON headers + timeout                        │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  status mapping:                                                       │
//! │    2xx          → decode JSON body                                     │
//! │    401          → CloudError::Unauthorized                             │
//! │    403          → CloudError::Forbidden                                │
//! │    other ≥ 400  → CloudError::Http { status, body }                    │
//! │    no response  → Timeout / Connection (via From<reqwest::Error>)      │
//! │                                                                         │
//! │  "cloud rejected us" and "cloud unreachable" stay distinguishable so   │
//! │  the reconciler can choose between giving up and backing off.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`CloudApi`] trait is the seam the agent and reconciler depend on;
//! tests substitute a mock, production wires in [`CloudClient`].

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::{CloudError, CloudResult};
use beacon_core::{
    Command, CommandAck, Heartbeat, HttpMethod, HubCredentials, PROBE_TIMEOUT_SECS,
};

// =============================================================================
// CloudApi Trait
// =============================================================================

/// The cloud operations the agent and reconciler depend on.
///
/// Kept narrow on purpose: each method is one wire endpoint, and every
/// caller-visible failure is a [`CloudError`].
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Replays a queued operation against the cloud.
    /// Success means HTTP 200/201/204.
    ///
    /// `endpoint` is the full path as stored at enqueue time, query string
    /// included (`/api/sales/?source=offline`); there is no separate query
    /// parameter.
    async fn execute_operation(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: &serde_json::Value,
        extra_headers: &HashMap<String, String>,
    ) -> CloudResult<()>;

    /// `POST /api/hubs/me/heartbeat/`
    async fn send_heartbeat(&self, heartbeat: &Heartbeat) -> CloudResult<()>;

    /// `GET /api/hubs/me/commands/`
    async fn get_pending_commands(&self) -> CloudResult<Vec<Command>>;

    /// `POST /api/hubs/me/commands/{id}/ack/`
    async fn acknowledge_command(&self, command_id: &str, ack: &CommandAck) -> CloudResult<()>;

    /// `GET /api/auth/public-key/` — unauthenticated.
    async fn fetch_public_key(&self) -> CloudResult<String>;

    /// `GET /api/health/` — unauthenticated liveness probe with a short
    /// timeout. Returns Ok(()) only on a 2xx response.
    async fn probe_health(&self) -> CloudResult<()>;
}

// =============================================================================
// CloudClient
// =============================================================================

/// Production [`CloudApi`] implementation backed by reqwest.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    credentials: HubCredentials,
}

impl CloudClient {
    /// Creates a client from the agent configuration.
    ///
    /// Credentials are snapshotted here; a hub onboarded mid-run keeps
    /// returning `NotConfigured` until the process restarts.
    pub fn new(config: &AgentConfig) -> CloudResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.cloud.request_timeout_secs))
            .build()
            .map_err(CloudError::from)?;

        Ok(CloudClient {
            http,
            base_url: config.cloud.base_url.trim_end_matches('/').to_string(),
            credentials: config.credentials(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer_token(&self) -> CloudResult<&str> {
        if !self.credentials.is_configured() {
            return Err(CloudError::NotConfigured);
        }
        // is_configured guarantees the token is present and non-empty
        self.credentials
            .bearer_token
            .as_deref()
            .ok_or(CloudError::NotConfigured)
    }

    /// Core authenticated request: bearer + JSON headers, then status mapping.
    ///
    /// `path` may carry a query string; it is appended to the base URL
    /// verbatim. The client-wide timeout from the config applies to every
    /// call here; only [`CloudApi::probe_health`] overrides it per request.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        extra_headers: &HashMap<String, String>,
    ) -> CloudResult<serde_json::Value> {
        let token = self.bearer_token()?;

        let mut req = self
            .http
            .request(method.clone(), self.url(path))
            .bearer_auth(token);

        for (name, value) in extra_headers {
            req = req.header(name, value);
        }

        if let Some(body) = body {
            req = req.json(body);
        }

        debug!(method = %method, path = %path, "Cloud request");

        let response = req.send().await?;
        Self::handle_response(response).await
    }

    /// Maps an HTTP response to the error taxonomy, decoding the body.
    async fn handle_response(response: reqwest::Response) -> CloudResult<serde_json::Value> {
        let status = response.status();

        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(serde_json::Value::Null);
            }
            // Some endpoints answer 200 with an empty body
            let text = response.text().await?;
            if text.is_empty() {
                return Ok(serde_json::Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| CloudError::InvalidResponse(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => Err(CloudError::Unauthorized),
            StatusCode::FORBIDDEN => Err(CloudError::Forbidden),
            _ => Err(CloudError::Http {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl CloudApi for CloudClient {
    async fn execute_operation(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: &serde_json::Value,
        extra_headers: &HashMap<String, String>,
    ) -> CloudResult<()> {
        let method = match method {
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        };

        self.request(method, endpoint, Some(payload), extra_headers)
            .await?;
        Ok(())
    }

    async fn send_heartbeat(&self, heartbeat: &Heartbeat) -> CloudResult<()> {
        let body = serde_json::to_value(heartbeat)
            .map_err(|e| CloudError::InvalidResponse(e.to_string()))?;
        self.request(
            Method::POST,
            "/api/hubs/me/heartbeat/",
            Some(&body),
            &HashMap::new(),
        )
        .await?;
        Ok(())
    }

    async fn get_pending_commands(&self) -> CloudResult<Vec<Command>> {
        let body = self
            .request(Method::GET, "/api/hubs/me/commands/", None, &HashMap::new())
            .await?;

        let commands = body
            .get("commands")
            .cloned()
            .ok_or_else(|| CloudError::InvalidResponse("missing 'commands' field".into()))?;

        serde_json::from_value(commands)
            .map_err(|e| CloudError::InvalidResponse(e.to_string()))
    }

    async fn acknowledge_command(&self, command_id: &str, ack: &CommandAck) -> CloudResult<()> {
        let body = serde_json::to_value(ack)
            .map_err(|e| CloudError::InvalidResponse(e.to_string()))?;
        let path = format!("/api/hubs/me/commands/{}/ack/", command_id);
        self.request(Method::POST, &path, Some(&body), &HashMap::new())
            .await?;
        Ok(())
    }

    async fn fetch_public_key(&self) -> CloudResult<String> {
        // Unauthenticated: key distribution must work before onboarding
        let response = self
            .http
            .get(self.url("/api/auth/public-key/"))
            .send()
            .await?;

        let body = Self::handle_response(response).await?;

        body.get("public_key")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| CloudError::InvalidResponse("missing 'public_key' field".into()))
    }

    async fn probe_health(&self) -> CloudResult<()> {
        let response = self
            .http
            .get(self.url("/api/health/"))
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            warn!(status = %response.status(), "Health probe returned non-success");
            Err(CloudError::Http {
                status: response.status().as_u16(),
                body: String::new(),
            })
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server_url: &str, configured: bool) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.cloud.base_url = server_url.to_string();
        if configured {
            config.hub.id = Some("hub-test".into());
            config.hub.bearer_token = Some("bt_secret".into());
        }
        config
    }

    #[tokio::test]
    async fn test_unconfigured_client_short_circuits() {
        // Point at a dead address: proof that no I/O is attempted
        let config = config_for("http://127.0.0.1:1", false);
        let client = CloudClient::new(&config).unwrap();

        let heartbeat = Heartbeat {
            version: "0.1.0".into(),
            modules: vec![],
            status: "online".into(),
            uptime_seconds: 1,
        };
        let err = client.send_heartbeat(&heartbeat).await.unwrap_err();
        assert!(matches!(err, CloudError::NotConfigured));
    }

    #[tokio::test]
    async fn test_heartbeat_sends_bearer_and_body() {
        let server = MockServer::start().await;
        let heartbeat = Heartbeat {
            version: "0.1.0".into(),
            modules: vec!["scale".into()],
            status: "online".into(),
            uptime_seconds: 42,
        };

        Mock::given(method("POST"))
            .and(path("/api/hubs/me/heartbeat/"))
            .and(header("authorization", "Bearer bt_secret"))
            .and(body_json(serde_json::to_value(&heartbeat).unwrap()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = CloudClient::new(&config_for(&server.uri(), true)).unwrap();
        client.send_heartbeat(&heartbeat).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_code_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/hubs/me/commands/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = CloudClient::new(&config_for(&server.uri(), true)).unwrap();
        let err = client.get_pending_commands().await.unwrap_err();
        assert!(matches!(err, CloudError::Unauthorized));

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/api/hubs/me/commands/"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let err = client.get_pending_commands().await.unwrap_err();
        assert!(matches!(err, CloudError::Forbidden));

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/api/hubs/me/commands/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let err = client.get_pending_commands().await.unwrap_err();
        match err {
            CloudError::Http { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Http error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        let config = config_for("http://127.0.0.1:1", true);
        let client = CloudClient::new(&config).unwrap();

        let err = client.get_pending_commands().await.unwrap_err();
        assert!(matches!(err, CloudError::Connection(_)));
    }

    #[tokio::test]
    async fn test_get_pending_commands_decodes_wire_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/hubs/me/commands/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "commands": [
                    {"id": "c-1", "type": "module_install", "payload": {"module": "scale"}, "command_jwt": "a.b.c"},
                    {"id": "c-2", "type": "config_sync"}
                ]
            })))
            .mount(&server)
            .await;

        let client = CloudClient::new(&config_for(&server.uri(), true)).unwrap();
        let commands = client.get_pending_commands().await.unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].command_type, "module_install");
        assert!(commands[1].command_jwt.is_none());
    }

    #[tokio::test]
    async fn test_acknowledge_command_hits_per_command_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/hubs/me/commands/c-9/ack/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = CloudClient::new(&config_for(&server.uri(), true)).unwrap();
        client
            .acknowledge_command("c-9", &CommandAck::failed("Unknown command type"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_public_key_is_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/public-key/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "public_key": "-----BEGIN PUBLIC KEY-----\nABC\n-----END PUBLIC KEY-----"
            })))
            .mount(&server)
            .await;

        // Works even with no credentials at all
        let client = CloudClient::new(&config_for(&server.uri(), false)).unwrap();
        let pem = client.fetch_public_key().await.unwrap();
        assert!(pem.contains("BEGIN PUBLIC KEY"));
    }

    #[tokio::test]
    async fn test_execute_operation_accepts_204() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/users/u-1/"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = CloudClient::new(&config_for(&server.uri(), true)).unwrap();
        client
            .execute_operation(
                HttpMethod::Delete,
                "/api/users/u-1/",
                &serde_json::json!({}),
                &HashMap::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_execute_operation_forwards_extra_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sales/"))
            .and(header("x-idempotency-key", "k-1"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HashMap::new();
        headers.insert("X-Idempotency-Key".to_string(), "k-1".to_string());

        let client = CloudClient::new(&config_for(&server.uri(), true)).unwrap();
        client
            .execute_operation(
                HttpMethod::Post,
                "/api/sales/",
                &serde_json::json!({"sale_id": "s-1"}),
                &headers,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_execute_operation_forwards_query_string_in_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sales/"))
            .and(query_param("source", "offline"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = CloudClient::new(&config_for(&server.uri(), true)).unwrap();
        client
            .execute_operation(
                HttpMethod::Post,
                "/api/sales/?source=offline",
                &serde_json::json!({"sale_id": "s-1"}),
                &HashMap::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_probe_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = CloudClient::new(&config_for(&server.uri(), false)).unwrap();
        assert!(client.probe_health().await.is_ok());

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/api/health/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        assert!(client.probe_health().await.is_err());
    }
}
