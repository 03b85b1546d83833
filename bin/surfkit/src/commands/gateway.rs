//! HTTP gateway: one POST endpoint dispatching browser actions.
//!
//! Transport concerns live here and nowhere else: bearer-token auth and
//! malformed framing are reported as HTTP status codes, never as action
//! envelopes. The transport registry tracks sessions in flight on this
//! process; it is created at startup and owned by the router state, not a
//! global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use surfkit_core::{Config, Paths};
use surfkit_storage::SessionStore;
use surfkit_tools::browser::Dispatcher;
use surfkit_tools::ToolRegistry;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

const SWEEP_INTERVAL_SECS: u64 = 60;

/// Live map of sessions this process has served. Entries are inserted when
/// an action establishes or reuses a session, removed on explicit close, and
/// swept once their session TTL has lapsed.
pub struct TransportRegistry {
    entries: Mutex<HashMap<String, TransportEntry>>,
}

#[derive(Debug, Clone)]
struct TransportEntry {
    last_action_at: DateTime<Utc>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn touch(&self, session_id: &str) {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(session_id.to_string())
            .and_modify(|e| e.last_action_at = now)
            .or_insert(TransportEntry {
                last_action_at: now,
            });
    }

    pub fn remove(&self, session_id: &str) {
        self.entries.lock().unwrap().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose last action is older than the session TTL.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.last_action_at > cutoff);
        before - entries.len()
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct GatewayState {
    dispatcher: Arc<Dispatcher>,
    tools: Arc<ToolRegistry>,
    registry: Arc<TransportRegistry>,
    api_token: Option<String>,
}

fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn authorized(state: &GatewayState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.api_token else {
        return true;
    };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| secure_eq(token, expected))
        .unwrap_or(false)
}

async fn handle_action(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(params): Json<Value>,
) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})))
            .into_response();
    }

    let is_close = params.get("action").and_then(|a| a.as_str()) == Some("close");
    let envelope = state.dispatcher.dispatch(params).await;

    if let Some(session_id) = &envelope.session_id {
        if is_close {
            state.registry.remove(session_id);
        } else if envelope.success {
            state.registry.touch(session_id);
        }
    }

    Json(serde_json::to_value(&envelope).unwrap_or_else(|_| json!({"error": true})))
        .into_response()
}

async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "active_sessions": state.registry.len(),
    }))
}

async fn handle_tools(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})))
            .into_response();
    }
    Json(json!({"tools": state.tools.get_tool_schemas()})).into_response()
}

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let (dispatcher, store) = super::build_dispatcher(&config, &paths);
    let registry = Arc::new(TransportRegistry::new());

    let ttl = Duration::from_secs(config.storage.session_ttl_secs);
    spawn_sweeper(store, registry.clone(), ttl);

    let tools = Arc::new(super::build_registry(dispatcher.clone()));
    let state = GatewayState {
        dispatcher,
        tools,
        registry,
        api_token: config.gateway.api_token.clone(),
    };

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/v1/tools", get(handle_tools))
        .route("/v1/actions", post(handle_action))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let host = host.unwrap_or(config.gateway.host);
    let port = port.unwrap_or(config.gateway.port);
    let addr = format!("{}:{}", host, port);

    info!(addr = %addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_sweeper(store: Arc<SessionStore>, registry: Arc<TransportRegistry>, ttl: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let stored = store.sweep();
            let transported = registry.sweep(ttl);
            if stored > 0 || transported > 0 {
                debug!(stored, transported, "swept expired sessions");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_eq() {
        assert!(secure_eq("token", "token"));
        assert!(!secure_eq("token", "other"));
        assert!(!secure_eq("token", "toke"));
    }

    #[test]
    fn test_registry_touch_and_remove() {
        let registry = TransportRegistry::new();
        assert!(registry.is_empty());

        registry.touch("s1");
        registry.touch("s1");
        registry.touch("s2");
        assert_eq!(registry.len(), 2);

        registry.remove("s1");
        assert_eq!(registry.len(), 1);
        // Removing an unknown id is a no-op.
        registry.remove("s1");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_sweep() {
        let registry = TransportRegistry::new();
        registry.touch("stale");
        assert_eq!(registry.sweep(Duration::from_secs(0)), 1);
        assert!(registry.is_empty());

        registry.touch("fresh");
        assert_eq!(registry.sweep(Duration::from_secs(900)), 0);
        assert_eq!(registry.len(), 1);
    }
}
