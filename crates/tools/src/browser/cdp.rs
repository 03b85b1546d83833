//! Low-level Chrome DevTools Protocol client over WebSocket.
//!
//! Talks to a Chrome/Chromium instance through its debugging endpoint:
//! id-correlated commands, event subscription, per-command timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use surfkit_core::{Cookie, Error, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use super::snapshot::AxNode;

const COMMAND_TIMEOUT_SECS: u64 = 30;

/// A CDP WebSocket client attached to one page target.
pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    next_id: AtomicU64,
    event_listeners: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a page target's WebSocket debugger URL.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Engine(format!("CDP connect to {} failed: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        // Writer task owns the sink and forwards outgoing frames.
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP write error: {}", e);
                    break;
                }
            }
        });

        // Reader task dispatches command responses and events.
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let listeners = events_clone.lock().await;
                            if let Some(senders) = listeners.get(method) {
                                let params =
                                    val.get("params").cloned().unwrap_or(Value::Null);
                                for tx in senders {
                                    let _ = tx.try_send(params.clone());
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            reader_handle,
            writer_handle,
        })
    }

    /// Send a command and wait for its response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({"id": id, "method": method, "params": params});

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Engine(format!("CDP send failed: {}", e)))?;

        let deadline = std::time::Duration::from_secs(COMMAND_TIMEOUT_SECS);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => {
                if let Some(err) = response.get("error") {
                    Err(Error::Engine(format!("CDP {}: {}", method, err)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Engine("CDP response channel closed".into())),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(Error::Engine(format!(
                    "CDP command '{}' timed out after {}s",
                    method, COMMAND_TIMEOUT_SECS
                )))
            }
        }
    }

    /// Subscribe to a CDP event; the receiver gets each event's params.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        let mut listeners = self.event_listeners.lock().await;
        listeners.entry(method.to_string()).or_default().push(tx);
        rx
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    /// Emit page lifecycle events (used for navigation readiness waits).
    pub async fn enable_lifecycle_events(&self) -> Result<()> {
        self.send_command("Page.setLifecycleEventsEnabled", json!({"enabled": true}))
            .await?;
        Ok(())
    }

    pub async fn start_navigation(&self, url: &str) -> Result<()> {
        let result = self
            .send_command("Page.navigate", json!({"url": url}))
            .await?;
        if let Some(text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Engine(format!("navigation failed: {}", text)));
        }
        Ok(())
    }

    /// Evaluate an expression, returning its value (promises awaited).
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(text) = result
            .get("exceptionDetails")
            .and_then(|e| e.get("text"))
            .and_then(|t| t.as_str())
        {
            return Err(Error::Engine(format!("script exception: {}", text)));
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1.0,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.send_command(
            "Emulation.setUserAgentOverride",
            json!({"userAgent": user_agent}),
        )
        .await?;
        Ok(())
    }

    /// Restore cookies verbatim, attributes included.
    pub async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        let params: Vec<Value> = cookies.iter().map(cookie_to_cdp).collect();
        self.send_command("Network.setCookies", json!({"cookies": params}))
            .await?;
        Ok(())
    }

    /// Enumerate the full cookie jar.
    pub async fn get_cookies(&self) -> Result<Vec<Cookie>> {
        let result = self.send_command("Network.getCookies", json!({})).await?;
        Ok(result
            .get("cookies")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(cookie_from_cdp).collect())
            .unwrap_or_default())
    }

    /// JPEG screenshot as base64.
    pub async fn screenshot_jpeg(&self, quality: u8, full_page: bool) -> Result<String> {
        let mut params = json!({"format": "jpeg", "quality": quality});
        if full_page {
            params["captureBeyondViewport"] = json!(true);
        }
        let result = self.send_command("Page.captureScreenshot", params).await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Engine("no screenshot data returned".into()))
    }

    /// Fetch and parse the full accessibility tree.
    pub async fn accessibility_tree(&self) -> Result<AxNode> {
        let result = self
            .send_command("Accessibility.getFullAXTree", json!({}))
            .await?;
        parse_ax_tree(&result)
            .ok_or_else(|| Error::Engine("empty accessibility tree".into()))
    }

    pub async fn dispatch_key_event(
        &self,
        event_type: &str,
        key: &str,
        code: &str,
        modifiers: i32,
    ) -> Result<()> {
        let mut params = json!({
            "type": event_type,
            "key": key,
            "code": code,
        });
        if modifiers != 0 {
            params["modifiers"] = json!(modifiers);
        }
        // Printable characters need text for the key to produce input.
        if event_type == "keyDown" && key.chars().count() == 1 {
            params["text"] = json!(key);
        }
        self.send_command("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    /// Best-effort browser shutdown over the protocol.
    pub async fn close_browser(&self) {
        if let Err(e) = self.send_command("Browser.close", json!({})).await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

fn cookie_to_cdp(cookie: &Cookie) -> Value {
    let mut v = json!({
        "name": cookie.name,
        "value": cookie.value,
        "domain": cookie.domain,
        "path": cookie.path,
    });
    if let Some(expires) = cookie.expires {
        v["expires"] = json!(expires);
    }
    if let Some(http_only) = cookie.http_only {
        v["httpOnly"] = json!(http_only);
    }
    if let Some(secure) = cookie.secure {
        v["secure"] = json!(secure);
    }
    if let Some(ref same_site) = cookie.same_site {
        v["sameSite"] = json!(same_site);
    }
    v
}

fn cookie_from_cdp(v: &Value) -> Option<Cookie> {
    Some(Cookie {
        name: v.get("name")?.as_str()?.to_string(),
        value: v.get("value")?.as_str()?.to_string(),
        domain: v.get("domain").and_then(|d| d.as_str()).unwrap_or_default().to_string(),
        path: v.get("path").and_then(|p| p.as_str()).unwrap_or("/").to_string(),
        expires: v.get("expires").and_then(|e| e.as_f64()).filter(|e| *e >= 0.0),
        http_only: v.get("httpOnly").and_then(|b| b.as_bool()),
        secure: v.get("secure").and_then(|b| b.as_bool()),
        same_site: v.get("sameSite").and_then(|s| s.as_str()).map(String::from),
    })
}

/// Parse the flat `Accessibility.getFullAXTree` node list into a tree of
/// (role, name, children). The first node is the root.
fn parse_ax_tree(response: &Value) -> Option<AxNode> {
    let nodes = response.get("nodes")?.as_array()?;
    let root = nodes.first()?;

    let mut by_id: HashMap<&str, &Value> = HashMap::new();
    for node in nodes {
        if let Some(id) = node.get("nodeId").and_then(|v| v.as_str()) {
            by_id.insert(id, node);
        }
    }

    let root_id = root.get("nodeId").and_then(|v| v.as_str())?;
    Some(build_node(root_id, &by_id))
}

fn build_node(node_id: &str, by_id: &HashMap<&str, &Value>) -> AxNode {
    let Some(node) = by_id.get(node_id) else {
        return AxNode::new("unknown", "");
    };

    let children = node
        .get("childIds")
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str())
                .map(|id| build_node(id, by_id))
                .collect()
        })
        .unwrap_or_default();

    AxNode {
        role: ax_value(node, "role"),
        name: ax_value(node, "name"),
        children,
    }
}

/// CDP wraps role/name as `{type, value}` objects.
fn ax_value(node: &Value, field: &str) -> String {
    node.get(field)
        .and_then(|v| v.get("value").and_then(|val| val.as_str()).or_else(|| v.as_str()))
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ax_tree() {
        let response = json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "role": {"type": "role", "value": "RootWebArea"},
                    "name": {"type": "computedString", "value": "Example"},
                    "childIds": ["2", "3"]
                },
                {
                    "nodeId": "2",
                    "role": {"type": "role", "value": "heading"},
                    "name": {"type": "computedString", "value": "Example Domain"}
                },
                {
                    "nodeId": "3",
                    "role": {"type": "role", "value": "link"},
                    "name": {"type": "computedString", "value": "More information..."}
                }
            ]
        });

        let tree = parse_ax_tree(&response).unwrap();
        assert_eq!(tree.role, "RootWebArea");
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].role, "heading");
        assert_eq!(tree.children[1].name, "More information...");
    }

    #[test]
    fn test_parse_ax_tree_empty() {
        assert!(parse_ax_tree(&json!({"nodes": []})).is_none());
        assert!(parse_ax_tree(&json!({})).is_none());
    }

    #[test]
    fn test_cookie_round_trip_through_cdp_shape() {
        let cookie = Cookie {
            name: "sid".into(),
            value: "v".into(),
            domain: ".a.test".into(),
            path: "/".into(),
            expires: Some(1_900_000_000.0),
            http_only: Some(true),
            secure: Some(false),
            same_site: Some("Strict".into()),
        };
        let back = cookie_from_cdp(&cookie_to_cdp(&cookie)).unwrap();
        assert_eq!(back, cookie);
    }

    #[test]
    fn test_session_cookie_negative_expiry_dropped() {
        let v = json!({"name": "a", "value": "b", "domain": "x", "path": "/", "expires": -1.0});
        let cookie = cookie_from_cdp(&v).unwrap();
        assert_eq!(cookie.expires, None);
    }
}
