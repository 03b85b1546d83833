//! The browser action dispatcher.
//!
//! Every invocation runs five ordered phases: validate, load, acquire &
//! navigate, act, release & respond. Release always executes once an engine
//! was acquired, failed actions included, so engine teardown and state
//! persistence cannot be skipped by any control-flow branch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use surfkit_core::config::BrowserConfig;
use surfkit_core::{Result, SessionRecord};
use surfkit_storage::SessionStore;
use tracing::{debug, info};

use crate::{Tool, ToolContext, ToolSchema};

use super::actions::{Action, Envelope, RefSummary};
use super::engine::{EngineLauncher, EngineSession, WaitUntil};
use super::lifecycle::{CarriedState, LifecycleManager};
use super::refs;
use super::snapshot::{self, Snapshot};

const MAX_WAIT_SECS: f64 = 30.0;
const MAX_TEXT_BYTES: usize = 50_000;

/// What phase 4 produced, before it is folded into the result envelope.
struct ActOutcome {
    url: String,
    title: Option<String>,
    message: Option<String>,
    text: Option<String>,
    snapshot: Option<Snapshot>,
    screenshot: Option<String>,
}

impl ActOutcome {
    fn at(url: String) -> Self {
        Self {
            url,
            title: None,
            message: None,
            text: None,
            snapshot: None,
            screenshot: None,
        }
    }
}

pub struct Dispatcher {
    store: Arc<SessionStore>,
    lifecycle: LifecycleManager,
    config: BrowserConfig,
}

impl Dispatcher {
    pub fn new(
        launcher: Arc<dyn EngineLauncher>,
        store: Arc<SessionStore>,
        config: BrowserConfig,
    ) -> Self {
        Self {
            lifecycle: LifecycleManager::new(launcher, store.clone(), config.clone()),
            store,
            config,
        }
    }

    /// Run one action from a flat argument mapping to a result envelope.
    /// Errors never escape as transport faults; they become error envelopes.
    pub async fn dispatch(&self, params: Value) -> Envelope {
        let action = match Action::from_value(params) {
            Ok(action) => action,
            Err(e) => return Envelope::fail(e.to_string()),
        };

        info!(action = action.name(), "dispatching browser action");
        match self.run(action).await {
            Ok(envelope) => envelope,
            Err(e) => Envelope::fail(e.to_string()),
        }
    }

    async fn run(&self, action: Action) -> Result<Envelope> {
        // Phase 1: validate. Nothing is launched or loaded on failure.
        action.validate()?;

        // Session close touches only the store; phases 2-4 are bypassed and
        // deleting an unknown id still reports success.
        if let Action::Close(args) = &action {
            let session_id = args.session_id.as_deref().unwrap_or_default();
            self.store.delete(session_id);
            return Ok(Envelope::ok(session_id).with_message("session closed"));
        }

        // Phase 2: load. Absence just means a fresh session.
        let supplied = action.session_id().map(str::to_string);
        let prior = supplied.as_deref().and_then(|id| self.store.get(id));
        let session_id =
            supplied.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if prior.is_none() {
            debug!(session_id = %session_id, "no prior session state");
        }

        // Phase 3a: acquire restores cookies and local storage.
        let engine = self.lifecycle.acquire(prior.as_ref()).await?;

        // Phases 3b and 4 run guarded: whatever they return, release
        // recaptures state, persists it, and closes the engine.
        let outcome = self
            .navigate_and_act(engine.as_ref(), &action, prior.as_ref())
            .await;

        let mut carried = CarriedState::from_prior(prior.as_ref());
        if let Ok(out) = &outcome {
            if let Some(snap) = &out.snapshot {
                carried = carried.with_snapshot(snap.outline.clone(), snap.refs.clone());
            }
        }
        self.lifecycle
            .release(engine.as_ref(), &session_id, carried)
            .await;

        // Phase 5: respond.
        let out = outcome?;
        let envelope = Envelope::ok(session_id.as_str());
        Ok(match &action {
            Action::Open(_) => {
                let message = format!("Opened {}", out.url);
                let envelope = envelope.with_url(out.url).with_message(message);
                match out.title {
                    Some(title) => envelope.with_title(title),
                    None => envelope,
                }
            }
            Action::Snapshot(_) => {
                let snap = out.snapshot.unwrap_or(Snapshot {
                    outline: String::new(),
                    refs: Default::default(),
                });
                let summaries: Vec<RefSummary> = snap
                    .refs
                    .iter()
                    .map(|(token, entry)| RefSummary {
                        ref_: token.clone(),
                        role: entry.role.clone(),
                        name: entry.name.clone(),
                    })
                    .collect();
                envelope
                    .with_url(out.url)
                    .with_snapshot(snap.outline, summaries)
            }
            Action::GetText(_) => envelope.with_text(out.text.unwrap_or_default()),
            Action::Screenshot(_) => envelope
                .with_url(out.url)
                .with_screenshot(out.screenshot.unwrap_or_default()),
            _ => {
                let envelope = envelope.with_url(out.url);
                match out.message {
                    Some(message) => envelope.with_message(message),
                    None => envelope,
                }
            }
        })
    }

    /// Phases 3b (navigation) and 4 (the action itself).
    async fn navigate_and_act(
        &self,
        engine: &dyn EngineSession,
        action: &Action,
        prior: Option<&SessionRecord>,
    ) -> Result<ActOutcome> {
        let nav_timeout = Duration::from_millis(self.config.navigation_timeout_ms);
        let act_timeout = Duration::from_millis(self.config.action_timeout_ms);

        // Explicit URL argument wins; else resume at the session's last URL.
        let target = action
            .url()
            .map(str::to_string)
            .or_else(|| {
                prior
                    .map(|p| p.url.clone())
                    .filter(|url| !url.is_empty())
            });
        if let Some(url) = &target {
            engine.navigate(url, WaitUntil::NetworkIdle, nav_timeout).await?;
        }

        let table = prior.and_then(|p| p.refs.as_ref());

        let mut out = match action {
            Action::Open(_) => {
                let mut out = ActOutcome::at(String::new());
                out.title = engine.title().await.ok();
                out
            }
            Action::Snapshot(_) => {
                let tree = engine.accessibility_tree().await?;
                let mut out = ActOutcome::at(String::new());
                out.snapshot = Some(snapshot::index(&tree));
                out
            }
            Action::Click(args) => {
                let selector =
                    refs::resolve(args.ref_.as_deref(), args.selector.as_deref(), table)?;
                engine.click(&selector, act_timeout).await?;
                let mut out = ActOutcome::at(String::new());
                out.message = Some(format!("Clicked {}", selector));
                out
            }
            Action::Fill(args) => {
                let selector = refs::resolve(
                    args.locate.ref_.as_deref(),
                    args.locate.selector.as_deref(),
                    table,
                )?;
                let value = args.value.as_deref().unwrap_or_default();
                engine.fill(&selector, value, act_timeout).await?;
                let mut out = ActOutcome::at(String::new());
                out.message = Some(format!("Filled {}", selector));
                out
            }
            Action::Type(args) => {
                let selector = refs::resolve(
                    args.locate.ref_.as_deref(),
                    args.locate.selector.as_deref(),
                    table,
                )?;
                let text = args.text.as_deref().unwrap_or_default();
                engine.type_text(&selector, text, act_timeout).await?;
                if args.submit {
                    engine.press_key("Enter").await?;
                    self.settle(engine).await;
                }
                let mut out = ActOutcome::at(String::new());
                out.message = Some(format!("Typed into {}", selector));
                out
            }
            Action::GetText(args) => {
                let selector =
                    refs::resolve(args.ref_.as_deref(), args.selector.as_deref(), table)?;
                let text = engine.text_content(&selector, act_timeout).await?;
                let text = if text.len() > MAX_TEXT_BYTES {
                    format!(
                        "{}...\n[truncated, {} total chars]",
                        crate::safe_truncate(&text, MAX_TEXT_BYTES),
                        text.len()
                    )
                } else {
                    text
                };
                let mut out = ActOutcome::at(String::new());
                out.text = Some(text);
                out
            }
            Action::Screenshot(args) => {
                let data = engine
                    .screenshot_jpeg(self.config.screenshot_quality, args.full_page)
                    .await?;
                let mut out = ActOutcome::at(String::new());
                out.screenshot = Some(data);
                out
            }
            Action::Wait(args) => {
                let message = if let Some(secs) = args.time {
                    let secs = secs.clamp(0.0, MAX_WAIT_SECS);
                    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                    format!("Waited {}s", secs)
                } else if let Some(text) = &args.text {
                    engine.wait_for_text(text, act_timeout).await?;
                    format!("Text appeared: {}", text)
                } else if let Some(selector) = &args.selector {
                    engine.wait_for_selector(selector, act_timeout).await?;
                    format!("Selector matched: {}", selector)
                } else {
                    // Unreachable past validation.
                    String::new()
                };
                let mut out = ActOutcome::at(String::new());
                out.message = Some(message);
                out
            }
            Action::PressKey(args) => {
                let key = args.key.as_deref().unwrap_or_default();
                engine.press_key(key).await?;
                let mut out = ActOutcome::at(String::new());
                out.message = Some(format!("Pressed {}", key));
                out
            }
            Action::Close(_) => unreachable!("close bypasses dispatch phases 2-4"),
        };

        // The envelope reports the final (possibly redirected) address.
        out.url = engine.current_url().await.unwrap_or_default();
        Ok(out)
    }

    /// Best-effort wait for the page to settle after a submitting keystroke.
    /// Exceeding the bound is not an error.
    async fn settle(&self, engine: &dyn EngineSession) {
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.settle_timeout_ms);
        loop {
            if let Ok(value) = engine.evaluate("document.readyState === 'complete'").await {
                if value.as_bool() == Some(true) {
                    return;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// The browser tool: stateless per call, with continuity through the
/// persisted session record.
pub struct BrowserTool {
    dispatcher: Arc<Dispatcher>,
}

impl BrowserTool {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "browser",
            description: "Browser automation with persisted sessions. Each call runs in a \
                fresh browser restored from the session record (cookies, local storage, \
                current URL, element refs from the last snapshot). Use 'snapshot' to read \
                page structure and get element refs (e1, e2, ...), then target them with \
                'click', 'fill', 'type', or 'get_text'.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": [
                            "open", "snapshot", "click", "fill", "type",
                            "get_text", "screenshot", "wait", "press_key", "close"
                        ],
                        "description": "'open'=navigate to url; 'snapshot'=accessibility outline with element refs; 'click'/'fill'/'type'/'get_text'=element actions (require ref or selector); 'screenshot'=JPEG capture; 'wait'=wait for time/text/selector; 'press_key'=keyboard dispatch; 'close'=delete the session record."
                    },
                    "session_id": {
                        "type": "string",
                        "description": "Session to resume. Omitted on 'open': a new session is minted."
                    },
                    "url": {
                        "type": "string",
                        "description": "URL to navigate to before acting (required for 'open')"
                    },
                    "ref": {
                        "type": "string",
                        "description": "Element ref from the last snapshot (e.g. 'e3' or '@e3')"
                    },
                    "selector": {
                        "type": "string",
                        "description": "Raw selector, used when no ref is given or known"
                    },
                    "value": {
                        "type": "string",
                        "description": "Replacement value for 'fill'"
                    },
                    "text": {
                        "type": "string",
                        "description": "Text to type (for 'type') or to wait for (for 'wait')"
                    },
                    "submit": {
                        "type": "boolean",
                        "description": "For 'type': press Enter afterwards (default: false)"
                    },
                    "key": {
                        "type": "string",
                        "description": "Key for 'press_key' (e.g. 'Enter', 'Tab', 'Ctrl+A')"
                    },
                    "time": {
                        "type": "number",
                        "description": "Seconds to wait (for 'wait', capped at 30)"
                    },
                    "full_page": {
                        "type": "boolean",
                        "description": "Full page screenshot (default: false)"
                    }
                },
                "required": ["action"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        Action::from_value(params.clone())?.validate()
    }

    async fn execute(&self, _ctx: ToolContext, params: Value) -> Result<Value> {
        let envelope = self.dispatcher.dispatch(params).await;
        Ok(serde_json::to_value(envelope)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::MockLauncher;
    use surfkit_core::Paths;

    struct Harness {
        dispatcher: Dispatcher,
        launcher: MockLauncher,
        store: Arc<SessionStore>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::new(
            Paths::with_base(dir.path().to_path_buf()),
            900,
        ));
        let launcher = MockLauncher::default();
        let config = BrowserConfig {
            settle_timeout_ms: 50,
            ..BrowserConfig::default()
        };
        let dispatcher = Dispatcher::new(
            Arc::new(launcher.clone()),
            store.clone(),
            config,
        );
        Harness {
            dispatcher,
            launcher,
            store,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_open_mints_session_and_reports_final_url() {
        let h = harness();
        h.launcher
            .state()
            .set_redirect("https://a.test", "https://a.test/home");
        h.launcher.state().set_title("A Test");

        let envelope = h
            .dispatcher
            .dispatch(json!({"action": "open", "url": "https://a.test"}))
            .await;

        assert!(envelope.success);
        let session_id = envelope.session_id.expect("minted session id");
        assert!(!session_id.is_empty());
        assert_eq!(envelope.url.as_deref(), Some("https://a.test/home"));
        assert_eq!(envelope.title.as_deref(), Some("A Test"));
        assert!(h.store.get(&session_id).is_some());
        assert!(h.launcher.state().closed());
    }

    #[tokio::test]
    async fn test_click_by_ref_without_snapshot_is_resolution_error() {
        let h = harness();
        let opened = h
            .dispatcher
            .dispatch(json!({"action": "open", "url": "https://a.test"}))
            .await;
        let session_id = opened.session_id.unwrap();

        let envelope = h
            .dispatcher
            .dispatch(json!({"action": "click", "session_id": session_id, "ref": "@e1"}))
            .await;

        assert!(!envelope.success);
        assert_eq!(envelope.error, Some(true));
        assert!(envelope.message.unwrap().contains("not found"));
        // The engine acquired for the failed call was still torn down.
        assert!(h.launcher.state().closed());
    }

    #[tokio::test]
    async fn test_screenshot_payload_is_jpeg_base64() {
        let h = harness();
        let envelope = h
            .dispatcher
            .dispatch(json!({"action": "screenshot", "url": "https://a.test", "full_page": true}))
            .await;

        assert!(envelope.success);
        assert_eq!(envelope.media_type.as_deref(), Some("image/jpeg"));
        assert!(!envelope.screenshot.unwrap().is_empty());
        assert!(h
            .launcher
            .state()
            .log()
            .iter()
            .any(|e| e == "screenshot:q80:full=true"));
    }

    #[tokio::test]
    async fn test_validation_failure_launches_no_engine() {
        let h = harness();
        let envelope = h.dispatcher.dispatch(json!({"action": "fill"})).await;

        assert!(!envelope.success);
        assert!(h.launcher.state().log().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_then_click_by_ref() {
        let h = harness();
        let opened = h
            .dispatcher
            .dispatch(json!({"action": "open", "url": "https://a.test"}))
            .await;
        let session_id = opened.session_id.unwrap();

        let snap = h
            .dispatcher
            .dispatch(json!({"action": "snapshot", "session_id": session_id}))
            .await;
        assert!(snap.success);
        let outline = snap.snapshot.unwrap();
        assert!(outline.contains("button \"OK\" [ref=e1]"));

        // The ref summary carries role and name but withholds the selector.
        let refs = snap.refs.unwrap();
        assert_eq!(refs[0].role, "button");
        let as_json = serde_json::to_value(&refs).unwrap();
        assert!(as_json[0].get("selector").is_none());

        // The table persisted with the session resolves the ref next call.
        h.launcher
            .state()
            .add_selector("[role=\"button\"][name=\"OK\"]");
        let clicked = h
            .dispatcher
            .dispatch(json!({"action": "click", "session_id": session_id, "ref": "e1"}))
            .await;
        assert!(clicked.success, "{:?}", clicked.message);
    }

    #[tokio::test]
    async fn test_refs_survive_non_snapshot_actions() {
        let h = harness();
        let opened = h
            .dispatcher
            .dispatch(json!({"action": "open", "url": "https://a.test"}))
            .await;
        let session_id = opened.session_id.unwrap();

        h.dispatcher
            .dispatch(json!({"action": "snapshot", "session_id": session_id}))
            .await;
        h.launcher
            .state()
            .add_selector("[role=\"button\"][name=\"OK\"]");

        // Two ref-targeted clicks in a row: the table is carried through the
        // first click's save.
        for _ in 0..2 {
            let clicked = h
                .dispatcher
                .dispatch(json!({"action": "click", "session_id": session_id, "ref": "e1"}))
                .await;
            assert!(clicked.success);
        }
    }

    #[tokio::test]
    async fn test_action_timeout_still_persists_and_closes() {
        let h = harness();
        let envelope = h
            .dispatcher
            .dispatch(json!({
                "action": "click", "url": "https://a.test",
                "session_id": "s-fail", "selector": "#missing"
            }))
            .await;

        assert!(!envelope.success);
        assert!(h.launcher.state().closed());
        // State captured up to the failure was still persisted.
        let record = h.store.get("s-fail").expect("record persisted");
        assert_eq!(record.url, "https://a.test");
    }

    #[tokio::test]
    async fn test_unknown_session_id_proceeds_fresh() {
        let h = harness();
        h.launcher.state().add_selector("#go");
        let envelope = h
            .dispatcher
            .dispatch(json!({"action": "click", "session_id": "ghost", "selector": "#go"}))
            .await;

        assert!(envelope.success);
        assert_eq!(envelope.session_id.as_deref(), Some("ghost"));
    }

    #[tokio::test]
    async fn test_navigation_timeout_is_error_envelope() {
        let h = harness();
        h.launcher.state().fail_navigate(true);
        let envelope = h
            .dispatcher
            .dispatch(json!({"action": "open", "url": "https://slow.test"}))
            .await;

        assert!(!envelope.success);
        assert!(envelope.message.unwrap().contains("did not settle"));
        // Release still ran for the engine acquired before the failure.
        assert!(h.launcher.state().closed());
    }

    #[tokio::test]
    async fn test_launch_failure_is_error_envelope() {
        let h = harness();
        h.launcher.state().fail_launch(true);
        let envelope = h
            .dispatcher
            .dispatch(json!({"action": "open", "url": "https://a.test"}))
            .await;

        assert!(!envelope.success);
        assert!(h.launcher.state().log().is_empty());
    }

    #[tokio::test]
    async fn test_second_snapshot_renumbers_from_one() {
        use crate::browser::snapshot::AxNode;

        let h = harness();
        let opened = h
            .dispatcher
            .dispatch(json!({"action": "open", "url": "https://a.test"}))
            .await;
        let session_id = opened.session_id.unwrap();

        let first = h
            .dispatcher
            .dispatch(json!({"action": "snapshot", "session_id": session_id}))
            .await;
        assert_eq!(first.refs.unwrap().len(), 1);

        // The page changed; the next pass renumbers from e1 and replaces the
        // table wholesale.
        h.launcher.state().set_tree(
            AxNode::new("RootWebArea", "").with_children(vec![
                AxNode::new("link", "Home"),
                AxNode::new("button", "Go"),
            ]),
        );
        let second = h
            .dispatcher
            .dispatch(json!({"action": "snapshot", "session_id": session_id}))
            .await;
        let refs = second.refs.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].ref_, "e1");
        assert_eq!(refs[0].role, "link");
        assert_eq!(refs[1].ref_, "e2");
    }

    #[tokio::test]
    async fn test_close_unknown_session_reports_success() {
        let h = harness();
        let envelope = h
            .dispatcher
            .dispatch(json!({"action": "close", "session_id": "never-existed"}))
            .await;

        assert!(envelope.success);
        // Close bypasses the browser phases entirely.
        assert!(h.launcher.state().log().is_empty());
    }

    #[tokio::test]
    async fn test_type_with_submit_presses_enter() {
        let h = harness();
        h.launcher.state().add_selector("#q");
        let envelope = h
            .dispatcher
            .dispatch(json!({
                "action": "type", "url": "https://a.test",
                "selector": "#q", "text": "rust", "submit": true
            }))
            .await;

        assert!(envelope.success);
        let log = h.launcher.state().log();
        let type_pos = log.iter().position(|e| e.starts_with("type:")).unwrap();
        let key_pos = log.iter().position(|e| e == "press_key:Enter").unwrap();
        assert!(type_pos < key_pos);
    }

    #[tokio::test]
    async fn test_get_text_returns_content() {
        let h = harness();
        h.launcher.state().set_text("#title", "Example Domain");
        let envelope = h
            .dispatcher
            .dispatch(json!({
                "action": "get_text", "url": "https://a.test", "selector": "#title"
            }))
            .await;

        assert!(envelope.success);
        assert_eq!(envelope.text.as_deref(), Some("Example Domain"));
    }

    #[tokio::test]
    async fn test_wait_for_text() {
        let h = harness();
        h.launcher.state().set_page_text("Welcome back");
        let envelope = h
            .dispatcher
            .dispatch(json!({
                "action": "wait", "url": "https://a.test", "text": "Welcome"
            }))
            .await;
        assert!(envelope.success);
    }

    #[tokio::test]
    async fn test_cookies_round_trip_between_calls() {
        let h = harness();
        h.launcher.state().add_cookie(surfkit_core::Cookie {
            name: "sid".into(),
            value: "abc".into(),
            domain: ".a.test".into(),
            path: "/".into(),
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
        });

        let opened = h
            .dispatcher
            .dispatch(json!({"action": "open", "url": "https://a.test"}))
            .await;
        let session_id = opened.session_id.unwrap();

        let record = h.store.get(&session_id).unwrap();
        assert_eq!(record.cookies.len(), 1);
        assert_eq!(record.cookies[0].name, "sid");

        // The next call against the session restores the captured jar
        // before navigating.
        h.dispatcher
            .dispatch(json!({"action": "snapshot", "session_id": session_id}))
            .await;
        let log = h.launcher.state().log();
        let restore_pos = log
            .iter()
            .rposition(|e| e.starts_with("set_cookies"))
            .unwrap();
        let nav_pos = log.iter().rposition(|e| e.starts_with("navigate")).unwrap();
        assert!(restore_pos < nav_pos);
    }
}
