//! In-memory engine double for dispatcher and lifecycle tests.
//!
//! Records every engine interaction in order so tests can assert on call
//! sequencing (e.g. cookies injected before the first navigation).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use surfkit_core::{Cookie, Error, Result};

use super::engine::{EngineLauncher, EngineSession, WaitUntil};
use super::snapshot::AxNode;

#[derive(Debug)]
pub struct MockState {
    log: Vec<String>,
    url: String,
    title: String,
    redirects: HashMap<String, String>,
    cookies: Vec<Cookie>,
    storage: serde_json::Map<String, Value>,
    selectors: HashSet<String>,
    texts: HashMap<String, String>,
    page_text: String,
    tree: AxNode,
    fail_launch: bool,
    fail_navigate: bool,
    fail_evaluate: bool,
    closed: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            url: String::new(),
            title: "Mock Page".into(),
            redirects: HashMap::new(),
            cookies: Vec::new(),
            storage: serde_json::Map::new(),
            selectors: HashSet::new(),
            texts: HashMap::new(),
            page_text: String::new(),
            tree: AxNode::new("RootWebArea", "Mock Page")
                .with_children(vec![AxNode::new("button", "OK")]),
            fail_launch: false,
            fail_navigate: false,
            fail_evaluate: false,
            closed: false,
        }
    }
}

/// Shared handle for configuring the double and inspecting its call log.
#[derive(Clone, Default)]
pub struct StateHandle(Arc<Mutex<MockState>>);

impl StateHandle {
    pub fn log(&self) -> Vec<String> {
        self.0.lock().unwrap().log.clone()
    }

    pub fn closed(&self) -> bool {
        self.0.lock().unwrap().closed
    }

    pub fn set_url(&self, url: &str) {
        self.0.lock().unwrap().url = url.to_string();
    }

    pub fn set_title(&self, title: &str) {
        self.0.lock().unwrap().title = title.to_string();
    }

    pub fn set_redirect(&self, from: &str, to: &str) {
        self.0
            .lock()
            .unwrap()
            .redirects
            .insert(from.to_string(), to.to_string());
    }

    pub fn add_cookie(&self, cookie: Cookie) {
        self.0.lock().unwrap().cookies.push(cookie);
    }

    pub fn add_selector(&self, selector: &str) {
        self.0.lock().unwrap().selectors.insert(selector.to_string());
    }

    pub fn set_text(&self, selector: &str, text: &str) {
        let mut state = self.0.lock().unwrap();
        state.selectors.insert(selector.to_string());
        state.texts.insert(selector.to_string(), text.to_string());
    }

    pub fn set_page_text(&self, text: &str) {
        self.0.lock().unwrap().page_text = text.to_string();
    }

    pub fn set_tree(&self, tree: AxNode) {
        self.0.lock().unwrap().tree = tree;
    }

    pub fn set_storage(&self, key: &str, value: &str) {
        self.0
            .lock()
            .unwrap()
            .storage
            .insert(key.to_string(), json!(value));
    }

    pub fn fail_launch(&self, fail: bool) {
        self.0.lock().unwrap().fail_launch = fail;
    }

    pub fn fail_navigate(&self, fail: bool) {
        self.0.lock().unwrap().fail_navigate = fail;
    }

    pub fn fail_evaluate(&self, fail: bool) {
        self.0.lock().unwrap().fail_evaluate = fail;
    }
}

#[derive(Clone, Default)]
pub struct MockLauncher {
    state: StateHandle,
}

impl MockLauncher {
    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }
}

#[async_trait]
impl EngineLauncher for MockLauncher {
    async fn launch(&self) -> Result<Box<dyn EngineSession>> {
        let mut state = self.state.0.lock().unwrap();
        if state.fail_launch {
            return Err(Error::Engine("mock launch failure".into()));
        }
        state.log.push("launch".into());
        drop(state);
        Ok(Box::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

pub struct MockSession {
    state: StateHandle,
}

impl MockSession {
    fn push(&self, entry: impl Into<String>) {
        self.state.0.lock().unwrap().log.push(entry.into());
    }
}

#[async_trait]
impl EngineSession for MockSession {
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let mut state = self.state.0.lock().unwrap();
        state.log.push(format!("set_cookies:{}", cookies.len()));
        state.cookies.extend(cookies.iter().cloned());
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.state.0.lock().unwrap().cookies.clone())
    }

    async fn navigate(&self, url: &str, wait: WaitUntil, _timeout: Duration) -> Result<()> {
        let mut state = self.state.0.lock().unwrap();
        if state.fail_navigate {
            return Err(Error::NavigationTimeout(format!("{} did not settle", url)));
        }
        let mode = match wait {
            WaitUntil::DomReady => "dom",
            WaitUntil::NetworkIdle => "idle",
        };
        state.log.push(format!("navigate:{}:{}", url, mode));
        state.url = state
            .redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.0.lock().unwrap().url.clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.state.0.lock().unwrap().title.clone())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let mut state = self.state.0.lock().unwrap();
        if state.fail_evaluate {
            return Err(Error::Engine("script execution forbidden".into()));
        }
        state.log.push("evaluate".into());
        if script.contains("readyState") {
            return Ok(json!(true));
        }
        if script.contains("localStorage.key") {
            return Ok(Value::Object(state.storage.clone()));
        }
        if script.contains("localStorage.setItem") {
            state.log.push("inject_storage".into());
            return Ok(json!(true));
        }
        Ok(Value::Null)
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.0.lock().unwrap();
        if !state.selectors.contains(selector) {
            return Err(Error::ActionTimeout(format!(
                "selector did not match: {}",
                selector
            )));
        }
        state.log.push(format!("click:{}", selector));
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.0.lock().unwrap();
        if !state.selectors.contains(selector) {
            return Err(Error::ActionTimeout(format!(
                "selector did not match: {}",
                selector
            )));
        }
        state.log.push(format!("fill:{}:{}", selector, value));
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.0.lock().unwrap();
        if !state.selectors.contains(selector) {
            return Err(Error::ActionTimeout(format!(
                "selector did not match: {}",
                selector
            )));
        }
        state.log.push(format!("type:{}:{}", selector, text));
        Ok(())
    }

    async fn text_content(&self, selector: &str, _timeout: Duration) -> Result<String> {
        let state = self.state.0.lock().unwrap();
        state
            .texts
            .get(selector)
            .cloned()
            .ok_or_else(|| Error::ActionTimeout(format!("selector did not match: {}", selector)))
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.push(format!("press_key:{}", key));
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<()> {
        let state = self.state.0.lock().unwrap();
        if state.selectors.contains(selector) {
            Ok(())
        } else {
            Err(Error::ActionTimeout(format!(
                "selector did not appear: {}",
                selector
            )))
        }
    }

    async fn wait_for_text(&self, text: &str, _timeout: Duration) -> Result<()> {
        let state = self.state.0.lock().unwrap();
        if state.page_text.contains(text) {
            Ok(())
        } else {
            Err(Error::ActionTimeout(format!("text did not appear: {}", text)))
        }
    }

    async fn screenshot_jpeg(&self, quality: u8, full_page: bool) -> Result<String> {
        self.push(format!("screenshot:q{}:full={}", quality, full_page));
        // "mock-jpeg-bytes" in base64.
        Ok("bW9jay1qcGVnLWJ5dGVz".to_string())
    }

    async fn accessibility_tree(&self) -> Result<AxNode> {
        Ok(self.state.0.lock().unwrap().tree.clone())
    }

    async fn close(&self) {
        let mut state = self.state.0.lock().unwrap();
        state.log.push("close".into());
        state.closed = true;
    }
}
