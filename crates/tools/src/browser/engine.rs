//! The boundary to the browser engine.
//!
//! Everything the dispatcher and lifecycle manager need from the engine goes
//! through these traits, so a test double can stand in for a real browser.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use surfkit_core::{Cookie, Result};

use super::snapshot::AxNode;

/// Readiness level a navigation waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    /// Minimal DOM readiness; used for the state-restore navigation.
    DomReady,
    /// Network-idle; used for the caller's requested navigation.
    NetworkIdle,
}

/// One isolated browsing context inside a freshly launched engine instance.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Inject cookies into the context. Must be called before any navigation
    /// when restoring state: cookie scoping depends on domain, and an origin
    /// is established on first load.
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()>;

    /// Enumerate the full current cookie jar.
    async fn cookies(&self) -> Result<Vec<Cookie>>;

    async fn navigate(&self, url: &str, wait: WaitUntil, timeout: Duration) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    /// Evaluate a script in the page, returning its JSON value.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Replace the current value of the matched element.
    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()>;

    /// Type into the matched element character by character.
    async fn type_text(&self, selector: &str, text: &str, timeout: Duration) -> Result<()>;

    async fn text_content(&self, selector: &str, timeout: Duration) -> Result<String>;

    /// Dispatch a named key (optionally a modifier chord like "Ctrl+A").
    async fn press_key(&self, key: &str) -> Result<()>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<()>;

    /// Capture a JPEG screenshot, returned as base64.
    async fn screenshot_jpeg(&self, quality: u8, full_page: bool) -> Result<String>;

    /// Retrieve the current accessibility tree root.
    async fn accessibility_tree(&self) -> Result<AxNode>;

    /// Tear down the engine instance. Must be safe to call on every exit
    /// path, including after failed actions.
    async fn close(&self);
}

/// Launches fresh, isolated engine instances. No pooling: every invocation
/// pays full launch and teardown cost, because persisted session state, not
/// a live handle, is the unit of continuity.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn EngineSession>>;
}
