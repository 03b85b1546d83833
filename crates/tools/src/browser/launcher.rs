//! Per-call Chrome launch and the CDP-backed engine session.
//!
//! Every invocation launches a fresh, isolated browser process with its own
//! scratch profile, and tears it down unconditionally when the call ends.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use surfkit_core::config::BrowserConfig;
use surfkit_core::{Cookie, Error, Result};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::cdp::CdpClient;
use super::engine::{EngineLauncher, EngineSession, WaitUntil};
use super::snapshot::AxNode;

const SELECTOR_POLL_MS: u64 = 200;

pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn EngineSession>> {
        let binary = match &self.config.binary {
            Some(path) => path.clone(),
            None => find_browser_binary()
                .ok_or_else(|| Error::Engine("no Chrome/Chromium binary found".into()))?,
        };

        // Scratch profile per invocation keeps contexts fully isolated.
        let user_data_dir =
            std::env::temp_dir().join(format!("surfkit-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&user_data_dir)?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(
            debug_port,
            &user_data_dir,
            self.config.headless,
            self.config.viewport_width,
            self.config.viewport_height,
        );

        info!(port = debug_port, headless = self.config.headless, "launching browser");

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Engine(format!("failed to launch {}: {}", binary, e)))?;

        let session = match connect_session(debug_port, &self.config).await {
            Ok(cdp) => ChromeSession {
                cdp,
                child: Mutex::new(Some(child)),
                user_data_dir,
                action_poll: Duration::from_millis(SELECTOR_POLL_MS),
            },
            Err(e) => {
                // The process must not outlive a failed setup.
                let mut child = child;
                let _ = child.kill().await;
                let _ = std::fs::remove_dir_all(&user_data_dir);
                return Err(e);
            }
        };

        Ok(Box::new(session))
    }
}

async fn connect_session(debug_port: u16, config: &BrowserConfig) -> Result<CdpClient> {
    wait_for_cdp_ready(debug_port, 15).await?;
    let page_ws_url = get_page_ws_url(debug_port).await?;
    let cdp = CdpClient::connect(&page_ws_url).await?;

    for domain in ["Page", "Runtime", "DOM", "Network", "Accessibility"] {
        cdp.enable_domain(domain).await?;
    }
    cdp.enable_lifecycle_events().await?;
    cdp.set_viewport(config.viewport_width, config.viewport_height)
        .await?;
    cdp.set_user_agent(&config.user_agent).await?;

    debug!(ws_url = %page_ws_url, "CDP connection established");
    Ok(cdp)
}

/// One launched browser process plus its page-target CDP connection.
pub struct ChromeSession {
    cdp: CdpClient,
    child: Mutex<Option<Child>>,
    user_data_dir: PathBuf,
    action_poll: Duration,
}

#[async_trait]
impl EngineSession for ChromeSession {
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        self.cdp.set_cookies(cookies).await
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        self.cdp.get_cookies().await
    }

    async fn navigate(&self, url: &str, wait: WaitUntil, timeout: Duration) -> Result<()> {
        let mut rx = match wait {
            WaitUntil::DomReady => self.cdp.subscribe_event("Page.domContentEventFired").await,
            WaitUntil::NetworkIdle => self.cdp.subscribe_event("Page.lifecycleEvent").await,
        };
        self.cdp.start_navigation(url).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::NavigationTimeout(format!(
                    "{} did not settle within {}ms",
                    url,
                    timeout.as_millis()
                )));
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(params)) => match wait {
                    WaitUntil::DomReady => return Ok(()),
                    WaitUntil::NetworkIdle => {
                        if params.get("name").and_then(|n| n.as_str()) == Some("networkIdle") {
                            return Ok(());
                        }
                    }
                },
                Ok(None) => return Err(Error::Engine("CDP event stream closed".into())),
                Err(_) => {
                    return Err(Error::NavigationTimeout(format!(
                        "{} did not settle within {}ms",
                        url,
                        timeout.as_millis()
                    )))
                }
            }
        }
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.cdp.evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> Result<String> {
        let value = self.cdp.evaluate("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.cdp.evaluate(script).await
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.wait_for_selector(selector, timeout).await?;
        let js = format!(
            "(() => {{ const el = document.querySelector('{}'); if (!el) return false; \
             el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
            js_escape(selector)
        );
        if self.cdp.evaluate(&js).await?.as_bool() != Some(true) {
            return Err(Error::ActionTimeout(format!(
                "element vanished before click: {}",
                selector
            )));
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
        self.wait_for_selector(selector, timeout).await?;
        let js = format!(
            "(() => {{ const el = document.querySelector('{}'); if (!el) return false; \
             el.focus(); el.value = {}; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); return true; }})()",
            js_escape(selector),
            serde_json::to_string(value)?
        );
        if self.cdp.evaluate(&js).await?.as_bool() != Some(true) {
            return Err(Error::ActionTimeout(format!(
                "element vanished before fill: {}",
                selector
            )));
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, timeout: Duration) -> Result<()> {
        self.wait_for_selector(selector, timeout).await?;
        let js = format!(
            "document.querySelector('{}')?.focus()",
            js_escape(selector)
        );
        self.cdp.evaluate(&js).await?;

        for ch in text.chars() {
            let key = ch.to_string();
            let code = key_code_for_char(ch);
            self.cdp.dispatch_key_event("keyDown", &key, &code, 0).await?;
            self.cdp.dispatch_key_event("keyUp", &key, &code, 0).await?;
        }
        Ok(())
    }

    async fn text_content(&self, selector: &str, timeout: Duration) -> Result<String> {
        self.wait_for_selector(selector, timeout).await?;
        let js = format!(
            "document.querySelector('{}')?.textContent ?? ''",
            js_escape(selector)
        );
        let value = self.cdp.evaluate(&js).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let (key_name, code, modifiers) = parse_key_spec(key);
        self.cdp
            .dispatch_key_event("keyDown", &key_name, &code, modifiers)
            .await?;
        self.cdp
            .dispatch_key_event("keyUp", &key_name, &code, modifiers)
            .await?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let js = format!("!!document.querySelector('{}')", js_escape(selector));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.cdp.evaluate(&js).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ActionTimeout(format!(
                    "selector did not match within {}ms: {}",
                    timeout.as_millis(),
                    selector
                )));
            }
            tokio::time::sleep(self.action_poll).await;
        }
    }

    async fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<()> {
        let js = format!(
            "(document.body?.innerText ?? '').includes({})",
            serde_json::to_string(text)?
        );
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.cdp.evaluate(&js).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ActionTimeout(format!(
                    "text did not appear within {}ms: {}",
                    timeout.as_millis(),
                    text
                )));
            }
            tokio::time::sleep(self.action_poll).await;
        }
    }

    async fn screenshot_jpeg(&self, quality: u8, full_page: bool) -> Result<String> {
        self.cdp.screenshot_jpeg(quality, full_page).await
    }

    async fn accessibility_tree(&self) -> Result<AxNode> {
        self.cdp.accessibility_tree().await
    }

    async fn close(&self) {
        self.cdp.close_browser().await;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("browser process kill failed: {}", e);
            }
        }
        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            debug!("scratch profile cleanup failed: {}", e);
        }
    }
}

fn build_browser_args(
    debug_port: u16,
    user_data_dir: &std::path::Path,
    headless: bool,
    width: u32,
    height: u32,
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--safebrowsing-disable-auto-update".to_string(),
        "--password-store=basic".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push(format!("--window-size={},{}", width, height));
    args.push("about:blank".to_string());
    args
}

/// Find a Chrome/Chromium binary on the system.
pub fn find_browser_binary() -> Option<String> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Engine(format!("failed to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Engine(format!("failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the debugging endpoint responds.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<()> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Engine(format!(
                "browser CDP endpoint not ready after {}s on port {}",
                timeout_secs, port
            )));
        }
        if let Ok(resp) = reqwest::get(&url).await {
            if resp.json::<Value>().await.is_ok() {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve the first page target's WebSocket URL via /json/list.
async fn get_page_ws_url(port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };
        for target in &targets {
            if target.get("type").and_then(|v| v.as_str()) == Some("page") {
                if let Some(ws_url) =
                    target.get("webSocketDebuggerUrl").and_then(|v| v.as_str())
                {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }

    Err(Error::Engine("no page target found after retries".into()))
}

fn js_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn key_code_for_char(ch: char) -> String {
    if ch.is_ascii_alphabetic() {
        format!("Key{}", ch.to_ascii_uppercase())
    } else if ch.is_ascii_digit() {
        format!("Digit{}", ch)
    } else if ch == ' ' {
        "Space".to_string()
    } else {
        String::new()
    }
}

/// Parse a key specification like "Enter", "Tab", or "Ctrl+A".
pub fn parse_key_spec(key: &str) -> (String, String, i32) {
    let parts: Vec<&str> = key.split('+').collect();
    let mut modifiers = 0i32;
    let mut main_key = key.to_string();

    if parts.len() > 1 {
        for &part in &parts[..parts.len() - 1] {
            match part.to_lowercase().as_str() {
                "ctrl" | "control" => modifiers |= 2,
                "alt" | "option" => modifiers |= 1,
                "shift" => modifiers |= 8,
                "meta" | "cmd" | "command" => modifiers |= 4,
                _ => {}
            }
        }
        main_key = parts.last().unwrap_or(&key).to_string();
    }

    let code = match main_key.as_str() {
        "Enter" | "Return" => "Enter",
        "Tab" => "Tab",
        "Escape" | "Esc" => "Escape",
        "Backspace" => "Backspace",
        "Delete" => "Delete",
        "ArrowUp" | "Up" => "ArrowUp",
        "ArrowDown" | "Down" => "ArrowDown",
        "ArrowLeft" | "Left" => "ArrowLeft",
        "ArrowRight" | "Right" => "ArrowRight",
        "Home" => "Home",
        "End" => "End",
        "PageUp" => "PageUp",
        "PageDown" => "PageDown",
        "Space" | " " => "Space",
        _ => {
            if main_key.chars().count() == 1 {
                let ch = main_key.chars().next().unwrap_or(' ');
                return (main_key.clone(), key_code_for_char(ch), modifiers);
            }
            &main_key
        }
    }
    .to_string();

    (main_key, code, modifiers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_spec_plain() {
        let (key, code, mods) = parse_key_spec("Enter");
        assert_eq!(key, "Enter");
        assert_eq!(code, "Enter");
        assert_eq!(mods, 0);
    }

    #[test]
    fn test_parse_key_spec_chord() {
        let (key, code, mods) = parse_key_spec("Ctrl+A");
        assert_eq!(key, "A");
        assert_eq!(code, "KeyA");
        assert_eq!(mods, 2);

        let (key, code, mods) = parse_key_spec("Ctrl+Shift+Tab");
        assert_eq!(key, "Tab");
        assert_eq!(code, "Tab");
        assert_eq!(mods, 10);
    }

    #[test]
    fn test_js_escape() {
        assert_eq!(js_escape("a'b"), "a\\'b");
        assert_eq!(js_escape("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_browser_args_isolation() {
        let dir = std::path::PathBuf::from("/tmp/profile");
        let args = build_browser_args(9222, &dir, true, 1280, 720);
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--window-size=1280,720".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-data-dir=")));
    }
}
