//! Browser action inputs and the uniform result envelope.
//!
//! Each action is a named operation with a flat argument mapping. Arguments
//! are deserialized into one explicit struct per action and validated before
//! any side-effecting work begins.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use surfkit_core::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Navigate to a URL, minting a session if none was supplied.
    Open(OpenArgs),
    /// Index the accessibility tree into an outline plus element refs.
    Snapshot(TargetArgs),
    /// Click an element located by ref or selector.
    Click(LocateArgs),
    /// Replace the value of an input located by ref or selector.
    Fill(FillArgs),
    /// Type text character by character, optionally submitting with Enter.
    Type(TypeArgs),
    /// Read the text content of an element.
    GetText(LocateArgs),
    /// Capture a JPEG screenshot.
    Screenshot(ScreenshotArgs),
    /// Wait for a duration, a text, or a selector.
    Wait(WaitArgs),
    /// Press a named key.
    PressKey(PressKeyArgs),
    /// Delete the session record.
    Close(CloseArgs),
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenArgs {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetArgs {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocateArgs {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "ref")]
    pub ref_: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FillArgs {
    #[serde(flatten)]
    pub locate: LocateArgs,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeArgs {
    #[serde(flatten)]
    pub locate: LocateArgs,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub submit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotArgs {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub full_page: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitArgs {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Seconds to sleep.
    #[serde(default)]
    pub time: Option<f64>,
    /// Text to wait for on the page.
    #[serde(default)]
    pub text: Option<String>,
    /// Selector to wait for.
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PressKeyArgs {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloseArgs {
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Action {
    /// Parse an action from a flat argument mapping.
    pub fn from_value(params: Value) -> Result<Self> {
        serde_json::from_value(params).map_err(|e| Error::Argument(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Open(_) => "open",
            Action::Snapshot(_) => "snapshot",
            Action::Click(_) => "click",
            Action::Fill(_) => "fill",
            Action::Type(_) => "type",
            Action::GetText(_) => "get_text",
            Action::Screenshot(_) => "screenshot",
            Action::Wait(_) => "wait",
            Action::PressKey(_) => "press_key",
            Action::Close(_) => "close",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Action::Open(a) => a.session_id.as_deref(),
            Action::Snapshot(a) => a.session_id.as_deref(),
            Action::Click(a) | Action::GetText(a) => a.session_id.as_deref(),
            Action::Fill(a) => a.locate.session_id.as_deref(),
            Action::Type(a) => a.locate.session_id.as_deref(),
            Action::Screenshot(a) => a.session_id.as_deref(),
            Action::Wait(a) => a.session_id.as_deref(),
            Action::PressKey(a) => a.session_id.as_deref(),
            Action::Close(a) => a.session_id.as_deref(),
        }
    }

    /// Explicit URL argument, if the action carries one.
    pub fn url(&self) -> Option<&str> {
        match self {
            Action::Open(a) => a.url.as_deref(),
            Action::Snapshot(a) => a.url.as_deref(),
            Action::Click(a) | Action::GetText(a) => a.url.as_deref(),
            Action::Fill(a) => a.locate.url.as_deref(),
            Action::Type(a) => a.locate.url.as_deref(),
            Action::Screenshot(a) => a.url.as_deref(),
            Action::Wait(a) => a.url.as_deref(),
            Action::PressKey(a) => a.url.as_deref(),
            Action::Close(_) => None,
        }
    }

    /// Phase-1 validation: every requirement is checked before any browser
    /// is launched or storage touched.
    pub fn validate(&self) -> Result<()> {
        match self {
            Action::Open(a) => require(a.url.is_some(), "open requires 'url'"),
            Action::Snapshot(a) => require_target(a.session_id.as_deref(), a.url.as_deref()),
            Action::Click(a) => {
                require_target(a.session_id.as_deref(), a.url.as_deref())?;
                require_locator(a)
            }
            Action::Fill(a) => {
                require(a.value.is_some(), "fill requires 'value'")?;
                require_target(
                    a.locate.session_id.as_deref(),
                    a.locate.url.as_deref(),
                )?;
                require_locator(&a.locate)
            }
            Action::Type(a) => {
                require(a.text.is_some(), "type requires 'text'")?;
                require_target(
                    a.locate.session_id.as_deref(),
                    a.locate.url.as_deref(),
                )?;
                require_locator(&a.locate)
            }
            Action::GetText(a) => {
                require_target(a.session_id.as_deref(), a.url.as_deref())?;
                require_locator(a)
            }
            Action::Screenshot(a) => require_target(a.session_id.as_deref(), a.url.as_deref()),
            Action::Wait(a) => {
                require_target(a.session_id.as_deref(), a.url.as_deref())?;
                require(
                    a.time.is_some() || a.text.is_some() || a.selector.is_some(),
                    "wait requires one of 'time', 'text', or 'selector'",
                )
            }
            Action::PressKey(a) => {
                require(a.key.is_some(), "press_key requires 'key'")?;
                require_target(a.session_id.as_deref(), a.url.as_deref())
            }
            Action::Close(a) => require(a.session_id.is_some(), "close requires 'session_id'"),
        }
    }
}

fn require(present: bool, message: &str) -> Result<()> {
    if present {
        Ok(())
    } else {
        Err(Error::Argument(message.into()))
    }
}

fn require_target(session_id: Option<&str>, url: Option<&str>) -> Result<()> {
    require(
        session_id.is_some() || url.is_some(),
        "a 'session_id' or a 'url' is required",
    )
}

fn require_locator(locate: &LocateArgs) -> Result<()> {
    require(
        locate.ref_.is_some() || locate.selector.is_some(),
        "an element 'ref' or a 'selector' is required",
    )
}

/// Role + name summary of one element ref, as returned to the caller.
/// Selectors are withheld: refs are the targeting handle.
#[derive(Debug, Clone, Serialize)]
pub struct RefSummary {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub role: String,
    pub name: String,
}

/// The uniform result envelope every action returns.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Outline text from a snapshot action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<RefSummary>>,

    /// Base64 JPEG data from a screenshot action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl Envelope {
    pub fn ok(session_id: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            message: None,
            session_id: Some(session_id.into()),
            url: None,
            title: None,
            text: None,
            snapshot: None,
            refs: None,
            screenshot: None,
            media_type: None,
        }
    }

    /// Error envelope: a message and nothing else, no partial payloads.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(true),
            message: Some(message.into()),
            session_id: None,
            url: None,
            title: None,
            text: None,
            snapshot: None,
            refs: None,
            screenshot: None,
            media_type: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_snapshot(mut self, outline: impl Into<String>, refs: Vec<RefSummary>) -> Self {
        self.snapshot = Some(outline.into());
        self.refs = Some(refs);
        self
    }

    pub fn with_screenshot(mut self, base64_data: impl Into<String>) -> Self {
        self.screenshot = Some(base64_data.into());
        self.media_type = Some("image/jpeg".into());
        self
    }
}
