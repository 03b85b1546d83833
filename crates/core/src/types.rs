use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single cookie captured from (or restored into) the browser engine.
///
/// This is a verbatim snapshot of the engine's cookie jar entry; attributes
/// are carried as-is with no deduplication or merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// Cached correlation between an accessibility node seen at snapshot time and
/// a selector usable later. May silently go stale if the page changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefEntry {
    pub role: String,
    pub name: String,
    pub selector: String,
}

/// The persisted unit of cross-call browsing continuity.
///
/// A saved record is a complete, self-sufficient snapshot of browsing state:
/// resuming never depends on in-memory state from a prior call. The `refs`
/// table is only valid for resolution until the next save of the same id
/// overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    /// Last observed page address; empty until the first navigation.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub local_storage: BTreeMap<String, String>,
    /// Outline text from the most recent accessibility scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_snapshot: Option<String>,
    /// Reference token -> entry; wholesale-replaced on every snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<BTreeMap<String, RefEntry>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            url: String::new(),
            cookies: Vec::new(),
            local_storage: BTreeMap::new(),
            last_snapshot: None,
            refs: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mint a fresh record with a generated opaque id.
    pub fn minted() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}
