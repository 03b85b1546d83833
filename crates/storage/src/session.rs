//! Durable, TTL-scoped persistence of browser session records.
//!
//! One JSON file per session id. Reads never surface storage failures to the
//! caller: a missing, expired, or unreadable record degrades to absence, so
//! the action proceeds as a fresh session instead of failing hard.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use surfkit_core::{Paths, SessionRecord};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    #[serde(flatten)]
    record: SessionRecord,
    expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    paths: Paths,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(paths: Paths, ttl_secs: u64) -> Self {
        Self {
            paths,
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Fetch a record. Absent on missing, expired, or unreadable data.
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let path = self.paths.session_file(session_id);
        if !path.exists() {
            return None;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(session_id, error = %e, "session read failed, treating as absent");
                return None;
            }
        };

        let stored: StoredRecord = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                warn!(session_id, error = %e, "session parse failed, treating as absent");
                return None;
            }
        };

        if stored.expires_at <= Utc::now() {
            debug!(session_id, "session expired, removing");
            let _ = std::fs::remove_file(&path);
            return None;
        }

        Some(stored.record)
    }

    /// Upsert the full record, overwriting any existing value and resetting
    /// the expiry window from the instant of this write. A failed save is
    /// logged and swallowed: the action's resulting state simply will not be
    /// resumable.
    pub fn save(&self, record: &SessionRecord) {
        let now = Utc::now();
        let mut record = record.clone();
        record.updated_at = now;
        let stored = StoredRecord {
            record,
            expires_at: now + self.ttl,
        };

        if let Err(e) = self.write(&stored) {
            warn!(
                session_id = %stored.record.id,
                error = %e,
                "session save failed, state will not be resumable"
            );
        }
    }

    fn write(&self, stored: &StoredRecord) -> surfkit_core::Result<()> {
        let path = self.paths.session_file(&stored.record.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(stored)?)?;
        debug!(session_id = %stored.record.id, "session saved");
        Ok(())
    }

    /// Remove a record if present. A no-op for unknown ids.
    pub fn delete(&self, session_id: &str) {
        let path = self.paths.session_file(session_id);
        match std::fs::remove_file(&path) {
            Ok(_) => debug!(session_id, "session deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(session_id, error = %e, "session delete failed"),
        }
    }

    /// Remove every expired record file. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let dir = self.paths.sessions_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => return 0,
        };

        let now = Utc::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let expired = std::fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<StoredRecord>(&c).ok())
                .map(|s| s.expires_at <= now)
                // Unparsable files are dead weight; sweep them too.
                .unwrap_or(true);
            if expired && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "swept expired sessions");
        }
        removed
    }
}
