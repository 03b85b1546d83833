//! Browser lifecycle: restore persisted state into a fresh engine instance
//! before acting, recapture and persist it afterwards, and tear the instance
//! down on every exit path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use surfkit_core::config::BrowserConfig;
use surfkit_core::{RefEntry, Result, SessionRecord};
use surfkit_storage::SessionStore;
use tracing::{debug, warn};

use super::engine::{EngineLauncher, EngineSession, WaitUntil};

const LOCAL_STORAGE_READ_JS: &str = "(() => { const out = {}; \
     for (let i = 0; i < localStorage.length; i++) { \
     const k = localStorage.key(i); out[k] = localStorage.getItem(k); } \
     return out; })()";

/// State the dispatcher threads into the record assembled at release time.
/// Release itself never merges old and new records field by field; whatever
/// is carried here is what gets persisted.
#[derive(Debug, Clone, Default)]
pub struct CarriedState {
    pub created_at: Option<DateTime<Utc>>,
    pub last_snapshot: Option<String>,
    pub refs: Option<BTreeMap<String, RefEntry>>,
}

impl CarriedState {
    pub fn from_prior(prior: Option<&SessionRecord>) -> Self {
        match prior {
            Some(record) => Self {
                created_at: Some(record.created_at),
                last_snapshot: record.last_snapshot.clone(),
                refs: record.refs.clone(),
            },
            None => Self::default(),
        }
    }

    /// Wholesale-replace the outline and reference table with a fresh scan.
    pub fn with_snapshot(
        mut self,
        outline: String,
        refs: BTreeMap<String, RefEntry>,
    ) -> Self {
        self.last_snapshot = Some(outline);
        self.refs = Some(refs);
        self
    }
}

pub struct LifecycleManager {
    launcher: Arc<dyn EngineLauncher>,
    store: Arc<SessionStore>,
    config: BrowserConfig,
}

impl LifecycleManager {
    pub fn new(
        launcher: Arc<dyn EngineLauncher>,
        store: Arc<SessionStore>,
        config: BrowserConfig,
    ) -> Self {
        Self {
            launcher,
            store,
            config,
        }
    }

    /// Launch a fresh engine instance and restore prior session state into it.
    ///
    /// Cookies go in before any navigation: cookie scoping depends on domain,
    /// and a context establishes an origin on first load. Local storage is
    /// origin-scoped, so it can only be injected after navigating to the
    /// session's URL. Restore failures degrade to a warning; the action then
    /// runs with whatever state could be restored.
    pub async fn acquire(
        &self,
        prior: Option<&SessionRecord>,
    ) -> Result<Box<dyn EngineSession>> {
        let session = self.launcher.launch().await?;

        if let Some(record) = prior {
            if !record.cookies.is_empty() {
                if let Err(e) = session.set_cookies(&record.cookies).await {
                    warn!(session_id = %record.id, error = %e, "cookie restore failed");
                }
            }

            if !record.local_storage.is_empty() && !record.url.is_empty() {
                let timeout = Duration::from_millis(self.config.restore_timeout_ms);
                match session
                    .navigate(&record.url, WaitUntil::DomReady, timeout)
                    .await
                {
                    Ok(()) => {
                        if let Err(e) = inject_local_storage(
                            session.as_ref(),
                            &record.local_storage,
                        )
                        .await
                        {
                            warn!(session_id = %record.id, error = %e, "local storage restore failed");
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %record.id, error = %e, "restore navigation failed");
                    }
                }
            }
        }

        Ok(session)
    }

    /// Recapture browsing state, persist a complete fresh record, and close
    /// the engine instance. Runs after every action, failed ones included;
    /// nothing here propagates an error, so teardown cannot be skipped.
    pub async fn release(
        &self,
        session: &dyn EngineSession,
        session_id: &str,
        carried: CarriedState,
    ) {
        let cookies = match session.cookies().await {
            Ok(jar) => jar,
            Err(e) => {
                warn!(session_id, error = %e, "cookie capture failed");
                Vec::new()
            }
        };

        let url = session.current_url().await.unwrap_or_else(|e| {
            warn!(session_id, error = %e, "url capture failed");
            String::new()
        });

        // Best-effort: a page that forbids script execution must not block
        // the rest of teardown.
        let local_storage = match session.evaluate(LOCAL_STORAGE_READ_JS).await {
            Ok(value) => parse_storage_map(value),
            Err(e) => {
                debug!(session_id, error = %e, "local storage capture failed");
                BTreeMap::new()
            }
        };

        let now = Utc::now();
        let record = SessionRecord {
            id: session_id.to_string(),
            url,
            cookies,
            local_storage,
            last_snapshot: carried.last_snapshot,
            refs: carried.refs,
            created_at: carried.created_at.unwrap_or(now),
            updated_at: now,
        };
        self.store.save(&record);

        session.close().await;
    }
}

async fn inject_local_storage(
    session: &dyn EngineSession,
    entries: &BTreeMap<String, String>,
) -> Result<()> {
    let data = serde_json::to_string(entries)?;
    let js = format!(
        "(() => {{ const data = {}; \
         for (const [k, v] of Object.entries(data)) {{ localStorage.setItem(k, v); }} \
         return true; }})()",
        data
    );
    session.evaluate(&js).await?;
    Ok(())
}

fn parse_storage_map(value: Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::MockLauncher;
    use surfkit_core::{Cookie, Paths};

    fn harness() -> (Arc<SessionStore>, MockLauncher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::new(
            Paths::with_base(dir.path().to_path_buf()),
            900,
        ));
        (store, MockLauncher::default(), dir)
    }

    fn manager(store: Arc<SessionStore>, launcher: &MockLauncher) -> LifecycleManager {
        LifecycleManager::new(
            Arc::new(launcher.clone()),
            store,
            BrowserConfig::default(),
        )
    }

    fn prior_with_cookies(id: &str) -> SessionRecord {
        let mut record = SessionRecord::new(id);
        record.url = "https://a.test/".into();
        record.cookies.push(Cookie {
            name: "sid".into(),
            value: "abc".into(),
            domain: ".a.test".into(),
            path: "/".into(),
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
        });
        record
    }

    #[tokio::test]
    async fn test_cookies_restored_before_first_navigation() {
        let (store, launcher, _dir) = harness();
        let mut prior = prior_with_cookies("s1");
        prior.local_storage.insert("k".into(), "v".into());

        let lifecycle = manager(store, &launcher);
        let session = lifecycle.acquire(Some(&prior)).await.unwrap();
        session.close().await;

        let log = launcher.state().log();
        let cookie_pos = log.iter().position(|e| e.starts_with("set_cookies")).unwrap();
        let nav_pos = log.iter().position(|e| e.starts_with("navigate")).unwrap();
        assert!(
            cookie_pos < nav_pos,
            "cookies must precede the first navigation: {:?}",
            log
        );
    }

    #[tokio::test]
    async fn test_no_restore_navigation_without_local_storage() {
        let (store, launcher, _dir) = harness();
        let prior = prior_with_cookies("s2");

        let lifecycle = manager(store, &launcher);
        let session = lifecycle.acquire(Some(&prior)).await.unwrap();
        session.close().await;

        let log = launcher.state().log();
        assert!(log.iter().any(|e| e.starts_with("set_cookies")));
        assert!(!log.iter().any(|e| e.starts_with("navigate")));
    }

    #[tokio::test]
    async fn test_local_storage_injected_after_restore_navigation() {
        let (store, launcher, _dir) = harness();
        let mut prior = prior_with_cookies("s7");
        prior.local_storage.insert("lang".into(), "en".into());

        let lifecycle = manager(store, &launcher);
        let session = lifecycle.acquire(Some(&prior)).await.unwrap();
        session.close().await;

        let log = launcher.state().log();
        let nav = log.iter().position(|e| e.starts_with("navigate")).unwrap();
        let inject = log.iter().position(|e| e == "inject_storage").unwrap();
        assert!(nav < inject, "storage needs an origin first: {:?}", log);
    }

    #[tokio::test]
    async fn test_release_captures_local_storage() {
        let (store, launcher, _dir) = harness();
        launcher.state().set_storage("theme", "dark");

        let lifecycle = manager(store.clone(), &launcher);
        let session = lifecycle.acquire(None).await.unwrap();
        lifecycle
            .release(session.as_ref(), "s6", CarriedState::default())
            .await;

        let record = store.get("s6").unwrap();
        assert_eq!(
            record.local_storage.get("theme").map(String::as_str),
            Some("dark")
        );
    }

    #[tokio::test]
    async fn test_release_persists_and_closes() {
        let (store, launcher, _dir) = harness();
        launcher.state().set_url("https://a.test/done");

        let lifecycle = manager(store.clone(), &launcher);
        let session = lifecycle.acquire(None).await.unwrap();
        lifecycle
            .release(session.as_ref(), "s3", CarriedState::default())
            .await;

        assert!(launcher.state().closed());
        let record = store.get("s3").expect("record persisted");
        assert_eq!(record.url, "https://a.test/done");
    }

    #[tokio::test]
    async fn test_release_survives_script_refusal() {
        let (store, launcher, _dir) = harness();
        launcher.state().fail_evaluate(true);

        let lifecycle = manager(store.clone(), &launcher);
        let session = lifecycle.acquire(None).await.unwrap();
        lifecycle
            .release(session.as_ref(), "s4", CarriedState::default())
            .await;

        assert!(launcher.state().closed());
        let record = store.get("s4").expect("record persisted despite capture failure");
        assert!(record.local_storage.is_empty());
    }

    #[tokio::test]
    async fn test_carried_snapshot_replaces_prior() {
        let mut prior = prior_with_cookies("s5");
        prior.last_snapshot = Some("- old\n".into());
        prior.refs = Some(BTreeMap::from([(
            "e1".to_string(),
            RefEntry {
                role: "button".into(),
                name: "Old".into(),
                selector: "[role=\"button\"][name=\"Old\"]".into(),
            },
        )]));

        let carried = CarriedState::from_prior(Some(&prior)).with_snapshot(
            "- new\n".into(),
            BTreeMap::new(),
        );
        assert_eq!(carried.last_snapshot.as_deref(), Some("- new\n"));
        assert_eq!(carried.refs, Some(BTreeMap::new()));
        assert_eq!(carried.created_at, Some(prior.created_at));
    }
}
