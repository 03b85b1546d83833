pub mod doctor;
pub mod gateway;
pub mod run_cmd;

use std::sync::Arc;

use surfkit_core::{Config, Paths};
use surfkit_storage::SessionStore;
use surfkit_tools::browser::{BrowserTool, ChromeLauncher, Dispatcher};
use surfkit_tools::ToolRegistry;

/// Build the dispatcher from config: file-backed session store plus a
/// per-call Chrome launcher.
pub fn build_dispatcher(config: &Config, paths: &Paths) -> (Arc<Dispatcher>, Arc<SessionStore>) {
    let store = Arc::new(SessionStore::new(
        paths.clone(),
        config.storage.session_ttl_secs,
    ));
    let launcher = Arc::new(ChromeLauncher::new(config.browser.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        launcher,
        store.clone(),
        config.browser.clone(),
    ));
    (dispatcher, store)
}

pub fn build_registry(dispatcher: Arc<Dispatcher>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(BrowserTool::new(dispatcher)));
    registry
}
