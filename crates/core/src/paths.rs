use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".surfkit"))
            .unwrap_or_else(|| PathBuf::from(".surfkit"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.base.join("sessions")
    }

    pub fn session_file(&self, session_id: &str) -> PathBuf {
        let safe_id = session_id.replace([':', '/', '\\', '.'], "_");
        self.sessions_dir().join(format!("{}.json", safe_id))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
