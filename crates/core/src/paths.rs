use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".phishnet"))
            .unwrap_or_else(|| PathBuf::from(".phishnet"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.base.join("artifacts")
    }

    /// Parent for throw-away browser profiles; each session gets its own child directory.
    pub fn browser_profiles_dir(&self) -> PathBuf {
        self.base.join("browser")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
