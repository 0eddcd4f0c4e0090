use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::paths::Paths;

/// Environment variable that overrides `artifacts.root`.
pub const ARTIFACT_DIR_ENV: &str = "ARTIFACT_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactsConfig {
    /// Root directory under which every job directory is created.
    /// Empty means `~/.phishnet/artifacts`.
    #[serde(default)]
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    18800
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    /// Explicit browser binary. If unset, well-known Chrome/Chromium/Edge locations are searched.
    #[serde(default)]
    pub browser_path: Option<String>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    /// Settle delay after navigation resolves, before text extraction.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    /// How long to wait for the browser's debugging endpoint after launch.
    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
}

fn default_headless() -> bool {
    true
}

fn default_navigation_timeout_secs() -> u64 {
    15
}

fn default_settle_ms() -> u64 {
    900
}

fn default_max_text_chars() -> usize {
    20_000
}

fn default_launch_timeout_secs() -> u64 {
    15
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            browser_path: None,
            headless: default_headless(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            settle_ms: default_settle_ms(),
            max_text_chars: default_max_text_chars(),
            launch_timeout_secs: default_launch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionConfig {
    /// Jobs allowed to hold a browser at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Jobs allowed to wait for a slot. Submissions beyond this are refused.
    #[serde(default = "default_max_queued_jobs")]
    pub max_queued_jobs: usize,
    /// Finished jobs kept in the in-memory job list. The oldest are dropped first.
    #[serde(default = "default_max_job_records")]
    pub max_job_records: usize,
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_max_queued_jobs() -> usize {
    16
}

fn default_max_job_records() -> usize {
    1000
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_queued_jobs: default_max_queued_jobs(),
            max_job_records: default_max_job_records(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            Self::default()
        };
        if let Ok(dir) = std::env::var(ARTIFACT_DIR_ENV) {
            if !dir.trim().is_empty() {
                debug!(root = %dir, "Artifact root taken from {}", ARTIFACT_DIR_ENV);
                config.artifacts.root = dir;
            }
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolved artifact root: the configured value (with `~/` expanded) or the default under `paths`.
    pub fn artifact_root(&self, paths: &Paths) -> PathBuf {
        let root = self.artifacts.root.trim();
        if root.is_empty() {
            return paths.artifacts_dir();
        }
        if let Some(rest) = root.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.sandbox.navigation_timeout_secs, 15);
        assert_eq!(cfg.sandbox.max_text_chars, 20_000);
        assert!(cfg.sandbox.headless);
        assert_eq!(cfg.admission.max_concurrent_jobs, 2);
        assert_eq!(cfg.admission.max_job_records, 1000);
        assert_eq!(cfg.gateway.host, "127.0.0.1");
    }

    #[test]
    fn test_camel_case_fields() {
        let raw = r#"{
  "artifacts": { "root": "/srv/artifacts" },
  "sandbox": { "browserPath": "/usr/bin/chromium", "settleMs": 1000 },
  "admission": { "maxConcurrentJobs": 4, "maxQueuedJobs": 0 }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.sandbox.browser_path.as_deref(), Some("/usr/bin/chromium"));
        assert_eq!(cfg.sandbox.settle_ms, 1000);
        assert_eq!(cfg.admission.max_concurrent_jobs, 4);
        assert_eq!(cfg.admission.max_queued_jobs, 0);

        let paths = Paths::with_base(PathBuf::from("/tmp/pn"));
        assert_eq!(cfg.artifact_root(&paths), PathBuf::from("/srv/artifacts"));
    }

    #[test]
    fn test_artifact_root_default() {
        let cfg = Config::default();
        let paths = Paths::with_base(PathBuf::from("/tmp/pn"));
        assert_eq!(cfg.artifact_root(&paths), PathBuf::from("/tmp/pn/artifacts"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = Config::default();
        cfg.gateway.port = 9123;
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.gateway.port, 9123);
    }
}
