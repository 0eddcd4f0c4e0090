use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The fixed set of device presets every job is rendered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProfile {
    Desktop,
    Mobile,
}

/// Viewport and user-agent emulation applied to a browsing context before navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct Emulation {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
    pub touch: bool,
    pub user_agent: &'static str,
}

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 \
(KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";

impl DeviceProfile {
    /// Capture order within a job.
    pub const ALL: [DeviceProfile; 2] = [DeviceProfile::Desktop, DeviceProfile::Mobile];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }

    pub fn screenshot_file(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop.png",
            Self::Mobile => "mobile.png",
        }
    }

    pub fn emulation(&self) -> Emulation {
        match self {
            Self::Desktop => Emulation {
                width: 1366,
                height: 768,
                device_scale_factor: 1.0,
                mobile: false,
                touch: false,
                user_agent: DESKTOP_UA,
            },
            Self::Mobile => Emulation {
                width: 390,
                height: 844,
                device_scale_factor: 3.0,
                mobile: true,
                touch: true,
                user_agent: MOBILE_UA,
            },
        }
    }
}

impl std::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A submitted render. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    pub job_id: String,
    pub target_url: String,
    pub allow_target_origin: bool,
    pub created_at: DateTime<Utc>,
    /// Job directory, `<root>/<subdir>/<job_id>`.
    pub output_dir: PathBuf,
    /// `output_dir` relative to the artifact root, with `/` separators.
    pub relative_dir: String,
}

/// Per-context interception tallies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub allowed: u64,
    pub blocked: u64,
    #[serde(rename = "blockedHosts")]
    pub blocked_hosts: Vec<String>,
}

/// Output of one profile's capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResult {
    pub profile: DeviceProfile,
    pub screenshot_path: PathBuf,
    pub extracted_text: String,
    pub navigation_error: Option<String>,
    pub network: NetworkCounters,
}
