//! Artifact bundle writer and verifier.
//!
//! A bundle is five write-once files in the job directory. `text.txt` and
//! `iocs.json` are written and synced first, every artifact is then hashed by
//! reading it back from disk, and `meta.json` is written last. Any failure
//! here is fatal to the job.

use chrono::SecondsFormat;
use phishnet_core::{CaptureResult, DeviceProfile, Error, NetworkCounters, RenderJob, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::defang::{defang_url, defanged_domains};
use crate::digest::Sha256Digest;

pub const TEXT_FILE: &str = "text.txt";
pub const IOCS_FILE: &str = "iocs.json";
pub const META_FILE: &str = "meta.json";

/// A value per device profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerProfile<T> {
    pub desktop: T,
    pub mobile: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IocNotes {
    pub allow_target_origin: bool,
    pub nav_errors: PerProfile<Option<String>>,
    pub network: PerProfile<NetworkCounters>,
}

/// `iocs.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iocs {
    pub target_url: String,
    pub target_origin: Option<String>,
    pub defanged_url: String,
    pub defanged_domains: Vec<String>,
    pub notes: IocNotes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub allow_target_origin: bool,
    pub default_deny: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Relative to the artifact root.
    pub path: String,
    pub sha256: String,
    pub mime: String,
    pub size_bytes: u64,
}

/// `meta.json`, the provenance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub job_uuid: String,
    pub created_at: String,
    pub target_url: String,
    pub policy: PolicyRecord,
    pub artifacts: BTreeMap<String, ArtifactEntry>,
}

fn mime_for(name: &str) -> &'static str {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("txt") => "text/plain; charset=utf-8",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Create `path` (it must not exist), write `bytes` and sync to disk.
fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| Error::Artifact(format!("create {}: {}", path.display(), e)))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn entry(job: &RenderJob, name: &str) -> Result<ArtifactEntry> {
    let path = job.output_dir.join(name);
    let sha256 = Sha256Digest::compute_file(&path)?;
    let size_bytes = std::fs::metadata(&path)?.len();
    let relative = if job.relative_dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", job.relative_dir, name)
    };
    Ok(ArtifactEntry {
        path: relative,
        sha256,
        mime: mime_for(name).to_string(),
        size_bytes,
    })
}

pub fn build_iocs(job: &RenderJob, desktop: &CaptureResult, mobile: &CaptureResult) -> Iocs {
    let target_origin = url::Url::parse(&job.target_url)
        .ok()
        .map(|u| u.origin())
        .filter(|o| o.is_tuple())
        .map(|o| o.ascii_serialization());
    Iocs {
        target_url: job.target_url.clone(),
        target_origin,
        defanged_url: defang_url(&job.target_url),
        defanged_domains: defanged_domains(&job.target_url),
        notes: IocNotes {
            allow_target_origin: job.allow_target_origin,
            nav_errors: PerProfile {
                desktop: desktop.navigation_error.clone(),
                mobile: mobile.navigation_error.clone(),
            },
            network: PerProfile {
                desktop: desktop.network.clone(),
                mobile: mobile.network.clone(),
            },
        },
    }
}

/// Persist the text and IOC files, hash everything and write `meta.json`.
///
/// Both screenshots must already be in `job.output_dir`.
pub fn write_bundle(job: &RenderJob, desktop: &CaptureResult, mobile: &CaptureResult) -> Result<Meta> {
    let dir = &job.output_dir;
    for (capture, expected) in [(desktop, DeviceProfile::Desktop), (mobile, DeviceProfile::Mobile)] {
        if capture.profile != expected {
            return Err(Error::Artifact(format!(
                "expected {} capture, got {}",
                expected, capture.profile
            )));
        }
        if capture.screenshot_path != dir.join(expected.screenshot_file()) {
            return Err(Error::Artifact(format!(
                "{} screenshot outside job directory: {}",
                expected,
                capture.screenshot_path.display()
            )));
        }
    }

    write_new(&dir.join(TEXT_FILE), desktop.extracted_text.as_bytes())?;

    let iocs = build_iocs(job, desktop, mobile);
    write_new(&dir.join(IOCS_FILE), &serde_json::to_vec_pretty(&iocs)?)?;

    let mut artifacts = BTreeMap::new();
    for name in [
        DeviceProfile::Desktop.screenshot_file(),
        DeviceProfile::Mobile.screenshot_file(),
        TEXT_FILE,
        IOCS_FILE,
    ] {
        let entry = entry(job, name)?;
        debug!(file = name, sha256 = %entry.sha256, size = entry.size_bytes, "Artifact hashed");
        artifacts.insert(name.to_string(), entry);
    }

    let meta = Meta {
        job_uuid: job.job_id.clone(),
        created_at: job.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        target_url: job.target_url.clone(),
        policy: PolicyRecord {
            allow_target_origin: job.allow_target_origin,
            default_deny: true,
        },
        artifacts,
    };
    write_new(&dir.join(META_FILE), &serde_json::to_vec_pretty(&meta)?)?;

    info!(job_id = %job.job_id, dir = %dir.display(), "Artifact bundle written");
    Ok(meta)
}

/// Outcome of re-hashing a bundle against its `meta.json`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub job_uuid: String,
    pub verified: Vec<String>,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }
}

/// A plain file name inside the job directory: no separators, no `.`/`..`.
fn is_bundle_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Recompute every listed artifact's digest from disk.
///
/// Artifact names that would resolve outside the job directory are refused
/// with [`Error::Validation`] before anything is read.
pub fn verify_bundle(job_dir: &Path) -> Result<VerifyReport> {
    let meta_path = job_dir.join(META_FILE);
    let content = std::fs::read_to_string(&meta_path)
        .map_err(|e| Error::NotFound(format!("{}: {}", meta_path.display(), e)))?;
    let meta: Meta = serde_json::from_str(&content)?;

    let mut report = VerifyReport {
        job_uuid: meta.job_uuid.clone(),
        ..Default::default()
    };
    if let Some(name) = meta.artifacts.keys().find(|n| !is_bundle_file_name(n)) {
        return Err(Error::Validation(format!(
            "artifact name escapes the job directory: {:?}",
            name
        )));
    }
    for (name, entry) in &meta.artifacts {
        let path: PathBuf = job_dir.join(name);
        if !path.is_file() {
            report.missing.push(name.clone());
            continue;
        }
        match Sha256Digest::verify_file(&path, &entry.sha256) {
            Ok(()) => report.verified.push(name.clone()),
            Err(Error::Validation(_)) => report.mismatched.push(name.clone()),
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}
