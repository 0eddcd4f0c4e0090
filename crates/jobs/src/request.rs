//! Render request validation and job directory allocation.

use chrono::Utc;
use phishnet_core::{Error, RenderJob, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MAX_SEGMENT_LEN: usize = 128;

/// Body of `POST /render`, also built by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub out_subdir: Option<String>,
    #[serde(default)]
    pub allow_target_origin: bool,
}

fn validate_url(raw: Option<&str>) -> Result<String> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let Some(raw) = raw else {
        return Err(Error::Validation("missing url".into()));
    };
    let parsed =
        url::Url::parse(raw).map_err(|e| Error::Validation(format!("invalid url: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::Validation(format!(
                "unsupported url scheme: {}",
                other
            )))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::Validation("url has no host".into()));
    }
    Ok(raw.to_string())
}

/// One path segment: `[A-Za-z0-9._-]{1,128}`, not `.` or `..`.
fn validate_segment(kind: &str, segment: &str) -> Result<()> {
    let valid_chars = segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if segment.is_empty()
        || segment.len() > MAX_SEGMENT_LEN
        || !valid_chars
        || segment == "."
        || segment == ".."
    {
        return Err(Error::Validation(format!("invalid {}: {:?}", kind, segment)));
    }
    Ok(())
}

fn subdir_segments(out_subdir: Option<&str>) -> Result<Vec<&str>> {
    let Some(subdir) = out_subdir.filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };
    let segments: Vec<&str> = subdir.split('/').collect();
    for segment in &segments {
        validate_segment("outSubdir", segment)?;
    }
    Ok(segments)
}

/// Validate `request` and derive its job. Touches nothing on disk.
pub fn plan_job(request: &RenderRequest, artifact_root: &Path) -> Result<RenderJob> {
    let target_url = validate_url(request.url.as_deref())?;

    let job_id = match request.job.as_deref() {
        Some(id) => {
            validate_segment("job", id)?;
            id.to_string()
        }
        None => uuid::Uuid::new_v4().to_string(),
    };

    let mut segments = subdir_segments(request.out_subdir.as_deref())?;
    segments.push(&job_id);

    let output_dir = segments
        .iter()
        .fold(PathBuf::from(artifact_root), |dir, s| dir.join(s));

    Ok(RenderJob {
        relative_dir: segments.join("/"),
        job_id,
        target_url,
        allow_target_origin: request.allow_target_origin,
        created_at: Utc::now(),
        output_dir,
    })
}

/// Create the job directory. The leaf must not exist yet.
pub fn create_job_dir(job: &RenderJob) -> Result<()> {
    if let Some(parent) = job.output_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::create_dir(&job.output_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(Error::Conflict("job already exists".into()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(url: &str) -> RenderRequest {
        RenderRequest {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    fn validation_message(result: Result<RenderJob>) -> String {
        match result {
            Err(Error::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_url() {
        let root = Path::new("/tmp/pn");
        assert_eq!(validation_message(plan_job(&RenderRequest::default(), root)), "missing url");
        assert_eq!(validation_message(plan_job(&request("   "), root)), "missing url");
    }

    #[test]
    fn test_url_must_be_absolute_http() {
        let root = Path::new("/tmp/pn");
        assert!(plan_job(&request("example.com"), root).is_err());
        assert!(plan_job(&request("file:///etc/passwd"), root).is_err());
        assert!(plan_job(&request("javascript:alert(1)"), root).is_err());
        assert!(plan_job(&request("http://127.0.0.1:9999/"), root).is_ok());
    }

    #[test]
    fn test_job_dir_layout() {
        let root = Path::new("/srv/artifacts");
        let req = RenderRequest {
            url: Some("https://example.com".into()),
            job: Some("job-42".into()),
            out_subdir: Some("2026/batch_1".into()),
            allow_target_origin: true,
        };
        let job = plan_job(&req, root).unwrap();
        assert_eq!(job.output_dir, PathBuf::from("/srv/artifacts/2026/batch_1/job-42"));
        assert_eq!(job.relative_dir, "2026/batch_1/job-42");
        assert!(job.allow_target_origin);

        let generated = plan_job(&request("https://example.com"), root).unwrap();
        assert_eq!(generated.job_id.len(), 36);
        assert_eq!(generated.relative_dir, generated.job_id);
    }

    #[test]
    fn test_traversal_is_rejected() {
        let root = Path::new("/srv/artifacts");
        for (job, subdir) in [
            (Some(".."), None),
            (Some("a/b"), None),
            (Some(""), None),
            (None, Some("../etc")),
            (None, Some("/abs")),
            (None, Some("a//b")),
            (None, Some("a/./b")),
            (None, Some("sp ace")),
        ] {
            let req = RenderRequest {
                url: Some("https://example.com".into()),
                job: job.map(String::from),
                out_subdir: subdir.map(String::from),
                allow_target_origin: false,
            };
            assert!(plan_job(&req, root).is_err(), "{:?} {:?}", job, subdir);
        }
        let long = "x".repeat(129);
        let req = RenderRequest {
            url: Some("https://example.com".into()),
            job: Some(long),
            ..Default::default()
        };
        assert!(plan_job(&req, root).is_err());
    }

    #[test]
    fn test_create_job_dir_conflict() {
        let root = TempDir::new().unwrap();
        let req = RenderRequest {
            url: Some("https://example.com".into()),
            job: Some("dup".into()),
            out_subdir: Some("nested".into()),
            ..Default::default()
        };
        let job = plan_job(&req, root.path()).unwrap();
        create_job_dir(&job).unwrap();
        assert!(job.output_dir.is_dir());

        let again = plan_job(&req, root.path()).unwrap();
        assert!(matches!(create_job_dir(&again), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_camel_case_body() {
        let req: RenderRequest = serde_json::from_str(
            r#"{"url":"https://example.com","outSubdir":"a","allowTargetOrigin":true}"#,
        )
        .unwrap();
        assert_eq!(req.out_subdir.as_deref(), Some("a"));
        assert!(req.allow_target_origin);
        let empty: RenderRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.url.is_none());
    }
}
