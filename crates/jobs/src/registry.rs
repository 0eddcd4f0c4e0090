use chrono::{DateTime, Utc};
use phishnet_core::{Error, RenderJob, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Finished records kept when no explicit limit is configured.
pub const DEFAULT_MAX_RECORDS: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted, waiting for a run slot.
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub target_url: String,
    pub allow_target_origin: bool,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub out_dir: String,
}

/// Process-local view of submitted jobs, keyed by job id.
///
/// Queued and running jobs are always kept. Once more than `max_records`
/// jobs are known, the oldest finished ones are dropped on the next insert.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, JobRecord>>>,
    max_records: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_RECORDS)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_records: usize) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            max_records,
        }
    }

    /// Claim `job.job_id`. Fails with [`Error::Conflict`] if a job with that id
    /// is already known, whatever its output directory.
    pub async fn insert(&self, job: &RenderJob) -> Result<JobRecord> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.job_id) {
            return Err(Error::Conflict("job already exists".into()));
        }
        let record = JobRecord {
            job_id: job.job_id.clone(),
            target_url: job.target_url.clone(),
            allow_target_origin: job.allow_target_origin,
            status: JobStatus::Queued,
            error: None,
            created_at: job.created_at,
            started_at: None,
            finished_at: None,
            out_dir: job.output_dir.display().to_string(),
        };
        jobs.insert(job.job_id.clone(), record.clone());
        Self::evict(&mut jobs, self.max_records);
        Ok(record)
    }

    /// Forget a claim that never turned into a job.
    pub async fn remove(&self, job_id: &str) {
        self.jobs.lock().await.remove(job_id);
    }

    pub async fn set_running(&self, job_id: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(record) = jobs.get_mut(job_id) {
            record.status = JobStatus::Running;
            record.started_at = Some(Utc::now());
        }
    }

    pub async fn set_done(&self, job_id: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(record) = jobs.get_mut(job_id) {
            record.status = JobStatus::Done;
            record.finished_at = Some(Utc::now());
        }
    }

    pub async fn set_failed(&self, job_id: &str, error: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(record) = jobs.get_mut(job_id) {
            record.status = JobStatus::Failed;
            record.finished_at = Some(Utc::now());
            record.error = Some(error.to_string());
        }
    }

    pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.lock().await.get(job_id).cloned()
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        let jobs = self.jobs.lock().await;
        let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub async fn count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    fn evict(jobs: &mut HashMap<String, JobRecord>, max_records: usize) {
        if jobs.len() <= max_records {
            return;
        }
        let mut finished: Vec<(DateTime<Utc>, String)> = jobs
            .values()
            .filter(|r| r.status.is_finished())
            .map(|r| (r.finished_at.unwrap_or(r.created_at), r.job_id.clone()))
            .collect();
        finished.sort();
        let excess = jobs.len() - max_records;
        for (_, job_id) in finished.into_iter().take(excess) {
            jobs.remove(&job_id);
        }
        debug!(kept = jobs.len(), "Evicted finished job records");
    }
}
