//! Submission path shared by the HTTP gateway and the CLI.

use phishnet_core::{Error, RenderJob, Result};
use phishnet_storage::Meta;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::admission::{Admission, AdmissionTicket};
use crate::registry::JobRegistry;
use crate::request::{create_job_dir, plan_job, RenderRequest};
use crate::runner::JobRunner;

/// A finished render.
#[derive(Debug)]
pub struct Rendered {
    pub job_id: String,
    pub out_dir: PathBuf,
    pub meta: Meta,
}

/// A refused or failed render. `job_id`/`out_dir` are set once the job
/// directory is known.
#[derive(Debug)]
pub struct Rejected {
    pub error: Error,
    pub job_id: Option<String>,
    pub out_dir: Option<PathBuf>,
}

impl Rejected {
    fn early(error: Error) -> Self {
        Self {
            error,
            job_id: None,
            out_dir: None,
        }
    }

    fn for_job(error: Error, job: &RenderJob) -> Self {
        Self {
            error,
            job_id: Some(job.job_id.clone()),
            out_dir: Some(job.output_dir.clone()),
        }
    }
}

pub struct JobService {
    runner: Arc<JobRunner>,
    admission: Admission,
    registry: JobRegistry,
    artifact_root: PathBuf,
}

impl JobService {
    pub fn new(runner: JobRunner, admission: Admission, artifact_root: PathBuf) -> Self {
        Self {
            runner: Arc::new(runner),
            admission,
            registry: JobRegistry::new(),
            artifact_root,
        }
    }

    /// Keep at most `max_records` jobs in the job list (finished ones are evicted first).
    pub fn with_record_limit(mut self, max_records: usize) -> Self {
        self.registry = JobRegistry::with_limit(max_records);
        self
    }

    pub fn artifact_root(&self) -> &PathBuf {
        &self.artifact_root
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    /// Validate, admit, allocate the job directory and run the pipeline.
    ///
    /// Nothing is created on disk unless the request is valid and admitted.
    /// Once admitted the job runs on its own task: dropping the returned
    /// future detaches the job, it does not cancel it.
    pub async fn submit(&self, request: &RenderRequest) -> std::result::Result<Rendered, Rejected> {
        let job = plan_job(request, &self.artifact_root).map_err(Rejected::early)?;
        let ticket = self.admission.try_enter().map_err(|e| {
            warn!(job_id = %job.job_id, "Render refused: queue full");
            Rejected::early(e)
        })?;
        self.registry
            .insert(&job)
            .await
            .map_err(|e| Rejected::for_job(e, &job))?;
        if let Err(e) = create_job_dir(&job) {
            self.registry.remove(&job.job_id).await;
            return Err(Rejected::for_job(e, &job));
        }

        let task = tokio::spawn(execute(
            self.runner.clone(),
            self.registry.clone(),
            ticket,
            job.clone(),
        ));
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = Error::Other(format!("render task failed: {}", e));
                self.registry.set_failed(&job.job_id, &error.to_string()).await;
                Err(error)
            }
        };

        match outcome {
            Ok(meta) => Ok(Rendered {
                job_id: job.job_id,
                out_dir: job.output_dir,
                meta,
            }),
            Err(e) => Err(Rejected::for_job(e, &job)),
        }
    }
}

/// Wait for a run slot, render, and record the outcome.
async fn execute(
    runner: Arc<JobRunner>,
    registry: JobRegistry,
    ticket: AdmissionTicket,
    job: RenderJob,
) -> Result<Meta> {
    let permit = match ticket.acquire().await {
        Ok(p) => p,
        Err(e) => {
            registry.set_failed(&job.job_id, &e.to_string()).await;
            return Err(e);
        }
    };
    registry.set_running(&job.job_id).await;
    let outcome = runner.run(&job).await;
    drop(permit);

    match &outcome {
        Ok(_) => registry.set_done(&job.job_id).await,
        Err(e) => {
            info!(job_id = %job.job_id, "Render job failed: {}", e);
            registry.set_failed(&job.job_id, &e.to_string()).await;
        }
    }
    outcome
}
