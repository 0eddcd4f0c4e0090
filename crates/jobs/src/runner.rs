//! One job, end to end: session, desktop then mobile, bundle.

use phishnet_core::{CaptureResult, DeviceProfile, Error, RenderJob, Result};
use phishnet_sandbox::{capture_profile, CaptureSettings, PolicyState, Sandbox, SandboxSession};
use phishnet_storage::{write_bundle, Meta};
use std::sync::Arc;
use tracing::{info, warn};

pub struct JobRunner {
    sandbox: Arc<dyn Sandbox>,
    settings: CaptureSettings,
}

impl JobRunner {
    pub fn new(sandbox: Arc<dyn Sandbox>, settings: CaptureSettings) -> Self {
        Self { sandbox, settings }
    }

    /// Render `job` into its (already created) directory.
    ///
    /// The session is closed whatever happens to the captures; each context
    /// is closed before the next profile starts.
    pub async fn run(&self, job: &RenderJob) -> Result<Meta> {
        info!(job_id = %job.job_id, url = %job.target_url, "Render job started");

        let mut session = self.sandbox.open(&job.job_id).await?;
        let captured = self.capture_all(session.as_mut(), job).await;
        session.close().await;
        let (desktop, mobile) = captured?;

        let bundle_job = job.clone();
        let meta = tokio::task::spawn_blocking(move || write_bundle(&bundle_job, &desktop, &mobile))
            .await
            .map_err(|e| Error::Other(format!("artifact writer task failed: {}", e)))??;

        info!(job_id = %job.job_id, "Render job finished");
        Ok(meta)
    }

    async fn capture_all(
        &self,
        session: &mut dyn SandboxSession,
        job: &RenderJob,
    ) -> Result<(CaptureResult, CaptureResult)> {
        let desktop = self.capture_one(session, job, DeviceProfile::Desktop).await?;
        let mobile = self.capture_one(session, job, DeviceProfile::Mobile).await?;
        Ok((desktop, mobile))
    }

    async fn capture_one(
        &self,
        session: &mut dyn SandboxSession,
        job: &RenderJob,
        profile: DeviceProfile,
    ) -> Result<CaptureResult> {
        let policy = Arc::new(PolicyState::new(&job.target_url, job.allow_target_origin));
        let mut ctx = session.create_context(profile, policy).await?;
        let result = capture_profile(ctx.as_ref(), &job.target_url, &job.output_dir, &self.settings).await;
        ctx.close().await;
        if let Err(e) = &result {
            warn!(job_id = %job.job_id, profile = %profile, "Capture failed: {}", e);
        }
        result
    }
}
