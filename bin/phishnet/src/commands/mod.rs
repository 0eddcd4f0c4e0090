pub mod browsers_cmd;
pub mod render_cmd;
pub mod serve;
pub mod verify_cmd;

use phishnet_core::{Config, Paths};
use phishnet_jobs::{Admission, JobRunner, JobService};
use phishnet_sandbox::{CaptureSettings, ChromeSandbox};
use std::sync::Arc;
use std::time::Duration;

/// Job service backed by the Chrome sandbox, as configured.
pub fn build_service(config: &Config, paths: &Paths) -> Arc<JobService> {
    let sandbox = ChromeSandbox::new(
        config.sandbox.browser_path.clone(),
        config.sandbox.headless,
        Duration::from_secs(config.sandbox.launch_timeout_secs),
        paths.browser_profiles_dir(),
    );
    let runner = JobRunner::new(
        Arc::new(sandbox),
        CaptureSettings::from_config(&config.sandbox),
    );
    Arc::new(
        JobService::new(
            runner,
            Admission::from_config(&config.admission),
            config.artifact_root(paths),
        )
        .with_record_limit(config.admission.max_job_records),
    )
}
