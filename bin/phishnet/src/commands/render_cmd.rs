use phishnet_core::{Config, Paths};
use phishnet_jobs::RenderRequest;

/// One-shot render; prints the provenance record.
pub async fn run(
    url: String,
    job: Option<String>,
    subdir: Option<String>,
    allow_target_origin: bool,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let service = super::build_service(&config, &paths);

    let request = RenderRequest {
        url: Some(url),
        job,
        out_subdir: subdir,
        allow_target_origin,
    };

    match service.submit(&request).await {
        Ok(rendered) => {
            println!("{}", serde_json::to_string_pretty(&rendered.meta)?);
            eprintln!("Artifacts: {}", rendered.out_dir.display());
            Ok(())
        }
        Err(rejected) => {
            if let (Some(job_id), Some(out_dir)) = (&rejected.job_id, &rejected.out_dir) {
                eprintln!("Job {} failed, partial output in {}", job_id, out_dir.display());
            }
            Err(rejected.error.into())
        }
    }
}
