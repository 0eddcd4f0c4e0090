use phishnet_storage::verify_bundle;
use std::path::Path;

pub fn run(job_dir: &Path) -> anyhow::Result<()> {
    let report = verify_bundle(job_dir)?;

    println!("Job {}", report.job_uuid);
    for name in &report.verified {
        println!("  ✓ {}", name);
    }
    for name in &report.mismatched {
        println!("  ✗ {} (sha256 mismatch)", name);
    }
    for name in &report.missing {
        println!("  ✗ {} (missing)", name);
    }

    if !report.is_ok() {
        anyhow::bail!(
            "bundle verification failed: {} mismatched, {} missing",
            report.mismatched.len(),
            report.missing.len()
        );
    }
    println!("All {} artifacts match meta.json", report.verified.len());
    Ok(())
}
