mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "phishnet")]
#[command(about = "Render suspicious URLs in an isolated, network-restricted browser", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the render service
    Serve {
        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Render one URL and print its provenance record
    Render {
        /// Target URL
        url: String,

        /// Job id (generated if omitted)
        #[arg(long)]
        job: Option<String>,

        /// Sub-directory under the artifact root
        #[arg(long)]
        subdir: Option<String>,

        /// Let the page load resources from its own origin
        #[arg(long)]
        allow_target_origin: bool,
    },

    /// Recompute artifact hashes against a job's meta.json
    Verify {
        /// Job directory
        job_dir: std::path::PathBuf,
    },

    /// List browser binaries the sandbox can use
    Browsers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(host, port).await?;
        }
        Commands::Render {
            url,
            job,
            subdir,
            allow_target_origin,
        } => {
            commands::render_cmd::run(url, job, subdir, allow_target_origin).await?;
        }
        Commands::Verify { job_dir } => {
            commands::verify_cmd::run(&job_dir)?;
        }
        Commands::Browsers => {
            commands::browsers_cmd::run()?;
        }
    }

    Ok(())
}
