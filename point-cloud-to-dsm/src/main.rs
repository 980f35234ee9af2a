/// Point clouds to DSM command line entry point
use anyhow::Context;
use clap::Parser;
use point_cloud_to_dsm::{DsmConfig, DsmPipeline, RayonExecutor, TracingSink};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "point-cloud-to-dsm", version, about = "Rasterize point clouds into a DSM")]
struct Cli {
    /// JSON run configuration.
    #[arg(value_name = "FILE")]
    config: PathBuf,

    /// Log debug diagnostics.
    #[arg(short, long)]
    verbose: bool,

    /// Print the used configuration and exit without processing.
    #[arg(long)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let config = DsmConfig::from_file(&cli.config)
        .with_context(|| format!("reading configuration {}", cli.config.display()))?;
    let pipeline = DsmPipeline::new(config).context("building pipeline applications")?;

    if cli.check {
        println!("{}", serde_json::to_string_pretty(&pipeline.used_conf()?)?);
        return Ok(());
    }

    let orchestrator = &pipeline.config().orchestrator;
    let executor = RayonExecutor::new(orchestrator.resolved_nb_workers(), orchestrator.show_progress)?;
    tracing::info!(workers = executor.nb_workers(), "Starting point clouds to DSM pipeline");

    match pipeline.run(&executor, &TracingSink).context("running pipeline")? {
        Some(manifest) => tracing::info!(
            layers = manifest.layers.len(),
            x_size = manifest.x_size,
            y_size = manifest.y_size,
            "DSM written to {}",
            pipeline.config().output.out_dir.display()
        ),
        None => tracing::warn!("No DSM produced"),
    }
    Ok(())
}
