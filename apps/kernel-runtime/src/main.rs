//! Process entry point: loads `.env`, initializes tracing, builds a
//! multi-threaded tokio runtime, and runs the kernel to a shutdown
//! signal.

use clap::Parser;
use crucible_kernel_runtime::kernel::default_gateway;
use crucible_kernel_runtime::Kernel;
use crucible_shared_config::KernelConfig;
use crucible_shared_telemetry::init_tracing;
use tracing::{error, info};

/// Command-line overrides for the kernel process. Every setting also has
/// an environment-variable fallback read by [`KernelConfig::from_env`];
/// `--config` switches to loading a YAML file instead.
#[derive(Parser, Debug)]
#[command(name = "crucible-kernel", version, about = "Runs the agent-ecology simulation kernel.")]
struct Cli {
    /// Path to a YAML config file. When omitted, configuration is read
    /// from environment variables with built-in defaults.
    #[arg(long)]
    config: Option<String>,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("crucible_kernel");

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => KernelConfig::load(&path)?,
        None => KernelConfig::from_env()?,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        info!("kernel igniting");
        let kernel = Kernel::ignite(config, default_gateway()).await?;
        if let Err(err) = kernel.run_until_shutdown().await {
            error!(%err, "kernel exited with an error");
            return Err(err);
        }
        Ok(())
    })
}
