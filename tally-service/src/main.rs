// tally-service: Main entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use tally_config::{load_config, parse_override, Override};
use tally_core::registry::Registry;
use tally_service::{init_logging, open_cache, run_control_loop, Service};

#[derive(Parser)]
#[command(name = "tally-service", about = "Time-slot accumulator service")]
struct Args {
    /// Load a config file (repeatable, later files win)
    #[arg(short = 'f', long = "config", value_name = "FILENAME", required = true)]
    config: Vec<PathBuf>,

    /// Set a config option
    #[arg(short = 'c', long = "set", value_name = "SECTION.KEY=VALUE")]
    set: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let overrides: Vec<Override> = args
        .set
        .iter()
        .map(|arg| parse_override(arg))
        .collect::<Result<_, _>>()?;

    let config = load_config(&args.config, &overrides)?;
    config.validate()?;

    let _log_handle = init_logging(&config.logging.filter).map_err(anyhow::Error::msg)?;

    let registry = Registry::new(&config.type_specs()?)?;
    let cache = open_cache(&config, &registry)?;

    let service = Arc::new(Service::new(
        config,
        args.config,
        overrides,
        cache,
        registry,
    ));

    info!("starting control loop");
    run_control_loop(service).await?;

    info!("exit");
    Ok(())
}
