use anyhow::Result;

use hintbatch::config::Config;
use hintbatch::service::Service;

use super::{build_runner, shutdown_signal};

/// Poll the input directory until a shutdown signal arrives
pub async fn watch(config: Config) -> Result<()> {
    let shutdown = shutdown_signal();
    let runner = build_runner(&config, shutdown.clone())?;

    println!("Watching for input");
    println!("==================");
    println!("Input file: {}", config.service.input_path().display());
    println!("Processed directory: {}", config.service.processed_dir().display());
    println!("Output directory: {}", config.output.dir.display());
    println!("Poll interval: {}s", config.service.poll_interval_secs);
    println!("API keys: {}", runner.pool().len());
    println!("\nPress Ctrl+C to stop");

    let mut service =
        Service::new(runner, config.service.clone(), config.output.dir.clone()).with_shutdown(shutdown);
    service.run().await?;

    println!("\nAPI Key Usage");
    println!("-------------");
    for usage in service.runner().pool().usage() {
        println!("{}: {} requests", usage.identity, usage.requests);
    }
    Ok(())
}
